//! # File Sync Module
//!
//! Transfers a fixed list of server-side files to every client.
//!
//! Configuration shape:
//!
//! ```yaml
//! config:
//!   files:
//!     - /srv/share/a.txt
//!     - /srv/share/b.bin
//! ```
//!
//! `sync()` issues a fresh action id and advertises
//! `<public_url>/download/<action_id>` together with the base names of the
//! configured files. The client then posts `FileSync.HandleDownload` to
//! `<download_url>/<file name>` for every file concurrently and writes each
//! decoded body into its download directory.

use super::{as_object, string_list, ExecutionReport, Module, ModuleContext, SyncObject};
use crate::client::RpcClient;
use crate::error::{Result, SyncError};
use crate::rpc::{RpcRequest, RpcResponse};
use async_trait::async_trait;
use axum::body::Bytes;
use axum::extract::{Path as UrlPath, State};
use axum::routing::post;
use axum::{Json, Router};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use indicatif::{ProgressBar, ProgressStyle};
use parking_lot::RwLock;
use reqwest::Url;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

pub const ID: &str = "filesystem";
pub const METHOD_HANDLE_DOWNLOAD: &str = "FileSync.HandleDownload";

/// How long an issued action id accepts download requests.
const ACTION_TTL_HOURS: i64 = 24;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileSyncConfig {
    pub files: Vec<String>,
}

/// Work description: where to download from and which files.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct FileSyncObject {
    pub download_url: String,
    pub files: Vec<String>,
}

impl FileSyncObject {
    /// Field-by-field extraction: `DownloadUrl` is required, `Files` may be absent.
    pub fn from_value(value: &Value) -> Result<Self> {
        let map = as_object(value, "file sync object")?;

        let download_url = map
            .get("DownloadUrl")
            .and_then(Value::as_str)
            .ok_or_else(|| SyncError::corrupt("file sync object: missing DownloadUrl"))?
            .to_string();

        let files = match map.get("Files") {
            None | Some(Value::Null) => Vec::new(),
            Some(files) => string_list(files, "file sync object Files")?,
        };

        Ok(Self { download_url, files })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadResponse {
    pub filename: String,
    #[serde(default)]
    pub contents: String,
}

struct FileSyncState {
    context: ModuleContext,
    config: RwLock<Option<FileSyncConfig>>,
    actions: RwLock<HashMap<String, DateTime<Utc>>>,
}

impl FileSyncState {
    fn is_active_action(&self, action_id: &str) -> bool {
        self.actions
            .read()
            .get(action_id)
            .map(|issued| Utc::now() - *issued < ChronoDuration::hours(ACTION_TTL_HOURS))
            .unwrap_or(false)
    }

    /// Full path of the configured file whose base name is `filename`.
    fn resolve_file(&self, filename: &str) -> Option<PathBuf> {
        let config = self.config.read();
        config
            .as_ref()?
            .files
            .iter()
            .map(PathBuf::from)
            .find(|path| base_name(path).as_deref() == Some(filename))
    }
}

pub struct FileSyncModule {
    state: Arc<FileSyncState>,
}

impl FileSyncModule {
    pub fn new(context: ModuleContext) -> Self {
        Self {
            state: Arc::new(FileSyncState {
                context,
                config: RwLock::new(None),
                actions: RwLock::new(HashMap::new()),
            }),
        }
    }

    pub fn configuration(&self) -> Option<FileSyncConfig> {
        self.state.config.read().clone()
    }

    fn store_files(&self, files: Vec<String>) -> Result<()> {
        let mut seen = HashSet::new();
        for file in &files {
            let name = base_name(Path::new(file))
                .ok_or_else(|| SyncError::config(format!("{} has no file name", file)))?;
            if !seen.insert(name.clone()) {
                return Err(SyncError::config(format!(
                    "more than one configured file is named {}",
                    name
                )));
            }
        }

        *self.state.config.write() = Some(FileSyncConfig { files });
        Ok(())
    }
}

#[async_trait]
impl Module for FileSyncModule {
    fn id(&self) -> &'static str {
        ID
    }

    /// Each argument is a path to an existing regular file.
    fn setup_module(&self, args: &[String]) -> Result<()> {
        if args.is_empty() {
            return Err(SyncError::config("filesystem module needs at least one file"));
        }

        let mut files = Vec::with_capacity(args.len());
        for arg in args {
            let path = std::fs::canonicalize(arg)
                .map_err(|e| SyncError::config(format!("cannot use {}: {}", arg, e)))?;
            if !path.is_file() {
                return Err(SyncError::config(format!("{} is not a regular file", path.display())));
            }
            files.push(path.to_string_lossy().to_string());
        }

        self.store_files(files)?;
        info!("Configured {} files for synchronization", args.len());
        Ok(())
    }

    fn configuration_values(&self) -> Value {
        let files = self.configuration().map(|c| c.files).unwrap_or_default();
        json!({ "files": files })
    }

    /// Accepts `{"files": [..]}`, any mapping whose values are lists of
    /// paths, or a bare list.
    fn set_configuration(&self, value: &Value) -> Result<()> {
        let files = match value {
            Value::Array(_) => string_list(value, "filesystem configuration")
                .map_err(|e| SyncError::config(e.to_string()))?,
            Value::Object(map) => {
                let mut files = Vec::new();
                for (key, entry) in map {
                    let entries = string_list(entry, &format!("filesystem configuration {}", key))
                        .map_err(|e| SyncError::config(e.to_string()))?;
                    files.extend(entries);
                }
                files
            }
            Value::Null => return Err(SyncError::config("filesystem module has no configuration")),
            _ => return Err(SyncError::config("filesystem configuration must be a mapping")),
        };

        self.store_files(files)
    }

    fn sync(&self) -> Result<SyncObject> {
        let config = self
            .configuration()
            .ok_or_else(|| SyncError::config("filesystem module is not configured"))?;

        let action_id = Uuid::new_v4().to_string();
        {
            let mut actions = self.state.actions.write();
            let cutoff = Utc::now() - ChronoDuration::hours(ACTION_TTL_HOURS);
            actions.retain(|_, issued| *issued > cutoff);
            actions.insert(action_id.clone(), Utc::now());
        }

        let download_url = format!(
            "{}/download/{}",
            self.state.context.public_url.trim_end_matches('/'),
            action_id
        );
        let files = config
            .files
            .iter()
            .filter_map(|file| base_name(Path::new(file)))
            .collect();

        debug!("Issued action {}", action_id);
        Ok(SyncObject::FileSync(FileSyncObject { download_url, files }))
    }

    fn sync_object_instance(&self) -> SyncObject {
        SyncObject::FileSync(FileSyncObject::default())
    }

    async fn execute_commands(&self, object: SyncObject) -> Result<ExecutionReport> {
        let SyncObject::FileSync(object) = object else {
            return Err(SyncError::corrupt(format!(
                "filesystem module cannot execute a {} sync object",
                object.kind()
            )));
        };

        let client = RpcClient::new(self.state.context.request_timeout)?;
        let download_dir = self.state.context.download_dir.clone();
        tokio::fs::create_dir_all(&download_dir).await?;

        let progress = ProgressBar::new(object.files.len() as u64);
        progress.set_style(
            ProgressStyle::with_template("{spinner} [{bar:30}] {pos}/{len} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_bar()),
        );

        let handles: Vec<_> = object
            .files
            .iter()
            .map(|filename| {
                let client = client.clone();
                let download_url = object.download_url.clone();
                let download_dir = download_dir.clone();
                let filename = filename.clone();
                let progress = progress.clone();

                tokio::spawn(async move {
                    let result =
                        download_file(&client, &download_url, &filename, &download_dir).await;
                    progress.inc(1);
                    progress.set_message(filename);
                    result
                })
            })
            .collect();

        let results = futures::future::join_all(handles).await;
        progress.finish_and_clear();

        let mut report = ExecutionReport::new();
        for (filename, result) in object.files.iter().zip(results) {
            match result {
                Ok(Ok(path)) => {
                    info!("Downloaded {} to {}", filename, path.display());
                    report.record_success(filename.as_str());
                }
                Ok(Err(e)) => {
                    warn!("Download of {} failed: {}", filename, e);
                    report.record_failure(filename.as_str(), e.to_string());
                }
                Err(e) => {
                    warn!("Download task for {} aborted: {}", filename, e);
                    report.record_failure(filename.as_str(), e.to_string());
                }
            }
        }

        report.into_result()
    }

    fn routes(&self) -> Option<Router> {
        Some(
            Router::new()
                .route("/download/:action_id/:filename", post(handle_download))
                .with_state(self.state.clone()),
        )
    }
}

async fn download_file(
    client: &RpcClient,
    download_url: &str,
    filename: &str,
    download_dir: &Path,
) -> Result<PathBuf> {
    if base_name(Path::new(filename)).as_deref() != Some(filename) {
        return Err(SyncError::corrupt(format!(
            "refusing to write unsafe file name {:?}",
            filename
        )));
    }

    let url = file_url(download_url, filename)?;
    let request = RpcRequest::new(METHOD_HANDLE_DOWNLOAD, &json!({}))?;
    let result = client.call(url.as_str(), request).await?;

    let response: DownloadResponse = serde_json::from_value(result)
        .map_err(|e| SyncError::corrupt(format!("invalid download reply: {}", e)))?;
    let contents = STANDARD
        .decode(response.contents.as_bytes())
        .map_err(|e| SyncError::corrupt(format!("invalid file contents: {}", e)))?;

    let target = download_dir.join(filename);
    tokio::fs::write(&target, contents).await?;
    Ok(target)
}

async fn handle_download(
    State(state): State<Arc<FileSyncState>>,
    UrlPath((action_id, filename)): UrlPath<(String, String)>,
    body: Bytes,
) -> Json<RpcResponse> {
    let request: RpcRequest = match serde_json::from_slice(&body) {
        Ok(request) => request,
        Err(e) => {
            let error = SyncError::corrupt(format!("invalid request: {}", e));
            return Json(RpcResponse::failure("", &error));
        }
    };

    let response = match serve_file(&state, &request, &action_id, &filename).await {
        Ok(download) => RpcResponse::success(&request.id, &download),
        Err(e) => Err(e),
    };

    Json(response.unwrap_or_else(|e| {
        debug!("Download of {} refused: {}", filename, e);
        RpcResponse::failure(&request.id, &e)
    }))
}

async fn serve_file(
    state: &FileSyncState,
    request: &RpcRequest,
    action_id: &str,
    filename: &str,
) -> Result<DownloadResponse> {
    if request.method != METHOD_HANDLE_DOWNLOAD {
        return Err(SyncError::not_found(format!("method {} not found", request.method)));
    }
    if !state.is_active_action(action_id) {
        return Err(SyncError::not_found(format!("unknown action {}", action_id)));
    }
    let path = state
        .resolve_file(filename)
        .ok_or_else(|| SyncError::not_found(format!("requested file {} not found", filename)))?;

    let contents = match tokio::fs::read(&path).await {
        Ok(contents) => contents,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(SyncError::not_found(format!("requested file {} not found", filename)))
        }
        Err(e) => return Err(e.into()),
    };

    debug!("Serving {} ({} bytes) for action {}", filename, contents.len(), action_id);
    Ok(DownloadResponse {
        filename: filename.to_string(),
        contents: STANDARD.encode(contents),
    })
}

/// `download_url` with `filename` appended as one percent-encoded path segment.
fn file_url(download_url: &str, filename: &str) -> Result<Url> {
    let mut url = Url::parse(download_url)
        .map_err(|e| SyncError::corrupt(format!("invalid download url {}: {}", download_url, e)))?;
    url.path_segments_mut()
        .map_err(|_| {
            SyncError::corrupt(format!("download url {} cannot carry a path", download_url))
        })?
        .pop_if_empty()
        .push(filename);
    Ok(url)
}

fn base_name(path: &Path) -> Option<String> {
    path.file_name().map(|name| name.to_string_lossy().to_string())
}
