//! # Configuration Management
//!
//! A single `config.yaml` in the working directory records which role this
//! installation plays and which module it synchronizes:
//!
//! ```yaml
//! mode: server
//! username: server
//! module: filesystem
//! config:
//!   files:
//!     - /srv/share/a.txt
//! ```
//!
//! The `config` block is free-form and owned by the module; it is kept as a
//! generic value tree and handed to `Module::set_configuration`. Connection
//! and directory settings are optional and fall back to local defaults.

use crate::crypto::KeyStore;
use crate::modules::ModuleContext;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_CONFIG_FILE: &str = "config.yaml";
pub const DEFAULT_SERVER_URL: &str = "http://localhost:8080";
pub const DEFAULT_LISTEN_ADDR: &str = "0.0.0.0:8080";
pub const DEFAULT_KEYS_DIR: &str = "private/keys";

/// Role of this installation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    Server,
    Client,
}

impl std::fmt::Display for Mode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Mode::Server => write!(f, "server"),
            Mode::Client => write!(f, "client"),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AppConfiguration {
    pub mode: Mode,
    #[serde(default)]
    pub username: String,
    pub module: String,
    /// Module-specific settings.
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub config: Value,

    /// Where a client reaches the server.
    #[serde(default = "default_server_url")]
    pub server_url: String,
    /// Where a server accepts connections.
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
    /// Base URL a server advertises in sync objects.
    #[serde(default = "default_server_url")]
    pub public_url: String,
    #[serde(default = "default_keys_dir")]
    pub keys_dir: PathBuf,
    #[serde(default = "default_download_dir")]
    pub download_dir: PathBuf,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    #[serde(skip)]
    pub config_file_path: PathBuf,
}

fn default_server_url() -> String {
    DEFAULT_SERVER_URL.to_string()
}

fn default_listen_addr() -> String {
    DEFAULT_LISTEN_ADDR.to_string()
}

fn default_keys_dir() -> PathBuf {
    PathBuf::from(DEFAULT_KEYS_DIR)
}

fn default_download_dir() -> PathBuf {
    PathBuf::from(".")
}

fn default_request_timeout_secs() -> u64 {
    30
}

impl AppConfiguration {
    pub fn new(
        mode: Mode,
        module: impl Into<String>,
        config_file_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            mode,
            username: String::new(),
            module: module.into(),
            config: Value::Null,
            server_url: default_server_url(),
            listen_addr: default_listen_addr(),
            public_url: default_server_url(),
            keys_dir: default_keys_dir(),
            download_dir: default_download_dir(),
            request_timeout_secs: default_request_timeout_secs(),
            config_file_path: config_file_path.into(),
        }
    }

    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            anyhow::bail!(
                "No configuration at {}. \
                 Run 'lazysync setup server' or 'lazysync setup client' first.",
                path.display()
            );
        }

        let content = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let mut config: AppConfiguration = serde_yaml::from_str(&content)
            .with_context(|| format!("Invalid configuration in {}", path.display()))?;
        config.config_file_path = path.to_path_buf();

        if config.module.is_empty() {
            anyhow::bail!("Configuration {} does not name a module", path.display());
        }
        if config.request_timeout_secs == 0 {
            anyhow::bail!(
                "Configuration {} sets request_timeout_secs to 0; use a positive number of seconds",
                path.display()
            );
        }

        Ok(config)
    }

    pub async fn save(&self) -> Result<()> {
        let content = serde_yaml::to_string(self)?;
        if let Some(parent) = self.config_file_path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        tokio::fs::write(&self.config_file_path, content)
            .await
            .with_context(|| format!("Failed to write {}", self.config_file_path.display()))?;
        Ok(())
    }

    pub fn config_path(&self) -> &Path {
        &self.config_file_path
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn key_store(&self) -> KeyStore {
        KeyStore::new(&self.keys_dir)
    }

    pub fn module_context(&self) -> ModuleContext {
        ModuleContext {
            public_url: self.public_url.clone(),
            download_dir: self.download_dir.clone(),
            request_timeout: self.request_timeout(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn create_test_config(temp_dir: &TempDir) -> AppConfiguration {
        let mut config =
            AppConfiguration::new(Mode::Server, "filesystem", temp_dir.path().join("config.yaml"));
        config.username = "server".to_string();
        config.config = json!({"files": ["/srv/a.txt", "/srv/b.txt"]});
        config
    }

    #[tokio::test]
    async fn test_config_save_and_load() {
        let temp_dir = TempDir::new().unwrap();
        let config = create_test_config(&temp_dir);

        config.save().await.unwrap();
        let loaded = AppConfiguration::load(config.config_path()).await.unwrap();

        assert_eq!(loaded, config);
        assert_eq!(loaded.mode, Mode::Server);
        assert_eq!(loaded.config["files"][1], "/srv/b.txt");
    }

    #[tokio::test]
    async fn test_yaml_layout() {
        let temp_dir = TempDir::new().unwrap();
        create_test_config(&temp_dir).save().await.unwrap();

        let content = tokio::fs::read_to_string(temp_dir.path().join("config.yaml")).await.unwrap();
        assert!(content.contains("mode: server"));
        assert!(content.contains("module: filesystem"));
        assert!(content.contains("- /srv/a.txt"));
    }

    #[tokio::test]
    async fn test_minimal_file_uses_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("config.yaml");
        tokio::fs::write(&path, "mode: client\nusername: amber_basil\nmodule: filesystem\n")
            .await
            .unwrap();

        let config = AppConfiguration::load(&path).await.unwrap();
        assert_eq!(config.mode, Mode::Client);
        assert_eq!(config.server_url, DEFAULT_SERVER_URL);
        assert_eq!(config.keys_dir, PathBuf::from(DEFAULT_KEYS_DIR));
        assert_eq!(config.request_timeout(), Duration::from_secs(30));
        assert!(config.config.is_null());
    }

    #[tokio::test]
    async fn test_load_missing_file() {
        let temp_dir = TempDir::new().unwrap();
        let result = AppConfiguration::load(temp_dir.path().join("config.yaml")).await;

        let message = result.unwrap_err().to_string();
        assert!(message.contains("lazysync setup"));
    }

    #[tokio::test]
    async fn test_load_rejects_unknown_mode() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("config.yaml");
        tokio::fs::write(&path, "mode: relay\nmodule: filesystem\n").await.unwrap();

        assert!(AppConfiguration::load(&path).await.is_err());
    }

    #[tokio::test]
    async fn test_load_rejects_zero_timeout() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("config.yaml");
        tokio::fs::write(&path, "mode: client\nmodule: filesystem\nrequest_timeout_secs: 0\n")
            .await
            .unwrap();

        let message = AppConfiguration::load(&path).await.unwrap_err().to_string();
        assert!(message.contains("request_timeout_secs"));
    }

    #[test]
    fn test_module_context() {
        let mut config = AppConfiguration::new(Mode::Client, "filesystem", "config.yaml");
        config.download_dir = PathBuf::from("/tmp/downloads");
        config.request_timeout_secs = 5;

        let context = config.module_context();
        assert_eq!(context.download_dir, PathBuf::from("/tmp/downloads"));
        assert_eq!(context.request_timeout, Duration::from_secs(5));
        assert_eq!(context.public_url, DEFAULT_SERVER_URL);
    }
}
