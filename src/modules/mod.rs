//! # Sync Modules
//!
//! A module is one pluggable synchronization workload. Every module exposes
//! the same lifecycle through the [`Module`] trait:
//!
//! - **Configure**: `setup_module` on the server, then `configuration_values` /
//!   `set_configuration` to move the configuration through `config.yaml`
//! - **Produce**: `sync` builds a [`SyncObject`] describing the work
//! - **Execute**: the client turns a received [`SyncObject`] into local actions
//!
//! The [`ModuleRegistry`] maps module ids to instances and is built once at
//! process start.

pub mod databasesync;
pub mod filesystem;
pub mod updater;

use crate::error::{Result, SyncError};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

pub use databasesync::{DatabaseSyncModule, DatabaseSyncObject};
pub use filesystem::{FileSyncModule, FileSyncObject};
pub use updater::{UpdateObject, UpdaterModule};

/// Capability set shared by every synchronizable workload.
///
/// Configuration is held behind interior mutability so a single shared
/// instance can be hydrated by the dispatcher while other requests read it.
#[async_trait]
pub trait Module: Send + Sync {
    /// Stable identifier used for registry lookup and module matching.
    fn id(&self) -> &'static str;

    /// Populate the configuration from operator-supplied arguments.
    fn setup_module(&self, args: &[String]) -> Result<()>;

    /// Current configuration as a generic value tree, ready for `config.yaml`.
    fn configuration_values(&self) -> Value;

    /// Re-hydrate the configuration from a generic value tree.
    fn set_configuration(&self, value: &Value) -> Result<()>;

    /// Server side: describe the current work.
    fn sync(&self) -> Result<SyncObject>;

    /// Client side: an empty instance of the variant this module expects.
    fn sync_object_instance(&self) -> SyncObject;

    /// Client side: carry out the instructions in `object`.
    async fn execute_commands(&self, object: SyncObject) -> Result<ExecutionReport>;

    /// Extra HTTP routes served alongside the RPC endpoint.
    fn routes(&self) -> Option<axum::Router> {
        None
    }
}

/// Module-produced description of work, one variant per module.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncObject {
    FileSync(FileSyncObject),
    DatabaseSync(DatabaseSyncObject),
    Updater(UpdateObject),
}

impl SyncObject {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::FileSync(_) => filesystem::ID,
            Self::DatabaseSync(_) => databasesync::ID,
            Self::Updater(_) => updater::ID,
        }
    }

    pub fn to_value(&self) -> Result<Value> {
        let value = match self {
            Self::FileSync(object) => serde_json::to_value(object)?,
            Self::DatabaseSync(object) => serde_json::to_value(object)?,
            Self::Updater(object) => serde_json::to_value(object)?,
        };
        Ok(value)
    }

    /// Fill this instance from a generic payload, keeping the variant.
    pub fn parse_response(&mut self, value: &Value) -> Result<()> {
        match self {
            Self::FileSync(object) => *object = FileSyncObject::from_value(value)?,
            Self::DatabaseSync(object) => *object = DatabaseSyncObject::from_value(value)?,
            Self::Updater(object) => *object = UpdateObject::from_value(value)?,
        }
        Ok(())
    }
}

/// One item that could not be carried out.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemFailure {
    pub item: String,
    pub reason: String,
}

/// Per-item outcome of `execute_commands`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionReport {
    pub succeeded: Vec<String>,
    pub failed: Vec<ItemFailure>,
}

impl ExecutionReport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_success(&mut self, item: impl Into<String>) {
        self.succeeded.push(item.into());
    }

    pub fn record_failure(&mut self, item: impl Into<String>, reason: impl Into<String>) {
        self.failed.push(ItemFailure {
            item: item.into(),
            reason: reason.into(),
        });
    }

    pub fn total(&self) -> usize {
        self.succeeded.len() + self.failed.len()
    }

    pub fn failed_items(&self) -> Vec<String> {
        self.failed.iter().map(|f| f.item.clone()).collect()
    }

    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }

    /// `PartialFailure` as soon as a single item failed.
    pub fn into_result(self) -> Result<Self> {
        if self.is_success() {
            Ok(self)
        } else {
            Err(SyncError::PartialFailure(self))
        }
    }
}

/// Process-level settings modules need to do their work.
#[derive(Debug, Clone)]
pub struct ModuleContext {
    /// Base URL the server advertises in sync objects.
    pub public_url: String,
    /// Where the client writes downloaded artifacts.
    pub download_dir: PathBuf,
    pub request_timeout: Duration,
}

impl Default for ModuleContext {
    fn default() -> Self {
        Self {
            public_url: "http://localhost:8080".to_string(),
            download_dir: PathBuf::from("."),
            request_timeout: Duration::from_secs(30),
        }
    }
}

/// String id -> module instance, resolved once at startup.
#[derive(Default)]
pub struct ModuleRegistry {
    modules: HashMap<String, Arc<dyn Module>>,
}

impl ModuleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_default_modules(context: ModuleContext) -> Result<Self> {
        let mut registry = Self::new();
        registry.register(Arc::new(FileSyncModule::new(context)))?;
        registry.register(Arc::new(DatabaseSyncModule::new()))?;
        registry.register(Arc::new(UpdaterModule::new()))?;
        Ok(registry)
    }

    pub fn register(&mut self, module: Arc<dyn Module>) -> Result<()> {
        let id = module.id();
        if self.modules.contains_key(id) {
            return Err(SyncError::config(format!("module {} is already registered", id)));
        }
        self.modules.insert(id.to_string(), module);
        Ok(())
    }

    pub fn get(&self, id: &str) -> Result<Arc<dyn Module>> {
        self.modules
            .get(id)
            .cloned()
            .ok_or_else(|| SyncError::not_found(format!("module {} not found", id)))
    }

    /// Registered ids in sorted order.
    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.modules.keys().cloned().collect();
        ids.sort();
        ids
    }
}

// Field extraction helpers for generic payloads.

pub(crate) fn as_object<'a>(value: &'a Value, what: &str) -> Result<&'a Map<String, Value>> {
    value
        .as_object()
        .ok_or_else(|| SyncError::corrupt(format!("{}: expected an object", what)))
}

pub(crate) fn string_list(value: &Value, what: &str) -> Result<Vec<String>> {
    let items = value
        .as_array()
        .ok_or_else(|| SyncError::corrupt(format!("{}: expected a list", what)))?;

    items
        .iter()
        .map(|item| {
            item.as_str()
                .map(str::to_string)
                .ok_or_else(|| SyncError::corrupt(format!("{}: expected a list of strings", what)))
        })
        .collect()
}

pub(crate) fn optional_string(
    map: &Map<String, Value>,
    key: &str,
    what: &str,
) -> Result<Option<String>> {
    match map.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.clone())),
        Some(Value::Number(n)) => Ok(Some(n.to_string())),
        Some(_) => Err(SyncError::corrupt(format!("{}: field {} must be a string", what, key))),
    }
}

/// Accepts a JSON number or a numeric string.
pub(crate) fn optional_u64(map: &Map<String, Value>, key: &str, what: &str) -> Result<Option<u64>> {
    let invalid = || {
        SyncError::corrupt(format!("{}: field {} must be a non-negative integer", what, key))
    };
    match map.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(n)) => n.as_u64().map(Some).ok_or_else(invalid),
        Some(Value::String(s)) => s.trim().parse().map(Some).map_err(|_| invalid()),
        Some(_) => Err(invalid()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_registry_lookup() {
        let registry = ModuleRegistry::with_default_modules(ModuleContext::default()).unwrap();

        assert_eq!(registry.ids(), vec!["databasesync", "filesystem", "updater"]);
        assert_eq!(registry.get("filesystem").unwrap().id(), "filesystem");
        assert!(matches!(registry.get("nope"), Err(SyncError::NotFound(_))));
    }

    #[test]
    fn test_registry_rejects_duplicate_ids() {
        let mut registry = ModuleRegistry::new();
        registry.register(Arc::new(UpdaterModule::new())).unwrap();

        let result = registry.register(Arc::new(UpdaterModule::new()));
        assert!(matches!(result, Err(SyncError::Config(_))));
    }

    #[test]
    fn test_sync_object_instance_matches_module() {
        let registry = ModuleRegistry::with_default_modules(ModuleContext::default()).unwrap();
        for id in registry.ids() {
            let module = registry.get(&id).unwrap();
            assert_eq!(module.sync_object_instance().kind(), id);
        }
    }

    #[test]
    fn test_parse_response_keeps_variant() {
        let mut object = SyncObject::FileSync(FileSyncObject::default());
        object
            .parse_response(&json!({"DownloadUrl": "http://h/download/x", "Files": ["a.txt"]}))
            .unwrap();

        assert_eq!(
            object,
            SyncObject::FileSync(FileSyncObject {
                download_url: "http://h/download/x".to_string(),
                files: vec!["a.txt".to_string()],
            })
        );
    }

    #[test]
    fn test_execution_report_result() {
        let mut report = ExecutionReport::new();
        report.record_success("a.txt");
        assert!(report.clone().into_result().is_ok());

        report.record_failure("b.txt", "HTTP 404");
        assert_eq!(report.total(), 2);
        assert_eq!(report.failed_items(), vec!["b.txt"]);
        assert!(matches!(
            report.into_result(),
            Err(SyncError::PartialFailure(r)) if r.succeeded == vec!["a.txt"]
        ));
    }

    #[test]
    fn test_value_helpers() {
        let value = json!({"port": "5432", "count": 3, "name": 7, "bad": [1]});
        let map = as_object(&value, "test").unwrap();

        assert_eq!(optional_u64(map, "port", "test").unwrap(), Some(5432));
        assert_eq!(optional_u64(map, "count", "test").unwrap(), Some(3));
        assert_eq!(optional_u64(map, "missing", "test").unwrap(), None);
        assert_eq!(optional_string(map, "name", "test").unwrap(), Some("7".to_string()));
        assert!(optional_string(map, "bad", "test").is_err());
        assert!(string_list(&json!(["a", 1]), "test").is_err());
        assert!(as_object(&json!([]), "test").is_err());
    }
}
