//! Application updater module.
//!
//! Announces the application name and version the server distributes.
//! Clients only log the announcement for now.

use super::{as_object, optional_string, optional_u64, ExecutionReport, Module, SyncObject};
use crate::error::{Result, SyncError};
use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::info;

pub const ID: &str = "updater";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateConfig {
    pub name: String,
    pub version: u64,
}

impl Default for UpdateConfig {
    fn default() -> Self {
        Self {
            name: env!("CARGO_PKG_NAME").to_string(),
            version: 1,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateObject {
    pub name: String,
    pub version: u64,
}

impl UpdateObject {
    pub fn from_value(value: &Value) -> Result<Self> {
        const WHAT: &str = "update object";
        let map = as_object(value, WHAT)?;

        Ok(Self {
            name: optional_string(map, "name", WHAT)?
                .ok_or_else(|| SyncError::corrupt("update object: missing name"))?,
            version: optional_u64(map, "version", WHAT)?
                .ok_or_else(|| SyncError::corrupt("update object: missing version"))?,
        })
    }
}

#[derive(Default)]
pub struct UpdaterModule {
    config: RwLock<Option<UpdateConfig>>,
}

impl UpdaterModule {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn configuration(&self) -> Option<UpdateConfig> {
        self.config.read().clone()
    }
}

#[async_trait]
impl Module for UpdaterModule {
    fn id(&self) -> &'static str {
        ID
    }

    /// Accepts `name=<app>` and `version=<n>`.
    fn setup_module(&self, args: &[String]) -> Result<()> {
        let mut config = UpdateConfig::default();
        for arg in args {
            match arg.split_once('=') {
                Some(("name", name)) if !name.is_empty() => config.name = name.to_string(),
                Some(("version", version)) => {
                    config.version = version
                        .parse()
                        .map_err(|_| SyncError::config(format!("invalid version {}", version)))?;
                }
                _ => return Err(SyncError::config(format!("unexpected updater argument {}", arg))),
            }
        }

        *self.config.write() = Some(config);
        Ok(())
    }

    fn configuration_values(&self) -> Value {
        serde_json::to_value(self.configuration().unwrap_or_default()).unwrap_or(Value::Null)
    }

    fn set_configuration(&self, value: &Value) -> Result<()> {
        const WHAT: &str = "updater configuration";
        if value.is_null() {
            return Err(SyncError::config("updater module has no configuration"));
        }
        let map = as_object(value, WHAT).map_err(|e| SyncError::config(e.to_string()))?;

        let mut config = UpdateConfig::default();
        let name =
            optional_string(map, "name", WHAT).map_err(|e| SyncError::config(e.to_string()))?;
        if let Some(name) = name {
            config.name = name;
        }
        let version =
            optional_u64(map, "version", WHAT).map_err(|e| SyncError::config(e.to_string()))?;
        if let Some(version) = version {
            config.version = version;
        }

        *self.config.write() = Some(config);
        Ok(())
    }

    fn sync(&self) -> Result<SyncObject> {
        let config = self
            .configuration()
            .ok_or_else(|| SyncError::config("updater module is not configured"))?;

        Ok(SyncObject::Updater(UpdateObject {
            name: config.name,
            version: config.version,
        }))
    }

    fn sync_object_instance(&self) -> SyncObject {
        SyncObject::Updater(UpdateObject::default())
    }

    async fn execute_commands(&self, object: SyncObject) -> Result<ExecutionReport> {
        let SyncObject::Updater(object) = object else {
            return Err(SyncError::corrupt(format!(
                "updater module cannot execute a {} sync object",
                object.kind()
            )));
        };

        info!("Server distributes {} version {}", object.name, object.version);
        Ok(ExecutionReport::new())
    }
}
