//! Database mirroring module.
//!
//! Only configuration and the sync description exist so far; executing a
//! database sync object does nothing yet.

use super::{as_object, optional_string, optional_u64, ExecutionReport, Module, SyncObject};
use crate::error::{Result, SyncError};
use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, warn};

pub const ID: &str = "databasesync";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub database: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 80,
            username: "admin".to_string(),
            password: "admin".to_string(),
            database: "main".to_string(),
        }
    }
}

impl DatabaseConfig {
    fn apply(&mut self, key: &str, value: &str) -> Result<()> {
        match key {
            "host" => self.host = value.to_string(),
            "port" => self.port = parse_port(value)?,
            "username" => self.username = value.to_string(),
            "password" => self.password = value.to_string(),
            "database" => self.database = value.to_string(),
            other => return Err(SyncError::config(format!("unknown database setting {}", other))),
        }
        Ok(())
    }
}

/// Connection target handed to clients. Credentials are not included.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseSyncObject {
    pub host: String,
    pub port: u16,
    pub database: String,
}

impl DatabaseSyncObject {
    pub fn from_value(value: &Value) -> Result<Self> {
        const WHAT: &str = "database sync object";
        let map = as_object(value, WHAT)?;

        let host = optional_string(map, "host", WHAT)?
            .ok_or_else(|| SyncError::corrupt("database sync object: missing host"))?;
        let port = optional_u64(map, "port", WHAT)?
            .ok_or_else(|| SyncError::corrupt("database sync object: missing port"))?;
        let port = u16::try_from(port)
            .map_err(|_| SyncError::corrupt("database sync object: port out of range"))?;
        let database = optional_string(map, "database", WHAT)?.unwrap_or_default();

        Ok(Self { host, port, database })
    }
}

#[derive(Default)]
pub struct DatabaseSyncModule {
    config: RwLock<Option<DatabaseConfig>>,
}

impl DatabaseSyncModule {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn configuration(&self) -> Option<DatabaseConfig> {
        self.config.read().clone()
    }
}

#[async_trait]
impl Module for DatabaseSyncModule {
    fn id(&self) -> &'static str {
        ID
    }

    /// Defaults, then `key=value` overrides.
    fn setup_module(&self, args: &[String]) -> Result<()> {
        let mut config = DatabaseConfig::default();
        for arg in args {
            let (key, value) = arg
                .split_once('=')
                .ok_or_else(|| SyncError::config(format!("expected key=value, got {}", arg)))?;
            config.apply(key.trim(), value.trim())?;
        }

        info!("Configured database {} on {}:{}", config.database, config.host, config.port);
        *self.config.write() = Some(config);
        Ok(())
    }

    fn configuration_values(&self) -> Value {
        serde_json::to_value(self.configuration().unwrap_or_default()).unwrap_or(Value::Null)
    }

    /// Missing fields keep their defaults; `port` may be a number or a numeric string.
    fn set_configuration(&self, value: &Value) -> Result<()> {
        const WHAT: &str = "databasesync configuration";
        if value.is_null() {
            return Err(SyncError::config("databasesync module has no configuration"));
        }
        let map = as_object(value, WHAT).map_err(|e| SyncError::config(e.to_string()))?;

        let mut config = DatabaseConfig::default();
        for key in ["host", "username", "password", "database"] {
            let setting =
                optional_string(map, key, WHAT).map_err(|e| SyncError::config(e.to_string()))?;
            if let Some(setting) = setting {
                config.apply(key, &setting)?;
            }
        }
        let port = optional_u64(map, "port", WHAT).map_err(|e| SyncError::config(e.to_string()))?;
        if let Some(port) = port {
            config.port = u16::try_from(port)
                .map_err(|_| SyncError::config(format!("port {} out of range", port)))?;
        }

        *self.config.write() = Some(config);
        Ok(())
    }

    fn sync(&self) -> Result<SyncObject> {
        let config = self
            .configuration()
            .ok_or_else(|| SyncError::config("databasesync module is not configured"))?;

        Ok(SyncObject::DatabaseSync(DatabaseSyncObject {
            host: config.host,
            port: config.port,
            database: config.database,
        }))
    }

    fn sync_object_instance(&self) -> SyncObject {
        SyncObject::DatabaseSync(DatabaseSyncObject::default())
    }

    async fn execute_commands(&self, object: SyncObject) -> Result<ExecutionReport> {
        let SyncObject::DatabaseSync(object) = object else {
            return Err(SyncError::corrupt(format!(
                "databasesync module cannot execute a {} sync object",
                object.kind()
            )));
        };

        warn!(
            "Database mirroring of {} on {}:{} is not implemented, nothing to do",
            object.database, object.host, object.port
        );
        Ok(ExecutionReport::new())
    }
}

fn parse_port(value: &str) -> Result<u16> {
    value
        .parse()
        .map_err(|_| SyncError::config(format!("invalid port {}", value)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_setup_defaults_and_overrides() {
        let module = DatabaseSyncModule::new();
        module.setup_module(&[]).unwrap();
        assert_eq!(module.configuration().unwrap(), DatabaseConfig::default());

        module
            .setup_module(&["host=db.internal".to_string(), "port=5432".to_string()])
            .unwrap();
        let config = module.configuration().unwrap();
        assert_eq!(config.host, "db.internal");
        assert_eq!(config.port, 5432);
        assert_eq!(config.database, "main");
    }

    #[test]
    fn test_setup_rejects_bad_arguments() {
        let module = DatabaseSyncModule::new();
        assert!(module.setup_module(&["host".to_string()]).is_err());
        assert!(module.setup_module(&["colour=blue".to_string()]).is_err());
        assert!(module.setup_module(&["port=http".to_string()]).is_err());
    }

    #[test]
    fn test_configuration_round_trip() {
        let module = DatabaseSyncModule::new();
        module.setup_module(&["database=orders".to_string()]).unwrap();

        let other = DatabaseSyncModule::new();
        other.set_configuration(&module.configuration_values()).unwrap();
        assert_eq!(other.configuration(), module.configuration());
    }

    #[test]
    fn test_set_configuration_accepts_string_port() {
        let module = DatabaseSyncModule::new();
        module.set_configuration(&json!({"host": "db", "port": "80"})).unwrap();

        let config = module.configuration().unwrap();
        assert_eq!(config.port, 80);
        assert_eq!(config.host, "db");
        assert_eq!(config.username, "admin");

        assert!(module.set_configuration(&json!({"port": 70000})).is_err());
        assert!(module.set_configuration(&json!("db")).is_err());
    }

    #[test]
    fn test_sync_hides_credentials() {
        let module = DatabaseSyncModule::new();
        module.setup_module(&["password=hunter2".to_string()]).unwrap();

        let object = module.sync().unwrap();
        let value = object.to_value().unwrap();
        assert!(!value.to_string().contains("hunter2"));

        let mut parsed = module.sync_object_instance();
        parsed.parse_response(&value).unwrap();
        assert_eq!(parsed, object);
    }
}
