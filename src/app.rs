//! # Application Roles
//!
//! An installation is either a server or a client. Both roles share the
//! [`App`] lifecycle: `setup` once to write `config.yaml`, then `run`.

use crate::client::ServiceClient;
use crate::config::{AppConfiguration, Mode};
use crate::error::SyncError;
use crate::executor::SyncExecutor;
use crate::modules::{ExecutionReport, ModuleRegistry};
use anyhow::{Context, Result};
use async_trait::async_trait;
use colored::*;
use std::sync::Arc;
use tracing::info;

#[async_trait]
pub trait App: Send + Sync {
    async fn setup(&mut self) -> Result<()>;
    async fn run(&self) -> Result<()>;
}

/// A machine that pulls work from the server.
pub struct Client {
    configuration: AppConfiguration,
    modules: Arc<ModuleRegistry>,
}

impl Client {
    pub fn new(configuration: AppConfiguration, modules: Arc<ModuleRegistry>) -> Self {
        Self { configuration, modules }
    }

    pub fn configuration(&self) -> &AppConfiguration {
        &self.configuration
    }

    /// Run one synchronization and return its per-item outcome.
    pub async fn synchronize(&self) -> crate::error::Result<ExecutionReport> {
        let keys = self.configuration.key_store();
        let identity = keys.read_private_key(&self.configuration.username)?;
        let service = ServiceClient::new(
            &self.configuration.server_url,
            self.configuration.request_timeout(),
        )?;

        SyncExecutor::new(
            &self.configuration.username,
            identity,
            &self.configuration.module,
            self.modules.clone(),
            service,
        )
        .run()
        .await
    }
}

#[async_trait]
impl App for Client {
    /// Without an explicit username the key directory must hold exactly one identity.
    async fn setup(&mut self) -> Result<()> {
        info!("Setting up client...");
        self.modules.get(&self.configuration.module)?;

        let keys = self.configuration.key_store();
        if self.configuration.username.is_empty() {
            self.configuration.username = keys
                .scan_username()
                .with_context(|| {
                    format!("Cannot determine username from {}", keys.base_dir().display())
                })?;
        }
        keys.read_private_key(&self.configuration.username)
            .with_context(|| format!("No usable key for {}", self.configuration.username))?;

        self.configuration.mode = Mode::Client;
        self.configuration.save().await?;

        println!("✅ Client configured as {}", self.configuration.username);
        println!("   Module: {}", self.configuration.module);
        println!("   Server: {}", self.configuration.server_url);
        Ok(())
    }

    async fn run(&self) -> Result<()> {
        println!(
            "🔄 Synchronizing {} from {}...",
            self.configuration.module, self.configuration.server_url
        );

        match self.synchronize().await {
            Ok(report) => {
                print_report(&report);
                println!("✅ Synchronization complete");
                Ok(())
            }
            Err(SyncError::PartialFailure(report)) => {
                print_report(&report);
                Err(SyncError::PartialFailure(report).into())
            }
            Err(e) => Err(e.into()),
        }
    }
}

fn print_report(report: &ExecutionReport) {
    for item in &report.succeeded {
        println!("  {} {}", "✔".green(), item);
    }
    for failure in &report.failed {
        println!("  {} {} ({})", "✘".red(), failure.item, failure.reason);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::KeyStore;
    use crate::modules::ModuleContext;
    use crate::testutil::alice;
    use tempfile::TempDir;

    fn client_in(temp_dir: &TempDir, module: &str) -> Client {
        let mut configuration =
            AppConfiguration::new(Mode::Client, module, temp_dir.path().join("config.yaml"));
        configuration.keys_dir = temp_dir.path().join("keys");
        let modules =
            Arc::new(ModuleRegistry::with_default_modules(ModuleContext::default()).unwrap());
        Client::new(configuration, modules)
    }

    #[tokio::test]
    async fn test_setup_scans_username() {
        let temp_dir = TempDir::new().unwrap();
        let keys = KeyStore::new(temp_dir.path().join("keys"));
        keys.save_identity("amber_basil", alice()).unwrap();

        let mut client = client_in(&temp_dir, "filesystem");
        client.setup().await.unwrap();

        let saved = AppConfiguration::load(temp_dir.path().join("config.yaml")).await.unwrap();
        assert_eq!(saved.mode, Mode::Client);
        assert_eq!(saved.username, "amber_basil");
        assert_eq!(saved.module, "filesystem");
    }

    #[tokio::test]
    async fn test_setup_needs_exactly_one_identity() {
        let temp_dir = TempDir::new().unwrap();
        let keys = KeyStore::new(temp_dir.path().join("keys"));
        keys.save_identity("amber_basil", alice()).unwrap();
        keys.save_identity("cobalt_dune", alice()).unwrap();

        let mut client = client_in(&temp_dir, "filesystem");
        assert!(client.setup().await.is_err());
        assert!(!temp_dir.path().join("config.yaml").exists());
    }

    #[tokio::test]
    async fn test_setup_rejects_unknown_module() {
        let temp_dir = TempDir::new().unwrap();
        let mut client = client_in(&temp_dir, "ftp");
        assert!(client.setup().await.is_err());
    }
}
