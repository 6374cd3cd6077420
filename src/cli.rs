//! # Command Line Interface
//!
//! Argument parsing and command implementations for lazysync.
//!
//! ## Commands
//!
//! - `setup server` - Configure the served module and provision identities
//! - `setup client` - Configure this machine to pull from a server
//! - `run` - Start the server or run one client synchronization
//! - `modules` - List the available modules

use crate::app::{App, Client};
use crate::config::{AppConfiguration, Mode, DEFAULT_CONFIG_FILE};
use crate::modules::ModuleRegistry;
use crate::server::{Server, ServerSetup, DEFAULT_USER_COUNT};
use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

#[derive(Parser)]
#[command(name = "lazysync")]
#[command(about = "Key-authenticated client/server synchronization with pluggable modules")]
#[command(version = "1.0.0")]
pub struct Cli {
    /// Path to the configuration file
    #[arg(short, long, global = true, default_value = DEFAULT_CONFIG_FILE)]
    pub config: PathBuf,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Write the configuration for this machine's role
    Setup {
        #[command(subcommand)]
        role: SetupRole,
    },

    /// Serve (server) or synchronize once (client) according to the configuration
    Run,

    /// List the available modules
    Modules,
}

#[derive(Subcommand)]
pub enum SetupRole {
    /// Choose the served module and generate user identities
    Server(ServerArgs),

    /// Point this machine at a server
    Client(ClientArgs),
}

#[derive(Args)]
pub struct ServerArgs {
    /// Module to serve
    #[arg(short, long)]
    pub module: String,

    /// Number of user identities to generate
    #[arg(short, long, default_value_t = DEFAULT_USER_COUNT)]
    pub users: usize,

    /// Dictionary used for generated usernames
    #[arg(long)]
    pub words_file: Option<PathBuf>,

    /// Directory holding the identities
    #[arg(long)]
    pub keys_dir: Option<PathBuf>,

    /// Address to listen on
    #[arg(long)]
    pub listen_addr: Option<String>,

    /// Base URL advertised to clients for module downloads
    #[arg(long)]
    pub public_url: Option<String>,

    /// Module input: file paths for filesystem, key=value for the others
    pub module_args: Vec<String>,
}

#[derive(Args)]
pub struct ClientArgs {
    /// Module to synchronize
    #[arg(short, long)]
    pub module: String,

    /// Identity to use; discovered from the key directory when omitted
    #[arg(long)]
    pub username: Option<String>,

    /// Server RPC endpoint
    #[arg(long)]
    pub server_url: Option<String>,

    /// Directory holding this machine's identity
    #[arg(long)]
    pub keys_dir: Option<PathBuf>,

    /// Where downloaded files are written
    #[arg(long)]
    pub download_dir: Option<PathBuf>,
}

fn registry_for(configuration: &AppConfiguration) -> Result<Arc<ModuleRegistry>> {
    Ok(Arc::new(ModuleRegistry::with_default_modules(configuration.module_context())?))
}

pub async fn setup_server(config_path: PathBuf, args: ServerArgs) -> Result<()> {
    let mut configuration = AppConfiguration::new(Mode::Server, args.module, config_path);
    if let Some(keys_dir) = args.keys_dir {
        configuration.keys_dir = keys_dir;
    }
    if let Some(listen_addr) = args.listen_addr {
        configuration.listen_addr = listen_addr;
    }
    if let Some(public_url) = args.public_url {
        configuration.public_url = public_url;
    }

    let modules = registry_for(&configuration)?;
    let mut server = Server::new(configuration, modules).with_setup(ServerSetup {
        users: args.users,
        module_args: args.module_args,
        words_file: args.words_file,
    });
    server.setup().await
}

pub async fn setup_client(config_path: PathBuf, args: ClientArgs) -> Result<()> {
    let mut configuration = AppConfiguration::new(Mode::Client, args.module, config_path);
    if let Some(username) = args.username {
        configuration.username = username;
    }
    if let Some(server_url) = args.server_url {
        configuration.server_url = server_url;
    }
    if let Some(keys_dir) = args.keys_dir {
        configuration.keys_dir = keys_dir;
    }
    if let Some(download_dir) = args.download_dir {
        configuration.download_dir = download_dir;
    }

    let modules = registry_for(&configuration)?;
    let mut client = Client::new(configuration, modules);
    client.setup().await
}

pub async fn run(config_path: PathBuf) -> Result<()> {
    let configuration = AppConfiguration::load(&config_path).await?;
    info!("Running as {} for module {}", configuration.mode, configuration.module);

    let modules = registry_for(&configuration)?;
    match configuration.mode {
        Mode::Server => Server::new(configuration, modules).run().await,
        Mode::Client => Client::new(configuration, modules).run().await,
    }
}

pub async fn list_modules() -> Result<()> {
    let registry = ModuleRegistry::with_default_modules(Default::default())?;

    println!("📦 Available modules:");
    for id in registry.ids() {
        println!("  - {}", id);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;
    use tempfile::TempDir;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_setup_server() {
        let cli = Cli::try_parse_from([
            "lazysync",
            "setup",
            "server",
            "--module",
            "filesystem",
            "--users",
            "3",
            "/tmp/a.txt",
            "/tmp/b.txt",
        ])
        .unwrap();

        let Commands::Setup { role: SetupRole::Server(args) } = cli.command else {
            panic!("expected setup server");
        };
        assert_eq!(args.module, "filesystem");
        assert_eq!(args.users, 3);
        assert_eq!(args.module_args, vec!["/tmp/a.txt", "/tmp/b.txt"]);
        assert_eq!(cli.config, PathBuf::from(DEFAULT_CONFIG_FILE));
    }

    #[test]
    fn test_parse_global_config_flag() {
        let cli =
            Cli::try_parse_from(["lazysync", "run", "--config", "/etc/lazysync.yaml"]).unwrap();
        assert!(matches!(cli.command, Commands::Run));
        assert_eq!(cli.config, PathBuf::from("/etc/lazysync.yaml"));
    }

    #[test]
    fn test_setup_client_requires_module() {
        assert!(Cli::try_parse_from(["lazysync", "setup", "client"]).is_err());
    }

    #[tokio::test]
    async fn test_run_without_config() {
        let temp_dir = TempDir::new().unwrap();
        let result = run(temp_dir.path().join("config.yaml")).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_list_modules() {
        assert!(list_modules().await.is_ok());
    }
}
