//! # lazysync CLI Application
//!
//! Main entry point for lazysync. Depending on `config.yaml` the binary
//! either serves one synchronization module to key-authenticated clients or
//! runs as a client pulling that module's work from a server.

use anyhow::Result;
use clap::Parser;
use colored::*;
use lazysync::cli::{self, Cli, Commands, SetupRole};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "lazysync=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let config = cli.config;
    if let Err(e) = match cli.command {
        Commands::Setup { role: SetupRole::Server(args) } => cli::setup_server(config, args).await,
        Commands::Setup { role: SetupRole::Client(args) } => cli::setup_client(config, args).await,
        Commands::Run => cli::run(config).await,
        Commands::Modules => cli::list_modules().await,
    } {
        eprintln!(
            "{} {}\n{}",
            "Error:".red().bold(),
            format!("{:#}", e).red(),
            "Tip: Run with --help for usage information.".yellow()
        );
        std::process::exit(1);
    }
    Ok(())
}
