//! # Coordinating Server
//!
//! Setup writes `config.yaml` for the chosen module and provisions the user
//! identities plus the server's own. Running serves the JSON-RPC endpoint
//! at `POST /` and any routes the configured module adds, for example the
//! file-sync download endpoint.
//!
//! A server serves exactly one module per run.

use crate::app::App;
use crate::auth::Authenticator;
use crate::config::{AppConfiguration, Mode};
use crate::crypto::{KeyStore, SERVER_IDENTITY};
use crate::dispatch::SyncDispatcher;
use crate::error::SyncError;
use crate::modules::{Module, ModuleRegistry};
use crate::rpc::{RpcRequest, RpcResponse};
use crate::session::SessionRegistry;
use anyhow::{Context, Result};
use async_trait::async_trait;
use axum::body::Bytes;
use axum::extract::State;
use axum::routing::post;
use axum::{Json, Router};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

pub const DEFAULT_USER_COUNT: usize = 2;

const SESSION_SWEEP_INTERVAL: Duration = Duration::from_secs(300);

/// Operator input for `setup server`.
#[derive(Debug, Clone)]
pub struct ServerSetup {
    pub users: usize,
    pub module_args: Vec<String>,
    pub words_file: Option<PathBuf>,
}

impl Default for ServerSetup {
    fn default() -> Self {
        Self {
            users: DEFAULT_USER_COUNT,
            module_args: Vec::new(),
            words_file: None,
        }
    }
}

pub struct Server {
    configuration: AppConfiguration,
    modules: Arc<ModuleRegistry>,
    setup: ServerSetup,
}

impl Server {
    pub fn new(configuration: AppConfiguration, modules: Arc<ModuleRegistry>) -> Self {
        Self {
            configuration,
            modules,
            setup: ServerSetup::default(),
        }
    }

    pub fn with_setup(mut self, setup: ServerSetup) -> Self {
        self.setup = setup;
        self
    }

    pub fn configuration(&self) -> &AppConfiguration {
        &self.configuration
    }

    fn key_store(&self) -> KeyStore {
        let keys = self.configuration.key_store();
        match &self.setup.words_file {
            Some(words_file) => keys.with_words_file(words_file),
            None => keys,
        }
    }

    /// Serve on an already bound listener until Ctrl+C.
    pub async fn serve(&self, listener: TcpListener) -> Result<()> {
        let module = self.modules.get(&self.configuration.module)?;
        module
            .set_configuration(&self.configuration.config)
            .with_context(|| format!("Invalid configuration for module {}", module.id()))?;

        let sessions = SessionRegistry::new();
        let cleanup = sessions.spawn_cleanup(SESSION_SWEEP_INTERVAL);
        let authenticator = Authenticator::new(self.configuration.key_store(), sessions);
        let dispatcher = SyncDispatcher::new(
            module.id(),
            self.configuration.config.clone(),
            self.modules.clone(),
            authenticator,
        );
        let app = build_router(dispatcher, module.as_ref());

        let addr = listener.local_addr()?;
        info!("Serving module {} on {}", module.id(), addr);
        println!("🚀 lazysync server listening on {}", addr);
        println!("📦 Module: {}", module.id());
        println!("💚 Press Ctrl+C to stop.");

        let result = axum::serve(listener, app)
            .with_graceful_shutdown(async {
                let _ = tokio::signal::ctrl_c().await;
            })
            .await;

        cleanup.abort();
        println!("\n🛑 lazysync server stopping...");
        result.context("Server error")
    }
}

#[async_trait]
impl App for Server {
    async fn setup(&mut self) -> Result<()> {
        info!("Setting up server...");
        let module = self.modules.get(&self.configuration.module)?;
        module.setup_module(&self.setup.module_args)?;

        // config.yaml is only written once the identities exist.
        let keys = self.key_store();
        let users = self.setup.users;
        println!("🔑 Generating {} user identities, this can take a while...", users);
        let usernames = tokio::task::spawn_blocking(move || keys.generate_identities(users))
            .await
            .context("Key generation task failed")??;

        println!("✅ Identities created in {}:", self.configuration.keys_dir.display());
        for username in &usernames {
            println!("   👤 {}", username);
        }

        self.configuration.mode = Mode::Server;
        self.configuration.username = SERVER_IDENTITY.to_string();
        self.configuration.config = module.configuration_values();
        self.configuration.save().await?;
        println!("✅ Configuration saved to {}", self.configuration.config_path().display());
        println!("\n💡 Copy a user's key directory to the client machine that should use it.");
        Ok(())
    }

    async fn run(&self) -> Result<()> {
        let listener = TcpListener::bind(self.configuration.listen_addr.as_str())
            .await
            .with_context(|| format!("Cannot listen on {}", self.configuration.listen_addr))?;
        self.serve(listener).await
    }
}

/// The RPC endpoint plus the module's own routes.
pub fn build_router(dispatcher: SyncDispatcher, module: &dyn Module) -> Router {
    let mut router = Router::new().route("/", post(handle_rpc)).with_state(dispatcher);
    if let Some(routes) = module.routes() {
        router = router.merge(routes);
    }
    router.layer(TraceLayer::new_for_http())
}

async fn handle_rpc(State(dispatcher): State<SyncDispatcher>, body: Bytes) -> Json<RpcResponse> {
    let request: RpcRequest = match serde_json::from_slice(&body) {
        Ok(request) => request,
        Err(e) => {
            let error = SyncError::corrupt(format!("invalid request: {}", e));
            return Json(RpcResponse::failure("", &error));
        }
    };

    // Signature checks and key reads are blocking work.
    let id = request.id.clone();
    match tokio::task::spawn_blocking(move || dispatcher.dispatch(&request)).await {
        Ok(response) => Json(response),
        Err(e) => {
            error!("RPC worker failed: {}", e);
            Json(RpcResponse::failure(&id, &SyncError::Io(std::io::Error::other(e.to_string()))))
        }
    }
}
