//! # Sync Dispatcher
//!
//! Server-side handling of the `Server.*` methods. A synchronization request
//! moves through a fixed sequence and stops at the first failure:
//!
//! 1. **Match**: the requested module must be the one this server serves
//! 2. **Verify**: the embedded token must authenticate
//! 3. **Resolve**: the module must be registered
//! 4. **Hydrate**: apply the persisted module configuration
//! 5. **Produce**: return the module's sync object
//!
//! Matching runs first so that a mismatch is a `Conflict` whatever the
//! token, and so that no module is touched for a request that cannot succeed.

use crate::auth::{Authenticated, Authenticator};
use crate::error::{Result, SyncError};
use crate::modules::ModuleRegistry;
use crate::rpc::{
    AuthenticationArgs, AuthenticationResponse, RpcRequest, RpcResponse, SynchronizationArgs,
    SynchronizationResponse, METHOD_AUTHORIZE, METHOD_SYNCHRONIZE, STATUS_OK,
};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info, warn};

#[derive(Clone)]
pub struct SyncDispatcher {
    configured_module: String,
    module_config: Arc<Value>,
    modules: Arc<ModuleRegistry>,
    authenticator: Authenticator,
}

impl SyncDispatcher {
    pub fn new(
        configured_module: impl Into<String>,
        module_config: Value,
        modules: Arc<ModuleRegistry>,
        authenticator: Authenticator,
    ) -> Self {
        Self {
            configured_module: configured_module.into(),
            module_config: Arc::new(module_config),
            modules,
            authenticator,
        }
    }

    pub fn configured_module(&self) -> &str {
        &self.configured_module
    }

    /// Route one JSON-RPC call. Failures become error envelopes.
    pub fn dispatch(&self, request: &RpcRequest) -> RpcResponse {
        let result = match request.method.as_str() {
            METHOD_AUTHORIZE => request
                .argument::<AuthenticationArgs>()
                .and_then(|args| self.authorize(&args))
                .and_then(|reply| RpcResponse::success(&request.id, &reply)),
            METHOD_SYNCHRONIZE => request
                .argument::<SynchronizationArgs>()
                .and_then(|args| self.synchronize(&args))
                .and_then(|reply| RpcResponse::success(&request.id, &reply)),
            other => Err(SyncError::not_found(format!("method {} not found", other))),
        };

        result.unwrap_or_else(|e| {
            warn!("{} failed: {}", request.method, e);
            RpcResponse::failure(&request.id, &e)
        })
    }

    pub fn authorize(&self, args: &AuthenticationArgs) -> Result<AuthenticationResponse> {
        let token = args
            .token
            .as_ref()
            .ok_or_else(|| SyncError::unauthorized("no token provided"))?;

        let token = match self.authenticator.authenticate(token)? {
            Authenticated::NewSession(session_token) => session_token,
            Authenticated::ExistingSession => String::new(),
        };

        Ok(AuthenticationResponse {
            status: STATUS_OK,
            token,
        })
    }

    pub fn synchronize(&self, args: &SynchronizationArgs) -> Result<SynchronizationResponse> {
        if args.module != self.configured_module {
            return Err(SyncError::conflict(format!(
                "enabled module does not match given module: {}",
                args.module
            )));
        }

        let token = args
            .token
            .as_ref()
            .ok_or_else(|| SyncError::unauthorized("no token provided"))?;
        self.authenticator.verify(token)?;

        let module = self.modules.get(&args.module)?;
        module.set_configuration(&self.module_config)?;
        let object = module.sync()?;

        debug!("Produced {} sync object", object.kind());
        info!("Synchronized {} for {}", args.module, token.username);
        Ok(SynchronizationResponse {
            status: STATUS_OK,
            object: object.to_value()?,
        })
    }
}
