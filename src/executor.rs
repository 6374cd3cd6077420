//! # Sync Executor
//!
//! Client-side counterpart of the dispatcher:
//!
//! 1. Sign the username and exchange the signature for a session token
//! 2. Resolve the local module instance (fatal if unknown)
//! 3. Call `Server.Synchronize` with the session token
//! 4. Parse the returned payload into the module's own sync object variant
//! 5. Execute it

use crate::client::ServiceClient;
use crate::crypto::Identity;
use crate::error::Result;
use crate::modules::{ExecutionReport, ModuleRegistry};
use std::sync::Arc;
use tracing::info;

pub struct SyncExecutor {
    username: String,
    identity: Identity,
    module_id: String,
    modules: Arc<ModuleRegistry>,
    service: ServiceClient,
}

impl SyncExecutor {
    pub fn new(
        username: impl Into<String>,
        identity: Identity,
        module_id: impl Into<String>,
        modules: Arc<ModuleRegistry>,
        service: ServiceClient,
    ) -> Self {
        Self {
            username: username.into(),
            identity,
            module_id: module_id.into(),
            modules,
            service,
        }
    }

    pub async fn run(&self) -> Result<ExecutionReport> {
        let signature = self.identity.sign(self.username.as_bytes())?;
        let session_token = self.service.login(&self.username, signature).await?;
        info!("Authenticated as {} at {}", self.username, self.service.server_url());

        let module = self.modules.get(&self.module_id)?;

        let payload = self
            .service
            .synchronize(&self.username, &session_token, &self.module_id)
            .await?;
        let mut object = module.sync_object_instance();
        object.parse_response(&payload)?;
        info!("Received {} sync object", object.kind());

        module.execute_commands(object).await
    }
}
