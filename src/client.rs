//! # RPC Client
//!
//! HTTP transport for the JSON-RPC convention in [`crate::rpc`]. [`RpcClient`]
//! posts one envelope per call and unwraps the reply; [`ServiceClient`] wraps
//! the two server methods a client needs.
//!
//! Every call is bounded by the timeout the client was built with.

use crate::error::{Result, SyncError};
use crate::rpc::{
    messages, AuthenticationResponse, AuthenticationToken, RpcRequest, RpcResponse,
    SynchronizationResponse, STATUS_OK,
};
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Clonable JSON-RPC over HTTP POST transport.
#[derive(Clone)]
pub struct RpcClient {
    http: reqwest::Client,
    next_id: Arc<AtomicU64>,
}

impl RpcClient {
    /// Build a transport whose every request is bounded by `timeout`.
    pub fn new(timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            next_id: Arc::new(AtomicU64::new(1)),
        })
    }

    /// Send `request` to `url` and return the `result` member of the reply.
    pub async fn call(&self, url: &str, mut request: RpcRequest) -> Result<Value> {
        request.id = self.next_id.fetch_add(1, Ordering::Relaxed).to_string();
        debug!("Calling {} at {} (id {})", request.method, url, request.id);

        let response = self.http.post(url).json(&request).send().await?;
        let status = response.status();
        let body = response.bytes().await?;

        let envelope: RpcResponse = match serde_json::from_slice(&body) {
            Ok(envelope) => envelope,
            Err(_) if !status.is_success() => {
                return Err(SyncError::Transport(format!("{} returned HTTP {}", url, status)))
            }
            Err(e) => return Err(SyncError::corrupt(format!("invalid reply from {}: {}", url, e))),
        };

        if envelope.id != request.id {
            warn!("Reply id {:?} does not match request id {:?}", envelope.id, request.id);
        }

        envelope.into_result()
    }
}

/// Client for the `Server.*` methods of one coordinating server.
#[derive(Clone)]
pub struct ServiceClient {
    rpc: RpcClient,
    server_url: String,
}

impl ServiceClient {
    /// Client for the RPC endpoint at `server_url`.
    pub fn new(server_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        Ok(Self {
            rpc: RpcClient::new(timeout)?,
            server_url: server_url.into(),
        })
    }

    /// RPC endpoint this client talks to.
    pub fn server_url(&self) -> &str {
        &self.server_url
    }

    /// Exchange a raw signature for a session token.
    pub async fn login(&self, username: &str, signature: Vec<u8>) -> Result<String> {
        let request = messages::authorize(AuthenticationToken::signature(username, signature))?;
        let result = self.rpc.call(&self.server_url, request).await?;

        let response: AuthenticationResponse = serde_json::from_value(result)
            .map_err(|e| SyncError::corrupt(format!("invalid authorization reply: {}", e)))?;
        if response.status != STATUS_OK || response.token.is_empty() {
            return Err(SyncError::unauthorized(format!(
                "server refused authorization (status {})",
                response.status
            )));
        }

        Ok(response.token)
    }

    /// Ask the server for the sync object of `module`.
    pub async fn synchronize(
        &self,
        username: &str,
        session_token: &str,
        module: &str,
    ) -> Result<Value> {
        let token = AuthenticationToken::session(username, session_token);
        let request = messages::synchronize(module, token)?;
        let result = self.rpc.call(&self.server_url, request).await?;

        let response: SynchronizationResponse = serde_json::from_value(result)
            .map_err(|e| SyncError::corrupt(format!("invalid synchronization reply: {}", e)))?;
        if response.status != STATUS_OK {
            return Err(SyncError::Transport(format!(
                "synchronization returned status {}",
                response.status
            )));
        }

        Ok(response.object)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::routing::post;
    use axum::{Json, Router};
    use serde_json::json;

    async fn spawn_stub(reply: Value) -> String {
        let app = Router::new().route(
            "/",
            post(move |Json(request): Json<RpcRequest>| {
                let mut reply = reply.clone();
                reply["id"] = Value::String(request.id);
                async move { Json(reply) }
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}", addr)
    }

    #[tokio::test]
    async fn test_login_returns_token() {
        let url =
            spawn_stub(json!({"result": {"status": 200, "token": "a.b.c"}, "error": null})).await;
        let client = ServiceClient::new(url, Duration::from_secs(5)).unwrap();

        let token = client.login("alice", vec![1, 2, 3]).await.unwrap();
        assert_eq!(token, "a.b.c");
    }

    #[tokio::test]
    async fn test_error_envelope_becomes_typed_error() {
        let url = spawn_stub(json!({
            "result": null,
            "error": {"code": 409, "message": "module mismatch"}
        }))
        .await;
        let client = ServiceClient::new(url, Duration::from_secs(5)).unwrap();

        let result = client.synchronize("alice", "a.b.c", "databasesync").await;
        assert!(matches!(result, Err(SyncError::Conflict(_))));
    }

    #[tokio::test]
    async fn test_empty_token_is_unauthorized() {
        let url = spawn_stub(json!({"result": {"status": 200, "token": ""}, "error": null})).await;
        let client = ServiceClient::new(url, Duration::from_secs(5)).unwrap();

        let result = client.login("alice", vec![1]).await;
        assert!(matches!(result, Err(SyncError::Unauthorized(_))));
    }

    #[tokio::test]
    async fn test_unreachable_server_is_transport_error() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let client =
            ServiceClient::new(format!("http://{}", addr), Duration::from_secs(2)).unwrap();
        let result = client.login("alice", vec![1]).await;
        assert!(matches!(result, Err(SyncError::Transport(_))));
    }

    #[tokio::test]
    async fn test_non_envelope_error_status() {
        let app = Router::new();
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let client = RpcClient::new(Duration::from_secs(2)).unwrap();
        let request = RpcRequest::new("Server.Authorize", &json!({})).unwrap();
        let result = client.call(&format!("http://{}/missing", addr), request).await;
        assert!(matches!(result, Err(SyncError::Transport(m)) if m.contains("404")));
    }
}
