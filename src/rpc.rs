//! # JSON-RPC Wire Protocol
//!
//! All client/server traffic is a JSON-RPC style call/reply over HTTP POST.
//!
//! Request envelope:
//!
//! ```json
//! {"method": "Server.Authorize", "params": [{"token": {...}}], "id": "1"}
//! ```
//!
//! Response envelope:
//!
//! ```json
//! {"result": {"status": 200, "token": "..."}, "error": null, "id": "1"}
//! ```
//!
//! On failure `result` is `null` and `error` carries an [`RpcError`] whose code
//! identifies the [`SyncError`] variant. Byte fields such as `access_token`
//! travel as standard base64 strings.

use crate::error::{Result, SyncError};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const METHOD_AUTHORIZE: &str = "Server.Authorize";
pub const METHOD_SYNCHRONIZE: &str = "Server.Synchronize";
pub const STATUS_OK: u16 = 200;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcRequest {
    pub method: String,
    #[serde(default)]
    pub params: Vec<Value>,
    #[serde(default)]
    pub id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcResponse {
    pub result: Option<Value>,
    pub error: Option<RpcError>,
    #[serde(default)]
    pub id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcError {
    pub code: i32,
    pub message: String,
}

impl RpcRequest {
    /// Build a single-argument call; the id is assigned by the transport.
    pub fn new<T: Serialize>(method: &str, argument: &T) -> Result<Self> {
        Ok(Self {
            method: method.to_string(),
            params: vec![serde_json::to_value(argument)?],
            id: String::new(),
        })
    }

    /// Decode the first positional argument.
    pub fn argument<T: DeserializeOwned>(&self) -> Result<T> {
        let first = self
            .params
            .first()
            .ok_or_else(|| SyncError::corrupt(format!("{}: missing params", self.method)))?;
        serde_json::from_value(first.clone())
            .map_err(|e| SyncError::corrupt(format!("{}: invalid params: {}", self.method, e)))
    }
}

impl RpcResponse {
    pub fn success<T: Serialize>(id: &str, result: &T) -> Result<Self> {
        Ok(Self {
            result: Some(serde_json::to_value(result)?),
            error: None,
            id: id.to_string(),
        })
    }

    pub fn failure(id: &str, error: &SyncError) -> Self {
        Self {
            result: None,
            error: Some(error.to_rpc_error()),
            id: id.to_string(),
        }
    }

    /// Unwrap the envelope: an error envelope becomes the matching [`SyncError`].
    pub fn into_result(self) -> Result<Value> {
        if let Some(error) = self.error {
            return Err(SyncError::from_rpc_error(error));
        }
        match self.result {
            Some(Value::Null) | None => {
                Err(SyncError::corrupt("response carries neither result nor error"))
            }
            Some(result) => Ok(result),
        }
    }
}

/// Which verification path a token takes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TokenType {
    /// Raw PKCS#1 v1.5 signature over the SHA-256 digest of the username.
    #[serde(rename = "key")]
    Key,
    /// Session token previously issued by `Server.Authorize`.
    #[serde(rename = "jwt")]
    Jwt,
}

/// Proof of identity attached to a request. Never persisted.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthenticationToken {
    pub username: String,
    pub token_type: TokenType,
    #[serde(with = "base64_bytes")]
    pub access_token: Vec<u8>,
}

impl AuthenticationToken {
    pub fn signature(username: &str, signature: Vec<u8>) -> Self {
        Self {
            username: username.to_string(),
            token_type: TokenType::Key,
            access_token: signature,
        }
    }

    pub fn session(username: &str, session_token: &str) -> Self {
        Self {
            username: username.to_string(),
            token_type: TokenType::Jwt,
            access_token: session_token.as_bytes().to_vec(),
        }
    }
}

impl std::fmt::Debug for AuthenticationToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthenticationToken")
            .field("username", &self.username)
            .field("token_type", &self.token_type)
            .field("access_token", &format_args!("<{} bytes>", self.access_token.len()))
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthenticationArgs {
    pub token: Option<AuthenticationToken>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthenticationResponse {
    pub status: u16,
    #[serde(default)]
    pub token: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SynchronizationArgs {
    pub module: String,
    pub token: Option<AuthenticationToken>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SynchronizationResponse {
    pub status: u16,
    pub object: Value,
}

/// Helpers for building protocol calls.
pub mod messages {
    use super::*;

    pub fn authorize(token: AuthenticationToken) -> Result<RpcRequest> {
        RpcRequest::new(METHOD_AUTHORIZE, &AuthenticationArgs { token: Some(token) })
    }

    pub fn synchronize(module: &str, token: AuthenticationToken) -> Result<RpcRequest> {
        RpcRequest::new(
            METHOD_SYNCHRONIZE,
            &SynchronizationArgs {
                module: module.to_string(),
                token: Some(token),
            },
        )
    }
}

mod base64_bytes {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD.decode(encoded).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_authorize_request_shape() {
        let request =
            messages::authorize(AuthenticationToken::signature("alice", vec![1, 2, 3])).unwrap();
        let value = serde_json::to_value(&request).unwrap();

        assert_eq!(
            value,
            json!({
                "method": "Server.Authorize",
                "params": [{
                    "token": {"username": "alice", "token_type": "key", "access_token": "AQID"}
                }],
                "id": ""
            })
        );
    }

    #[test]
    fn test_synchronize_request_carries_session_token() {
        let token = AuthenticationToken::session("alice", "a.b.c");
        let request = messages::synchronize("filesystem", token).unwrap();
        let args: SynchronizationArgs = request.argument().unwrap();

        assert_eq!(request.method, METHOD_SYNCHRONIZE);
        assert_eq!(args.module, "filesystem");
        let token = args.token.unwrap();
        assert_eq!(token.token_type, TokenType::Jwt);
        assert_eq!(token.access_token, b"a.b.c");
    }

    #[test]
    fn test_missing_params_is_corrupt() {
        let request: RpcRequest =
            serde_json::from_value(json!({"method": "Server.Authorize"})).unwrap();
        let result: Result<AuthenticationArgs> = request.argument();
        assert!(matches!(result, Err(SyncError::Corrupt(_))));
    }

    #[test]
    fn test_invalid_base64_token_is_rejected() {
        let request: RpcRequest = serde_json::from_value(json!({
            "method": "Server.Authorize",
            "params": [{
                "token": {"username": "alice", "token_type": "key", "access_token": "@@@"}
            }],
            "id": "1"
        }))
        .unwrap();
        let result: Result<AuthenticationArgs> = request.argument();
        assert!(matches!(result, Err(SyncError::Corrupt(_))));
    }

    #[test]
    fn test_error_envelope_maps_back() {
        let response = RpcResponse::failure("7", &SyncError::conflict("module mismatch"));
        let text = serde_json::to_string(&response).unwrap();
        let parsed: RpcResponse = serde_json::from_str(&text).unwrap();

        assert!(parsed.result.is_none());
        assert_eq!(parsed.id, "7");
        assert!(matches!(
            parsed.into_result(),
            Err(SyncError::Conflict(m)) if m == "module mismatch"
        ));
    }

    #[test]
    fn test_empty_envelope_is_corrupt() {
        let parsed: RpcResponse =
            serde_json::from_value(json!({"result": null, "error": null, "id": "1"})).unwrap();
        assert!(matches!(parsed.into_result(), Err(SyncError::Corrupt(_))));
    }

    #[test]
    fn test_token_debug_hides_secret() {
        let token = AuthenticationToken::session("alice", "very-secret");
        let debug = format!("{:?}", token);
        assert!(!debug.contains("very-secret"));
        assert!(debug.contains("11 bytes"));
    }
}
