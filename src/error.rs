//! # Error Taxonomy
//!
//! Every failure in the protocol core is expressed as a [`SyncError`]. The
//! variants mirror the classes of failure a caller has to tell apart:
//!
//! - **Unauthorized**: bad signature, unknown session, expired or invalid token
//! - **NotFound**: unknown username, unknown module, missing key file
//! - **Corrupt**: unparseable PEM, malformed token or payload
//! - **Conflict**: requested module differs from the one the server serves
//! - **Transport**: network or connection failure
//! - **PartialFailure**: some items of a sync failed while others succeeded
//!
//! Errors cross the wire inside a JSON-RPC error envelope as an [`RpcError`]
//! carrying a numeric code, so the client can rebuild the same variant.

use crate::modules::ExecutionReport;
use crate::rpc::RpcError;
use thiserror::Error;

/// Errors produced by the authentication and synchronization core.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Corrupt data: {0}")]
    Corrupt(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("{} of {} items failed: {}", .0.failed.len(), .0.total(), .0.failed_items().join(", "))]
    PartialFailure(ExecutionReport),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, SyncError>;

const CODE_UNAUTHORIZED: i32 = 401;
const CODE_NOT_FOUND: i32 = 404;
const CODE_CONFLICT: i32 = 409;
const CODE_CORRUPT: i32 = 422;
const CODE_TRANSPORT: i32 = 502;
const CODE_PARTIAL_FAILURE: i32 = 207;
const CODE_INTERNAL: i32 = 500;

impl SyncError {
    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::Unauthorized(message.into())
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound(message.into())
    }

    pub fn corrupt(message: impl Into<String>) -> Self {
        Self::Corrupt(message.into())
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict(message.into())
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Numeric code used for this error in a JSON-RPC error envelope.
    pub fn code(&self) -> i32 {
        match self {
            Self::Unauthorized(_) => CODE_UNAUTHORIZED,
            Self::NotFound(_) => CODE_NOT_FOUND,
            Self::Conflict(_) => CODE_CONFLICT,
            Self::Corrupt(_) => CODE_CORRUPT,
            Self::Transport(_) => CODE_TRANSPORT,
            Self::PartialFailure(_) => CODE_PARTIAL_FAILURE,
            Self::Config(_) | Self::Io(_) => CODE_INTERNAL,
        }
    }

    /// Convert into the wire representation.
    ///
    /// Internal failures carry a generic message; details stay in the log.
    pub fn to_rpc_error(&self) -> RpcError {
        let message = match self {
            Self::Unauthorized(m)
            | Self::NotFound(m)
            | Self::Corrupt(m)
            | Self::Conflict(m)
            | Self::Transport(m) => m.clone(),
            Self::PartialFailure(_) => self.to_string(),
            Self::Config(_) | Self::Io(_) => "internal server error".to_string(),
        };
        RpcError { code: self.code(), message }
    }

    /// Rebuild an error from a JSON-RPC error envelope.
    pub fn from_rpc_error(error: RpcError) -> Self {
        let RpcError { code, message } = error;
        match code {
            CODE_UNAUTHORIZED => Self::Unauthorized(message),
            CODE_NOT_FOUND => Self::NotFound(message),
            CODE_CONFLICT => Self::Conflict(message),
            CODE_CORRUPT => Self::Corrupt(message),
            CODE_TRANSPORT => Self::Transport(message),
            _ => Self::Transport(format!("remote error {}: {}", code, message)),
        }
    }
}

impl From<reqwest::Error> for SyncError {
    fn from(e: reqwest::Error) -> Self {
        Self::Transport(e.to_string())
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(e: serde_json::Error) -> Self {
        Self::Corrupt(e.to_string())
    }
}
