//! # lazysync
//!
//! Client/server synchronization where clients prove their identity with
//! operator-provisioned RSA keys and then pull work defined by a pluggable
//! module.
//!
//! ## Features
//!
//! - **Key-based identities**: 4096-bit RSA key pairs generated by the server
//!   operator and copied to client machines
//! - **Short-lived sessions**: HS256 session tokens signed with a per-session secret
//! - **Pluggable modules**: file transfer, database mirroring, application updates
//! - **Concurrent transfers**: per-file downloads with an aggregated outcome report
//!
//! ## Core Modules
//!
//! - [`crypto`] - Identity store and signatures
//! - [`auth`] - Raw-signature and session-token verification
//! - [`session`] - Process-local session registry
//! - [`modules`] - Module contract, sync objects and registry
//! - [`dispatch`] - Server-side handling of synchronization requests
//! - [`executor`] - Client-side synchronization flow
//! - [`rpc`] / [`client`] - JSON-RPC wire types and HTTP transport
//!
//! ## Quick Start
//!
//! ```bash
//! # On the server: serve two files and create two user identities
//! lazysync setup server --module filesystem /srv/share/a.txt /srv/share/b.txt
//! lazysync run
//!
//! # On a client, after copying private/keys/<username> over
//! lazysync setup client --module filesystem --server-url http://server:8080
//! lazysync run
//! ```

pub mod app;
pub mod auth;
pub mod cli;
pub mod client;
pub mod config;
pub mod crypto;
pub mod dispatch;
pub mod error;
pub mod executor;
pub mod modules;
pub mod rpc;
pub mod server;
pub mod session;

#[cfg(test)]
mod testutil;

pub use config::AppConfiguration;
pub use crypto::{Identity, KeyStore};
pub use error::{Result, SyncError};
