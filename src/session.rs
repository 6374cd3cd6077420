//! # Session Registry
//!
//! Process-wide mapping from username to the secret of that user's current
//! session. A session is created on successful raw-signature authentication
//! and lives until it expires, fails verification, or the process exits;
//! nothing here is persisted, so a restart forces every client to
//! re-authenticate with its key.
//!
//! The registry is a cheap, clonable handle around a shared map. The server
//! owns one instance and injects it into the authenticator, which keeps tests
//! isolated from each other.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use parking_lot::RwLock;
use rand::rngs::OsRng;
use rand::{Rng, RngCore};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::Duration;
use tracing::debug;

pub const MIN_SECRET_LEN: usize = 128;
pub const MAX_SECRET_LEN: usize = 256;

/// Server-held proof that a username passed raw-signature authentication.
#[derive(Clone, Debug)]
pub struct Session {
    pub username: String,
    pub secret: Vec<u8>,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl Session {
    /// Mint a session with a fresh random secret of 128 to 256 bytes.
    pub fn new(username: &str, ttl: ChronoDuration) -> Self {
        let mut rng = OsRng;
        let len = rng.gen_range(MIN_SECRET_LEN..=MAX_SECRET_LEN);
        let mut secret = vec![0u8; len];
        rng.fill_bytes(&mut secret);

        let issued_at = Utc::now();
        Self {
            username: username.to_string(),
            secret,
            issued_at,
            expires_at: issued_at + ttl,
        }
    }

    /// Whether the expiry time has been reached.
    pub fn is_expired(&self) -> bool {
        Utc::now() >= self.expires_at
    }
}

/// Concurrent username -> session map. One active session per username.
#[derive(Clone, Default)]
pub struct SessionRegistry {
    sessions: Arc<RwLock<HashMap<String, Session>>>,
}

impl SessionRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a session, replacing any previous one for the same user.
    pub fn insert(&self, session: Session) {
        let mut sessions = self.sessions.write();
        if sessions.insert(session.username.clone(), session).is_some() {
            debug!("Replaced previous session");
        }
    }

    /// Current session of `username`, if any.
    pub fn get(&self, username: &str) -> Option<Session> {
        self.sessions.read().get(username).cloned()
    }

    /// Signing secret of `username`'s current session.
    pub fn secret(&self, username: &str) -> Option<Vec<u8>> {
        self.sessions.read().get(username).map(|s| s.secret.clone())
    }

    /// End `username`'s session unconditionally.
    pub fn remove(&self, username: &str) -> Option<Session> {
        self.sessions.write().remove(username)
    }

    /// Remove `username`'s session only if it still holds `secret`.
    ///
    /// A concurrent login may have replaced the session in the meantime; the
    /// newer session must survive.
    pub fn remove_if_secret(&self, username: &str, secret: &[u8]) -> bool {
        let mut sessions = self.sessions.write();
        match sessions.get(username) {
            Some(session) if session.secret == secret => {
                sessions.remove(username);
                true
            }
            _ => false,
        }
    }

    /// Number of stored sessions, expired ones included until the next purge.
    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.read().is_empty()
    }

    /// Drop every expired session and return how many were removed.
    pub fn purge_expired(&self) -> usize {
        let mut sessions = self.sessions.write();
        let before = sessions.len();
        sessions.retain(|_, session| !session.is_expired());
        before - sessions.len()
    }

    /// Start background expiry of stale sessions.
    pub fn spawn_cleanup(&self, every: Duration) -> JoinHandle<()> {
        let registry = self.clone();

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(every);

            loop {
                interval.tick().await;

                let removed = registry.purge_expired();
                if removed > 0 {
                    debug!("Purged {} expired sessions", removed);
                }
            }
        })
    }
}
