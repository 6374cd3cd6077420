//! # Authenticator
//!
//! Two verification paths, selected by the token type:
//!
//! - **key**: the access token is a PKCS#1 v1.5 signature over SHA-256 of the
//!   username, checked against the user's stored public key. Success mints a
//!   new session and returns an HS256 session token signed with that
//!   session's own random secret.
//! - **jwt**: the access token is a session token. It must verify against the
//!   secret of the user's current session, be unexpired and name the same user.
//!
//! Every failure is reported as `Unauthorized`. Only damaged key material on
//! the server side surfaces as a different error.

use crate::crypto::{is_valid_username, verify_signature, KeyStore};
use crate::error::{Result, SyncError};
use crate::rpc::{AuthenticationToken, TokenType};
use crate::session::{Session, SessionRegistry};
use chrono::Duration as ChronoDuration;
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

pub const SESSION_TTL_HOURS: i64 = 24;

/// Payload of a session token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionClaims {
    pub username: String,
    /// Issued at (Unix timestamp)
    pub iat: i64,
    /// Expiration time (Unix timestamp)
    pub exp: i64,
}

/// Outcome of a successful authentication.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Authenticated {
    /// Raw signature accepted; carries the freshly issued session token.
    NewSession(String),
    /// Presented session token is valid.
    ExistingSession,
}

#[derive(Clone)]
pub struct Authenticator {
    keys: KeyStore,
    sessions: SessionRegistry,
    session_ttl: ChronoDuration,
}

impl Authenticator {
    pub fn new(keys: KeyStore, sessions: SessionRegistry) -> Self {
        Self {
            keys,
            sessions,
            session_ttl: ChronoDuration::hours(SESSION_TTL_HOURS),
        }
    }

    pub fn with_session_ttl(mut self, ttl: ChronoDuration) -> Self {
        self.session_ttl = ttl;
        self
    }

    pub fn sessions(&self) -> &SessionRegistry {
        &self.sessions
    }

    /// Verify `token`; a raw signature additionally opens a new session.
    pub fn authenticate(&self, token: &AuthenticationToken) -> Result<Authenticated> {
        self.verify(token)?;

        match token.token_type {
            TokenType::Key => Ok(Authenticated::NewSession(self.issue_session(&token.username)?)),
            TokenType::Jwt => Ok(Authenticated::ExistingSession),
        }
    }

    /// Verify `token` without touching the session of a raw-signature caller.
    pub fn verify(&self, token: &AuthenticationToken) -> Result<()> {
        if !is_valid_username(&token.username) {
            return Err(SyncError::unauthorized("invalid username"));
        }

        match token.token_type {
            TokenType::Key => self.verify_key_signature(token),
            TokenType::Jwt => self.verify_session_token(token),
        }
    }

    fn verify_key_signature(&self, token: &AuthenticationToken) -> Result<()> {
        let public_key = match self.keys.read_public_key(&token.username) {
            Ok(public_key) => public_key,
            Err(SyncError::NotFound(_)) => {
                debug!("No public key for {}", token.username);
                return Err(SyncError::unauthorized("unknown user"));
            }
            Err(e) => return Err(e),
        };

        if !verify_signature(&public_key, token.username.as_bytes(), &token.access_token) {
            warn!("Rejected signature for {}", token.username);
            return Err(SyncError::unauthorized("invalid signature"));
        }

        Ok(())
    }

    /// Mint a session for `username`, replacing any previous one.
    fn issue_session(&self, username: &str) -> Result<String> {
        let session = Session::new(username, self.session_ttl);
        let claims = SessionClaims {
            username: username.to_string(),
            iat: session.issued_at.timestamp(),
            exp: session.expires_at.timestamp(),
        };

        let token = encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(&session.secret),
        )
        .map_err(|e| SyncError::corrupt(format!("cannot sign session token: {}", e)))?;

        self.sessions.insert(session);
        info!("Issued session for {}", username);
        Ok(token)
    }

    fn verify_session_token(&self, token: &AuthenticationToken) -> Result<()> {
        let secret = self
            .sessions
            .secret(&token.username)
            .ok_or_else(|| SyncError::unauthorized("no active session"))?;
        let session_token = std::str::from_utf8(&token.access_token)
            .map_err(|_| SyncError::unauthorized("malformed session token"))?;

        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;

        let decoded =
            decode::<SessionClaims>(session_token, &DecodingKey::from_secret(&secret), &validation);
        match decoded {
            Ok(data) if data.claims.username == token.username => Ok(()),
            Ok(_) => {
                self.sessions.remove_if_secret(&token.username, &secret);
                Err(SyncError::unauthorized("session token names another user"))
            }
            Err(e) if matches!(e.kind(), ErrorKind::ExpiredSignature) => {
                self.sessions.remove_if_secret(&token.username, &secret);
                debug!("Session of {} expired", token.username);
                Err(SyncError::unauthorized("session expired"))
            }
            Err(e) => Err(SyncError::unauthorized(format!("invalid session token: {}", e))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::PUBLIC_KEY_FILE;
    use crate::testutil::{alice, bob};
    use chrono::Utc;
    use tempfile::TempDir;

    fn setup() -> (Authenticator, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let keys = KeyStore::new(temp_dir.path());
        keys.save_identity("alice", alice()).unwrap();
        keys.save_identity("bob", bob()).unwrap();
        (Authenticator::new(keys, SessionRegistry::new()), temp_dir)
    }

    fn key_token(username: &str, signer: &crate::crypto::Identity) -> AuthenticationToken {
        AuthenticationToken::signature(username, signer.sign(username.as_bytes()).unwrap())
    }

    fn login(auth: &Authenticator, username: &str, signer: &crate::crypto::Identity) -> String {
        match auth.authenticate(&key_token(username, signer)).unwrap() {
            Authenticated::NewSession(token) => token,
            other => panic!("expected a new session, got {:?}", other),
        }
    }

    #[test]
    fn test_signature_login_then_session() {
        let (auth, _temp_dir) = setup();
        let session_token = login(&auth, "alice", alice());

        assert!(auth.sessions().get("alice").is_some());
        let result = auth.authenticate(&AuthenticationToken::session("alice", &session_token));
        assert_eq!(result.unwrap(), Authenticated::ExistingSession);
    }

    #[test]
    fn test_foreign_signature_rejected() {
        let (auth, _temp_dir) = setup();

        let result = auth.authenticate(&key_token("alice", bob()));
        assert!(matches!(result, Err(SyncError::Unauthorized(_))));
        assert!(auth.sessions().is_empty());
    }

    #[test]
    fn test_unknown_and_invalid_users_rejected() {
        let (auth, _temp_dir) = setup();

        let unknown = auth.authenticate(&key_token("mallory", alice()));
        assert!(matches!(unknown, Err(SyncError::Unauthorized(_))));

        let traversal = auth.authenticate(&key_token("../alice", alice()));
        assert!(matches!(traversal, Err(SyncError::Unauthorized(_))));
    }

    #[test]
    fn test_corrupt_public_key_aborts() {
        let (auth, temp_dir) = setup();
        std::fs::write(temp_dir.path().join("alice").join(PUBLIC_KEY_FILE), "garbage").unwrap();

        let result = auth.authenticate(&key_token("alice", alice()));
        assert!(matches!(result, Err(SyncError::Corrupt(_))));
    }

    #[test]
    fn test_session_without_login_rejected() {
        let (auth, _temp_dir) = setup();

        let result = auth.authenticate(&AuthenticationToken::session("alice", "a.b.c"));
        assert!(matches!(result, Err(SyncError::Unauthorized(_))));
    }

    #[test]
    fn test_expired_session_rejected_and_destroyed() {
        let (auth, _temp_dir) = setup();
        let auth = auth.with_session_ttl(ChronoDuration::seconds(-10));
        let session_token = login(&auth, "alice", alice());

        let result = auth.authenticate(&AuthenticationToken::session("alice", &session_token));
        assert!(matches!(result, Err(SyncError::Unauthorized(_))));
        assert!(auth.sessions().get("alice").is_none());
    }

    #[test]
    fn test_token_signed_with_other_secret_rejected() {
        let (auth, _temp_dir) = setup();
        login(&auth, "alice", alice());

        let now = Utc::now().timestamp();
        let forged = encode(
            &Header::new(Algorithm::HS256),
            &SessionClaims {
                username: "alice".to_string(),
                iat: now,
                exp: now + 3600,
            },
            &EncodingKey::from_secret(b"not the session secret"),
        )
        .unwrap();

        let result = auth.authenticate(&AuthenticationToken::session("alice", &forged));
        assert!(matches!(result, Err(SyncError::Unauthorized(_))));
        assert!(auth.sessions().get("alice").is_some());
    }

    #[test]
    fn test_claims_for_another_user_rejected() {
        let (auth, _temp_dir) = setup();
        login(&auth, "alice", alice());
        let secret = auth.sessions().secret("alice").unwrap();

        let now = Utc::now().timestamp();
        let token = encode(
            &Header::new(Algorithm::HS256),
            &SessionClaims {
                username: "bob".to_string(),
                iat: now,
                exp: now + 3600,
            },
            &EncodingKey::from_secret(&secret),
        )
        .unwrap();

        let result = auth.authenticate(&AuthenticationToken::session("alice", &token));
        assert!(matches!(result, Err(SyncError::Unauthorized(_))));
        assert!(auth.sessions().get("alice").is_none());
    }

    #[test]
    fn test_newest_session_wins() {
        let (auth, _temp_dir) = setup();
        let first = login(&auth, "alice", alice());
        let second = login(&auth, "alice", alice());

        let stale = auth.authenticate(&AuthenticationToken::session("alice", &first));
        assert!(matches!(stale, Err(SyncError::Unauthorized(_))));

        let current = auth.authenticate(&AuthenticationToken::session("alice", &second));
        assert_eq!(current.unwrap(), Authenticated::ExistingSession);
    }

    #[test]
    fn test_session_token_is_bound_to_user() {
        let (auth, _temp_dir) = setup();
        let alice_token = login(&auth, "alice", alice());
        login(&auth, "bob", bob());

        let result = auth.authenticate(&AuthenticationToken::session("bob", &alice_token));
        assert!(matches!(result, Err(SyncError::Unauthorized(_))));
        assert!(auth.sessions().get("bob").is_some());
    }

    #[test]
    fn test_verify_with_signature_keeps_session() {
        let (auth, _temp_dir) = setup();
        let session_token = login(&auth, "alice", alice());

        auth.verify(&key_token("alice", alice())).unwrap();
        let result = auth.authenticate(&AuthenticationToken::session("alice", &session_token));
        assert_eq!(result.unwrap(), Authenticated::ExistingSession);
    }

    #[test]
    fn test_garbage_session_token_rejected() {
        let (auth, _temp_dir) = setup();
        login(&auth, "alice", alice());

        let token = AuthenticationToken {
            username: "alice".to_string(),
            token_type: TokenType::Jwt,
            access_token: vec![0xff, 0xfe, 0x00],
        };
        assert!(matches!(auth.authenticate(&token), Err(SyncError::Unauthorized(_))));
    }
}
