//! # Identity Store
//!
//! This module owns the RSA identities used to authenticate clients:
//! - RSA key pair generation (4096-bit minimum modulus)
//! - PKCS#1 PEM persistence under `<keys_dir>/<username>/key.rsa{,.pub}`
//! - Human-readable, unpredictable usernames drawn from a word list
//! - PKCS#1 v1.5 signatures over the SHA-256 digest of a message
//!
//! Identities are provisioned out-of-band by the server operator. A client
//! receives its private key directory by copying it from the server, so there
//! is no identity negotiation on the wire.

use crate::error::{Result, SyncError};
use rand::rngs::OsRng;
use rand::seq::SliceRandom;
use rand::Rng;
use rsa::pkcs1::{
    DecodeRsaPrivateKey, DecodeRsaPublicKey, EncodeRsaPrivateKey, EncodeRsaPublicKey, LineEnding,
};
use rsa::{Pkcs1v15Sign, RsaPrivateKey, RsaPublicKey};
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

pub const MIN_KEY_BITS: usize = 4096;
pub const SERVER_IDENTITY: &str = "server";
pub const PRIVATE_KEY_FILE: &str = "key.rsa";
pub const PUBLIC_KEY_FILE: &str = "key.rsa.pub";
pub const DEFAULT_WORDS_FILE: &str = "/usr/share/dict/words";

const USERNAME_WORDS: usize = 2;
const MAX_USERNAME_ATTEMPTS: usize = 100;

/// An RSA key pair belonging to one user or to the server.
///
/// The private half never leaves the side that owns it; only signatures
/// and the public key are ever shared.
#[derive(Clone)]
pub struct Identity {
    private_key: RsaPrivateKey,
}

impl Identity {
    /// Generate a new key pair of [`MIN_KEY_BITS`] bits from the OS random source.
    pub fn generate() -> Result<Self> {
        let private_key = RsaPrivateKey::new(&mut OsRng, MIN_KEY_BITS)
            .map_err(|e| {
                SyncError::Io(std::io::Error::other(format!("key generation failed: {}", e)))
            })?;

        Ok(Self { private_key })
    }

    /// Public half of the key pair.
    pub fn public_key(&self) -> RsaPublicKey {
        self.private_key.to_public_key()
    }

    /// Sign the SHA-256 digest of `data` with PKCS#1 v1.5 padding.
    pub fn sign(&self, data: &[u8]) -> Result<Vec<u8>> {
        let digest = Sha256::digest(data);
        self.private_key
            .sign(Pkcs1v15Sign::new::<Sha256>(), &digest)
            .map_err(|e| SyncError::corrupt(format!("signing failed: {}", e)))
    }

    /// Hex SHA-256 of the DER-encoded public key, for display.
    pub fn fingerprint(&self) -> Result<String> {
        public_key_fingerprint(&self.public_key())
    }

    fn private_pem(&self) -> Result<String> {
        self.private_key
            .to_pkcs1_pem(LineEnding::LF)
            .map(|pem| pem.to_string())
            .map_err(|e| SyncError::corrupt(format!("cannot encode private key: {}", e)))
    }

    fn public_pem(&self) -> Result<String> {
        self.public_key()
            .to_pkcs1_pem(LineEnding::LF)
            .map_err(|e| SyncError::corrupt(format!("cannot encode public key: {}", e)))
    }
}

/// Verify a PKCS#1 v1.5 signature over the SHA-256 digest of `data`.
pub fn verify_signature(public_key: &RsaPublicKey, data: &[u8], signature: &[u8]) -> bool {
    let digest = Sha256::digest(data);
    public_key
        .verify(Pkcs1v15Sign::new::<Sha256>(), &digest, signature)
        .is_ok()
}

/// Hex SHA-256 of the PKCS#1 DER encoding of `public_key`.
pub fn public_key_fingerprint(public_key: &RsaPublicKey) -> Result<String> {
    let der = public_key
        .to_pkcs1_der()
        .map_err(|e| SyncError::corrupt(format!("cannot encode public key: {}", e)))?;
    Ok(hex::encode(Sha256::digest(der.as_bytes())))
}

/// A username doubles as a directory name, so it must be one plain path component.
pub fn is_valid_username(username: &str) -> bool {
    !username.is_empty()
        && username != "."
        && username != ".."
        && !username.contains(['/', '\\', '\0'])
}

/// Join two random words with an underscore.
///
/// Returns `None` when the word list is empty.
pub fn generate_username<R: Rng + ?Sized>(words: &[String], rng: &mut R) -> Option<String> {
    let mut parts = Vec::with_capacity(USERNAME_WORDS);
    for _ in 0..USERNAME_WORDS {
        parts.push(words.choose(rng)?.as_str());
    }
    Some(parts.join("_"))
}

/// Clean a raw dictionary into usable words.
///
/// Each word is cut at its first apostrophe; words left empty are dropped.
pub fn parse_word_list(content: &str) -> Vec<String> {
    content
        .lines()
        .map(|line| line.trim())
        .map(|word| word.split('\'').next().unwrap_or_default())
        .filter(|word| !word.is_empty() && is_valid_username(word))
        .map(str::to_string)
        .collect()
}

/// On-disk store of identities, one directory per username.
#[derive(Clone, Debug)]
pub struct KeyStore {
    base_dir: PathBuf,
    words_file: PathBuf,
}

impl KeyStore {
    /// Open a store rooted at `base_dir`, using the system word list for usernames.
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
            words_file: PathBuf::from(DEFAULT_WORDS_FILE),
        }
    }

    /// Draw generated usernames from `words_file` instead, one word per line.
    pub fn with_words_file(mut self, words_file: impl Into<PathBuf>) -> Self {
        self.words_file = words_file.into();
        self
    }

    /// Directory holding one subdirectory per identity.
    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Directory of `username`'s key pair.
    ///
    /// Fails with `NotFound` when `username` is not a single path component.
    pub fn identity_dir(&self, username: &str) -> Result<PathBuf> {
        if !is_valid_username(username) {
            return Err(SyncError::not_found(format!("invalid username: {:?}", username)));
        }
        Ok(self.base_dir.join(username))
    }

    /// Whether a public key is stored for `username`.
    pub fn has_identity(&self, username: &str) -> bool {
        self.identity_dir(username)
            .map(|dir| dir.join(PUBLIC_KEY_FILE).exists())
            .unwrap_or(false)
    }

    /// Provision `count` user identities plus the server identity.
    ///
    /// Returns the generated usernames; the server identity always lives
    /// under the fixed name [`SERVER_IDENTITY`].
    pub fn generate_identities(&self, count: usize) -> Result<Vec<String>> {
        info!("Generating {} user identities in {}", count, self.base_dir.display());

        let words = self.load_words()?;
        let mut rng = OsRng;
        let mut usernames = Vec::with_capacity(count);
        let mut taken: HashSet<String> = HashSet::new();

        for _ in 0..count {
            let username = self.unique_username(&words, &taken, &mut rng)?;
            self.create_identity(&username)?;
            taken.insert(username.clone());
            usernames.push(username);
        }

        self.create_identity(SERVER_IDENTITY)?;

        Ok(usernames)
    }

    /// Generate a fresh key pair and persist it under `username`.
    pub fn create_identity(&self, username: &str) -> Result<Identity> {
        let identity = Identity::generate()?;
        self.save_identity(username, &identity)?;
        info!("Created identity {} ({})", username, identity.fingerprint()?);
        Ok(identity)
    }

    /// Persist a key pair: private key mode 0600, public key 0644, directory 0750.
    pub fn save_identity(&self, username: &str, identity: &Identity) -> Result<()> {
        let dir = self.identity_dir(username)?;
        std::fs::create_dir_all(&dir)?;

        let private_path = dir.join(PRIVATE_KEY_FILE);
        let public_path = dir.join(PUBLIC_KEY_FILE);

        write_restricted(&private_path, identity.private_pem()?.as_bytes())?;
        std::fs::write(&public_path, identity.public_pem()?)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&dir, std::fs::Permissions::from_mode(0o750))?;
            std::fs::set_permissions(&private_path, std::fs::Permissions::from_mode(0o600))?;
            std::fs::set_permissions(&public_path, std::fs::Permissions::from_mode(0o644))?;
        }

        debug!("Saved key pair to {}", dir.display());
        Ok(())
    }

    /// Load the PKCS#1 public key of `username`.
    ///
    /// `NotFound` if the file is absent, `Corrupt` if it does not parse.
    pub fn read_public_key(&self, username: &str) -> Result<RsaPublicKey> {
        let path = self.identity_dir(username)?.join(PUBLIC_KEY_FILE);
        let pem = read_key_file(&path, username)?;
        RsaPublicKey::from_pkcs1_pem(&pem)
            .map_err(|e| {
                SyncError::corrupt(format!("invalid public key {}: {}", path.display(), e))
            })
    }

    /// Load the full key pair of `username` from its PKCS#1 private key.
    pub fn read_private_key(&self, username: &str) -> Result<Identity> {
        let path = self.identity_dir(username)?.join(PRIVATE_KEY_FILE);
        let pem = read_key_file(&path, username)?;
        let private_key = RsaPrivateKey::from_pkcs1_pem(&pem)
            .map_err(|e| {
                SyncError::corrupt(format!("invalid private key {}: {}", path.display(), e))
            })?;
        Ok(Identity { private_key })
    }

    /// Usernames of all provisioned identities, server identity excluded.
    pub fn list_usernames(&self) -> Result<Vec<String>> {
        let entries = match std::fs::read_dir(&self.base_dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(SyncError::not_found(format!(
                    "key directory {} does not exist",
                    self.base_dir.display()
                )))
            }
            Err(e) => return Err(e.into()),
        };

        let mut usernames = Vec::new();
        for entry in entries {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().to_string();
            if name != SERVER_IDENTITY {
                usernames.push(name);
            }
        }
        usernames.sort();
        Ok(usernames)
    }

    /// Find the single identity a client machine was given.
    pub fn scan_username(&self) -> Result<String> {
        let mut usernames = self.list_usernames()?;
        match usernames.len() {
            0 => Err(SyncError::not_found("no username found, please contact administrator")),
            1 => Ok(usernames.remove(0)),
            _ => Err(SyncError::conflict("multiple usernames found, please contact administrator")),
        }
    }

    fn load_words(&self) -> Result<Vec<String>> {
        let content = std::fs::read_to_string(&self.words_file).map_err(|e| {
            SyncError::config(format!("cannot read word list {}: {}", self.words_file.display(), e))
        })?;
        let words = parse_word_list(&content);
        if words.is_empty() {
            return Err(SyncError::config(format!(
                "word list {} contains no usable words",
                self.words_file.display()
            )));
        }
        Ok(words)
    }

    fn unique_username<R: Rng + ?Sized>(
        &self,
        words: &[String],
        taken: &HashSet<String>,
        rng: &mut R,
    ) -> Result<String> {
        for _ in 0..MAX_USERNAME_ATTEMPTS {
            let Some(candidate) = generate_username(words, rng) else {
                break;
            };
            if candidate != SERVER_IDENTITY
                && !taken.contains(&candidate)
                && !self.base_dir.join(&candidate).exists()
            {
                return Ok(candidate);
            }
        }
        Err(SyncError::config("could not derive a unique username from the word list"))
    }
}

fn read_key_file(path: &Path, username: &str) -> Result<String> {
    match std::fs::read_to_string(path) {
        Ok(content) => Ok(content),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(SyncError::not_found(format!(
            "no key for user {} at {}",
            username,
            path.display()
        ))),
        Err(e) if e.kind() == std::io::ErrorKind::InvalidData => Err(SyncError::corrupt(format!(
            "key file {} is not valid text",
            path.display()
        ))),
        Err(e) => Err(e.into()),
    }
}

fn write_restricted(path: &Path, data: &[u8]) -> Result<()> {
    use std::io::Write;

    let mut options = std::fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    let mut file = options.open(path)?;
    file.write_all(data)?;
    Ok(())
}
