//! Shared fixtures for unit tests.
//!
//! 4096-bit keys take a while to generate, so each test binary creates its
//! identities once and hands out references.

use crate::crypto::Identity;
use std::sync::OnceLock;

pub(crate) fn alice() -> &'static Identity {
    static ALICE: OnceLock<Identity> = OnceLock::new();
    ALICE.get_or_init(|| Identity::generate().unwrap())
}

pub(crate) fn bob() -> &'static Identity {
    static BOB: OnceLock<Identity> = OnceLock::new();
    BOB.get_or_init(|| Identity::generate().unwrap())
}
