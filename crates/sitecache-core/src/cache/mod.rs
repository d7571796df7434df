//! Durable credential cache.
//!
//! This module provides the `CredentialStore`, which keeps one bearer
//! credential per derived key on disk so tokens survive restarts. Entries are
//! JSON files sealed with a local store key; a credential is handed out only
//! while it is outside the configured safety margin before expiry.

mod seal;
pub mod store;

pub use store::{CacheEntry, CredentialStore, StoreStats};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Store I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Store serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("Sealing error: {0}")]
    Seal(String),

    #[error("Corrupt entry: {0}")]
    Corrupt(String),
}
