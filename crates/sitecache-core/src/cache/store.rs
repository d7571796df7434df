use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::seal::{Sealed, Sealer};
use super::StoreError;
use crate::auth::{CacheKey, Credential};

/// One persisted credential, as read back from the store
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub key: CacheKey,
    pub credential: Credential,
    pub created_at: DateTime<Utc>,
}

/// On-disk layout of an entry file
#[derive(Debug, Serialize, Deserialize)]
struct StoredEntry {
    key: CacheKey,
    provider: String,
    nonce: String,
    sealed_credential: String,
    expires_at: DateTime<Utc>,
    created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StoreStats {
    pub total: usize,
    pub valid: usize,
    pub expired: usize,
}

/// Durable key -> credential map, one JSON file per key.
///
/// Writes go to a temp file that is renamed over the entry, so readers see
/// either the old entry or the new one and never a partial file. Safe to share
/// between tasks and between processes pointed at the same directory.
pub struct CredentialStore {
    dir: PathBuf,
    safety_margin: Duration,
    sealer: Sealer,
}

impl CredentialStore {
    pub fn open(dir: impl Into<PathBuf>, safety_margin: Duration) -> Result<Self, StoreError> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        let sealer = Sealer::load_or_create(&dir)?;
        debug!(dir = %dir.display(), "Credential store opened");
        Ok(Self {
            dir,
            safety_margin,
            sealer,
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn safety_margin(&self) -> Duration {
        self.safety_margin
    }

    fn entry_path(&self, key: &CacheKey) -> PathBuf {
        self.dir.join(format!("{}.json", key))
    }

    /// Cached credential for `key` if it is still usable now
    pub fn get(&self, key: &CacheKey) -> Option<Credential> {
        self.get_at(key, Utc::now())
    }

    /// Cached credential for `key` if `now < expires_at - safety_margin`.
    /// Unreadable entries are reported as a miss.
    pub fn get_at(&self, key: &CacheKey, now: DateTime<Utc>) -> Option<Credential> {
        match self.entry(key) {
            Ok(Some(entry)) if entry.credential.is_usable(now, self.safety_margin) => {
                debug!(
                    key = %key.short(),
                    expires_in = entry.credential.time_until_expiry(now).num_seconds(),
                    "Cache hit"
                );
                Some(entry.credential)
            }
            Ok(Some(_)) => {
                debug!(key = %key.short(), "Cache miss (expired or inside safety margin)");
                None
            }
            Ok(None) => {
                debug!(key = %key.short(), "Cache miss");
                None
            }
            Err(e) => {
                warn!(key = %key.short(), error = %e, "Unreadable cache entry, treating as miss");
                None
            }
        }
    }

    /// Read the raw entry for `key`, regardless of expiry
    pub fn entry(&self, key: &CacheKey) -> Result<Option<CacheEntry>, StoreError> {
        let contents = match std::fs::read_to_string(self.entry_path(key)) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let stored: StoredEntry = serde_json::from_str(&contents)?;
        if &stored.key != key {
            return Err(StoreError::Corrupt(format!(
                "entry file for {} holds key {}",
                key.short(),
                stored.key.short()
            )));
        }
        self.decode(stored).map(Some)
    }

    fn decode(&self, stored: StoredEntry) -> Result<CacheEntry, StoreError> {
        let secret = self.sealer.open(
            &Sealed {
                nonce: stored.nonce,
                ciphertext: stored.sealed_credential,
            },
            stored.key.as_str(),
        )?;
        Ok(CacheEntry {
            credential: Credential::new(secret, stored.expires_at, stored.provider),
            key: stored.key,
            created_at: stored.created_at,
        })
    }

    /// Insert or replace the entry for `key` in one atomic step
    pub fn put(&self, key: &CacheKey, credential: &Credential) -> Result<(), StoreError> {
        let sealed = self.sealer.seal(credential.secret(), key.as_str())?;
        let stored = StoredEntry {
            key: key.clone(),
            provider: credential.provider().to_string(),
            nonce: sealed.nonce,
            sealed_credential: sealed.ciphertext,
            expires_at: credential.expires_at(),
            created_at: Utc::now(),
        };
        let contents = serde_json::to_vec_pretty(&stored)?;

        let tmp_path = self
            .dir
            .join(format!(".{}.{:016x}.tmp", key, rand::random::<u64>()));
        if let Err(e) = write_synced(&tmp_path, &contents) {
            let _ = std::fs::remove_file(&tmp_path);
            return Err(e.into());
        }
        if let Err(e) = std::fs::rename(&tmp_path, self.entry_path(key)) {
            let _ = std::fs::remove_file(&tmp_path);
            return Err(e.into());
        }

        info!(
            key = %key.short(),
            principal = credential.principal().unwrap_or("unknown"),
            expires_at = %credential.expires_at(),
            "Credential cached"
        );
        Ok(())
    }

    /// Delete the entry for `key`; absent entries are not an error
    pub fn invalidate(&self, key: &CacheKey) -> Result<(), StoreError> {
        match std::fs::remove_file(self.entry_path(key)) {
            Ok(()) => {
                info!(key = %key.short(), "Credential invalidated");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Keys of every entry file currently in the store
    fn keys(&self) -> Result<Vec<CacheKey>, StoreError> {
        let mut keys = Vec::new();
        for dir_entry in std::fs::read_dir(&self.dir)? {
            let path = dir_entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            if let Some(key) = path
                .file_stem()
                .and_then(|s| s.to_str())
                .and_then(CacheKey::parse)
            {
                keys.push(key);
            }
        }
        keys.sort();
        Ok(keys)
    }

    /// Remove entries past their absolute expiry, plus unreadable ones.
    /// Returns how many entries were removed.
    pub fn cleanup_expired(&self) -> Result<usize, StoreError> {
        let now = Utc::now();
        let mut removed = 0;
        for key in self.keys()? {
            let stale = match self.entry(&key) {
                Ok(Some(entry)) => entry.credential.is_expired(now),
                Ok(None) => false,
                Err(e) => {
                    debug!(key = %key.short(), error = %e, "Removing unreadable cache entry");
                    true
                }
            };
            if stale {
                self.invalidate(&key)?;
                removed += 1;
            }
        }
        if removed > 0 {
            info!(removed, "Cleaned up expired credentials");
        }
        Ok(removed)
    }

    pub fn stats(&self) -> Result<StoreStats, StoreError> {
        let now = Utc::now();
        let mut stats = StoreStats::default();
        for key in self.keys()? {
            stats.total += 1;
            match self.entry(&key) {
                Ok(Some(entry)) if !entry.credential.is_expired(now) => stats.valid += 1,
                Ok(None) => stats.total -= 1,
                _ => stats.expired += 1,
            }
        }
        Ok(stats)
    }
}

/// Write `contents` and flush them to disk before the caller renames the file
fn write_synced(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    let mut file = std::fs::File::create(path)?;
    file.write_all(contents)?;
    file.sync_all()
}

// ============================================================================
// Tests
// ============================================================================
