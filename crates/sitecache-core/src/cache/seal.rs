//! At-rest sealing of bearer secrets with ChaCha20-Poly1305.
//!
//! The store key lives in `store.key` next to the entries. Each entry is
//! sealed with a fresh random nonce and its cache key as associated data, so
//! an entry file copied under another key's name fails to open.

use std::io::Write;
use std::path::Path;
use std::time::Duration;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chacha20poly1305::aead::{Aead, KeyInit, Payload};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};
use rand::RngCore;

use super::StoreError;

/// Key file name inside the cache directory
pub const KEY_FILE: &str = "store.key";

const KEY_LEN: usize = 32;
const NONCE_LEN: usize = 12;

/// A key file shorter than this is still being written by another process
const KEY_HEX_LEN: usize = KEY_LEN * 2;
const KEY_READ_ATTEMPTS: u32 = 20;
const KEY_READ_DELAY: Duration = Duration::from_millis(25);

pub struct Sealer {
    cipher: ChaCha20Poly1305,
}

/// A sealed secret as written to disk (both fields base64)
pub struct Sealed {
    pub nonce: String,
    pub ciphertext: String,
}

impl Sealer {
    /// Load the store key from `dir`, creating it on first use.
    pub fn load_or_create(dir: &Path) -> Result<Self, StoreError> {
        let path = dir.join(KEY_FILE);
        let key_bytes = match std::fs::metadata(&path) {
            Ok(_) => read_key(&path)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => create_key(&path)?,
            Err(e) => return Err(StoreError::Io(e)),
        };
        Ok(Self {
            cipher: ChaCha20Poly1305::new(Key::from_slice(&key_bytes)),
        })
    }

    pub fn seal(&self, plaintext: &str, aad: &str) -> Result<Sealed, StoreError> {
        let mut nonce = [0u8; NONCE_LEN];
        rand::thread_rng().fill_bytes(&mut nonce);
        let ciphertext = self
            .cipher
            .encrypt(
                Nonce::from_slice(&nonce),
                Payload {
                    msg: plaintext.as_bytes(),
                    aad: aad.as_bytes(),
                },
            )
            .map_err(|_| StoreError::Seal("encryption failed".to_string()))?;
        Ok(Sealed {
            nonce: STANDARD.encode(nonce),
            ciphertext: STANDARD.encode(ciphertext),
        })
    }

    pub fn open(&self, sealed: &Sealed, aad: &str) -> Result<String, StoreError> {
        let nonce = STANDARD
            .decode(&sealed.nonce)
            .map_err(|e| StoreError::Seal(format!("bad nonce: {}", e)))?;
        if nonce.len() != NONCE_LEN {
            return Err(StoreError::Seal("bad nonce length".to_string()));
        }
        let ciphertext = STANDARD
            .decode(&sealed.ciphertext)
            .map_err(|e| StoreError::Seal(format!("bad ciphertext: {}", e)))?;
        let plaintext = self
            .cipher
            .decrypt(
                Nonce::from_slice(&nonce),
                Payload {
                    msg: &ciphertext,
                    aad: aad.as_bytes(),
                },
            )
            .map_err(|_| StoreError::Seal("decryption failed".to_string()))?;
        String::from_utf8(plaintext).map_err(|_| StoreError::Seal("secret is not utf-8".to_string()))
    }
}

fn decode_key(encoded: &str) -> Result<[u8; KEY_LEN], StoreError> {
    let bytes = hex::decode(encoded).map_err(|e| StoreError::Seal(format!("bad store key: {}", e)))?;
    bytes
        .try_into()
        .map_err(|_| StoreError::Seal("store key has wrong length".to_string()))
}

/// Read the key file, waiting briefly while a concurrent creator finishes writing it
fn read_key(path: &Path) -> Result<[u8; KEY_LEN], StoreError> {
    let mut attempts = 0;
    loop {
        attempts += 1;
        let contents = std::fs::read_to_string(path)?;
        let encoded = contents.trim();
        if encoded.len() >= KEY_HEX_LEN || attempts >= KEY_READ_ATTEMPTS {
            return decode_key(encoded);
        }
        std::thread::sleep(KEY_READ_DELAY);
    }
}

fn create_key(path: &Path) -> Result<[u8; KEY_LEN], StoreError> {
    let mut key = [0u8; KEY_LEN];
    rand::thread_rng().fill_bytes(&mut key);

    let mut options = std::fs::OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    match options.open(path) {
        Ok(mut file) => {
            file.write_all(hex::encode(key).as_bytes())?;
            file.sync_all()?;
            Ok(key)
        }
        // Another process created it first; use theirs
        Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => read_key(path),
        Err(e) => Err(StoreError::Io(e)),
    }
}
