//! Key-rotation-aware envelope encryption.
//!
//! Sealing resolves the master key active *now*, draws a fresh nonce,
//! derives the per-record key from both and seals with AES-256-GCM.
//! Opening resolves the master key named by the record's stored key-id.

use std::sync::Arc;

use chrono::Utc;

use crate::crypto;
use crate::error::BgCacheError;
use crate::keys::{self, MasterKeyStore};

/// Output of a seal: ciphertext with trailing nonce, and the key-id used.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sealed {
    pub ciphertext: Vec<u8>,
    pub key_id: u64,
}

/// Seals and opens individual strings under the rotating master-key family.
#[derive(Debug, Clone)]
pub struct Envelope {
    keys: Arc<MasterKeyStore>,
}

impl Envelope {
    pub fn new(keys: Arc<MasterKeyStore>) -> Self {
        Self { keys }
    }

    /// The key store backing this envelope.
    pub fn keys(&self) -> &Arc<MasterKeyStore> {
        &self.keys
    }

    /// Seal `data` with the key active at the current time.
    pub fn seal(&self, data: &[u8]) -> Result<Sealed, BgCacheError> {
        let now = u64::try_from(Utc::now().timestamp()).unwrap_or_default();
        self.seal_at(data, now)
    }

    /// Seal `data` with the key active at `t` (Unix seconds).
    pub fn seal_at(&self, data: &[u8], t: u64) -> Result<Sealed, BgCacheError> {
        let (master, key_id) = self.keys.resolve(t)?;
        let nonce = crypto::generate_nonce()?;
        let record_key = keys::derive_record_key(&master, &nonce)?;
        let ciphertext = crypto::seal(record_key.as_bytes(), nonce, data)?;
        Ok(Sealed { ciphertext, key_id })
    }

    /// Open a ciphertext produced by [`Envelope::seal`] with its stored
    /// key-id. The input slice is never modified.
    pub fn open(&self, ciphertext: &[u8], key_id: u64) -> Result<Vec<u8>, BgCacheError> {
        let (master, _) = self.keys.resolve(key_id)?;
        let (body, nonce) = crypto::split_nonce(ciphertext)?;
        let record_key = keys::derive_record_key(&master, &nonce)?;
        crypto::open(record_key.as_bytes(), nonce, body)
    }
}
