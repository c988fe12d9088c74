//! Master-key resolution and per-record key derivation.
//!
//! This module owns three responsibilities:
//! 1. Reading the master-key family from a [`SecretProvider`].
//! 2. Resolving the key active at a point in time (rotation by key-id).
//! 3. Deriving the per-record key from a master key and a nonce using
//!    HKDF-SHA256.
//!
//! This is one of exactly two modules permitted to import `ring` directly
//! (the other is `crypto`).
//!
//! ## Secret layout
//!
//! ```text
//! {"keys": {"<keyID>": "<64 hex chars>", ...}}
//! ```
//!
//! Key-ids double as activation times (Unix seconds). A record sealed at
//! time `t` uses the largest key-id `<= t`. Old key-ids must stay in the
//! secret for as long as any stored ciphertext references them.
//!
//! ## Derivation structure
//!
//! ```text
//! HKDF-SHA256(
//!     ikm  = master_key,
//!     salt = nonce,
//!     info = ""
//! )
//! ```

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::RwLock;
use ring::hkdf;
use serde::Deserialize;
use tracing::{debug, warn};
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use crate::crypto::{KEY_LEN, NONCE_LEN};
use crate::error::BgCacheError;

/// Name of the secret holding the master-key family.
pub const MASTER_KEY_SECRET: &str = "BGCACHE_MASTER_KEY";

// ---------------------------------------------------------------------------
// Secret providers
// ---------------------------------------------------------------------------

/// Source of raw secret values. Implementations provide their own
/// concurrency safety; the cache may call them from any thread.
pub trait SecretProvider: Send + Sync {
    /// Return the current value of the named secret, if any.
    fn secret(&self, name: &str) -> Option<Zeroizing<String>>;
}

/// Reads secrets from the process environment.
#[derive(Debug, Default, Clone, Copy)]
pub struct EnvSecretProvider;

impl SecretProvider for EnvSecretProvider {
    fn secret(&self, name: &str) -> Option<Zeroizing<String>> {
        std::env::var(name).ok().map(Zeroizing::new)
    }
}

/// Holds a single secret value in memory. Useful when the host fetches the
/// secret itself, and in tests.
pub struct StaticSecretProvider {
    name: String,
    value: RwLock<Zeroizing<String>>,
}

impl StaticSecretProvider {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: RwLock::new(Zeroizing::new(value.into())),
        }
    }

    /// Replace the stored value, e.g. after the host observes a rotation.
    pub fn set(&self, value: impl Into<String>) {
        *self.value.write() = Zeroizing::new(value.into());
    }
}

impl SecretProvider for StaticSecretProvider {
    fn secret(&self, name: &str) -> Option<Zeroizing<String>> {
        if name == self.name {
            Some(self.value.read().clone())
        } else {
            None
        }
    }
}

// ---------------------------------------------------------------------------
// Master key
// ---------------------------------------------------------------------------

/// A master key resolved from the secret.
///
/// - Not `Clone`. Each resolution produces its own copy.
/// - Zeroised on drop.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct MasterKey {
    bytes: [u8; KEY_LEN],
}

impl MasterKey {
    /// Construct a `MasterKey` from raw bytes.
    pub fn from_bytes(bytes: [u8; KEY_LEN]) -> Self {
        Self { bytes }
    }

    /// Decode a hex master key; `key_id` is only used for the error.
    pub(crate) fn from_hex(key_id: u64, encoded: &str) -> Result<Self, BgCacheError> {
        let decoded = Zeroizing::new(
            hex::decode(encoded.trim()).map_err(|_| BgCacheError::BadMasterKey(key_id))?,
        );
        let bytes: [u8; KEY_LEN] = decoded
            .as_slice()
            .try_into()
            .map_err(|_| BgCacheError::BadMasterKey(key_id))?;
        Ok(Self { bytes })
    }

    /// `pub(crate)`: raw bytes never leave the crate.
    pub(crate) fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.bytes
    }
}

/// A per-record key derived from a master key and the record's nonce.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct DerivedKey {
    bytes: [u8; KEY_LEN],
}

impl DerivedKey {
    pub(crate) fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.bytes
    }
}

/// Derive the per-record key for `nonce`.
///
/// The nonce is the HKDF salt and the info string is empty, so each record
/// is sealed under a statistically independent key even though all records
/// share one master key.
pub(crate) fn derive_record_key(
    master: &MasterKey,
    nonce: &[u8; NONCE_LEN],
) -> Result<DerivedKey, BgCacheError> {
    let salt = hkdf::Salt::new(hkdf::HKDF_SHA256, nonce);
    let prk = salt.extract(master.as_bytes());

    let info: [&[u8]; 0] = [];
    let okm = prk
        .expand(&info, hkdf::HKDF_SHA256)
        .map_err(|_| BgCacheError::KeyDerivationFailure)?;

    let mut derived = [0u8; KEY_LEN];
    okm.fill(&mut derived)
        .map_err(|_| BgCacheError::KeyDerivationFailure)?;

    let key = DerivedKey { bytes: derived };
    derived.zeroize();
    Ok(key)
}

// ---------------------------------------------------------------------------
// Key store
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
struct KeyFamily {
    keys: BTreeMap<u64, String>,
}

impl Drop for KeyFamily {
    fn drop(&mut self) {
        for value in self.keys.values_mut() {
            value.zeroize();
        }
    }
}

fn parse_family(raw: &str) -> Result<KeyFamily, BgCacheError> {
    serde_json::from_str(raw).map_err(|_| BgCacheError::ConfigMissing)
}

/// Resolves `(master key, key-id)` pairs for points in time.
///
/// The raw secret is read from the provider once at construction (and again
/// on [`MasterKeyStore::refresh`]); the snapshot is parsed on every
/// resolution so no decoded key outlives the call that needed it.
pub struct MasterKeyStore {
    provider: Arc<dyn SecretProvider>,
    secret_name: String,
    snapshot: RwLock<Option<Zeroizing<String>>>,
}

impl MasterKeyStore {
    /// Read the named secret once. A missing secret is not fatal: the store
    /// is created empty and every resolution fails with `ConfigMissing`.
    pub fn load(provider: Arc<dyn SecretProvider>, secret_name: impl Into<String>) -> Self {
        let secret_name = secret_name.into();
        let snapshot = provider.secret(&secret_name);
        if snapshot.is_none() {
            warn!(secret = %secret_name, "master key secret not found");
        }
        Self {
            provider,
            secret_name,
            snapshot: RwLock::new(snapshot),
        }
    }

    /// Whether a secret value was found.
    pub fn is_loaded(&self) -> bool {
        self.snapshot.read().is_some()
    }

    /// Re-read the secret from the provider. Returns the number of key-ids
    /// in the new snapshot. The previous snapshot is kept if the new value
    /// is absent or unparseable.
    pub fn refresh(&self) -> Result<usize, BgCacheError> {
        let fresh = self
            .provider
            .secret(&self.secret_name)
            .ok_or(BgCacheError::ConfigMissing)?;
        let count = parse_family(&fresh)?.keys.len();
        *self.snapshot.write() = Some(fresh);
        debug!(secret = %self.secret_name, keys = count, "master key secret refreshed");
        Ok(count)
    }

    /// Known key-ids, largest first.
    pub fn key_ids(&self) -> Result<Vec<u64>, BgCacheError> {
        let guard = self.snapshot.read();
        let raw = guard.as_ref().ok_or(BgCacheError::ConfigMissing)?;
        Ok(parse_family(raw)?.keys.keys().rev().copied().collect())
    }

    /// Resolve the master key active at `t`: the largest key-id `<= t`.
    pub fn resolve(&self, t: u64) -> Result<(MasterKey, u64), BgCacheError> {
        let family = {
            let guard = self.snapshot.read();
            let raw = guard.as_ref().ok_or(BgCacheError::ConfigMissing)?;
            parse_family(raw)?
        };

        let (key_id, encoded) = family
            .keys
            .range(..=t)
            .next_back()
            .ok_or(BgCacheError::NoKeyAvailable(t))?;

        if encoded.is_empty() {
            return Err(BgCacheError::EmptyKey(*key_id));
        }

        Ok((MasterKey::from_hex(*key_id, encoded)?, *key_id))
    }
}

impl std::fmt::Debug for MasterKeyStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MasterKeyStore")
            .field("secret_name", &self.secret_name)
            .field("loaded", &self.is_loaded())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY_A: &str = "000102030405060708090a0b0c0d0e0f101112131415161718191a1b1c1d1e1f";
    const KEY_B: &str = "1f1e1d1c1b1a191817161514131211100f0e0d0c0b0a09080706050403020100";

    fn store(json: &str) -> MasterKeyStore {
        let provider = Arc::new(StaticSecretProvider::new(MASTER_KEY_SECRET, json));
        MasterKeyStore::load(provider, MASTER_KEY_SECRET)
    }

    #[test]
    fn test_resolves_largest_key_id_not_after_t() {
        let keys = store(&format!(r#"{{"keys":{{"100":"{KEY_A}","200":"{KEY_B}"}}}}"#));

        assert_eq!(keys.resolve(150).unwrap().1, 100);
        assert_eq!(keys.resolve(200).unwrap().1, 200);
        assert_eq!(keys.resolve(10_000).unwrap().1, 200);
        assert_eq!(keys.key_ids().unwrap(), vec![200, 100]);
    }

    #[test]
    fn test_resolution_failures() {
        let keys = store(&format!(r#"{{"keys":{{"100":"{KEY_A}","200":""}}}}"#));
        assert!(matches!(keys.resolve(99), Err(BgCacheError::NoKeyAvailable(99))));
        assert!(matches!(keys.resolve(250), Err(BgCacheError::EmptyKey(200))));

        let keys = store(r#"{"keys":{"100":"abcd"}}"#);
        assert!(matches!(keys.resolve(100), Err(BgCacheError::BadMasterKey(100))));

        let keys = store(r#"{"keys":{"100":"not hex at all"}}"#);
        assert!(matches!(keys.resolve(100), Err(BgCacheError::BadMasterKey(100))));

        let keys = store("not json");
        assert!(matches!(keys.resolve(100), Err(BgCacheError::ConfigMissing)));
    }

    #[test]
    fn test_missing_secret_is_config_missing() {
        let provider = Arc::new(StaticSecretProvider::new("other", "{}"));
        let keys = MasterKeyStore::load(provider, MASTER_KEY_SECRET);
        assert!(!keys.is_loaded());
        assert!(matches!(keys.resolve(1), Err(BgCacheError::ConfigMissing)));
    }

    #[test]
    fn test_refresh_picks_up_new_key_id() {
        let provider = Arc::new(StaticSecretProvider::new(
            MASTER_KEY_SECRET,
            format!(r#"{{"keys":{{"100":"{KEY_A}"}}}}"#),
        ));
        let keys = MasterKeyStore::load(provider.clone(), MASTER_KEY_SECRET);
        assert_eq!(keys.resolve(500).unwrap().1, 100);

        provider.set(format!(r#"{{"keys":{{"100":"{KEY_A}","400":"{KEY_B}"}}}}"#));
        assert_eq!(keys.refresh().unwrap(), 2);
        assert_eq!(keys.resolve(500).unwrap().1, 400);

        // A broken value leaves the previous snapshot in place.
        provider.set("garbage");
        assert!(keys.refresh().is_err());
        assert_eq!(keys.resolve(500).unwrap().1, 400);
    }

    #[test]
    fn test_derived_keys_differ_per_nonce() {
        let master = MasterKey::from_bytes([3u8; KEY_LEN]);
        let a = derive_record_key(&master, &[0u8; NONCE_LEN]).unwrap();
        let b = derive_record_key(&master, &[1u8; NONCE_LEN]).unwrap();
        assert_ne!(a.as_bytes(), b.as_bytes());
        assert_ne!(a.as_bytes(), master.as_bytes());
    }
}
