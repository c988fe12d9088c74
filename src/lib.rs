//! # bgcache
//!
//! Break-glass authorization cache.
//!
//! A passive, positive-only cache of authorization facts that fronts a slow
//! identity backend. Facts come in two shapes: grants held by an opaque API
//! key, and grants held by a user identity (iamID). Reads are served from
//! memory only. Writes are mirrored, when the index is reachable, into one
//! search-index document per owner, with the API key and its bearer token
//! sealed under a rotating family of master keys (AES-256-GCM, per-record
//! keys derived with HKDF-SHA256).
//!
//! ## Public API
//!
//! Hosts create a [`CacheRuntime`], call [`CacheRuntime::init`] once, and
//! use the returned [`BgCache`]. Everything else is supporting types.

// Module declarations.
pub mod bootstrap;
pub mod cache;
pub mod config;
pub(crate) mod crypto;
pub mod document;
pub mod envelope;
pub mod error;
pub mod index;
pub mod keys;
pub mod logging;
pub mod model;
pub mod report;
pub mod store;

pub use bootstrap::CacheRuntime;
pub use cache::{BgCache, CacheStats, ReloadSummary};
pub use config::{CacheSettings, LoggingSettings};
pub use envelope::{Envelope, Sealed};
pub use error::{BgCacheError, ErrorKind, Result};
pub use index::{IndexAdapter, MemoryIndex, SearchHit, SearchIndex};
pub use keys::{
    EnvSecretProvider, MasterKeyStore, SecretProvider, StaticSecretProvider, MASTER_KEY_SECRET,
};
pub use model::{ApiKeyGrant, Authorization, AuthorizationKind, Scope, UserGrant};
pub use report::{FileReportSink, ReportEvent, ReportSink, ReportingConfig, TracingReportSink};

/// Generate a fresh hex-encoded master key for a new key-id entry.
///
/// Operators publish the result in the master-key secret under a key-id equal
/// to its activation time. The crate never stores what this returns.
pub fn generate_master_key_hex() -> Result<String> {
    let bytes = zeroize::Zeroizing::new(crypto::generate_random_key()?);
    Ok(hex::encode(bytes.as_slice()))
}
