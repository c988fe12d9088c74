//! Error types for bgcache.
//!
//! Every variant is a distinct failure mode of the cache, its persistence
//! path, or the at-rest encryption layer. Messages are intentionally
//! minimal: they say *what* failed without echoing key material, API keys
//! or bearer tokens.

use thiserror::Error;

/// The single error type for all bgcache operations.
#[derive(Debug, Error)]
pub enum BgCacheError {
    /// The master-key secret is absent or cannot be parsed.
    #[error("master key configuration missing or unreadable")]
    ConfigMissing,

    /// No master key has a key-id at or below the requested time.
    #[error("no master key available for time {0}")]
    NoKeyAvailable(u64),

    /// The selected master-key entry is an empty string.
    #[error("master key {0} is empty")]
    EmptyKey(u64),

    /// The selected master key is not 32 bytes of valid hex.
    #[error("master key {0} is malformed")]
    BadMasterKey(u64),

    /// The ciphertext is too short, or not valid base64.
    #[error("malformed ciphertext")]
    MalformedCiphertext,

    /// GCM authentication failed: wrong key, tampered data, or bad tag.
    #[error("ciphertext authentication failed")]
    AuthFailed,

    /// The system's random number generator failed to produce bytes.
    #[error("randomness source failed")]
    RandomnessFailure,

    /// Per-record key derivation (HKDF) failed.
    #[error("key derivation failed")]
    KeyDerivationFailure,

    /// Sealing failed inside the AEAD primitive.
    #[error("encryption failed")]
    EncryptionFailure,

    /// The search index could not be reached.
    #[error("index unavailable: {0}")]
    IndexUnavailable(String),

    /// The search index refused the request (4xx).
    #[error("index rejected request ({status}): {reason}")]
    IndexRejected { status: u16, reason: String },

    /// A write was attempted without an owning iamID.
    #[error("missing iamID")]
    MissingIamId,

    /// A persisted document could not be decoded.
    #[error("malformed document: {0}")]
    MalformedDocument(String),

    /// Settings could not be extracted or failed validation.
    #[error("configuration error: {0}")]
    Config(String),
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, BgCacheError>;

/// Fieldless classification of [`BgCacheError`], used as the reporting
/// category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    ConfigMissing,
    NoKeyAvailable,
    EmptyKey,
    BadMasterKey,
    MalformedCiphertext,
    AuthFailed,
    RandomnessFailure,
    KeyDerivationFailure,
    EncryptionFailure,
    IndexUnavailable,
    IndexRejected,
    MissingIamId,
    MalformedDocument,
    Config,
}

impl ErrorKind {
    /// Stable snake_case name for the kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ConfigMissing => "config_missing",
            Self::NoKeyAvailable => "no_key_available",
            Self::EmptyKey => "empty_key",
            Self::BadMasterKey => "bad_master_key",
            Self::MalformedCiphertext => "malformed_ciphertext",
            Self::AuthFailed => "auth_failed",
            Self::RandomnessFailure => "randomness_failure",
            Self::KeyDerivationFailure => "key_derivation_failure",
            Self::EncryptionFailure => "encryption_failure",
            Self::IndexUnavailable => "index_unavailable",
            Self::IndexRejected => "index_rejected",
            Self::MissingIamId => "missing_iam_id",
            Self::MalformedDocument => "malformed_document",
            Self::Config => "config",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl BgCacheError {
    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::ConfigMissing => ErrorKind::ConfigMissing,
            Self::NoKeyAvailable(_) => ErrorKind::NoKeyAvailable,
            Self::EmptyKey(_) => ErrorKind::EmptyKey,
            Self::BadMasterKey(_) => ErrorKind::BadMasterKey,
            Self::MalformedCiphertext => ErrorKind::MalformedCiphertext,
            Self::AuthFailed => ErrorKind::AuthFailed,
            Self::RandomnessFailure => ErrorKind::RandomnessFailure,
            Self::KeyDerivationFailure => ErrorKind::KeyDerivationFailure,
            Self::EncryptionFailure => ErrorKind::EncryptionFailure,
            Self::IndexUnavailable(_) => ErrorKind::IndexUnavailable,
            Self::IndexRejected { .. } => ErrorKind::IndexRejected,
            Self::MissingIamId => ErrorKind::MissingIamId,
            Self::MalformedDocument(_) => ErrorKind::MalformedDocument,
            Self::Config(_) => ErrorKind::Config,
        }
    }

    /// True for the master-key resolution family.
    pub fn is_key_error(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::ConfigMissing
                | ErrorKind::NoKeyAvailable
                | ErrorKind::EmptyKey
                | ErrorKind::BadMasterKey
        )
    }
}
