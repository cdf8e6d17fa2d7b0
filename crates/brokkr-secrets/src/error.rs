//! Error types for brokkr-secrets

use thiserror::Error;
use uuid::Uuid;

/// Envelope crypto failures
///
/// Every way a decryption can go wrong (tag mismatch, bad base64, wrong key,
/// unknown version) collapses into `DecryptionFailed` so callers cannot tell
/// them apart.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CryptoError {
    /// No platform KEK is configured
    #[error("encryption not configured: platform key-encryption-key is unavailable")]
    Unavailable,

    #[error("decryption failed")]
    DecryptionFailed,

    /// Encrypting or deriving failed inside the primitive
    #[error("encryption failed")]
    EncryptionFailed,

    /// Value could not be converted to or from JSON
    #[error("serialization failed: {0}")]
    Serialization(String),
}

impl CryptoError {
    pub fn is_unavailable(&self) -> bool {
        matches!(self, CryptoError::Unavailable)
    }
}

/// Why a KEK could not be loaded
#[derive(Error, Debug)]
pub enum KekError {
    #[error("{0} is not set")]
    NotSet(String),

    #[error("KEK must be 64 hex characters, got {0}")]
    BadLength(usize),

    #[error("KEK is not valid hex")]
    NotHex,

    #[error("failed to read KEK file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// Organization identity failures
#[derive(Error, Debug)]
pub enum IdentityError {
    #[error(transparent)]
    Crypto(#[from] CryptoError),

    #[error("organization {0} already has an active identity key; rotate it instead")]
    ActiveKeyExists(Uuid),

    #[error("organization {0} has no active identity key; provision one first")]
    NoActiveKey(Uuid),

    #[error("identity key version {version} not found for organization {organization_id}")]
    VersionNotFound { organization_id: Uuid, version: u32 },

    #[error("stored key material is invalid: {0}")]
    InvalidKeyMaterial(String),
}

pub type CryptoResult<T> = std::result::Result<T, CryptoError>;
pub type IdentityResult<T> = std::result::Result<T, IdentityError>;
