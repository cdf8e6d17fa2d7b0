//! Error types for brokkr-compute

use crate::resource::ResourceStatus;
use brokkr_providers::{ProviderError, SshError};
use brokkr_secrets::CryptoError;
use chrono::{DateTime, Utc};
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

/// Which quota was hit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuotaKind {
    ActiveResources,
    HourlyProvisions,
}

/// A refused reservation, with the numbers behind it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuotaViolation {
    pub kind: QuotaKind,
    pub current: usize,
    pub limit: usize,
}

impl fmt::Display for QuotaViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            QuotaKind::ActiveResources => write!(
                f,
                "active resource limit reached ({}/{}); tear down an existing resource first",
                self.current, self.limit
            ),
            QuotaKind::HourlyProvisions => write!(
                f,
                "provisioning rate limit reached ({}/{} in the last hour); try again later",
                self.current, self.limit
            ),
        }
    }
}

/// Record store failures
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("{0}")]
    Quota(QuotaViolation),

    #[error("resource {0} not found in store")]
    NotFound(Uuid),

    #[error("resource {0} already exists")]
    Duplicate(Uuid),

    #[error("record store error: {0}")]
    Backend(String),
}

/// Lifecycle manager errors
#[derive(Error, Debug)]
pub enum ComputeError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("encryption not configured: refusing to store an unencrypted private key")]
    EncryptionUnavailable,

    #[error("quota exceeded: {0}")]
    QuotaExceeded(QuotaViolation),

    #[error("resource {0} not found")]
    NotFound(Uuid),

    #[error("resource {resource_id} does not belong to organization {organization_id}")]
    AccessDenied {
        resource_id: Uuid,
        organization_id: Uuid,
    },

    #[error("resource {resource_id} expired at {expired_at}; tear it down and provision a new one")]
    Expired {
        resource_id: Uuid,
        expired_at: DateTime<Utc>,
    },

    #[error("resource {resource_id} is {status}, not active")]
    NotActive {
        resource_id: Uuid,
        status: ResourceStatus,
    },

    #[error("resource {0} has no stored connection details")]
    MissingConnectionDetails(Uuid),

    #[error("VM {external_id} not ready after {waited_secs}s")]
    ReadyTimeout {
        external_id: String,
        waited_secs: u64,
    },

    #[error("VM at {host} unreachable over ssh after {attempts} attempts: {message}")]
    SshUnreachable {
        host: String,
        attempts: u32,
        message: String,
    },

    #[error("{size} bytes exceeds the transfer limit of {limit} bytes")]
    TransferTooLarge { size: usize, limit: usize },

    #[error("transfer of {path} failed (exit {exit_code}): {stderr}")]
    TransferFailed {
        path: String,
        exit_code: i32,
        stderr: String,
    },

    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error(transparent)]
    Ssh(#[from] SshError),

    #[error("credential error: {0}")]
    Crypto(#[from] CryptoError),

    #[error(transparent)]
    Store(StoreError),
}

impl From<StoreError> for ComputeError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Quota(violation) => ComputeError::QuotaExceeded(violation),
            StoreError::NotFound(id) => ComputeError::NotFound(id),
            other => ComputeError::Store(other),
        }
    }
}

/// Result type alias for compute operations
pub type Result<T> = std::result::Result<T, ComputeError>;
