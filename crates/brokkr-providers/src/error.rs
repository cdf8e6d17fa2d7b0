//! Error types for provider and SSH operations

use brokkr_core::retry::HttpStatusPredicate;
use thiserror::Error;

/// Cloud provider API failures
#[derive(Error, Debug)]
pub enum ProviderError {
    /// Non-2xx response; status and (sanitized, truncated) body preserved
    #[error("{provider} API returned {status}: {body}")]
    Api {
        provider: &'static str,
        status: u16,
        body: String,
    },

    /// The request never produced a response
    #[error("request to {provider} failed: {message}")]
    Transport {
        provider: &'static str,
        message: String,
    },

    #[error("unexpected response from {provider}: {message}")]
    Decode {
        provider: &'static str,
        message: String,
    },

    #[error("{0}")]
    Config(String),

    #[error("template rendering failed: {0}")]
    Template(#[from] tera::Error),
}

impl ProviderError {
    pub fn status(&self) -> Option<u16> {
        match self {
            ProviderError::Api { status, .. } => Some(*status),
            _ => None,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.status() == Some(404)
    }

    /// Worth retrying: transport failures and 408/425/429/5xx responses
    pub fn is_transient(&self) -> bool {
        match self {
            ProviderError::Api { status, .. } => {
                HttpStatusPredicate::default_http().is_retryable_code(*status)
            }
            ProviderError::Transport { .. } => true,
            _ => false,
        }
    }
}

/// SSH execution failures
///
/// A command that runs and exits non-zero is not an error; nor is a timeout,
/// which is reported through `ExecOutput::timed_out`.
#[derive(Error, Debug)]
pub enum SshError {
    #[error("ssh connection to {host} failed: {message}")]
    Connect { host: String, message: String },

    #[error("ssh binary not found on PATH")]
    MissingBinary,

    #[error("failed to prepare ssh identity: {0}")]
    Identity(#[source] std::io::Error),

    #[error("failed to run ssh: {0}")]
    Io(#[from] std::io::Error),
}
