//! Secret-handling helpers
//!
//! - `SecureString`: zeroed on drop, redacted in `Debug`/`Display`
//! - `AuditLog`: structured record of a key or credential operation
//! - `sanitize_error`: strips secret-looking text from messages before logging

use chrono::{DateTime, Utc};
use regex::Regex;
use std::fmt;
use std::sync::LazyLock;
use uuid::Uuid;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// A string holding secret material
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SecureString {
    inner: String,
}

impl SecureString {
    pub fn new(value: String) -> Self {
        Self { inner: value }
    }

    /// Borrow the secret. Keep the borrow short.
    pub fn as_str(&self) -> &str {
        &self.inner
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.inner.as_bytes()
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

impl From<String> for SecureString {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

impl From<&str> for SecureString {
    fn from(s: &str) -> Self {
        Self::new(s.to_string())
    }
}

impl fmt::Debug for SecureString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SecureString([REDACTED {} bytes])", self.len())
    }
}

impl fmt::Display for SecureString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[REDACTED]")
    }
}

/// Audit record for a security-relevant operation
///
/// Only identifiers are recorded, never key material or plaintext.
#[derive(Debug, Clone)]
pub struct AuditLog {
    pub operation: &'static str,
    /// What was acted on, e.g. a resource id or `org-key:v3`
    pub subject: String,
    pub organization_id: Option<Uuid>,
    pub success: bool,
    pub error: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl AuditLog {
    pub fn new(operation: &'static str, subject: impl Into<String>) -> Self {
        Self {
            operation,
            subject: subject.into(),
            organization_id: None,
            success: true,
            error: None,
            timestamp: Utc::now(),
        }
    }

    pub fn for_organization(mut self, organization_id: Uuid) -> Self {
        self.organization_id = Some(organization_id);
        self
    }

    /// Mark as failed; the message is sanitized
    pub fn failed(mut self, error: impl fmt::Display) -> Self {
        self.success = false;
        self.error = Some(sanitize_error(&error.to_string()));
        self
    }

    pub fn log(&self) {
        let org = self
            .organization_id
            .map(|id| id.to_string())
            .unwrap_or_default();

        if self.success {
            tracing::info!(
                target: "brokkr::audit",
                operation = self.operation,
                subject = %self.subject,
                organization_id = %org,
                timestamp = %self.timestamp.to_rfc3339(),
                "audit: ok"
            );
        } else {
            tracing::warn!(
                target: "brokkr::audit",
                operation = self.operation,
                subject = %self.subject,
                organization_id = %org,
                error = self.error.as_deref().unwrap_or(""),
                timestamp = %self.timestamp.to_rfc3339(),
                "audit: failed"
            );
        }
    }
}

static REDACTIONS: LazyLock<Vec<(Regex, &'static str)>> = LazyLock::new(|| {
    [
        (
            r"-----BEGIN [A-Z ]+-----[\s\S]*?-----END [A-Z ]+-----",
            "[REDACTED_PEM]",
        ),
        (r"(?i)bearer\s+[A-Za-z0-9._~+/=-]+", "Bearer [REDACTED]"),
        (
            r"(?i)(token|key|password|secret)([=:]\s*)[^\s,}]+",
            "$1$2[REDACTED]",
        ),
        (r"\b[0-9a-fA-F]{64}\b", "[REDACTED_HEX]"),
        (r"[A-Za-z0-9+/]{48,}={0,2}", "[REDACTED_BASE64]"),
    ]
    .into_iter()
    .filter_map(|(pattern, replacement)| Regex::new(pattern).ok().map(|re| (re, replacement)))
    .collect()
});

/// Remove secret-looking substrings from an error message
pub fn sanitize_error(error: &str) -> String {
    REDACTIONS
        .iter()
        .fold(error.to_string(), |acc, (re, replacement)| {
            re.replace_all(&acc, *replacement).into_owned()
        })
}
