//! Organization identity keys
//!
//! Each organization owns a versioned series of Ed25519 key pairs. Exactly one
//! version is `active` at a time; rotation retires it to `rotated` (kept so
//! historical signatures still verify) and revocation retires every version.
//! Private halves are stored only as KEK-encrypted payloads.

mod service;
mod store;

pub use service::{OrganizationIdentityService, SignedPayload};
pub use store::{CommitMode, InMemoryKeyPairStore, KeyPairStore, NewKeyPair};

use crate::envelope::EncryptedPayload;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Signature algorithm for organization keys
pub const KEY_ALGORITHM: &str = "Ed25519";

/// Lifecycle state of a key pair
///
/// `active -> rotated`, `active | rotated -> revoked`. Never backwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyStatus {
    Active,
    Rotated,
    Revoked,
}

impl fmt::Display for KeyStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            KeyStatus::Active => "active",
            KeyStatus::Rotated => "rotated",
            KeyStatus::Revoked => "revoked",
        };
        write!(f, "{}", s)
    }
}

/// A stored organization key pair
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrganizationKeyPair {
    pub id: Uuid,
    pub organization_id: Uuid,
    /// Base64 32-byte Ed25519 public key
    pub public_key: String,
    /// Encrypted 32-byte Ed25519 seed
    pub encrypted_private_key: EncryptedPayload,
    pub key_version: u32,
    pub algorithm: String,
    pub status: KeyStatus,
    pub created_at: DateTime<Utc>,
}

impl OrganizationKeyPair {
    pub fn is_active(&self) -> bool {
        self.status == KeyStatus::Active
    }

    /// `org-key:v<N>`, used as the audit subject
    pub fn label(&self) -> String {
        format!("org-key:v{}", self.key_version)
    }
}
