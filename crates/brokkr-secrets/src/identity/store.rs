//! Key pair persistence

use super::{KeyStatus, OrganizationKeyPair, KEY_ALGORITHM};
use crate::envelope::EncryptedPayload;
use crate::error::{IdentityError, IdentityResult};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

/// A freshly generated key pair, before the store assigns a version
#[derive(Debug, Clone)]
pub struct NewKeyPair {
    pub organization_id: Uuid,
    pub public_key: String,
    pub encrypted_private_key: EncryptedPayload,
}

/// How a new key joins the organization's series
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitMode {
    /// Refuse if an active key exists
    Provision,
    /// Flip the active key (if any) to rotated in the same transaction
    Rotate,
}

/// Durable storage for organization key pairs
///
/// Implementations guarantee `(organization_id, key_version)` uniqueness and
/// at most one active key per organization. `commit` is a single transaction.
#[async_trait]
pub trait KeyPairStore: Send + Sync {
    /// Insert `new` as the active key with version `max + 1`
    async fn commit(
        &self,
        new: NewKeyPair,
        mode: CommitMode,
    ) -> IdentityResult<OrganizationKeyPair>;

    async fn active(&self, organization_id: Uuid) -> IdentityResult<Option<OrganizationKeyPair>>;

    async fn by_version(
        &self,
        organization_id: Uuid,
        version: u32,
    ) -> IdentityResult<Option<OrganizationKeyPair>>;

    /// All versions, oldest first
    async fn list(&self, organization_id: Uuid) -> IdentityResult<Vec<OrganizationKeyPair>>;

    /// Flip every non-revoked key to revoked; returns how many changed
    async fn revoke_all(&self, organization_id: Uuid) -> IdentityResult<usize>;
}

/// In-process store, one lock over all organizations
#[derive(Debug, Default)]
pub struct InMemoryKeyPairStore {
    keys: RwLock<HashMap<Uuid, Vec<OrganizationKeyPair>>>,
}

impl InMemoryKeyPairStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KeyPairStore for InMemoryKeyPairStore {
    async fn commit(
        &self,
        new: NewKeyPair,
        mode: CommitMode,
    ) -> IdentityResult<OrganizationKeyPair> {
        let mut keys = self.keys.write().await;
        let series = keys.entry(new.organization_id).or_default();

        let active = series.iter().position(OrganizationKeyPair::is_active);
        match (mode, active) {
            (CommitMode::Provision, Some(_)) => {
                return Err(IdentityError::ActiveKeyExists(new.organization_id));
            }
            (CommitMode::Rotate, Some(index)) => series[index].status = KeyStatus::Rotated,
            (_, None) => {}
        }

        let version = series.iter().map(|k| k.key_version).max().unwrap_or(0) + 1;
        let record = OrganizationKeyPair {
            id: Uuid::new_v4(),
            organization_id: new.organization_id,
            public_key: new.public_key,
            encrypted_private_key: new.encrypted_private_key,
            key_version: version,
            algorithm: KEY_ALGORITHM.to_string(),
            status: KeyStatus::Active,
            created_at: Utc::now(),
        };
        series.push(record.clone());
        Ok(record)
    }

    async fn active(&self, organization_id: Uuid) -> IdentityResult<Option<OrganizationKeyPair>> {
        let keys = self.keys.read().await;
        Ok(keys
            .get(&organization_id)
            .and_then(|series| series.iter().find(|k| k.is_active()).cloned()))
    }

    async fn by_version(
        &self,
        organization_id: Uuid,
        version: u32,
    ) -> IdentityResult<Option<OrganizationKeyPair>> {
        let keys = self.keys.read().await;
        Ok(keys.get(&organization_id).and_then(|series| {
            series
                .iter()
                .find(|k| k.key_version == version)
                .cloned()
        }))
    }

    async fn list(&self, organization_id: Uuid) -> IdentityResult<Vec<OrganizationKeyPair>> {
        let keys = self.keys.read().await;
        Ok(keys.get(&organization_id).cloned().unwrap_or_default())
    }

    async fn revoke_all(&self, organization_id: Uuid) -> IdentityResult<usize> {
        let mut keys = self.keys.write().await;
        let Some(series) = keys.get_mut(&organization_id) else {
            return Ok(0);
        };

        let mut changed = 0;
        for key in series.iter_mut().filter(|k| k.status != KeyStatus::Revoked) {
            key.status = KeyStatus::Revoked;
            changed += 1;
        }
        Ok(changed)
    }
}
