//! Resource record persistence

use crate::error::{QuotaKind, QuotaViolation, StoreError};
use crate::resource::ProvisionedResource;
use async_trait::async_trait;
use brokkr_core::types::QuotaConfig;
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Durable storage for provisioned resources
///
/// `reserve` is the only way a record enters the store. It checks the
/// organization's quotas and inserts in one critical section, so two
/// concurrent provisions cannot both pass a check that only one fits.
#[async_trait]
pub trait ResourceStore: Send + Sync {
    /// Insert `record` if the owning organization is within `quota` at `now`
    ///
    /// Live records (provisioning or active) count toward the active cap.
    /// Records of any status created in the hour before `now` count toward
    /// the rate cap.
    async fn reserve(
        &self,
        record: ProvisionedResource,
        quota: QuotaConfig,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    async fn get(&self, id: Uuid) -> Result<Option<ProvisionedResource>, StoreError>;

    /// Replace an existing record
    async fn update(&self, record: &ProvisionedResource) -> Result<(), StoreError>;

    /// Drop a reservation that never became a resource
    async fn remove(&self, id: Uuid) -> Result<(), StoreError>;

    /// All records of one organization, oldest first
    async fn list_by_org(&self, organization_id: Uuid)
        -> Result<Vec<ProvisionedResource>, StoreError>;

    /// Provisioning and active records across all organizations
    async fn list_live(&self) -> Result<Vec<ProvisionedResource>, StoreError>;
}

/// In-process store guarded by a single lock
#[derive(Debug, Default)]
pub struct InMemoryResourceStore {
    records: RwLock<HashMap<Uuid, ProvisionedResource>>,
}

impl InMemoryResourceStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn check_quota(
    records: &HashMap<Uuid, ProvisionedResource>,
    organization_id: Uuid,
    quota: QuotaConfig,
    now: DateTime<Utc>,
) -> Result<(), QuotaViolation> {
    let window_start = now - Duration::hours(1);
    let (mut live, mut recent) = (0usize, 0usize);
    for record in records.values().filter(|r| r.organization_id == organization_id) {
        if record.status.is_live() {
            live += 1;
        }
        if record.created_at > window_start {
            recent += 1;
        }
    }

    if live >= quota.max_active_per_org {
        return Err(QuotaViolation {
            kind: QuotaKind::ActiveResources,
            current: live,
            limit: quota.max_active_per_org,
        });
    }
    if recent >= quota.max_provisions_per_hour {
        return Err(QuotaViolation {
            kind: QuotaKind::HourlyProvisions,
            current: recent,
            limit: quota.max_provisions_per_hour,
        });
    }
    Ok(())
}

#[async_trait]
impl ResourceStore for InMemoryResourceStore {
    async fn reserve(
        &self,
        record: ProvisionedResource,
        quota: QuotaConfig,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut records = self.records.write().await;
        if records.contains_key(&record.id) {
            return Err(StoreError::Duplicate(record.id));
        }
        check_quota(&records, record.organization_id, quota, now).map_err(StoreError::Quota)?;
        records.insert(record.id, record);
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<ProvisionedResource>, StoreError> {
        Ok(self.records.read().await.get(&id).cloned())
    }

    async fn update(&self, record: &ProvisionedResource) -> Result<(), StoreError> {
        let mut records = self.records.write().await;
        match records.get_mut(&record.id) {
            Some(existing) => {
                *existing = record.clone();
                Ok(())
            }
            None => Err(StoreError::NotFound(record.id)),
        }
    }

    async fn remove(&self, id: Uuid) -> Result<(), StoreError> {
        self.records.write().await.remove(&id);
        Ok(())
    }

    async fn list_by_org(
        &self,
        organization_id: Uuid,
    ) -> Result<Vec<ProvisionedResource>, StoreError> {
        let records = self.records.read().await;
        let mut owned: Vec<_> = records
            .values()
            .filter(|r| r.organization_id == organization_id)
            .cloned()
            .collect();
        owned.sort_by_key(|r| r.created_at);
        Ok(owned)
    }

    async fn list_live(&self) -> Result<Vec<ProvisionedResource>, StoreError> {
        let records = self.records.read().await;
        Ok(records
            .values()
            .filter(|r| r.status.is_live())
            .cloned()
            .collect())
    }
}
