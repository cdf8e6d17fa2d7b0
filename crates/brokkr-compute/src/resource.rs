//! Provisioned resource records

use brokkr_secrets::Sealed;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// The only resource type provisioned today
pub const RESOURCE_TYPE_VM: &str = "vm";

/// Stored lifecycle state
///
/// `Expired` is never written by the manager; it is what
/// [`ProvisionedResource::effective_status`] reports for an active record
/// past its `expires_at`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceStatus {
    Provisioning,
    Active,
    Expired,
    Destroyed,
}

impl ResourceStatus {
    /// Holds (or is about to hold) cloud objects
    pub fn is_live(self) -> bool {
        matches!(self, ResourceStatus::Provisioning | ResourceStatus::Active)
    }
}

impl fmt::Display for ResourceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ResourceStatus::Provisioning => "provisioning",
            ResourceStatus::Active => "active",
            ResourceStatus::Expired => "expired",
            ResourceStatus::Destroyed => "destroyed",
        };
        f.write_str(s)
    }
}

/// Connection details and lifecycle bounds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceMetadata {
    pub ip: Option<String>,
    pub ssh_key_external_id: Option<String>,
    /// The VM's private SSH key; `None` once scrubbed
    #[serde(
        rename = "encryptedPrivateKey",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub private_key: Option<Sealed<String>>,
    pub ttl_minutes: u32,
    pub expires_at: DateTime<Utc>,
    pub region: String,
    pub size: String,
    pub image: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pipeline_run_id: Option<String>,
}

/// A VM owned by exactly one organization
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProvisionedResource {
    pub id: Uuid,
    /// Set at reservation and never changed
    pub organization_id: Uuid,
    pub provider: String,
    pub resource_type: String,
    /// Provider id of the VM, known once it is created
    pub external_id: Option<String>,
    pub name: String,
    pub status: ResourceStatus,
    pub metadata: ResourceMetadata,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ProvisionedResource {
    /// Status as seen at `now`, with expiry applied
    pub fn effective_status(&self, now: DateTime<Utc>) -> ResourceStatus {
        match self.status {
            ResourceStatus::Active if self.is_expired(now) => ResourceStatus::Expired,
            status => status,
        }
    }

    /// Expired strictly after `expires_at`; the expiry instant itself is still usable
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.metadata.expires_at
    }

    /// A `provisioning` record untouched for longer than `deadline`
    ///
    /// Provisioning refreshes `updated_at` as it creates cloud objects, so
    /// such a record belongs to a provision that was cancelled or crashed.
    pub fn is_stalled(&self, now: DateTime<Utc>, deadline: Duration) -> bool {
        self.status == ResourceStatus::Provisioning && now - self.updated_at > deadline
    }

    pub fn is_owned_by(&self, organization_id: Uuid) -> bool {
        self.organization_id == organization_id
    }

    /// What callers get to see; never carries key material
    pub fn view(&self, now: DateTime<Utc>) -> ResourceView {
        ResourceView {
            id: self.id,
            organization_id: self.organization_id,
            provider: self.provider.clone(),
            resource_type: self.resource_type.clone(),
            external_id: self.external_id.clone(),
            name: self.name.clone(),
            status: self.effective_status(now),
            ip: self.metadata.ip.clone(),
            region: self.metadata.region.clone(),
            size: self.metadata.size.clone(),
            image: self.metadata.image.clone(),
            ttl_minutes: self.metadata.ttl_minutes,
            expires_at: self.metadata.expires_at,
            pipeline_run_id: self.metadata.pipeline_run_id.clone(),
            has_credentials: self.metadata.private_key.is_some(),
            created_at: self.created_at,
        }
    }
}

/// Redacted resource handle returned to callers
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceView {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub provider: String,
    pub resource_type: String,
    pub external_id: Option<String>,
    pub name: String,
    pub status: ResourceStatus,
    pub ip: Option<String>,
    pub region: String,
    pub size: String,
    pub image: String,
    pub ttl_minutes: u32,
    pub expires_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pipeline_run_id: Option<String>,
    pub has_credentials: bool,
    pub created_at: DateTime<Utc>,
}
