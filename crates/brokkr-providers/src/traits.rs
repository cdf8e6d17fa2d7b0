//! Cloud provider trait and request/response types

use crate::error::ProviderError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// An SSH public key registered with the provider
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisteredKey {
    pub external_id: String,
    pub fingerprint: String,
}

/// Parameters for creating a VM
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CreateVmRequest {
    pub name: String,
    pub region: String,
    pub size: String,
    pub image: String,
    /// Provider ids of SSH keys to install for the login user
    pub ssh_key_ids: Vec<String>,
    /// Cloud-init user data
    pub user_data: String,
    pub tags: Vec<String>,
}

/// A VM as last reported by the provider
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VmInfo {
    pub external_id: String,
    pub name: String,
    /// Provider status string, e.g. `new`, `active`, `off`
    pub status: String,
    pub public_ipv4: Option<String>,
}

impl VmInfo {
    /// Running and reachable by address
    pub fn is_ready(&self) -> bool {
        self.status == "active" && self.public_ipv4.is_some()
    }
}

/// A cloud compute provider
///
/// Deletes are idempotent: deleting something already gone is `Ok`.
#[async_trait]
pub trait CloudProvider: Send + Sync {
    fn name(&self) -> &'static str;

    async fn register_ssh_key(
        &self,
        name: &str,
        public_key: &str,
    ) -> Result<RegisteredKey, ProviderError>;

    async fn create_vm(&self, request: &CreateVmRequest) -> Result<VmInfo, ProviderError>;

    async fn get_vm(&self, external_id: &str) -> Result<VmInfo, ProviderError>;

    async fn delete_vm(&self, external_id: &str) -> Result<(), ProviderError>;

    async fn delete_ssh_key(&self, external_id: &str) -> Result<(), ProviderError>;
}
