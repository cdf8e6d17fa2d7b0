//! Ephemeral, single-tenant compute for Brokkr
//!
//! [`ComputeManager`] provisions a VM per request, runs commands and file
//! transfers on it over SSH, and destroys it on request or once its TTL
//! passes. The VM's private key is stored envelope-encrypted and wiped on
//! teardown.

pub mod cleanup;
pub mod error;
pub mod manager;
pub mod resource;
pub mod store;

pub use cleanup::{BestEffortCleanup, CleanupReport, CleanupStep};
pub use error::{ComputeError, QuotaKind, QuotaViolation, Result, StoreError};
pub use manager::{
    ComputeManager, ComputeSettings, ExecuteRequest, ProvisionRequest, TeardownOutcome, Transfer,
    TransferDirection, TransferOutcome, RESOURCE_TAG,
};
pub use resource::{
    ProvisionedResource, ResourceMetadata, ResourceStatus, ResourceView, RESOURCE_TYPE_VM,
};
pub use store::{InMemoryResourceStore, ResourceStore};
