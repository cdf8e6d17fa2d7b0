//! Provider adapters for Brokkr
//!
//! - `CloudProvider`: the VM and SSH-key surface of a cloud API, with a
//!   DigitalOcean implementation
//! - `ssh`: one-time key generation and remote execution through OpenSSH
//! - `templates`: cloud-init bootstrap scripts

pub mod digitalocean;
pub mod error;
pub mod ssh;
pub mod templates;
pub mod traits;

pub use digitalocean::DigitalOceanProvider;
pub use error::{ProviderError, SshError};
pub use ssh::{
    EphemeralSshKeyPair, ExecOutput, ExecRequest, OpenSshOptions, OpenSshShell, RemoteShell,
    SshTarget, TIMEOUT_EXIT_CODE,
};
pub use templates::{BootstrapContext, TemplateRegistry};
pub use traits::{CloudProvider, CreateVmRequest, RegisteredKey, VmInfo};
