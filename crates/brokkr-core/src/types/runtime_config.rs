//! Runtime configuration types for operational parameters
//!
//! These types control network timeouts, retry policies, compute lifecycle
//! defaults, tenant quotas, and where the platform key-encryption-key is read
//! from.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Operation name for the VM readiness poll
pub const OP_VM_READY: &str = "vm-ready";

/// Operation name for the SSH reachability probe
pub const OP_SSH_VERIFY: &str = "ssh-verify";

/// Complete runtime configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct BrokkrRuntimeConfig {
    /// Network and HTTP configuration
    #[serde(default)]
    pub network: NetworkConfig,

    /// Retry policy configurations
    #[serde(default)]
    pub retry_policies: RetryPoliciesConfig,

    /// Compute lifecycle defaults and ceilings
    #[serde(default)]
    pub compute: ComputeConfig,

    /// Per-organization quotas
    #[serde(default)]
    pub quotas: QuotaConfig,

    /// Key-encryption-key source
    #[serde(default)]
    pub crypto: CryptoConfig,
}

/// Network and HTTP configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct NetworkConfig {
    /// HTTP timeout in seconds for a single provider API call
    #[serde(default = "default_http_timeout")]
    pub http_timeout_secs: u64,

    /// Base URL of the cloud provider API
    #[serde(default = "default_provider_api_url")]
    pub provider_api_url: String,

    /// User agent string for HTTP requests
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            http_timeout_secs: default_http_timeout(),
            provider_api_url: default_provider_api_url(),
            user_agent: default_user_agent(),
        }
    }
}

fn default_http_timeout() -> u64 {
    30
}
fn default_provider_api_url() -> String {
    "https://api.digitalocean.com".to_string()
}
fn default_user_agent() -> String {
    format!(
        "brokkr/{} ({}; {})",
        env!("CARGO_PKG_VERSION"),
        std::env::consts::OS,
        std::env::consts::ARCH
    )
}

/// Retry policy configurations
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct RetryPoliciesConfig {
    /// Default retry policy
    #[serde(default)]
    pub default: RetryPolicy,

    /// Per-operation retry policies
    #[serde(default)]
    pub operations: HashMap<String, RetryPolicy>,
}

impl Default for RetryPoliciesConfig {
    fn default() -> Self {
        let mut operations = HashMap::new();

        // Readiness polling: capped exponential backoff, the wall-clock
        // timeout in ComputeConfig is the real bound.
        operations.insert(
            OP_VM_READY.to_string(),
            RetryPolicy {
                max_attempts: 120,
                strategy: RetryStrategy::ExponentialBackoff,
                backoff_multiplier: 1.5,
                initial_delay_ms: 2000,
                max_delay_ms: 15000,
            },
        );

        operations.insert(
            OP_SSH_VERIFY.to_string(),
            RetryPolicy {
                max_attempts: 10,
                strategy: RetryStrategy::FixedDelay,
                backoff_multiplier: 1.0,
                initial_delay_ms: 10000,
                max_delay_ms: 10000,
            },
        );

        Self {
            default: RetryPolicy::default(),
            operations,
        }
    }
}

impl RetryPoliciesConfig {
    /// Policy for an operation, falling back to the default policy
    pub fn for_operation(&self, operation: &str) -> RetryPolicy {
        self.operations
            .get(operation)
            .cloned()
            .unwrap_or_else(|| self.default.clone())
    }
}

/// Retry policy for an operation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct RetryPolicy {
    /// Maximum number of attempts (including the first)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Retry strategy
    #[serde(default)]
    pub strategy: RetryStrategy,

    /// Backoff multiplier for exponential strategies
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    /// Initial delay in milliseconds
    #[serde(default = "default_initial_delay")]
    pub initial_delay_ms: u64,

    /// Maximum delay in milliseconds
    #[serde(default = "default_max_delay")]
    pub max_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            strategy: RetryStrategy::default(),
            backoff_multiplier: default_backoff_multiplier(),
            initial_delay_ms: default_initial_delay(),
            max_delay_ms: default_max_delay(),
        }
    }
}

fn default_max_attempts() -> u32 {
    3
}
fn default_backoff_multiplier() -> f64 {
    2.0
}
fn default_initial_delay() -> u64 {
    1000
}
fn default_max_delay() -> u64 {
    30000
}

/// Retry strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum RetryStrategy {
    /// No delay between attempts
    None,

    /// Fixed delay between retries
    FixedDelay,

    /// Exponential backoff (default)
    #[default]
    ExponentialBackoff,

    /// Linear backoff
    LinearBackoff,
}

/// Compute lifecycle defaults and hard ceilings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ComputeConfig {
    /// Privileged account used for SSH
    #[serde(default = "default_ssh_user")]
    pub ssh_user: String,

    /// SSH port
    #[serde(default = "default_ssh_port")]
    pub ssh_port: u16,

    /// Default region slug
    #[serde(default = "default_region")]
    pub default_region: String,

    /// Default size slug
    #[serde(default = "default_size")]
    pub default_size: String,

    /// Default image slug
    #[serde(default = "default_image")]
    pub default_image: String,

    /// TTL applied when the caller does not pass one
    #[serde(default = "default_ttl_minutes")]
    pub default_ttl_minutes: u32,

    /// Largest TTL a caller may request
    #[serde(default = "default_max_ttl_minutes")]
    pub max_ttl_minutes: u32,

    /// Wall-clock limit for a VM to become network-ready
    #[serde(default = "default_ready_timeout")]
    pub ready_timeout_secs: u64,

    /// Timeout for a single SSH reachability probe
    #[serde(default = "default_probe_timeout")]
    pub ssh_probe_timeout_secs: u64,

    /// SSH connect timeout passed to the client
    #[serde(default = "default_connect_timeout")]
    pub ssh_connect_timeout_secs: u64,

    /// Keepalive interval for SSH sessions
    #[serde(default = "default_keepalive")]
    pub ssh_keepalive_secs: u64,

    /// Command timeout when the caller does not pass one
    #[serde(default = "default_exec_timeout")]
    pub default_exec_timeout_secs: u64,

    /// Largest command timeout a caller may request
    #[serde(default = "default_max_exec_timeout")]
    pub max_exec_timeout_secs: u64,

    /// Ceiling on captured stdout/stderr per stream
    #[serde(default = "default_max_output_bytes")]
    pub max_output_bytes: usize,

    /// Ceiling on a single pushed or pulled file
    #[serde(default = "default_max_transfer_bytes")]
    pub max_transfer_bytes: usize,

    /// Timeout for a single transfer
    #[serde(default = "default_transfer_timeout")]
    pub transfer_timeout_secs: u64,

    /// Directory created on the VM by the bootstrap script
    #[serde(default = "default_remote_work_dir")]
    pub remote_work_dir: String,

    /// Extra apt packages installed at boot
    #[serde(default)]
    pub bootstrap_packages: Vec<String>,
}

impl Default for ComputeConfig {
    fn default() -> Self {
        Self {
            ssh_user: default_ssh_user(),
            ssh_port: default_ssh_port(),
            default_region: default_region(),
            default_size: default_size(),
            default_image: default_image(),
            default_ttl_minutes: default_ttl_minutes(),
            max_ttl_minutes: default_max_ttl_minutes(),
            ready_timeout_secs: default_ready_timeout(),
            ssh_probe_timeout_secs: default_probe_timeout(),
            ssh_connect_timeout_secs: default_connect_timeout(),
            ssh_keepalive_secs: default_keepalive(),
            default_exec_timeout_secs: default_exec_timeout(),
            max_exec_timeout_secs: default_max_exec_timeout(),
            max_output_bytes: default_max_output_bytes(),
            max_transfer_bytes: default_max_transfer_bytes(),
            transfer_timeout_secs: default_transfer_timeout(),
            remote_work_dir: default_remote_work_dir(),
            bootstrap_packages: Vec::new(),
        }
    }
}

fn default_ssh_user() -> String {
    "root".to_string()
}
fn default_ssh_port() -> u16 {
    22
}
fn default_region() -> String {
    "nyc3".to_string()
}
fn default_size() -> String {
    "s-2vcpu-4gb".to_string()
}
fn default_image() -> String {
    "ubuntu-24-04-x64".to_string()
}
fn default_ttl_minutes() -> u32 {
    60
}
fn default_max_ttl_minutes() -> u32 {
    24 * 60
}
fn default_ready_timeout() -> u64 {
    300 // 5 minutes
}
fn default_probe_timeout() -> u64 {
    15
}
fn default_connect_timeout() -> u64 {
    10
}
fn default_keepalive() -> u64 {
    15
}
fn default_exec_timeout() -> u64 {
    300
}
fn default_max_exec_timeout() -> u64 {
    3600
}
fn default_max_output_bytes() -> usize {
    1024 * 1024 // 1 MB
}
fn default_max_transfer_bytes() -> usize {
    10 * 1024 * 1024 // 10 MB
}
fn default_transfer_timeout() -> u64 {
    120
}
fn default_remote_work_dir() -> String {
    "/root/work".to_string()
}

/// Per-organization provisioning quotas
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct QuotaConfig {
    /// Live (provisioning or active) resources an organization may hold
    #[serde(default = "default_max_active")]
    pub max_active_per_org: usize,

    /// Provisioning attempts allowed in the trailing hour
    #[serde(default = "default_max_per_hour")]
    pub max_provisions_per_hour: usize,
}

impl Default for QuotaConfig {
    fn default() -> Self {
        Self {
            max_active_per_org: default_max_active(),
            max_provisions_per_hour: default_max_per_hour(),
        }
    }
}

fn default_max_active() -> usize {
    3
}
fn default_max_per_hour() -> usize {
    10
}

/// Where the platform key-encryption-key comes from
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct CryptoConfig {
    /// Environment variable holding the 64-hex-character KEK
    #[serde(default = "default_kek_env")]
    pub kek_env_var: String,

    /// Optional file holding the KEK (hex), used when the variable is unset
    #[serde(default)]
    pub kek_file: Option<String>,
}

impl Default for CryptoConfig {
    fn default() -> Self {
        Self {
            kek_env_var: default_kek_env(),
            kek_file: None,
        }
    }
}

fn default_kek_env() -> String {
    "BROKKR_PLATFORM_KEK".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_operation_policies() {
        let policies = RetryPoliciesConfig::default();

        let ready = policies.for_operation(OP_VM_READY);
        assert_eq!(ready.strategy, RetryStrategy::ExponentialBackoff);
        assert_eq!(ready.max_delay_ms, 15000);

        let probe = policies.for_operation(OP_SSH_VERIFY);
        assert_eq!(probe.strategy, RetryStrategy::FixedDelay);
        assert_eq!(probe.max_attempts, 10);

        assert_eq!(policies.for_operation("unknown"), RetryPolicy::default());
    }

    #[test]
    fn test_partial_yaml_keeps_defaults() {
        let yaml = r#"
compute:
  ssh-user: builder
quotas:
  max-active-per-org: 7
"#;
        let config: BrokkrRuntimeConfig = serde_yaml_ng::from_str(yaml).unwrap();
        assert_eq!(config.compute.ssh_user, "builder");
        assert_eq!(config.compute.default_ttl_minutes, 60);
        assert_eq!(config.quotas.max_active_per_org, 7);
        assert_eq!(config.quotas.max_provisions_per_hour, 10);
        assert_eq!(config.crypto.kek_env_var, "BROKKR_PLATFORM_KEK");
    }
}
