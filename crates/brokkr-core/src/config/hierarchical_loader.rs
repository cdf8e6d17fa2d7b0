//! Hierarchical runtime configuration loader
//!
//! Precedence (low to high):
//! 1. Embedded defaults (built into the binary)
//! 2. Host config (~/.brokkr/brokkr-runtime.yaml)
//! 3. Environment variables (BROKKR_* prefix)
//! 4. Explicit values set by the embedding host

use crate::error::{Error, Result};
use crate::types::{BrokkrRuntimeConfig, RetryPoliciesConfig};
use camino::{Utf8Path, Utf8PathBuf};
use rust_embed::RustEmbed;
use serde::de::DeserializeOwned;
use std::env;
use std::fs;
use std::str::FromStr;
use tracing::debug;

/// Embedded configuration files
#[derive(RustEmbed)]
#[folder = "$CARGO_MANIFEST_DIR/../../embedded/config/"]
#[prefix = ""]
struct EmbeddedConfigs;

const RUNTIME_DEFAULTS: &str = "runtime-defaults.yaml";
const RUNTIME_FILE: &str = "brokkr-runtime.yaml";

/// Configuration hierarchy loader
pub struct HierarchicalConfigLoader {
    /// Directory holding host-level overrides
    config_dir: Utf8PathBuf,
}

impl HierarchicalConfigLoader {
    /// Create a loader rooted at ~/.brokkr
    pub fn new() -> Result<Self> {
        let home = env::var("HOME")
            .or_else(|_| env::var("USERPROFILE"))
            .map_err(|_| Error::invalid_config("Could not determine home directory"))?;

        Ok(Self {
            config_dir: Utf8PathBuf::from(home).join(".brokkr"),
        })
    }

    /// Create a loader with a custom config directory
    pub fn with_dir(config_dir: Utf8PathBuf) -> Self {
        Self { config_dir }
    }

    /// Get the config directory path
    pub fn config_dir(&self) -> &Utf8Path {
        &self.config_dir
    }

    /// Load runtime configuration with hierarchical precedence
    pub fn load_runtime_config(&self) -> Result<BrokkrRuntimeConfig> {
        let mut config = Self::load_embedded::<BrokkrRuntimeConfig>(RUNTIME_DEFAULTS)?;

        let runtime_path = self.config_dir.join(RUNTIME_FILE);
        if runtime_path.exists() {
            debug!("Loading runtime overrides from {}", runtime_path);
            let overlay = Self::load_yaml_file::<BrokkrRuntimeConfig>(&runtime_path)?;
            config = Self::merge_runtime_config(config, overlay);
        }

        Self::apply_env_overrides(config)
    }

    fn load_embedded<T: DeserializeOwned>(filename: &str) -> Result<T> {
        let file = EmbeddedConfigs::get(filename).ok_or_else(|| {
            Error::config_not_found(format!("Embedded config not found: {}", filename))
        })?;

        let content = std::str::from_utf8(&file.data).map_err(|_| {
            Error::invalid_config(format!("Invalid UTF-8 in embedded config: {}", filename))
        })?;

        serde_yaml_ng::from_str(content).map_err(|e| {
            Error::invalid_config(format!(
                "Failed to parse embedded config {}: {}",
                filename, e
            ))
        })
    }

    fn load_yaml_file<T: DeserializeOwned>(path: &Utf8Path) -> Result<T> {
        let content = fs::read_to_string(path)?;
        serde_yaml_ng::from_str(&content)
            .map_err(|e| Error::invalid_config(format!("Failed to parse {}: {}", path, e)))
    }

    /// Sections in the overlay replace the base; retry operations merge by name.
    fn merge_runtime_config(
        base: BrokkrRuntimeConfig,
        overlay: BrokkrRuntimeConfig,
    ) -> BrokkrRuntimeConfig {
        BrokkrRuntimeConfig {
            network: overlay.network,
            retry_policies: Self::merge_retry_policies(base.retry_policies, overlay.retry_policies),
            compute: overlay.compute,
            quotas: overlay.quotas,
            crypto: overlay.crypto,
        }
    }

    fn merge_retry_policies(
        mut base: RetryPoliciesConfig,
        overlay: RetryPoliciesConfig,
    ) -> RetryPoliciesConfig {
        for (operation, policy) in overlay.operations {
            base.operations.insert(operation, policy);
        }
        base.default = overlay.default;
        base
    }

    fn apply_env_overrides(mut config: BrokkrRuntimeConfig) -> Result<BrokkrRuntimeConfig> {
        if let Some(val) = parse_env::<u64>("BROKKR_HTTP_TIMEOUT_SECS")? {
            config.network.http_timeout_secs = val;
        }

        if let Ok(val) = env::var("BROKKR_PROVIDER_API_URL") {
            config.network.provider_api_url = val;
        }

        if let Ok(val) = env::var("BROKKR_SSH_USER") {
            config.compute.ssh_user = val;
        }

        if let Some(val) = parse_env::<u64>("BROKKR_READY_TIMEOUT_SECS")? {
            config.compute.ready_timeout_secs = val;
        }

        if let Some(val) = parse_env::<u32>("BROKKR_MAX_TTL_MINUTES")? {
            config.compute.max_ttl_minutes = val;
        }

        if let Some(val) = parse_env::<usize>("BROKKR_MAX_ACTIVE_PER_ORG")? {
            config.quotas.max_active_per_org = val;
        }

        if let Some(val) = parse_env::<usize>("BROKKR_MAX_PROVISIONS_PER_HOUR")? {
            config.quotas.max_provisions_per_hour = val;
        }

        if let Ok(val) = env::var("BROKKR_KEK_FILE") {
            config.crypto.kek_file = Some(val);
        }

        Ok(config)
    }
}

fn parse_env<T: FromStr>(name: &str) -> Result<Option<T>> {
    match env::var(name) {
        Ok(val) => val
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| Error::invalid_config(format!("{} must be a valid number", name))),
        Err(_) => Ok(None),
    }
}
