//! Cloud-init user data rendering

use crate::error::ProviderError;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tera::{Context, Tera};
use tracing::debug;

const BOOTSTRAP: &str = "bootstrap.sh";

/// Minutes added to the TTL before the VM powers itself off
pub const SHUTDOWN_GRACE_MINUTES: u32 = 15;

/// Values substituted into the bootstrap script
#[derive(Debug, Clone, Serialize)]
pub struct BootstrapContext {
    pub resource_name: String,
    pub organization_id: String,
    pub expires_at: DateTime<Utc>,
    pub ttl_minutes: u32,
    pub keepalive_secs: u64,
    pub work_dir: String,
    pub pipeline_run_id: Option<String>,
    pub packages: Vec<String>,
}

impl BootstrapContext {
    fn to_tera_context(&self) -> Result<Context, ProviderError> {
        let mut context = Context::from_serialize(self)?;
        context.insert(
            "shutdown_after_minutes",
            &(self.ttl_minutes + SHUTDOWN_GRACE_MINUTES),
        );
        context.insert("expires_at", &self.expires_at.to_rfc3339());
        Ok(context)
    }
}

/// Registry of embedded templates
pub struct TemplateRegistry {
    tera: Tera,
}

impl TemplateRegistry {
    pub fn new() -> Result<Self, ProviderError> {
        let mut tera = Tera::default();
        tera.add_raw_template(BOOTSTRAP, include_str!("bootstrap.sh.tera"))?;
        Ok(Self { tera })
    }

    /// Render the VM bootstrap script
    pub fn render_bootstrap(&self, context: &BootstrapContext) -> Result<String, ProviderError> {
        debug!(resource = %context.resource_name, "Rendering bootstrap script");
        Ok(self.tera.render(BOOTSTRAP, &context.to_tera_context()?)?)
    }
}
