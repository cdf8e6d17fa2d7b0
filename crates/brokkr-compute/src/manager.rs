//! Ephemeral compute lifecycle
//!
//! ```text
//! (none) -> provisioning -> active -> destroyed
//!                              \-> expired (derived from expires_at)
//! ```
//!
//! Every entry point that takes an organization id loads the record and
//! checks ownership before any provider or SSH call. The private key is
//! decrypted for one call at a time and dropped (zeroized) right after.

use crate::cleanup::{BestEffortCleanup, CleanupStep};
use crate::error::{ComputeError, Result};
use crate::resource::{
    ProvisionedResource, ResourceMetadata, ResourceStatus, ResourceView, RESOURCE_TYPE_VM,
};
use crate::store::ResourceStore;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use brokkr_core::retry::{ClosurePredicate, RetryError, RetryExecutorBuilder, TracingObserver};
use brokkr_core::types::{
    BrokkrRuntimeConfig, ComputeConfig, QuotaConfig, RetryPolicy, OP_SSH_VERIFY, OP_VM_READY,
};
use brokkr_providers::ssh::{remote_parent, shell_quote};
use brokkr_providers::{
    BootstrapContext, CloudProvider, CreateVmRequest, DigitalOceanProvider, EphemeralSshKeyPair,
    ExecOutput, ExecRequest, OpenSshOptions, OpenSshShell, ProviderError, RemoteShell, SshError,
    SshTarget, TemplateRegistry, VmInfo, TIMEOUT_EXIT_CODE,
};
use brokkr_secrets::{sanitize_error, AuditLog, EnvelopeCrypto, Sealed, SecureString};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};
use uuid::Uuid;
use zeroize::Zeroizing;

/// Tag applied to every VM so strays can be found in the provider console
pub const RESOURCE_TAG: &str = "brokkr";

const PROBE_COMMAND: &str = "echo ready";
const PROBE_REPLY: &str = "ready";
const PROBE_OUTPUT_LIMIT: usize = 1024;
/// stdout/stderr ceiling for push, which prints nothing on success
const PUSH_OUTPUT_LIMIT: usize = 64 * 1024;
/// Allowance for the provider calls and store writes between record refreshes
const PROVISIONING_SLACK_SECS: i64 = 120;
const MAX_PIPELINE_RUN_ID_LEN: usize = 64;

/// Lifecycle knobs, usually taken from the runtime configuration
#[derive(Debug, Clone)]
pub struct ComputeSettings {
    pub compute: ComputeConfig,
    pub quotas: QuotaConfig,
    pub ready_policy: RetryPolicy,
    pub ssh_policy: RetryPolicy,
    /// Store private keys unencrypted when no KEK is configured
    pub allow_plaintext_keys: bool,
}

impl ComputeSettings {
    pub fn from_runtime(config: &BrokkrRuntimeConfig) -> Self {
        Self {
            compute: config.compute.clone(),
            quotas: config.quotas,
            ready_policy: config.retry_policies.for_operation(OP_VM_READY),
            ssh_policy: config.retry_policies.for_operation(OP_SSH_VERIFY),
            allow_plaintext_keys: false,
        }
    }

    pub fn with_plaintext_keys(mut self, allow: bool) -> Self {
        self.allow_plaintext_keys = allow;
        self
    }

    /// Longest a live provision can leave its record untouched
    ///
    /// The ready wait plus every SSH probe and retry delay. A `provisioning`
    /// record idle for longer was abandoned and may be torn down.
    pub fn provisioning_deadline(&self) -> chrono::Duration {
        let attempts = i64::from(self.ssh_policy.max_attempts.max(1));
        let per_probe_ms = (self.compute.ssh_probe_timeout_secs as i64)
            .saturating_mul(1000)
            .saturating_add(self.ssh_policy.max_delay_ms as i64);
        let ready_ms = (self.compute.ready_timeout_secs as i64)
            .saturating_add(PROVISIONING_SLACK_SECS)
            .saturating_mul(1000);

        let probes_ms = per_probe_ms.saturating_mul(attempts);
        chrono::Duration::milliseconds(ready_ms.saturating_add(probes_ms))
    }
}

impl Default for ComputeSettings {
    fn default() -> Self {
        Self::from_runtime(&BrokkrRuntimeConfig::default())
    }
}

/// What to provision; unset fields fall back to the configured defaults
#[derive(Debug, Clone, Default)]
pub struct ProvisionRequest {
    pub organization_id: Uuid,
    pub region: Option<String>,
    pub size: Option<String>,
    pub image: Option<String>,
    pub ttl_minutes: Option<u32>,
    pub pipeline_run_id: Option<String>,
}

impl ProvisionRequest {
    pub fn new(organization_id: Uuid) -> Self {
        Self {
            organization_id,
            ..Default::default()
        }
    }

    pub fn with_ttl_minutes(mut self, ttl_minutes: u32) -> Self {
        self.ttl_minutes = Some(ttl_minutes);
        self
    }
}

/// A command to run on a resource
#[derive(Debug, Clone)]
pub struct ExecuteRequest {
    pub command: String,
    pub working_dir: Option<String>,
    pub timeout_secs: Option<u64>,
}

impl ExecuteRequest {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            working_dir: None,
            timeout_secs: None,
        }
    }

    pub fn in_dir(mut self, dir: impl Into<String>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    pub fn with_timeout_secs(mut self, secs: u64) -> Self {
        self.timeout_secs = Some(secs);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TransferDirection {
    Push,
    Pull,
}

/// A file copy to or from a resource
#[derive(Debug, Clone)]
pub enum Transfer {
    Push { remote_path: String, content: Vec<u8> },
    Pull { remote_path: String },
}

impl Transfer {
    pub fn direction(&self) -> TransferDirection {
        match self {
            Transfer::Push { .. } => TransferDirection::Push,
            Transfer::Pull { .. } => TransferDirection::Pull,
        }
    }

    pub fn remote_path(&self) -> &str {
        match self {
            Transfer::Push { remote_path, .. } | Transfer::Pull { remote_path } => remote_path,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferOutcome {
    pub direction: TransferDirection,
    pub remote_path: String,
    pub bytes: usize,
    /// File content, for pulls
    #[serde(skip)]
    pub content: Option<Vec<u8>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TeardownOutcome {
    pub resource_id: Uuid,
    /// The resource was destroyed by an earlier call; nothing was done
    pub already_destroyed: bool,
    /// Cloud deletions that failed; the key was scrubbed regardless
    pub cleanup_failures: Vec<String>,
}

#[derive(Debug, Error)]
enum ReadyPollError {
    #[error("VM status is {0}")]
    NotReady(String),
    #[error(transparent)]
    Provider(ProviderError),
}

impl ReadyPollError {
    fn is_retryable(&self) -> bool {
        match self {
            ReadyPollError::NotReady(_) => true,
            ReadyPollError::Provider(e) => e.is_transient(),
        }
    }
}

#[derive(Debug, Error)]
enum ProbeError {
    #[error(transparent)]
    Ssh(#[from] SshError),
    #[error("probe exited with {exit_code}")]
    UnexpectedReply { exit_code: i32 },
}

/// Provisions, drives and destroys single-tenant VMs
pub struct ComputeManager {
    provider: Arc<dyn CloudProvider>,
    shell: Arc<dyn RemoteShell>,
    store: Arc<dyn ResourceStore>,
    crypto: EnvelopeCrypto,
    templates: TemplateRegistry,
    settings: ComputeSettings,
}

impl ComputeManager {
    pub fn new(
        provider: Arc<dyn CloudProvider>,
        shell: Arc<dyn RemoteShell>,
        store: Arc<dyn ResourceStore>,
        crypto: EnvelopeCrypto,
        settings: ComputeSettings,
    ) -> Result<Self> {
        if !crypto.is_available() && settings.allow_plaintext_keys {
            warn!("No KEK configured; VM private keys will be stored unencrypted");
        }
        Ok(Self {
            provider,
            shell,
            store,
            crypto,
            templates: TemplateRegistry::new()?,
            settings,
        })
    }

    /// Production wiring: DigitalOcean (token from the environment), the
    /// system ssh client and the KEK named in the configuration
    pub fn from_runtime_config(
        config: &BrokkrRuntimeConfig,
        store: Arc<dyn ResourceStore>,
    ) -> Result<Self> {
        let provider = DigitalOceanProvider::from_env(&config.network)?;
        let shell = OpenSshShell::new(OpenSshOptions::from(&config.compute));
        shell.check_prerequisites()?;

        Self::new(
            Arc::new(provider),
            Arc::new(shell),
            store,
            EnvelopeCrypto::from_config(&config.crypto),
            ComputeSettings::from_runtime(config),
        )
    }

    pub fn settings(&self) -> &ComputeSettings {
        &self.settings
    }

    /// Create a VM, confirm SSH works and store its encrypted key
    ///
    /// Quotas are checked and a reservation is written before any provider
    /// call. On failure every cloud object created so far is deleted and the
    /// reservation removed; the original error is returned. If the future is
    /// dropped part way, the same rollback runs on a spawned task.
    pub async fn provision(&self, request: ProvisionRequest) -> Result<ResourceView> {
        let ttl_minutes = self.validate_ttl(request.ttl_minutes)?;
        if let Some(run_id) = &request.pipeline_run_id {
            validate_pipeline_run_id(run_id)?;
        }
        if !self.crypto.is_available() && !self.settings.allow_plaintext_keys {
            return Err(ComputeError::EncryptionUnavailable);
        }

        let now = Utc::now();
        let id = Uuid::new_v4();
        let organization_id = request.organization_id;
        let compute = &self.settings.compute;
        let mut record = ProvisionedResource {
            id,
            organization_id,
            provider: self.provider.name().to_string(),
            resource_type: RESOURCE_TYPE_VM.to_string(),
            external_id: None,
            name: resource_name(id),
            status: ResourceStatus::Provisioning,
            metadata: ResourceMetadata {
                ip: None,
                ssh_key_external_id: None,
                private_key: None,
                ttl_minutes,
                expires_at: expiry(now, ttl_minutes),
                region: request.region.unwrap_or_else(|| compute.default_region.clone()),
                size: request.size.unwrap_or_else(|| compute.default_size.clone()),
                image: request.image.unwrap_or_else(|| compute.default_image.clone()),
                pipeline_run_id: request.pipeline_run_id,
            },
            created_at: now,
            updated_at: now,
        };

        self.store
            .reserve(record.clone(), self.settings.quotas, now)
            .await?;
        info!(
            resource_id = %id,
            organization_id = %organization_id,
            region = %record.metadata.region,
            size = %record.metadata.size,
            ttl_minutes,
            "Provisioning VM"
        );

        let mut rollback = RollbackGuard::new(id, &self.provider, &self.store);
        match self.bring_up(&mut record, rollback.steps()).await {
            Ok(()) => {
                rollback.disarm();
                AuditLog::new("compute.provision", id.to_string())
                    .for_organization(organization_id)
                    .log();
                info!(resource_id = %id, ip = ?record.metadata.ip, "VM active");
                Ok(record.view(Utc::now()))
            }
            Err(err) => {
                warn!(resource_id = %id, error = %err, "Provisioning failed, rolling back");
                let cleanup = rollback.disarm();
                roll_back(id, cleanup, self.provider.as_ref(), self.store.as_ref()).await;
                AuditLog::new("compute.provision", id.to_string())
                    .for_organization(organization_id)
                    .failed(&err)
                    .log();
                Err(err)
            }
        }
    }

    async fn bring_up(
        &self,
        record: &mut ProvisionedResource,
        cleanup: &mut BestEffortCleanup,
    ) -> Result<()> {
        let keypair = EphemeralSshKeyPair::generate(&record.name);

        let key = self
            .provider
            .register_ssh_key(&record.name, &keypair.public_key)
            .await?;
        cleanup.push(CleanupStep::DeleteSshKey(key.external_id.clone()));
        record.metadata.ssh_key_external_id = Some(key.external_id.clone());
        record.updated_at = Utc::now();
        self.store.update(record).await?;
        debug!(resource_id = %record.id, key_id = %key.external_id, "SSH key registered");

        let user_data = self.templates.render_bootstrap(&BootstrapContext {
            resource_name: record.name.clone(),
            organization_id: record.organization_id.to_string(),
            expires_at: record.metadata.expires_at,
            ttl_minutes: record.metadata.ttl_minutes,
            keepalive_secs: self.settings.compute.ssh_keepalive_secs,
            work_dir: self.settings.compute.remote_work_dir.clone(),
            pipeline_run_id: record.metadata.pipeline_run_id.clone(),
            packages: self.settings.compute.bootstrap_packages.clone(),
        })?;

        let vm = self
            .provider
            .create_vm(&CreateVmRequest {
                name: record.name.clone(),
                region: record.metadata.region.clone(),
                size: record.metadata.size.clone(),
                image: record.metadata.image.clone(),
                ssh_key_ids: vec![key.external_id],
                user_data,
                tags: vec![
                    RESOURCE_TAG.to_string(),
                    format!("org-{}", record.organization_id),
                ],
            })
            .await?;
        cleanup.push(CleanupStep::DeleteVm(vm.external_id.clone()));
        record.external_id = Some(vm.external_id.clone());
        record.updated_at = Utc::now();
        // keep the provider ids on record while we wait
        self.store.update(record).await?;

        let ip = self.wait_until_ready(&vm).await?;
        let target = self.target(&ip);
        self.verify_ssh(&target, &keypair.private_key).await?;

        let pem = Zeroizing::new(keypair.private_key.as_str().to_string());
        let sealed = if self.crypto.is_available() {
            Sealed::seal(&*pem, &self.crypto)?
        } else {
            warn!(resource_id = %record.id, "Storing VM private key unencrypted");
            Sealed::Plain(pem.to_string())
        };

        let now = Utc::now();
        record.metadata.ip = Some(ip);
        record.metadata.private_key = Some(sealed);
        record.metadata.expires_at = expiry(now, record.metadata.ttl_minutes);
        record.status = ResourceStatus::Active;
        record.updated_at = now;
        self.store.update(record).await?;
        Ok(())
    }

    /// Poll the provider until the VM is active with a public address
    async fn wait_until_ready(&self, vm: &VmInfo) -> Result<String> {
        if let (true, Some(ip)) = (vm.is_ready(), vm.public_ipv4.as_ref()) {
            return Ok(ip.clone());
        }

        let provider: &dyn CloudProvider = self.provider.as_ref();
        let external_id = vm.external_id.as_str();
        let executor = RetryExecutorBuilder::new()
            .with_policy(self.settings.ready_policy.clone())
            .with_predicate(ClosurePredicate::new(|e: &ReadyPollError| e.is_retryable()))
            .with_observer(TracingObserver::new(OP_VM_READY))
            .build();

        let poll = executor.execute(move || async move {
            let info = provider
                .get_vm(external_id)
                .await
                .map_err(ReadyPollError::Provider)?;
            match (info.is_ready(), info.public_ipv4) {
                (true, Some(ip)) => Ok(ip),
                _ => Err(ReadyPollError::NotReady(info.status)),
            }
        });

        let started = Instant::now();
        let limit = Duration::from_secs(self.settings.compute.ready_timeout_secs);
        let timed_out = || ComputeError::ReadyTimeout {
            external_id: external_id.to_string(),
            waited_secs: started.elapsed().as_secs(),
        };

        match tokio::time::timeout(limit, poll).await {
            Ok(Ok(ip)) => Ok(ip),
            Ok(Err(err)) => match err.into_source() {
                Some(ReadyPollError::Provider(e)) => Err(e.into()),
                Some(ReadyPollError::NotReady(_)) | None => Err(timed_out()),
            },
            Err(_) => Err(timed_out()),
        }
    }

    /// Run the probe command until it answers or the policy gives up
    async fn verify_ssh(&self, target: &SshTarget, key: &SecureString) -> Result<()> {
        let shell: &dyn RemoteShell = self.shell.as_ref();
        let probe_timeout = Duration::from_secs(self.settings.compute.ssh_probe_timeout_secs);
        let executor = RetryExecutorBuilder::new()
            .with_policy(self.settings.ssh_policy.clone())
            .with_observer(TracingObserver::new(OP_SSH_VERIFY))
            .build();

        let outcome = executor
            .execute(move || async move {
                let request = ExecRequest::new(PROBE_COMMAND, probe_timeout, PROBE_OUTPUT_LIMIT);
                let output = shell.exec(target, key, request).await?;
                if output.success() && output.stdout.trim() == PROBE_REPLY {
                    Ok(())
                } else {
                    Err(ProbeError::UnexpectedReply {
                        exit_code: output.exit_code,
                    })
                }
            })
            .await;

        outcome.map_err(|err: RetryError<ProbeError>| ComputeError::SshUnreachable {
            host: target.host.clone(),
            attempts: err.attempts(),
            message: err
                .last_error()
                .map(|e| sanitize_error(&e.to_string()))
                .unwrap_or_else(|| "no attempts allowed".to_string()),
        })
    }

    /// Run a command on an active resource
    ///
    /// A non-zero exit is reported in the output, not as an error. So is a
    /// timeout, with [`TIMEOUT_EXIT_CODE`].
    pub async fn execute(
        &self,
        resource_id: Uuid,
        organization_id: Uuid,
        request: ExecuteRequest,
    ) -> Result<ExecOutput> {
        if request.command.trim().is_empty() {
            return Err(ComputeError::InvalidRequest("command is empty".to_string()));
        }
        let timeout = self.exec_timeout(request.timeout_secs)?;

        let record = self.load_owned(resource_id, organization_id).await?;
        ensure_usable(&record, Utc::now())?;
        let target = self.target_for(&record)?;

        let command = match &request.working_dir {
            Some(dir) => format!("cd {} && {}", shell_quote(dir), request.command),
            None => request.command,
        };

        let key = self.open_credentials(&record)?;
        let output = self
            .shell
            .exec(
                &target,
                &key,
                ExecRequest::new(command, timeout, self.settings.compute.max_output_bytes),
            )
            .await?;
        drop(key);

        info!(
            resource_id = %resource_id,
            exit_code = output.exit_code,
            timed_out = output.timed_out,
            duration_ms = output.duration.as_millis() as u64,
            "Command finished"
        );
        Ok(output)
    }

    /// Copy a file to or from an active resource
    ///
    /// Content travels base64-encoded over the exec channel, so any bytes
    /// round-trip unchanged.
    pub async fn transfer(
        &self,
        resource_id: Uuid,
        organization_id: Uuid,
        transfer: Transfer,
    ) -> Result<TransferOutcome> {
        let limit = self.settings.compute.max_transfer_bytes;
        if transfer.remote_path().trim().is_empty() {
            return Err(ComputeError::InvalidRequest("remote path is empty".to_string()));
        }
        if let Transfer::Push { content, .. } = &transfer {
            if content.len() > limit {
                return Err(ComputeError::TransferTooLarge {
                    size: content.len(),
                    limit,
                });
            }
        }

        let record = self.load_owned(resource_id, organization_id).await?;
        ensure_usable(&record, Utc::now())?;
        let target = self.target_for(&record)?;
        let timeout = Duration::from_secs(self.settings.compute.transfer_timeout_secs);

        let key = self.open_credentials(&record)?;
        let outcome = match transfer {
            Transfer::Push {
                remote_path,
                content,
            } => {
                let path = shell_quote(&remote_path);
                let command = match remote_parent(&remote_path) {
                    Some(parent) => {
                        format!("mkdir -p {} && base64 -d > {}", shell_quote(parent), path)
                    }
                    None => format!("base64 -d > {}", path),
                };
                let request = ExecRequest::new(command, timeout, PUSH_OUTPUT_LIMIT)
                    .with_stdin(BASE64.encode(&content).into_bytes());
                let output = self.shell.exec(&target, &key, request).await?;
                check_transfer(&remote_path, &output)?;

                TransferOutcome {
                    direction: TransferDirection::Push,
                    remote_path,
                    bytes: content.len(),
                    content: None,
                }
            }
            Transfer::Pull { remote_path } => {
                let command = format!("base64 < {}", shell_quote(&remote_path));
                let request = ExecRequest::new(command, timeout, encoded_capture_limit(limit));
                let output = self.shell.exec(&target, &key, request).await?;
                check_transfer(&remote_path, &output)?;
                if output.stdout_truncated {
                    return Err(ComputeError::TransferTooLarge {
                        size: output.stdout.len() / 4 * 3,
                        limit,
                    });
                }

                let encoded: String = output
                    .stdout
                    .chars()
                    .filter(|c| !c.is_ascii_whitespace())
                    .collect();
                let content =
                    BASE64
                        .decode(encoded)
                        .map_err(|e| ComputeError::TransferFailed {
                            path: remote_path.clone(),
                            exit_code: output.exit_code,
                            stderr: format!("remote sent invalid base64: {}", e),
                        })?;
                if content.len() > limit {
                    return Err(ComputeError::TransferTooLarge {
                        size: content.len(),
                        limit,
                    });
                }

                TransferOutcome {
                    direction: TransferDirection::Pull,
                    remote_path,
                    bytes: content.len(),
                    content: Some(content),
                }
            }
        };
        drop(key);

        info!(
            resource_id = %resource_id,
            direction = ?outcome.direction,
            path = %outcome.remote_path,
            bytes = outcome.bytes,
            "Transfer finished"
        );
        Ok(outcome)
    }

    /// Delete the VM and its key, then scrub the stored private key
    ///
    /// Calling again on a destroyed resource is a no-op that makes no
    /// provider calls. A provision still in flight is refused; one that
    /// stalled past [`ComputeSettings::provisioning_deadline`] is cleaned up.
    pub async fn teardown(
        &self,
        resource_id: Uuid,
        organization_id: Uuid,
    ) -> Result<TeardownOutcome> {
        let record = self.load_owned(resource_id, organization_id).await?;
        let stalled = record.is_stalled(Utc::now(), self.settings.provisioning_deadline());
        if record.status == ResourceStatus::Provisioning && !stalled {
            return Err(ComputeError::NotActive {
                resource_id,
                status: record.status,
            });
        }
        self.destroy(record).await
    }

    async fn destroy(&self, mut record: ProvisionedResource) -> Result<TeardownOutcome> {
        if record.status == ResourceStatus::Destroyed {
            debug!(resource_id = %record.id, "Already destroyed");
            return Ok(TeardownOutcome {
                resource_id: record.id,
                already_destroyed: true,
                cleanup_failures: Vec::new(),
            });
        }

        let mut cleanup = BestEffortCleanup::new();
        if let Some(key_id) = &record.metadata.ssh_key_external_id {
            cleanup.push(CleanupStep::DeleteSshKey(key_id.clone()));
        }
        if let Some(vm_id) = &record.external_id {
            cleanup.push(CleanupStep::DeleteVm(vm_id.clone()));
        }
        let report = cleanup.run(self.provider.as_ref()).await;

        record.metadata.private_key = None;
        record.status = ResourceStatus::Destroyed;
        record.updated_at = Utc::now();
        self.store.update(&record).await?;

        let audit = AuditLog::new("compute.teardown", record.id.to_string())
            .for_organization(record.organization_id);
        if report.is_clean() {
            audit.log();
        } else {
            audit
                .failed(format!("{} cloud deletion(s) failed", report.failures.len()))
                .log();
        }
        info!(resource_id = %record.id, attempted = report.attempted, "Resource destroyed");

        Ok(TeardownOutcome {
            resource_id: record.id,
            already_destroyed: false,
            cleanup_failures: report.failure_messages(),
        })
    }

    pub async fn describe(&self, resource_id: Uuid, organization_id: Uuid) -> Result<ResourceView> {
        let record = self.load_owned(resource_id, organization_id).await?;
        Ok(record.view(Utc::now()))
    }

    pub async fn list(&self, organization_id: Uuid) -> Result<Vec<ResourceView>> {
        let now = Utc::now();
        Ok(self
            .store
            .list_by_org(organization_id)
            .await?
            .iter()
            .map(|record| record.view(now))
            .collect())
    }

    /// Tear down every active resource past its expiry, and every stalled
    /// provision; returns their ids
    pub async fn reap_expired(&self, now: DateTime<Utc>) -> Result<Vec<Uuid>> {
        let deadline = self.settings.provisioning_deadline();
        let expired: Vec<_> = self
            .store
            .list_live()
            .await?
            .into_iter()
            .filter(|r| {
                (r.status == ResourceStatus::Active && r.is_expired(now))
                    || r.is_stalled(now, deadline)
            })
            .collect();

        let mut reaped = Vec::with_capacity(expired.len());
        for record in expired {
            let id = record.id;
            match self.destroy(record).await {
                Ok(_) => reaped.push(id),
                Err(e) => warn!(resource_id = %id, error = %e, "Failed to reap expired resource"),
            }
        }

        if !reaped.is_empty() {
            info!(count = reaped.len(), "Reaped expired resources");
        }
        Ok(reaped)
    }

    /// Run [`reap_expired`](Self::reap_expired) every `interval` until the
    /// handle is aborted
    pub fn spawn_reaper(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if let Err(e) = manager.reap_expired(Utc::now()).await {
                    warn!(error = %e, "Reaper pass failed");
                }
            }
        })
    }

    async fn load_owned(
        &self,
        resource_id: Uuid,
        organization_id: Uuid,
    ) -> Result<ProvisionedResource> {
        let record = self
            .store
            .get(resource_id)
            .await?
            .ok_or(ComputeError::NotFound(resource_id))?;

        if !record.is_owned_by(organization_id) {
            AuditLog::new("compute.access", resource_id.to_string())
                .for_organization(organization_id)
                .failed("organization mismatch")
                .log();
            return Err(ComputeError::AccessDenied {
                resource_id,
                organization_id,
            });
        }
        Ok(record)
    }

    fn open_credentials(&self, record: &ProvisionedResource) -> Result<SecureString> {
        let sealed = record
            .metadata
            .private_key
            .as_ref()
            .ok_or(ComputeError::MissingConnectionDetails(record.id))?;

        let audit = AuditLog::new("compute.credential.decrypt", record.id.to_string())
            .for_organization(record.organization_id);
        match sealed.open_secret(&self.crypto) {
            Ok(key) => {
                audit.log();
                Ok(key)
            }
            Err(e) => {
                audit.failed(&e).log();
                Err(e.into())
            }
        }
    }

    fn target(&self, host: &str) -> SshTarget {
        SshTarget {
            host: host.to_string(),
            port: self.settings.compute.ssh_port,
            user: self.settings.compute.ssh_user.clone(),
        }
    }

    fn target_for(&self, record: &ProvisionedResource) -> Result<SshTarget> {
        record
            .metadata
            .ip
            .as_deref()
            .map(|ip| self.target(ip))
            .ok_or(ComputeError::MissingConnectionDetails(record.id))
    }

    fn validate_ttl(&self, requested: Option<u32>) -> Result<u32> {
        let max = self.settings.compute.max_ttl_minutes;
        match requested.unwrap_or(self.settings.compute.default_ttl_minutes) {
            0 => Err(ComputeError::InvalidRequest(
                "ttl must be at least one minute".to_string(),
            )),
            ttl if ttl > max => Err(ComputeError::InvalidRequest(format!(
                "ttl of {} minutes exceeds the maximum of {}",
                ttl, max
            ))),
            ttl => Ok(ttl),
        }
    }

    fn exec_timeout(&self, requested: Option<u64>) -> Result<Duration> {
        let max = self.settings.compute.max_exec_timeout_secs;
        match requested.unwrap_or(self.settings.compute.default_exec_timeout_secs) {
            0 => Err(ComputeError::InvalidRequest(
                "timeout must be at least one second".to_string(),
            )),
            secs if secs > max => Err(ComputeError::InvalidRequest(format!(
                "timeout of {}s exceeds the maximum of {}s",
                secs, max
            ))),
            secs => Ok(Duration::from_secs(secs)),
        }
    }
}

fn resource_name(id: Uuid) -> String {
    let simple = id.simple().to_string();
    format!("brokkr-{}", &simple[..12])
}

fn expiry(from: DateTime<Utc>, ttl_minutes: u32) -> DateTime<Utc> {
    from + chrono::Duration::minutes(i64::from(ttl_minutes))
}

/// Only active, unexpired resources accept commands
fn ensure_usable(record: &ProvisionedResource, now: DateTime<Utc>) -> Result<()> {
    match record.effective_status(now) {
        ResourceStatus::Active => Ok(()),
        ResourceStatus::Expired => Err(ComputeError::Expired {
            resource_id: record.id,
            expired_at: record.metadata.expires_at,
        }),
        status => Err(ComputeError::NotActive {
            resource_id: record.id,
            status,
        }),
    }
}

fn check_transfer(path: &str, output: &ExecOutput) -> Result<()> {
    if output.success() {
        return Ok(());
    }
    let exit_code = if output.timed_out {
        TIMEOUT_EXIT_CODE
    } else {
        output.exit_code
    };
    Err(ComputeError::TransferFailed {
        path: path.to_string(),
        exit_code,
        stderr: sanitize_error(output.stderr.trim()),
    })
}

/// Bytes of `base64` output (76-column lines) needed for `max` bytes of file
fn encoded_capture_limit(max: usize) -> usize {
    let encoded = max.div_ceil(3) * 4;
    encoded + encoded / 76 + 2
}

/// Pipeline run ids are written into the root bootstrap script
fn validate_pipeline_run_id(run_id: &str) -> Result<()> {
    let allowed = |c: char| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-');
    if run_id.is_empty() || run_id.len() > MAX_PIPELINE_RUN_ID_LEN || !run_id.chars().all(allowed)
    {
        return Err(ComputeError::InvalidRequest(format!(
            "pipeline run id must be 1-{} characters of [A-Za-z0-9._-]",
            MAX_PIPELINE_RUN_ID_LEN
        )));
    }
    Ok(())
}

/// Delete what a failed provision created and drop its reservation
async fn roll_back(
    resource_id: Uuid,
    cleanup: BestEffortCleanup,
    provider: &dyn CloudProvider,
    store: &dyn ResourceStore,
) {
    let report = cleanup.run(provider).await;
    if !report.is_clean() {
        error!(
            resource_id = %resource_id,
            failures = ?report.failure_messages(),
            "Rollback left cloud objects behind"
        );
    }
    if let Err(e) = store.remove(resource_id).await {
        warn!(resource_id = %resource_id, error = %e, "Failed to drop reservation");
    }
}

/// Cleanup steps of an in-flight provision
///
/// If the provision future is dropped before it settles (caller timeout,
/// task abort), the rollback continues on a spawned task. A process crash
/// leaves a stalled record for teardown or the reaper instead.
struct RollbackGuard {
    resource_id: Uuid,
    provider: Arc<dyn CloudProvider>,
    store: Arc<dyn ResourceStore>,
    cleanup: BestEffortCleanup,
    armed: bool,
}

impl RollbackGuard {
    fn new(
        resource_id: Uuid,
        provider: &Arc<dyn CloudProvider>,
        store: &Arc<dyn ResourceStore>,
    ) -> Self {
        Self {
            resource_id,
            provider: Arc::clone(provider),
            store: Arc::clone(store),
            cleanup: BestEffortCleanup::new(),
            armed: true,
        }
    }

    fn steps(&mut self) -> &mut BestEffortCleanup {
        &mut self.cleanup
    }

    /// Hand the steps back; dropping the guard no longer rolls back
    fn disarm(&mut self) -> BestEffortCleanup {
        self.armed = false;
        std::mem::take(&mut self.cleanup)
    }
}

impl Drop for RollbackGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let resource_id = self.resource_id;
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            error!(resource_id = %resource_id, "Provisioning abandoned outside a runtime");
            return;
        };

        warn!(resource_id = %resource_id, "Provisioning cancelled, rolling back");
        let cleanup = std::mem::take(&mut self.cleanup);
        let provider = Arc::clone(&self.provider);
        let store = Arc::clone(&self.store);
        runtime.spawn(async move {
            roll_back(resource_id, cleanup, provider.as_ref(), store.as_ref()).await;
        });
    }
}
