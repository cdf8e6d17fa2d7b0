//! Best-effort deletion of cloud objects
//!
//! Used both to roll back a failed provision and to tear down a resource.
//! Every step is attempted regardless of earlier failures; failures are
//! collected and logged, never returned as errors.

use anyhow::Context;
use brokkr_providers::CloudProvider;
use std::fmt;
use tracing::{debug, warn};

/// A cloud object to delete
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CleanupStep {
    DeleteVm(String),
    DeleteSshKey(String),
}

impl fmt::Display for CleanupStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CleanupStep::DeleteVm(id) => write!(f, "delete VM {}", id),
            CleanupStep::DeleteSshKey(id) => write!(f, "delete SSH key {}", id),
        }
    }
}

/// Steps registered in creation order, run in reverse
#[derive(Debug, Default)]
pub struct BestEffortCleanup {
    steps: Vec<CleanupStep>,
}

/// What happened when the steps ran
#[derive(Debug, Default)]
pub struct CleanupReport {
    pub attempted: usize,
    pub failures: Vec<anyhow::Error>,
}

impl CleanupReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    /// Failure messages with their context chain, for logs and callers
    pub fn failure_messages(&self) -> Vec<String> {
        self.failures.iter().map(|e| format!("{:#}", e)).collect()
    }
}

impl BestEffortCleanup {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an object that now exists
    pub fn push(&mut self, step: CleanupStep) {
        self.steps.push(step);
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Delete everything registered, newest first
    pub async fn run(self, provider: &dyn CloudProvider) -> CleanupReport {
        let mut report = CleanupReport::default();

        for step in self.steps.into_iter().rev() {
            report.attempted += 1;
            let outcome = match &step {
                CleanupStep::DeleteVm(id) => provider.delete_vm(id).await,
                CleanupStep::DeleteSshKey(id) => provider.delete_ssh_key(id).await,
            };

            match outcome.with_context(|| step.to_string()) {
                Ok(()) => debug!(step = %step, "Cleanup step done"),
                Err(e) => {
                    warn!(step = %step, error = %format!("{:#}", e), "Cleanup step failed");
                    report.failures.push(e);
                }
            }
        }

        report
    }
}
