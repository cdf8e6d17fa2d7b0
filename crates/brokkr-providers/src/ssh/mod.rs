//! Remote command execution over SSH

mod keys;
mod openssh;
mod quote;

pub use keys::EphemeralSshKeyPair;
pub use openssh::{OpenSshOptions, OpenSshShell};
pub use quote::{remote_parent, shell_quote};

use crate::error::SshError;
use async_trait::async_trait;
use brokkr_secrets::SecureString;
use serde::Serialize;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};

/// Exit code reported when a command hits its timeout
pub const TIMEOUT_EXIT_CODE: i32 = -1;

/// Where to connect
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SshTarget {
    pub host: String,
    pub port: u16,
    pub user: String,
}

/// A single command to run remotely
#[derive(Debug, Clone)]
pub struct ExecRequest {
    /// Passed to the remote login shell as-is
    pub command: String,
    pub stdin: Option<Vec<u8>>,
    pub timeout: Duration,
    /// Per-stream capture ceiling in bytes
    pub output_limit: usize,
}

impl ExecRequest {
    pub fn new(command: impl Into<String>, timeout: Duration, output_limit: usize) -> Self {
        Self {
            command: command.into(),
            stdin: None,
            timeout,
            output_limit,
        }
    }

    pub fn with_stdin(mut self, stdin: Vec<u8>) -> Self {
        self.stdin = Some(stdin);
        self
    }
}

/// Result of a remote command
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecOutput {
    /// Remote exit status, or [`TIMEOUT_EXIT_CODE`]
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub stdout_truncated: bool,
    pub stderr_truncated: bool,
    pub timed_out: bool,
    #[serde(rename = "durationMs", serialize_with = "as_millis")]
    pub duration: Duration,
}

impl ExecOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0 && !self.timed_out
    }

    pub fn timeout(limit: Duration, elapsed: Duration) -> Self {
        Self {
            exit_code: TIMEOUT_EXIT_CODE,
            stderr: format!("command timed out after {}s", limit.as_secs_f64()),
            timed_out: true,
            duration: elapsed,
            ..Default::default()
        }
    }
}

fn as_millis<S: serde::Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_u64(duration.as_millis() as u64)
}

/// Runs commands on a remote host
///
/// The private key is only borrowed for the duration of the call.
/// Implementations must release the connection on success, error and timeout.
#[async_trait]
pub trait RemoteShell: Send + Sync {
    /// Run one command
    ///
    /// A remote non-zero exit is `Ok` with that exit code. OpenSSH also
    /// exits 255 when it cannot connect, so 255 becomes
    /// [`SshError::Connect`] only when stderr carries a client error; a
    /// command that exits 255 quietly, or with its own message, is reported
    /// as exit code 255.
    async fn exec(
        &self,
        target: &SshTarget,
        private_key: &SecureString,
        request: ExecRequest,
    ) -> Result<ExecOutput, SshError>;
}

/// Read at most `limit` bytes, then discard the rest of the stream
///
/// Returns the captured bytes and whether anything was discarded. Draining
/// keeps the writer from blocking on a full pipe.
pub async fn read_capped<R: AsyncRead + Unpin>(
    reader: R,
    limit: usize,
) -> std::io::Result<(Vec<u8>, bool)> {
    let mut captured = Vec::new();
    let mut limited = reader.take(limit as u64);
    limited.read_to_end(&mut captured).await?;

    let mut rest = limited.into_inner();
    let discarded = tokio::io::copy(&mut rest, &mut tokio::io::sink()).await?;
    Ok((captured, discarded > 0))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_read_capped_under_limit() {
        let (data, truncated) = read_capped(&b"hello"[..], 16).await.unwrap();
        assert_eq!(data, b"hello");
        assert!(!truncated);
    }

    #[tokio::test]
    async fn test_read_capped_exact_limit() {
        let (data, truncated) = read_capped(&b"hello"[..], 5).await.unwrap();
        assert_eq!(data, b"hello");
        assert!(!truncated);
    }

    #[tokio::test]
    async fn test_read_capped_truncates() {
        let input = vec![b'x'; 10_000];
        let (data, truncated) = read_capped(input.as_slice(), 100).await.unwrap();
        assert_eq!(data.len(), 100);
        assert!(truncated);
    }

    #[test]
    fn test_timeout_output() {
        let out = ExecOutput::timeout(Duration::from_secs(2), Duration::from_millis(2003));
        assert_eq!(out.exit_code, TIMEOUT_EXIT_CODE);
        assert!(out.timed_out);
        assert!(!out.success());
        assert!(out.stderr.contains("timed out after 2s"));

        let json = serde_json::to_value(&out).unwrap();
        assert_eq!(json["durationMs"], 2003);
        assert_eq!(json["exitCode"], -1);
    }
}
