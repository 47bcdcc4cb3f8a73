//! Worker-process isolation.
//!
//! Each request gets a fresh `tessera-sandbox-worker` process. The envelope
//! is written to its stdin and the response read from the last line of its
//! stdout. The child is killed if the run is dropped.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::envelope::{SandboxRequest, SandboxResponse};
use crate::error::SandboxError;
use crate::interpreter::ExecutionLimits;
use crate::mechanism::IsolationMechanism;
use crate::mode::IsolationMode;

pub const WORKER_BINARY: &str = "tessera-sandbox-worker";

/// Finds the worker binary: the configured path, else next to the current
/// executable or one directory up (where test binaries live).
fn locate_worker(configured: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = configured {
        return path.is_file().then(|| path.to_path_buf());
    }
    let exe = std::env::current_exe().ok()?;
    let dir = exe.parent()?;
    let found = [Some(dir), dir.parent()]
        .into_iter()
        .flatten()
        .map(|d| d.join(WORKER_BINARY))
        .find(|candidate| candidate.is_file());
    found
}

pub struct ProcessMechanism {
    worker: Option<PathBuf>,
    limits: ExecutionLimits,
}

impl ProcessMechanism {
    pub fn new(worker_path: Option<&Path>, limits: ExecutionLimits) -> Self {
        let worker = locate_worker(worker_path);
        if worker.is_none() {
            debug!("{} not found; document isolation disabled", WORKER_BINARY);
        }
        Self { worker, limits }
    }

    pub fn worker_path(&self) -> Option<&Path> {
        self.worker.as_deref()
    }

    fn failure(message: impl Into<String>) -> SandboxError {
        SandboxError::Execution {
            mode: IsolationMode::DocumentIsolate,
            message: message.into(),
        }
    }
}

#[async_trait]
impl IsolationMechanism for ProcessMechanism {
    fn mode(&self) -> IsolationMode {
        IsolationMode::DocumentIsolate
    }

    fn is_available(&self) -> bool {
        self.worker.is_some()
    }

    async fn run(&self, request: SandboxRequest) -> Result<SandboxResponse, SandboxError> {
        let worker = self.worker.as_ref().ok_or(SandboxError::Unavailable {
            requested: IsolationMode::DocumentIsolate,
            tried: vec![IsolationMode::DocumentIsolate],
        })?;
        let payload = serde_json::to_vec(&request).map_err(|e| SandboxError::Protocol(e.to_string()))?;

        let mut child = Command::new(worker)
            .arg("--loop-limit")
            .arg(self.limits.loop_iteration_limit.to_string())
            .arg("--recursion-limit")
            .arg(self.limits.recursion_limit.to_string())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| Self::failure(format!("failed to start worker: {}", e)))?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(&payload)
                .await
                .map_err(|e| Self::failure(format!("failed to send request: {}", e)))?;
        }

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| Self::failure(format!("worker wait failed: {}", e)))?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let Some(line) = stdout.lines().rev().find(|line| !line.trim().is_empty()) else {
            let stderr = String::from_utf8_lossy(&output.stderr);
            warn!("Worker exited with {} and no response", output.status);
            return Err(Self::failure(format!(
                "worker exited with {} without a response: {}",
                output.status,
                stderr.trim()
            )));
        };

        serde_json::from_str(line).map_err(|e| SandboxError::Protocol(format!("malformed worker response: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_configured_worker_is_unavailable() {
        let mechanism = ProcessMechanism::new(
            Some(Path::new("/nonexistent/tessera-sandbox-worker")),
            ExecutionLimits::default(),
        );
        assert!(!mechanism.is_available());
        assert!(mechanism.worker_path().is_none());
    }
}
