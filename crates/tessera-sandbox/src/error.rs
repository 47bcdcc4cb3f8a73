use tessera_core::TesseraError;
use thiserror::Error;

use crate::mode::IsolationMode;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum SandboxError {
    #[error("Invalid sandbox request: {0}")]
    InvalidRequest(String),

    #[error("No isolation mechanism available for {requested} (tried {tried:?})")]
    Unavailable {
        requested: IsolationMode,
        tried: Vec<IsolationMode>,
    },

    #[error("Sandbox run in {mode} timed out after {timeout_ms}ms")]
    Timeout { mode: IsolationMode, timeout_ms: u64 },

    #[error("Sandbox run in {mode} was cancelled")]
    Cancelled { mode: IsolationMode },

    #[error("Sandboxed code failed in {mode}: {message}")]
    Execution { mode: IsolationMode, message: String },

    #[error("Sandbox protocol error: {0}")]
    Protocol(String),
}

impl SandboxError {
    /// True when the run stopped because the caller aborted.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, SandboxError::Cancelled { .. })
    }
}

impl From<SandboxError> for TesseraError {
    fn from(err: SandboxError) -> Self {
        match err {
            SandboxError::Cancelled { .. } => TesseraError::aborted("sandbox execution"),
            SandboxError::InvalidRequest(message) => TesseraError::InvalidRequest(message),
            other => TesseraError::Sandbox(other.to_string()),
        }
    }
}
