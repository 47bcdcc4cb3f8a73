//! Error types shared across the Tessera workspace.

use thiserror::Error;

/// Main error type for Tessera operations.
///
/// Policy violations and expected execution conditions are reported as
/// diagnostics, not through this type. Only aborts, host misuse and genuinely
/// unexpected failures surface as `Err`.
#[derive(Error, Debug, Clone)]
pub enum TesseraError {
    /// The caller's abort signal fired.
    #[error("Execution aborted during {stage}")]
    Aborted { stage: String },

    /// A request violated its contract (host misuse).
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// A component was used before `initialize` was called.
    #[error("{component} used before initialize")]
    NotInitialized { component: String },

    /// A mutation or reference path was rejected.
    #[error("Invalid path '{path}': {reason}")]
    InvalidPath { path: String, reason: String },

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Network or module loading failure after all attempts.
    #[error("Network error: {0}")]
    Network(String),

    /// A fetch target is outside the allowed network hosts.
    #[error("Blocked by network policy: {0}")]
    PolicyBlocked(String),

    /// Inline source failed in the sandbox and the engine is configured to fail closed.
    #[error("Sandbox failure: {0}")]
    Sandbox(String),

    /// Internal error (should not happen).
    #[error("Internal error: {0}")]
    Internal(String),
}

impl TesseraError {
    /// Build an abort error for the given stage.
    pub fn aborted(stage: impl Into<String>) -> Self {
        TesseraError::Aborted {
            stage: stage.into(),
        }
    }

    /// Returns true if this error represents a cancellation.
    pub fn is_abort(&self) -> bool {
        matches!(self, TesseraError::Aborted { .. })
    }
}

/// Convenience Result type for Tessera operations.
pub type Result<T> = std::result::Result<T, TesseraError>;

impl From<serde_json::Error> for TesseraError {
    fn from(err: serde_json::Error) -> Self {
        TesseraError::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_abort_detection() {
        assert!(TesseraError::aborted("imports").is_abort());
        assert!(!TesseraError::Internal("boom".into()).is_abort());
    }

    #[test]
    fn test_abort_message_names_stage() {
        let err = TesseraError::aborted("node resolution");
        assert_eq!(err.to_string(), "Execution aborted during node resolution");
    }
}
