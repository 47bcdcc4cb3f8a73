//! Resolver error types.

use tessera_core::{DiagnosticCode, TesseraError};
use thiserror::Error;

/// Failure fetching a module.
#[derive(Error, Debug, Clone)]
pub enum FetchError {
    #[error("Invalid URL '{0}'")]
    InvalidUrl(String),

    #[error("Malformed data URI: {0}")]
    InvalidDataUri(String),

    #[error("HTTP {status} from {url}")]
    Status { url: String, status: u16 },

    #[error("Request to {url} failed: {message}")]
    Transport { url: String, message: String },

    #[error("Request to {url} timed out")]
    Timeout { url: String },

    #[error("All {attempts} candidate(s) for {url} failed; last error: {last}")]
    Exhausted {
        url: String,
        attempts: usize,
        last: String,
    },

    #[error("Failed to build HTTP client: {0}")]
    Client(String),

    #[error("Fetch cancelled")]
    Cancelled,
}

impl FetchError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, FetchError::Cancelled)
    }
}

/// Failure verifying an integrity digest.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IntegrityError {
    #[error("Integrity metadata '{0}' has no supported digest")]
    Unsupported(String),

    #[error("Malformed integrity token '{token}': {reason}")]
    Malformed { token: String, reason: String },

    #[error("{algorithm} digest mismatch: expected {expected}, got {actual}")]
    Mismatch {
        algorithm: String,
        expected: String,
        actual: String,
    },
}

impl IntegrityError {
    /// Diagnostic code for this failure.
    pub fn code(&self) -> DiagnosticCode {
        match self {
            IntegrityError::Mismatch { .. } => DiagnosticCode::IntegrityMismatch,
            _ => DiagnosticCode::IntegrityCheckFailed,
        }
    }
}

/// Failure turning a URL into runnable module code.
#[derive(Error, Debug, Clone)]
pub enum MaterializeError {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error("Integrity check failed for {url}: {source}")]
    Integrity {
        url: String,
        #[source]
        source: IntegrityError,
    },

    #[error("Import of {url} is outside the allowed network hosts")]
    Blocked { url: String },
}

impl MaterializeError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, MaterializeError::Fetch(FetchError::Cancelled))
    }
}

impl From<FetchError> for TesseraError {
    fn from(err: FetchError) -> Self {
        match err {
            FetchError::Cancelled => TesseraError::aborted("module fetch"),
            other => TesseraError::Network(other.to_string()),
        }
    }
}

impl From<MaterializeError> for TesseraError {
    fn from(err: MaterializeError) -> Self {
        match err {
            MaterializeError::Fetch(fetch) => fetch.into(),
            MaterializeError::Blocked { url } => TesseraError::PolicyBlocked(url),
            other => TesseraError::Network(other.to_string()),
        }
    }
}
