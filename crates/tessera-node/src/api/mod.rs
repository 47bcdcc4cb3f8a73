//! HTTP API.

pub mod health;
pub mod plans;

use axum::http::StatusCode;
use tessera_core::TesseraError;

/// Status code for an engine or policy error.
pub(crate) fn error_status(err: &TesseraError) -> StatusCode {
    match err {
        TesseraError::InvalidRequest(_) | TesseraError::InvalidPath { .. } => StatusCode::BAD_REQUEST,
        TesseraError::Aborted { .. } => StatusCode::SERVICE_UNAVAILABLE,
        TesseraError::Sandbox(_) | TesseraError::Network(_) => StatusCode::BAD_GATEWAY,
        TesseraError::PolicyBlocked(_) => StatusCode::FORBIDDEN,
        TesseraError::NotInitialized { .. } | TesseraError::Serialization(_) | TesseraError::Internal(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}
