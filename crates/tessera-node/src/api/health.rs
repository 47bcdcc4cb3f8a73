//! Health check endpoint.

use axum::{extract::State, Json};
use serde::Serialize;

use crate::state::AppState;

/// Health check response.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub policy_profile: Option<String>,
    pub spec_versions: Vec<String>,
    pub timestamp: String,
}

/// Health check endpoint.
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        policy_profile: state.policy.profile().map(|p| p.to_string()),
        spec_versions: state.engine.config().supported_spec_versions.clone(),
        timestamp: chrono::Utc::now().to_rfc3339(),
    })
}
