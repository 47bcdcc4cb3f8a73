//! Plan API endpoints.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Deserialize;
use serde_json::Value;
use tessera_core::{ExecutionContext, ExecutionResult, Plan, PlanEvent};
use tessera_policy::CheckResult;
use tessera_state::StateEntry;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::error_status;
use crate::state::AppState;

/// Request to execute a plan.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecuteRequest {
    pub plan: Plan,

    #[serde(default)]
    pub event: Option<PlanEvent>,

    #[serde(default)]
    pub context: ExecutionContext,

    /// State used instead of the stored snapshot; never persisted.
    #[serde(default)]
    pub state: Option<Value>,

    /// Executions naming the same target run one at a time.
    #[serde(default)]
    pub target: Option<String>,
}

/// Evaluate a plan against the security policy without running it.
pub async fn check_plan(
    State(state): State<AppState>,
    Json(plan): Json<Plan>,
) -> Result<Json<CheckResult>, (StatusCode, String)> {
    let result = state
        .policy
        .check_plan(&plan)
        .map_err(|e| (error_status(&e), e.to_string()))?;
    Ok(Json(result))
}

/// Check, then execute a plan.
pub async fn execute_plan(State(state): State<AppState>, Json(req): Json<ExecuteRequest>) -> Response {
    let verdict = match state.policy.check_plan(&req.plan) {
        Ok(verdict) => verdict,
        Err(e) => return (error_status(&e), e.to_string()).into_response(),
    };
    if !verdict.safe {
        warn!("Plan {} rejected by policy: {} issues", req.plan.id, verdict.issues.len());
        return (StatusCode::UNPROCESSABLE_ENTITY, Json(verdict)).into_response();
    }

    // Dropping the handler (client gone) aborts the execution.
    let abort = CancellationToken::new();
    let _guard = abort.clone().drop_guard();

    let outcome = match req.target.as_deref() {
        Some(target) => {
            state
                .engine
                .execute_for_target(target, &req.plan, &req.context, req.event.as_ref(), req.state, &abort)
                .await
        }
        None => {
            state
                .engine
                .execute_plan(&req.plan, &req.context, req.event.as_ref(), req.state, &abort)
                .await
        }
    };

    match outcome {
        Ok(result) => Json::<ExecutionResult>(result).into_response(),
        Err(e) => (error_status(&e), e.to_string()).into_response(),
    }
}

/// Get the stored state snapshot of a plan.
pub async fn get_state(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<StateEntry>, (StatusCode, String)> {
    state
        .engine
        .store()
        .get(&id)
        .await
        .map_err(|e| (error_status(&e), e.to_string()))?
        .map(Json)
        .ok_or_else(|| (StatusCode::NOT_FOUND, format!("No state stored for plan {}", id)))
}

/// Forget the stored state of a plan.
pub async fn clear_state(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, (StatusCode, String)> {
    let cleared = state
        .engine
        .store()
        .clear(&id)
        .await
        .map_err(|e| (error_status(&e), e.to_string()))?;
    if !cleared {
        return Err((StatusCode::NOT_FOUND, format!("No state stored for plan {}", id)));
    }
    info!("Cleared state of plan {}", id);
    Ok(StatusCode::NO_CONTENT)
}

/// Drop the serialization lock of a render target. Idle targets hold no
/// lock, so releasing one is a no-op.
pub async fn release_target(
    State(state): State<AppState>,
    Path(target): Path<String>,
) -> StatusCode {
    if state.engine.release_target(&target) {
        info!("Released render target {}", target);
    }
    StatusCode::NO_CONTENT
}
