//! Execution inputs and outputs exchanged with the host.

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::diagnostic::{Diagnostic, Diagnostics};
use crate::node::Node;
use crate::plan::SourceRuntime;
use crate::state::Action;

/// An event delivered to a plan, e.g. a click.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanEvent {
    #[serde(rename = "type")]
    pub event_type: String,

    #[serde(default)]
    pub payload: Value,
}

impl PlanEvent {
    pub fn new(event_type: impl Into<String>, payload: Value) -> Self {
        Self {
            event_type: event_type.into(),
            payload,
        }
    }

    /// The value exposed to `event.*` references.
    pub fn as_value(&self) -> Value {
        json!({ "type": self.event_type, "payload": self.payload })
    }
}

/// Host-supplied ambient data visible to templates and references.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionContext {
    /// Exposed as `context.*`.
    #[serde(default)]
    pub data: Map<String, Value>,

    /// Exposed as `vars.*`.
    #[serde(default)]
    pub vars: Map<String, Value>,
}

impl ExecutionContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_data(mut self, key: impl Into<String>, value: Value) -> Self {
        self.data.insert(key.into(), value);
        self
    }

    pub fn with_var(mut self, key: impl Into<String>, value: Value) -> Self {
        self.vars.insert(key.into(), value);
        self
    }
}

/// Markup produced by a rendering-library bridge for inline source output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RenderArtifact {
    pub runtime: SourceRuntime,
    pub markup: String,
}

/// Result of one `execute_plan` call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionResult {
    pub plan_id: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub root: Option<Node>,

    pub diagnostics: Vec<Diagnostic>,

    pub state: Value,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub handled_event: Option<String>,

    #[serde(default)]
    pub applied_actions: Vec<Action>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub render_artifact: Option<RenderArtifact>,
}

impl ExecutionResult {
    /// A result carrying only diagnostics and the state snapshot.
    pub fn diagnostics_only(plan_id: impl Into<String>, diagnostics: Diagnostics, state: Value) -> Self {
        Self {
            plan_id: plan_id.into(),
            root: None,
            diagnostics: diagnostics.into_vec(),
            state,
            handled_event: None,
            applied_actions: Vec::new(),
            render_artifact: None,
        }
    }

    /// True if any diagnostic has the given code.
    pub fn has_code(&self, code: crate::DiagnosticCode) -> bool {
        self.diagnostics.iter().any(|d| d.code == code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::DiagnosticCode;

    #[test]
    fn test_event_value_shape() {
        let event = PlanEvent::new("click", json!({ "id": 7 }));
        assert_eq!(event.as_value()["type"], "click");
        assert_eq!(event.as_value()["payload"]["id"], 7);
    }

    #[test]
    fn test_diagnostics_only_result() {
        let mut diagnostics = Diagnostics::new();
        diagnostics.push(Diagnostic::error(DiagnosticCode::SpecVersionUnsupported, "9.9"));
        let result = ExecutionResult::diagnostics_only("p", diagnostics, json!({ "n": 1 }));

        assert!(result.root.is_none());
        assert!(result.has_code(DiagnosticCode::SpecVersionUnsupported));
        let wire = serde_json::to_value(&result).unwrap();
        assert_eq!(wire["planId"], "p");
        assert!(wire.get("renderArtifact").is_none());
    }
}
