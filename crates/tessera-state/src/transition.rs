//! Event transition application.
//!
//! Actions mutate a JSON snapshot in place. Each action is validated and
//! applied independently: a rejected action is reported and skipped while the
//! remaining actions of the transition still run.

use serde_json::{Map, Value};
use tessera_core::path::lookup;
use tessera_core::{
    Action, Diagnostic, DiagnosticCode, ExecutionContext, MutationPath, PlanEvent, ReferencePath,
    ReferenceRoot, StateModel, TesseraError, ValueSource,
};
use thiserror::Error;
use tracing::{debug, warn};

/// Why an action was skipped.
#[derive(Error, Debug, Clone)]
pub enum ActionError {
    /// The mutation or reference path was rejected.
    #[error("{0}")]
    UnsafePath(TesseraError),

    /// The action could not be applied to the current state shape.
    #[error("{0}")]
    Invalid(String),
}

impl ActionError {
    /// Diagnostic code matching this failure.
    pub fn code(&self) -> DiagnosticCode {
        match self {
            ActionError::UnsafePath(_) => DiagnosticCode::UnsafePath,
            ActionError::Invalid(_) => DiagnosticCode::InvalidAction,
        }
    }
}

/// Read-only scopes visible to `$from` references.
pub struct ReferenceScope<'a> {
    pub event: &'a Value,
    pub context: &'a Value,
    pub vars: &'a Value,
}

/// Outcome of applying one transition.
#[derive(Debug, Default)]
pub struct TransitionOutcome {
    /// Event type that matched a transition, if any.
    pub handled_event: Option<String>,
    /// Actions that were applied, verbatim.
    pub applied: Vec<Action>,
    /// Diagnostics for skipped actions.
    pub diagnostics: Vec<Diagnostic>,
}

fn resolve_reference(state: &Value, scope: &ReferenceScope<'_>, raw: &str) -> Result<Value, ActionError> {
    let path = ReferencePath::parse(raw).map_err(ActionError::UnsafePath)?;
    let base = match path.root() {
        ReferenceRoot::State => state,
        ReferenceRoot::Event => scope.event,
        ReferenceRoot::Context => scope.context,
        ReferenceRoot::Vars => scope.vars,
    };
    Ok(lookup(base, path.segments()).cloned().unwrap_or(Value::Null))
}

fn resolve_value(state: &Value, scope: &ReferenceScope<'_>, source: &ValueSource) -> Result<Value, ActionError> {
    match source {
        ValueSource::Literal(value) => Ok(value.clone()),
        ValueSource::Reference(reference) => resolve_reference(state, scope, &reference.from),
    }
}

/// Navigate to the slot addressed by `segments`, creating intermediate objects.
fn slot_mut<'a>(root: &'a mut Value, segments: &[String]) -> Result<&'a mut Value, ActionError> {
    let mut current = root;
    for segment in segments {
        if current.is_null() {
            *current = Value::Object(Map::new());
        }
        current = match current {
            Value::Object(map) => map.entry(segment.clone()).or_insert(Value::Null),
            Value::Array(items) => {
                let len = items.len();
                let index = segment
                    .parse::<usize>()
                    .map_err(|_| ActionError::Invalid(format!("'{}' is not an array index", segment)))?;
                items
                    .get_mut(index)
                    .ok_or_else(|| ActionError::Invalid(format!("index {} out of bounds ({})", index, len)))?
            }
            other => {
                return Err(ActionError::Invalid(format!(
                    "cannot descend into {} at '{}'",
                    type_name(other),
                    segment
                )))
            }
        };
    }
    Ok(current)
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Apply one action to `state`.
pub fn apply_action(state: &mut Value, action: &Action, scope: &ReferenceScope<'_>) -> Result<(), ActionError> {
    let path = MutationPath::parse(action.path()).map_err(ActionError::UnsafePath)?;
    if !state.is_object() {
        return Err(ActionError::Invalid("state root is not an object".to_string()));
    }

    match action {
        Action::Set { value, .. } => {
            let resolved = resolve_value(state, scope, value)?;
            *slot_mut(state, path.segments())? = resolved;
        }
        Action::Increment { by, .. } => {
            if !by.is_finite() {
                return Err(ActionError::Invalid(format!("increment amount {} is not finite", by)));
            }
            let slot = slot_mut(state, path.segments())?;
            let current = match &*slot {
                Value::Null => 0.0,
                Value::Number(n) => n.as_f64().unwrap_or(0.0),
                other => {
                    return Err(ActionError::Invalid(format!(
                        "cannot increment {} at '{}'",
                        type_name(other),
                        path
                    )))
                }
            };
            let next = current + by;
            if !next.is_finite() {
                return Err(ActionError::Invalid(format!("increment at '{}' overflowed", path)));
            }
            *slot = number_value(next);
        }
        Action::Toggle { .. } => {
            let slot = slot_mut(state, path.segments())?;
            let current = match &*slot {
                Value::Null => false,
                Value::Bool(b) => *b,
                other => {
                    return Err(ActionError::Invalid(format!(
                        "cannot toggle {} at '{}'",
                        type_name(other),
                        path
                    )))
                }
            };
            *slot = Value::Bool(!current);
        }
        Action::Push { value, .. } => {
            let resolved = resolve_value(state, scope, value)?;
            let slot = slot_mut(state, path.segments())?;
            if slot.is_null() {
                *slot = Value::Array(Vec::new());
            }
            match slot {
                Value::Array(items) => items.push(resolved),
                other => {
                    return Err(ActionError::Invalid(format!(
                        "cannot push onto {} at '{}'",
                        type_name(other),
                        path
                    )))
                }
            }
        }
    }
    Ok(())
}

/// Keep integers integral so `{{state.count}}` renders as `5`, not `5.0`.
fn number_value(n: f64) -> Value {
    if n.fract() == 0.0 && n.abs() < (i64::MAX as f64) {
        Value::from(n as i64)
    } else {
        serde_json::Number::from_f64(n).map(Value::Number).unwrap_or(Value::Null)
    }
}

/// Apply the transition matching `event` (if any) to `state`.
pub fn apply_transition(
    state: &mut Value,
    model: Option<&StateModel>,
    event: Option<&PlanEvent>,
    context: &ExecutionContext,
) -> TransitionOutcome {
    let mut outcome = TransitionOutcome::default();
    let (Some(model), Some(event)) = (model, event) else {
        return outcome;
    };
    let Some(actions) = model.transitions.get(&event.event_type) else {
        debug!("No transition for event '{}'", event.event_type);
        return outcome;
    };

    let event_value = event.as_value();
    let context_value = Value::Object(context.data.clone());
    let vars_value = Value::Object(context.vars.clone());
    let scope = ReferenceScope {
        event: &event_value,
        context: &context_value,
        vars: &vars_value,
    };

    outcome.handled_event = Some(event.event_type.clone());
    for (index, action) in actions.iter().enumerate() {
        match apply_action(state, action, &scope) {
            Ok(()) => {
                debug!("Applied {} action on '{}'", action.kind(), action.path());
                outcome.applied.push(action.clone());
            }
            Err(err) => {
                warn!("Skipped action {} for event '{}': {}", index, event.event_type, err);
                outcome.diagnostics.push(Diagnostic::warning(
                    err.code(),
                    format!(
                        "Skipped {} action #{} on '{}': {}",
                        action.kind(),
                        index,
                        action.path(),
                        err
                    ),
                ));
            }
        }
    }
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn empty_scope() -> (Value, Value, Value) {
        (json!({}), json!({}), json!({}))
    }

    fn model(actions: Vec<Action>) -> StateModel {
        let mut model = StateModel::default();
        model.transitions.insert("click".to_string(), actions);
        model
    }

    #[test]
    fn test_increment_toggle_push_set() {
        let (event, context, vars) = empty_scope();
        let scope = ReferenceScope { event: &event, context: &context, vars: &vars };
        let mut state = json!({ "count": 4 });

        apply_action(&mut state, &Action::Increment { path: "count".into(), by: 1.0 }, &scope).unwrap();
        apply_action(&mut state, &Action::Toggle { path: "ui.open".into() }, &scope).unwrap();
        apply_action(
            &mut state,
            &Action::Push { path: "log".into(), value: ValueSource::literal(json!("a")) },
            &scope,
        )
        .unwrap();
        apply_action(
            &mut state,
            &Action::Set { path: "state.title".into(), value: ValueSource::literal(json!("hi")) },
            &scope,
        )
        .unwrap();

        assert_eq!(state, json!({ "count": 5, "ui": { "open": true }, "log": ["a"], "title": "hi" }));
    }

    #[test]
    fn test_reserved_segment_is_never_applied() {
        let (event, context, vars) = empty_scope();
        let scope = ReferenceScope { event: &event, context: &context, vars: &vars };
        for raw in ["__proto__.admin", "a.constructor", "prototype.x"] {
            let mut state = json!({ "a": {} });
            let before = state.clone();
            let err = apply_action(
                &mut state,
                &Action::Set { path: raw.into(), value: ValueSource::literal(json!(true)) },
                &scope,
            )
            .unwrap_err();
            assert_eq!(err.code(), DiagnosticCode::UnsafePath);
            assert_eq!(state, before);
        }
    }

    #[test]
    fn test_non_finite_increment_rejected() {
        let (event, context, vars) = empty_scope();
        let scope = ReferenceScope { event: &event, context: &context, vars: &vars };
        let mut state = json!({ "n": 1 });
        let err = apply_action(&mut state, &Action::Increment { path: "n".into(), by: f64::NAN }, &scope)
            .unwrap_err();
        assert_eq!(err.code(), DiagnosticCode::InvalidAction);
        assert_eq!(state["n"], 1);
    }

    #[test]
    fn test_transition_skips_bad_action_and_continues() {
        let model = model(vec![
            Action::Set { path: "__proto__.x".into(), value: ValueSource::literal(json!(1)) },
            Action::Increment { path: "count".into(), by: 2.0 },
            Action::Set { path: "last".into(), value: ValueSource::from_path("event.payload.id") },
        ]);
        let mut state = json!({ "count": 1 });
        let event = PlanEvent::new("click", json!({ "id": "btn-1" }));

        let outcome = apply_transition(&mut state, Some(&model), Some(&event), &ExecutionContext::new());

        assert_eq!(outcome.handled_event.as_deref(), Some("click"));
        assert_eq!(outcome.applied.len(), 2);
        assert_eq!(outcome.diagnostics.len(), 1);
        assert_eq!(outcome.diagnostics[0].code, DiagnosticCode::UnsafePath);
        assert_eq!(state, json!({ "count": 3, "last": "btn-1" }));
    }

    #[test]
    fn test_reference_reads_context_and_vars() {
        let model = model(vec![
            Action::Set { path: "user".into(), value: ValueSource::from_path("context.user.name") },
            Action::Set { path: "mode".into(), value: ValueSource::from_path("vars.mode") },
            Action::Set { path: "bad".into(), value: ValueSource::from_path("window.name") },
        ]);
        let context = ExecutionContext::new()
            .with_data("user", json!({ "name": "ada" }))
            .with_var("mode", json!("dark"));
        let mut state = json!({});

        let outcome = apply_transition(&mut state, Some(&model), Some(&PlanEvent::new("click", Value::Null)), &context);

        assert_eq!(state, json!({ "user": "ada", "mode": "dark" }));
        assert_eq!(outcome.diagnostics[0].code, DiagnosticCode::UnsafePath);
    }

    #[test]
    fn test_unmatched_event_is_noop() {
        let model = model(vec![Action::Toggle { path: "x".into() }]);
        let mut state = json!({});
        let outcome = apply_transition(
            &mut state,
            Some(&model),
            Some(&PlanEvent::new("hover", Value::Null)),
            &ExecutionContext::new(),
        );
        assert!(outcome.handled_event.is_none());
        assert_eq!(state, json!({}));
    }
}
