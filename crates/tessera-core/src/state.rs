//! State model carried by a plan: an initial snapshot plus event transitions.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Declarative state attached to a plan.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateModel {
    /// Snapshot used when nothing has been persisted for the plan yet.
    #[serde(default)]
    pub initial: Value,

    /// Actions to apply, keyed by event type.
    #[serde(default)]
    pub transitions: BTreeMap<String, Vec<Action>>,
}

impl StateModel {
    /// Total number of actions across all transitions.
    pub fn action_count(&self) -> usize {
        self.transitions.values().map(Vec::len).sum()
    }
}

/// A value given literally or read from another scope at apply time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ValueSource {
    /// `{ "$from": "event.payload.id" }`
    Reference(Reference),
    /// Any other JSON value.
    Literal(Value),
}

/// Body of a `$from` reference.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Reference {
    #[serde(rename = "$from")]
    pub from: String,
}

impl ValueSource {
    /// Literal value.
    pub fn literal(value: Value) -> Self {
        ValueSource::Literal(value)
    }

    /// Reference to a source path.
    pub fn from_path(path: impl Into<String>) -> Self {
        ValueSource::Reference(Reference { from: path.into() })
    }

    /// The referenced path, if any.
    pub fn reference(&self) -> Option<&str> {
        match self {
            ValueSource::Reference(r) => Some(&r.from),
            ValueSource::Literal(_) => None,
        }
    }
}

fn default_increment() -> f64 {
    1.0
}

/// One state mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Action {
    Set { path: String, value: ValueSource },
    Increment {
        path: String,
        #[serde(default = "default_increment")]
        by: f64,
    },
    Toggle { path: String },
    Push { path: String, value: ValueSource },
}

impl Action {
    /// The raw mutation path of this action.
    pub fn path(&self) -> &str {
        match self {
            Action::Set { path, .. }
            | Action::Increment { path, .. }
            | Action::Toggle { path }
            | Action::Push { path, .. } => path,
        }
    }

    /// The value source, for actions that carry one.
    pub fn value(&self) -> Option<&ValueSource> {
        match self {
            Action::Set { value, .. } | Action::Push { value, .. } => Some(value),
            _ => None,
        }
    }

    /// Short name of the action kind.
    pub fn kind(&self) -> &'static str {
        match self {
            Action::Set { .. } => "set",
            Action::Increment { .. } => "increment",
            Action::Toggle { .. } => "toggle",
            Action::Push { .. } => "push",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_value_source_distinguishes_references() {
        let reference: ValueSource = serde_json::from_value(json!({ "$from": "event.id" })).unwrap();
        assert_eq!(reference.reference(), Some("event.id"));

        let literal: ValueSource = serde_json::from_value(json!({ "$from": "x", "extra": 1 })).unwrap();
        assert!(literal.reference().is_none());

        let number: ValueSource = serde_json::from_value(json!(3)).unwrap();
        assert_eq!(number, ValueSource::Literal(json!(3)));
    }

    #[test]
    fn test_action_wire_format() {
        let model: StateModel = serde_json::from_value(json!({
            "initial": { "count": 0 },
            "transitions": {
                "click": [
                    { "type": "increment", "path": "count" },
                    { "type": "toggle", "path": "open" },
                    { "type": "push", "path": "log", "value": { "$from": "event.type" } }
                ]
            }
        }))
        .unwrap();

        let actions = &model.transitions["click"];
        assert_eq!(model.action_count(), 3);
        assert_eq!(actions[0], Action::Increment { path: "count".into(), by: 1.0 });
        assert_eq!(actions[2].value().and_then(ValueSource::reference), Some("event.type"));
        assert_eq!(actions[1].kind(), "toggle");
    }
}
