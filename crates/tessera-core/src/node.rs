//! The plan's node tree.
//!
//! A [`Node`] is one of three variants. Only [`Node::Element`] carries a tag and
//! only [`Node::Component`] references an external module.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Tag used for inert placeholder nodes emitted in place of failed subtrees.
pub const PLACEHOLDER_TAG: &str = "tessera-placeholder";

/// Property bag attached to elements and components.
pub type Props = Map<String, Value>;

/// A node of the declarative UI tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Node {
    /// Literal text, possibly holding `{{...}}` placeholders before resolution.
    Text { value: String },

    /// A host element such as `div`.
    Element {
        tag: String,
        #[serde(default)]
        props: Props,
        #[serde(default)]
        children: Vec<Node>,
    },

    /// A reference to an export of an external module.
    Component {
        module: String,
        #[serde(default, rename = "exportName", skip_serializing_if = "Option::is_none")]
        export_name: Option<String>,
        #[serde(default)]
        props: Props,
        #[serde(default)]
        children: Vec<Node>,
    },
}

impl Node {
    /// Create a text node.
    pub fn text(value: impl Into<String>) -> Self {
        Node::Text {
            value: value.into(),
        }
    }

    /// Create an element node.
    pub fn element(tag: impl Into<String>, props: Props, children: Vec<Node>) -> Self {
        Node::Element {
            tag: tag.into(),
            props,
            children,
        }
    }

    /// Create a component node referencing the default export.
    pub fn component(module: impl Into<String>, props: Props) -> Self {
        Node::Component {
            module: module.into(),
            export_name: None,
            props,
            children: Vec::new(),
        }
    }

    /// Create an inert placeholder carrying a diagnostic code.
    pub fn placeholder(code: &str, message: impl Into<String>) -> Self {
        let mut props = Props::new();
        props.insert("data-code".to_string(), Value::String(code.to_string()));
        props.insert("data-message".to_string(), Value::String(message.into()));
        Node::Element {
            tag: PLACEHOLDER_TAG.to_string(),
            props,
            children: Vec::new(),
        }
    }

    /// Returns the placeholder code if this node is a placeholder.
    pub fn placeholder_code(&self) -> Option<&str> {
        match self {
            Node::Element { tag, props, .. } if tag == PLACEHOLDER_TAG => {
                props.get("data-code").and_then(Value::as_str)
            }
            _ => None,
        }
    }

    /// Children of this node (empty for text).
    pub fn children(&self) -> &[Node] {
        match self {
            Node::Text { .. } => &[],
            Node::Element { children, .. } | Node::Component { children, .. } => children,
        }
    }

    /// Element tag, if this is an element.
    pub fn tag(&self) -> Option<&str> {
        match self {
            Node::Element { tag, .. } => Some(tag),
            _ => None,
        }
    }

    /// Try to interpret an arbitrary JSON value as a node.
    ///
    /// Returns `None` unless the value is an object whose `type` field names
    /// one of the node variants and the rest of its shape matches.
    pub fn from_value(value: &Value) -> Option<Node> {
        let kind = value.get("type")?.as_str()?;
        if !matches!(kind, "text" | "element" | "component") {
            return None;
        }
        serde_json::from_value(value.clone()).ok()
    }

    /// Count nodes in this subtree, including this one.
    pub fn count(&self) -> usize {
        1 + self.children().iter().map(Node::count).sum::<usize>()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_node_wire_format() {
        let node: Node = serde_json::from_value(json!({
            "type": "element",
            "tag": "div",
            "props": { "class": "card" },
            "children": [
                { "type": "text", "value": "hi" },
                { "type": "component", "module": "widgets/card", "exportName": "Card" }
            ]
        }))
        .unwrap();

        assert_eq!(node.tag(), Some("div"));
        assert_eq!(node.children().len(), 2);
        match &node.children()[1] {
            Node::Component { export_name, .. } => assert_eq!(export_name.as_deref(), Some("Card")),
            other => panic!("expected component, got {:?}", other),
        }
        assert_eq!(node.count(), 3);
    }

    #[test]
    fn test_placeholder_is_recognizable() {
        let node = Node::placeholder("timeout", "budget exhausted");
        assert_eq!(node.placeholder_code(), Some("timeout"));
        assert!(node.children().is_empty());
        assert_eq!(Node::text("x").placeholder_code(), None);
    }

    #[test]
    fn test_from_value_rejects_non_nodes() {
        assert!(Node::from_value(&json!({ "type": "banner" })).is_none());
        assert!(Node::from_value(&json!("text")).is_none());
        assert!(Node::from_value(&json!({ "type": "text", "value": "ok" })).is_some());
    }
}
