//! Plan document types.
//!
//! A [`Plan`] is the untrusted input: a node tree, requested capabilities, a
//! module manifest, optional state and optional inline source.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::node::Node;
use crate::state::StateModel;

/// Spec version assumed when a plan omits `specVersion`.
pub const CURRENT_SPEC_VERSION: &str = "1.0";

/// Spec versions this build understands.
pub const SUPPORTED_SPEC_VERSIONS: &[&str] = &["1.0", "1.1"];

/// A declarative UI plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Plan {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spec_version: Option<String>,

    /// Identity of the plan; state is persisted under this key.
    pub id: String,

    /// Host-owned revision tag. Never mutated by the core.
    #[serde(default)]
    pub version: u64,

    pub root: Node,

    #[serde(default)]
    pub capabilities: Capabilities,

    #[serde(default)]
    pub imports: Vec<String>,

    #[serde(default)]
    pub module_manifest: ModuleManifest,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<StateModel>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<SourceModule>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Map<String, Value>>,
}

impl Plan {
    /// Create a minimal plan around a root node.
    pub fn new(id: impl Into<String>, root: Node) -> Self {
        Self {
            spec_version: Some(CURRENT_SPEC_VERSION.to_string()),
            id: id.into(),
            version: 1,
            root,
            capabilities: Capabilities::default(),
            imports: Vec::new(),
            module_manifest: ModuleManifest::new(),
            state: None,
            source: None,
            metadata: None,
        }
    }

    /// The declared spec version, or the current one when absent.
    pub fn effective_spec_version(&self) -> &str {
        self.spec_version.as_deref().unwrap_or(CURRENT_SPEC_VERSION)
    }

    /// Parse a plan from its JSON wire form.
    pub fn from_json(json: &str) -> crate::Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

/// How components of a plan are invoked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum ExecutionProfile {
    /// Direct in-process call under the time budget.
    #[default]
    Standard,
    /// Invocation through the sandbox dispatcher.
    Isolated,
}

/// Resource ceilings requested by a plan. These are requests; policy clamps them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Capabilities {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_imports: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_execution_ms: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_component_invocations: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution_profile: Option<ExecutionProfile>,

    #[serde(default)]
    pub allowed_modules: Vec<String>,

    #[serde(default)]
    pub network_hosts: Vec<String>,
}

/// Manifest entry for one specifier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManifestEntry {
    pub resolved_url: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub integrity: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signer: Option<String>,
}

impl ManifestEntry {
    pub fn new(resolved_url: impl Into<String>) -> Self {
        Self {
            resolved_url: resolved_url.into(),
            integrity: None,
            version: None,
            signer: None,
        }
    }

    pub fn with_integrity(mut self, integrity: impl Into<String>) -> Self {
        self.integrity = Some(integrity.into());
        self
    }

    /// True when the resolved URL is fetched over the network.
    pub fn is_remote(&self) -> bool {
        let lower = self.resolved_url.to_ascii_lowercase();
        lower.starts_with("https://") || lower.starts_with("http://")
    }
}

/// Specifier → manifest entry.
pub type ModuleManifest = BTreeMap<String, ManifestEntry>;

/// Language of inline source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SourceLanguage {
    #[default]
    Js,
    Jsx,
    Ts,
    Tsx,
}

impl SourceLanguage {
    /// Whether the source must pass through a transpiler before running.
    pub fn needs_transpile(&self) -> bool {
        !matches!(self, SourceLanguage::Js)
    }
}

/// Runtime the inline source targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SourceRuntime {
    /// Host default: the export produces a generic node tree.
    #[default]
    #[serde(alias = "default")]
    Host,
    /// A component-rendering library; output goes through the render bridge.
    React,
}

/// Inline source module carried by a plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceModule {
    #[serde(default)]
    pub language: SourceLanguage,

    pub code: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub export_name: Option<String>,

    #[serde(default)]
    pub runtime: SourceRuntime,
}

impl SourceModule {
    /// The export to invoke, `default` when unspecified.
    pub fn export_name(&self) -> &str {
        self.export_name.as_deref().unwrap_or("default")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_plan_wire_format() {
        let plan: Plan = serde_json::from_value(json!({
            "specVersion": "1.0",
            "id": "dashboard",
            "version": 3,
            "root": { "type": "text", "value": "hello" },
            "capabilities": { "maxImports": 4, "executionProfile": "isolated" },
            "imports": ["widgets/card"],
            "moduleManifest": {
                "widgets/card": {
                    "resolvedUrl": "https://cdn.example.com/card.js",
                    "integrity": "sha256-abc"
                }
            },
            "source": { "language": "tsx", "code": "export default 1", "runtime": "react" }
        }))
        .unwrap();

        assert_eq!(plan.capabilities.max_imports, Some(4));
        assert_eq!(plan.capabilities.execution_profile, Some(ExecutionProfile::Isolated));
        assert!(plan.module_manifest["widgets/card"].is_remote());
        let source = plan.source.as_ref().unwrap();
        assert!(source.language.needs_transpile());
        assert_eq!(source.runtime, SourceRuntime::React);
        assert_eq!(source.export_name(), "default");
    }

    #[test]
    fn test_missing_spec_version_defaults_to_current() {
        let mut plan = Plan::new("p", Node::text("x"));
        plan.spec_version = None;
        assert_eq!(plan.effective_spec_version(), CURRENT_SPEC_VERSION);
    }

    #[test]
    fn test_runtime_accepts_default_alias() {
        let source: SourceModule =
            serde_json::from_value(json!({ "code": "", "runtime": "default" })).unwrap();
        assert_eq!(source.runtime, SourceRuntime::Host);
    }
}
