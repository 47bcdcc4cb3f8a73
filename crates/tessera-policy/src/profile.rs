//! Security profiles and the policy they expand to.

use serde::{Deserialize, Serialize};
use tessera_core::{ExecutionProfile, SUPPORTED_SPEC_VERSIONS};

/// Named bundle of default policy ceilings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SecurityProfile {
    Strict,
    #[default]
    Balanced,
    Relaxed,
}

impl SecurityProfile {
    pub fn as_str(&self) -> &'static str {
        match self {
            SecurityProfile::Strict => "strict",
            SecurityProfile::Balanced => "balanced",
            SecurityProfile::Relaxed => "relaxed",
        }
    }
}

impl std::fmt::Display for SecurityProfile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Ceilings and allowlists applied to a plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecurityPolicy {
    /// Reject plans without `specVersion`.
    pub require_spec_version: bool,
    pub supported_spec_versions: Vec<String>,

    pub max_tree_depth: usize,
    pub max_node_count: usize,
    /// Element tags that may never appear, compared case-insensitively.
    pub blocked_tags: Vec<String>,
    pub allow_inline_event_handlers: bool,

    /// Bare specifiers must start with one of these. Empty allows any.
    pub allowed_module_prefixes: Vec<String>,
    /// Host patterns, see [`crate::hosts`]. Empty allows none.
    pub allowed_network_hosts: Vec<String>,
    pub allow_data_uris: bool,
    pub allowed_execution_profiles: Vec<ExecutionProfile>,

    pub max_imports: u32,
    pub max_execution_ms: u64,
    pub max_component_invocations: u32,

    pub max_transitions: usize,
    pub max_actions_per_transition: usize,

    pub max_source_bytes: usize,
    pub max_source_imports: usize,
    pub allow_dynamic_import: bool,
    /// Regular expressions matched against raw inline source.
    pub banned_source_patterns: Vec<String>,

    /// Every bare specifier a plan can reach must have a manifest entry.
    pub require_manifest_coverage: bool,
    /// Remote manifest entries must carry an integrity digest.
    pub require_integrity: bool,
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

const PUBLIC_CDNS: &[&str] = &["https://esm.sh", "https://cdn.jsdelivr.net", "https://unpkg.com"];

impl SecurityPolicy {
    pub fn for_profile(profile: SecurityProfile) -> Self {
        match profile {
            SecurityProfile::Strict => Self::strict(),
            SecurityProfile::Balanced => Self::balanced(),
            SecurityProfile::Relaxed => Self::relaxed(),
        }
    }

    pub fn strict() -> Self {
        Self {
            require_spec_version: true,
            supported_spec_versions: strings(SUPPORTED_SPEC_VERSIONS),
            max_tree_depth: 24,
            max_node_count: 500,
            blocked_tags: strings(&[
                "script", "iframe", "object", "embed", "link", "meta", "base", "form", "style", "frame",
                "frameset",
            ]),
            allow_inline_event_handlers: false,
            allowed_module_prefixes: Vec::new(),
            allowed_network_hosts: strings(PUBLIC_CDNS),
            allow_data_uris: false,
            allowed_execution_profiles: vec![ExecutionProfile::Isolated],
            max_imports: 16,
            max_execution_ms: 2_000,
            max_component_invocations: 100,
            max_transitions: 32,
            max_actions_per_transition: 16,
            max_source_bytes: 64 * 1024,
            max_source_imports: 16,
            allow_dynamic_import: false,
            banned_source_patterns: strings(&[
                r"\beval\s*\(",
                r"\bnew\s+Function\b",
                r"\bdocument\s*\.\s*cookie\b",
                r"\b(localStorage|sessionStorage)\b",
                r"\bXMLHttpRequest\b",
                r"\bfetch\s*\(",
                r"\bWebSocket\b",
                r"\bimportScripts\b",
                r"\bprocess\s*\.\s*env\b",
                r"\brequire\s*\(",
            ]),
            require_manifest_coverage: true,
            require_integrity: true,
        }
    }

    pub fn balanced() -> Self {
        Self {
            require_spec_version: false,
            supported_spec_versions: strings(SUPPORTED_SPEC_VERSIONS),
            max_tree_depth: 48,
            max_node_count: 2_000,
            blocked_tags: strings(&["script", "iframe", "object", "embed", "base", "frame", "frameset"]),
            allow_inline_event_handlers: false,
            allowed_module_prefixes: Vec::new(),
            allowed_network_hosts: strings(&[
                "https://esm.sh",
                "https://cdn.jsdelivr.net",
                "https://unpkg.com",
                "https://*.esm.sh",
            ]),
            allow_data_uris: true,
            allowed_execution_profiles: vec![ExecutionProfile::Standard, ExecutionProfile::Isolated],
            max_imports: 32,
            max_execution_ms: 5_000,
            max_component_invocations: 250,
            max_transitions: 64,
            max_actions_per_transition: 32,
            max_source_bytes: 256 * 1024,
            max_source_imports: 32,
            allow_dynamic_import: false,
            banned_source_patterns: strings(&[
                r"\beval\s*\(",
                r"\bnew\s+Function\b",
                r"\bdocument\s*\.\s*cookie\b",
                r"\bimportScripts\b",
            ]),
            require_manifest_coverage: true,
            require_integrity: false,
        }
    }

    pub fn relaxed() -> Self {
        Self {
            require_spec_version: false,
            supported_spec_versions: strings(SUPPORTED_SPEC_VERSIONS),
            max_tree_depth: 128,
            max_node_count: 10_000,
            blocked_tags: strings(&["script"]),
            allow_inline_event_handlers: true,
            allowed_module_prefixes: Vec::new(),
            allowed_network_hosts: strings(&["*"]),
            allow_data_uris: true,
            allowed_execution_profiles: vec![ExecutionProfile::Standard, ExecutionProfile::Isolated],
            max_imports: 128,
            max_execution_ms: 15_000,
            max_component_invocations: 1_000,
            max_transitions: 256,
            max_actions_per_transition: 64,
            max_source_bytes: 1024 * 1024,
            max_source_imports: 128,
            allow_dynamic_import: true,
            banned_source_patterns: Vec::new(),
            require_manifest_coverage: false,
            require_integrity: false,
        }
    }
}

impl Default for SecurityPolicy {
    fn default() -> Self {
        Self::balanced()
    }
}

/// Field-level replacements applied on top of a profile.
///
/// A present field replaces the profile value wholesale; list fields are never merged.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PolicyOverrides {
    pub require_spec_version: Option<bool>,
    pub supported_spec_versions: Option<Vec<String>>,
    pub max_tree_depth: Option<usize>,
    pub max_node_count: Option<usize>,
    pub blocked_tags: Option<Vec<String>>,
    pub allow_inline_event_handlers: Option<bool>,
    pub allowed_module_prefixes: Option<Vec<String>>,
    pub allowed_network_hosts: Option<Vec<String>>,
    pub allow_data_uris: Option<bool>,
    pub allowed_execution_profiles: Option<Vec<ExecutionProfile>>,
    pub max_imports: Option<u32>,
    pub max_execution_ms: Option<u64>,
    pub max_component_invocations: Option<u32>,
    pub max_transitions: Option<usize>,
    pub max_actions_per_transition: Option<usize>,
    pub max_source_bytes: Option<usize>,
    pub max_source_imports: Option<usize>,
    pub allow_dynamic_import: Option<bool>,
    pub banned_source_patterns: Option<Vec<String>>,
    pub require_manifest_coverage: Option<bool>,
    pub require_integrity: Option<bool>,
}

macro_rules! apply_overrides {
    ($overrides:expr, $policy:expr, [$($field:ident),* $(,)?]) => {
        $(
            if let Some(value) = $overrides.$field {
                $policy.$field = value;
            }
        )*
    };
}

impl PolicyOverrides {
    /// Produce the effective policy from `policy`.
    pub fn apply(self, mut policy: SecurityPolicy) -> SecurityPolicy {
        apply_overrides!(self, policy, [
            require_spec_version,
            supported_spec_versions,
            max_tree_depth,
            max_node_count,
            blocked_tags,
            allow_inline_event_handlers,
            allowed_module_prefixes,
            allowed_network_hosts,
            allow_data_uris,
            allowed_execution_profiles,
            max_imports,
            max_execution_ms,
            max_component_invocations,
            max_transitions,
            max_actions_per_transition,
            max_source_bytes,
            max_source_imports,
            allow_dynamic_import,
            banned_source_patterns,
            require_manifest_coverage,
            require_integrity,
        ]);
        policy
    }
}

/// Serialized policy configuration: a profile name plus overrides.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyConfig {
    pub profile: SecurityProfile,
    pub overrides: PolicyOverrides,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_profiles_tighten_in_order() {
        let strict = SecurityPolicy::strict();
        let balanced = SecurityPolicy::balanced();
        let relaxed = SecurityPolicy::relaxed();

        assert!(strict.max_node_count < balanced.max_node_count);
        assert!(balanced.max_node_count < relaxed.max_node_count);
        assert!(strict.require_integrity);
        assert!(!relaxed.require_manifest_coverage);
    }

    #[test]
    fn test_override_replaces_lists_wholesale() {
        let overrides = PolicyOverrides {
            blocked_tags: Some(vec!["marquee".to_string()]),
            max_tree_depth: Some(3),
            ..Default::default()
        };
        let policy = overrides.apply(SecurityPolicy::strict());

        assert_eq!(policy.blocked_tags, vec!["marquee"]);
        assert_eq!(policy.max_tree_depth, 3);
        assert_eq!(policy.max_node_count, SecurityPolicy::strict().max_node_count);
    }

    #[test]
    fn test_config_from_json() {
        let config: PolicyConfig = serde_json::from_str(
            r#"{ "profile": "strict", "overrides": { "allowInlineEventHandlers": true } }"#,
        )
        .unwrap();
        assert_eq!(config.profile, SecurityProfile::Strict);
        assert_eq!(config.overrides.allow_inline_event_handlers, Some(true));
    }
}
