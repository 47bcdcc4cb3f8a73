//! Policy evaluation over plans, specifiers and capabilities.
//!
//! Every check aggregates all issues it finds; nothing short-circuits on the
//! first violation. Checks are pure functions of their input and the policy.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tessera_core::specifier::{classify, has_dynamic_import, scan_imports};
use tessera_core::{
    Capabilities, Diagnostic, DiagnosticCode, ModuleManifest, MutationPath, Node, Plan, Props,
    ReferencePath, Result, SpecifierKind, StateModel, TesseraError,
};
use tracing::{debug, warn};
use url::Url;

use crate::hosts::is_host_allowed;
use crate::profile::{PolicyConfig, PolicyOverrides, SecurityPolicy, SecurityProfile};

/// Which family of rules an issue belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PolicyRule {
    SpecVersion,
    Manifest,
    Integrity,
    Coverage,
    Capability,
    Network,
    Module,
    Tree,
    State,
    Source,
}

/// A single policy violation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyIssue {
    pub rule: PolicyRule,
    pub message: String,
}

impl fmt::Display for PolicyIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

/// Verdict of a policy check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckResult {
    pub safe: bool,
    pub issues: Vec<PolicyIssue>,
    pub diagnostics: Vec<Diagnostic>,
}

impl CheckResult {
    /// True if any issue message contains `needle`.
    pub fn mentions(&self, needle: &str) -> bool {
        self.issues.iter().any(|i| i.message.contains(needle))
    }
}

#[derive(Default)]
struct Report {
    issues: Vec<PolicyIssue>,
    diagnostics: Vec<Diagnostic>,
}

impl Report {
    fn issue(&mut self, rule: PolicyRule, code: DiagnosticCode, message: String) {
        self.diagnostics.push(Diagnostic::error(code, message.clone()));
        self.issues.push(PolicyIssue { rule, message });
    }

    fn violation(&mut self, rule: PolicyRule, message: String) {
        self.issue(rule, DiagnosticCode::SecurityPolicyViolation, message);
    }

    fn note(&mut self, diagnostic: Diagnostic) {
        self.diagnostics.push(diagnostic);
    }

    fn finish(self) -> CheckResult {
        CheckResult {
            safe: self.issues.is_empty(),
            issues: self.issues,
            diagnostics: self.diagnostics,
        }
    }
}

const DOM_EVENTS: &[&str] = &[
    "onclick", "ondblclick", "onload", "onerror", "onsubmit", "onchange", "oninput", "onfocus",
    "onblur", "onkeydown", "onkeyup", "onkeypress", "onmouseover", "onmouseout", "onmousedown",
    "onmouseup", "onmouseenter", "onmouseleave", "onpointerdown", "onpointerup", "ontouchstart",
    "ontouchend", "onscroll", "onwheel", "ondrag", "ondrop", "onanimationend", "ontransitionend",
];

fn camel_handler() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^on[A-Z]").expect("handler pattern is valid"))
}

/// `onClick`-style props, or lowercase DOM handler attributes like `onclick`.
pub fn is_event_handler_prop(key: &str) -> bool {
    camel_handler().is_match(key) || DOM_EVENTS.contains(&key.to_ascii_lowercase().as_str())
}

fn is_script_url(value: &serde_json::Value) -> bool {
    value
        .as_str()
        .map(|s| s.trim_start().to_ascii_lowercase().starts_with("javascript:"))
        .unwrap_or(false)
}

fn has_supported_digest(integrity: &str) -> bool {
    integrity.split_whitespace().any(|token| {
        token
            .split_once('-')
            .map(|(alg, digest)| matches!(alg, "sha256" | "sha384" | "sha512") && !digest.is_empty())
            .unwrap_or(false)
    })
}

struct Active {
    profile: SecurityProfile,
    policy: SecurityPolicy,
    banned: Vec<(String, Regex)>,
}

/// Evaluates plans against an initialized security policy.
#[derive(Default)]
pub struct PolicyChecker {
    active: Option<Active>,
}

impl PolicyChecker {
    /// Create an uninitialized checker. Every check fails until [`initialize`](Self::initialize).
    pub fn new() -> Self {
        Self::default()
    }

    /// Build and initialize a checker from configuration.
    pub fn from_config(config: &PolicyConfig) -> Result<Self> {
        let mut checker = Self::new();
        checker.initialize(config.profile, config.overrides.clone())?;
        Ok(checker)
    }

    /// Load a profile and apply overrides on top of it.
    pub fn initialize(&mut self, profile: SecurityProfile, overrides: PolicyOverrides) -> Result<()> {
        let policy = overrides.apply(SecurityPolicy::for_profile(profile));
        let mut banned = Vec::with_capacity(policy.banned_source_patterns.len());
        for pattern in &policy.banned_source_patterns {
            let regex = Regex::new(pattern).map_err(|e| {
                TesseraError::InvalidRequest(format!("banned source pattern '{}': {}", pattern, e))
            })?;
            banned.push((pattern.clone(), regex));
        }
        debug!("Policy checker initialized with profile {}", profile);
        self.active = Some(Active {
            profile,
            policy,
            banned,
        });
        Ok(())
    }

    pub fn is_initialized(&self) -> bool {
        self.active.is_some()
    }

    /// The effective policy, once initialized.
    pub fn policy(&self) -> Option<&SecurityPolicy> {
        self.active.as_ref().map(|a| &a.policy)
    }

    pub fn profile(&self) -> Option<SecurityProfile> {
        self.active.as_ref().map(|a| a.profile)
    }

    fn active(&self) -> Result<&Active> {
        self.active.as_ref().ok_or_else(|| TesseraError::NotInitialized {
            component: "PolicyChecker".to_string(),
        })
    }

    /// Evaluate an entire plan.
    pub fn check_plan(&self, plan: &Plan) -> Result<CheckResult> {
        let active = self.active()?;
        let policy = &active.policy;
        let mut report = Report::default();

        check_spec_version(policy, plan, &mut report);
        check_manifest(policy, &plan.module_manifest, &mut report);
        check_ceilings(policy, &plan.capabilities, &mut report);

        let ceiling = plan
            .capabilities
            .max_imports
            .map_or(policy.max_imports, |m| m.min(policy.max_imports));
        if plan.imports.len() > ceiling as usize {
            report.note(Diagnostic::warning(
                DiagnosticCode::ImportLimitExceeded,
                format!(
                    "Plan declares {} imports; only the first {} will be loaded",
                    plan.imports.len(),
                    ceiling
                ),
            ));
        }

        let mut reachable = BTreeSet::new();
        reachable.extend(plan.imports.iter().cloned());
        reachable.extend(plan.capabilities.allowed_modules.iter().cloned());
        collect_component_modules(&plan.root, &mut reachable);
        if let Some(source) = &plan.source {
            reachable.extend(scan_imports(&source.code).into_iter().map(|i| i.specifier));
        }
        for specifier in &reachable {
            check_specifier_into(policy, specifier, &mut report);
        }
        if policy.require_manifest_coverage {
            check_coverage(reachable.iter(), &plan.module_manifest, &mut report);
        }

        check_tree(policy, &plan.root, &mut report);
        if let Some(model) = &plan.state {
            check_state(policy, model, &mut report);
        }
        if let Some(source) = &plan.source {
            check_source(active, &source.code, &mut report);
        }

        let result = report.finish();
        if result.safe {
            debug!("Plan {} passed {} policy", plan.id, active.profile);
        } else {
            warn!(
                "Plan {} failed {} policy with {} issue(s)",
                plan.id,
                active.profile,
                result.issues.len()
            );
        }
        Ok(result)
    }

    /// Check that a single specifier is legal to resolve.
    pub fn check_module_specifier(&self, specifier: &str) -> Result<CheckResult> {
        let active = self.active()?;
        let mut report = Report::default();
        check_specifier_into(&active.policy, specifier, &mut report);
        Ok(report.finish())
    }

    /// Check requested capabilities against the policy ceilings.
    ///
    /// With a manifest, allowed modules must also be covered when the policy requires it.
    pub fn check_capabilities(
        &self,
        capabilities: &Capabilities,
        manifest: Option<&ModuleManifest>,
    ) -> Result<CheckResult> {
        let active = self.active()?;
        let policy = &active.policy;
        let mut report = Report::default();

        check_ceilings(policy, capabilities, &mut report);
        for specifier in &capabilities.allowed_modules {
            check_specifier_into(policy, specifier, &mut report);
        }
        if let (Some(manifest), true) = (manifest, policy.require_manifest_coverage) {
            check_coverage(capabilities.allowed_modules.iter(), manifest, &mut report);
        }
        Ok(report.finish())
    }
}

fn check_spec_version(policy: &SecurityPolicy, plan: &Plan, report: &mut Report) {
    match &plan.spec_version {
        None if policy.require_spec_version => report.issue(
            PolicyRule::SpecVersion,
            DiagnosticCode::SpecVersionMissing,
            "Plan does not declare specVersion".to_string(),
        ),
        None => report.note(Diagnostic::info(
            DiagnosticCode::SpecVersionMissing,
            format!("specVersion missing; assuming {}", plan.effective_spec_version()),
        )),
        Some(version) if !policy.supported_spec_versions.iter().any(|v| v == version) => report.issue(
            PolicyRule::SpecVersion,
            DiagnosticCode::SpecVersionUnsupported,
            format!(
                "specVersion '{}' is not supported (supported: {})",
                version,
                policy.supported_spec_versions.join(", ")
            ),
        ),
        Some(_) => {}
    }
}

fn check_manifest(policy: &SecurityPolicy, manifest: &ModuleManifest, report: &mut Report) {
    for (specifier, entry) in manifest {
        if specifier.trim().is_empty() {
            report.issue(
                PolicyRule::Manifest,
                DiagnosticCode::ManifestInvalid,
                "Manifest contains an empty specifier".to_string(),
            );
        }

        let resolved = entry.resolved_url.trim();
        match classify(resolved) {
            _ if resolved.is_empty() => report.issue(
                PolicyRule::Manifest,
                DiagnosticCode::ManifestInvalid,
                format!("Manifest entry '{}' has an empty resolvedUrl", specifier),
            ),
            SpecifierKind::Url => match Url::parse(resolved) {
                Ok(_) if !is_host_allowed(&policy.allowed_network_hosts, resolved) => report.issue(
                    PolicyRule::Network,
                    DiagnosticCode::NetworkPolicyBlocked,
                    format!("Manifest entry '{}' points at a host outside the allowlist: {}", specifier, resolved),
                ),
                Ok(_) => {}
                Err(e) => report.issue(
                    PolicyRule::Manifest,
                    DiagnosticCode::ManifestInvalid,
                    format!("Manifest entry '{}' has an unparseable resolvedUrl: {}", specifier, e),
                ),
            },
            SpecifierKind::Data | SpecifierKind::Blob if !policy.allow_data_uris => report.violation(
                PolicyRule::Manifest,
                format!("Manifest entry '{}' uses an inline URI, which the policy forbids", specifier),
            ),
            SpecifierKind::Bare => report.issue(
                PolicyRule::Manifest,
                DiagnosticCode::ManifestInvalid,
                format!(
                    "Manifest entry '{}' must resolve to a URL, path or data URI, got '{}'",
                    specifier, resolved
                ),
            ),
            _ => {}
        }

        match &entry.integrity {
            Some(integrity) if !has_supported_digest(integrity) => report.issue(
                PolicyRule::Integrity,
                DiagnosticCode::ManifestInvalid,
                format!("Manifest entry '{}' has no supported integrity digest", specifier),
            ),
            None if policy.require_integrity && entry.is_remote() => report.issue(
                PolicyRule::Integrity,
                DiagnosticCode::IntegrityMissing,
                format!("Remote manifest entry '{}' is missing integrity metadata", specifier),
            ),
            _ => {}
        }
    }
}

fn check_coverage<'a>(
    specifiers: impl Iterator<Item = &'a String>,
    manifest: &ModuleManifest,
    report: &mut Report,
) {
    for specifier in specifiers {
        if classify(specifier) == SpecifierKind::Bare && !manifest.contains_key(specifier) {
            report.issue(
                PolicyRule::Coverage,
                DiagnosticCode::ManifestMissing,
                format!("Bare specifier '{}' has no manifest entry", specifier),
            );
        }
    }
}

fn check_ceilings(policy: &SecurityPolicy, caps: &Capabilities, report: &mut Report) {
    if let Some(requested) = caps.max_imports.filter(|n| *n > policy.max_imports) {
        report.violation(
            PolicyRule::Capability,
            format!("maxImports {} exceeds the ceiling of {}", requested, policy.max_imports),
        );
    }
    if let Some(requested) = caps.max_execution_ms.filter(|n| *n > policy.max_execution_ms) {
        report.violation(
            PolicyRule::Capability,
            format!("maxExecutionMs {} exceeds the ceiling of {}", requested, policy.max_execution_ms),
        );
    }
    if let Some(requested) = caps
        .max_component_invocations
        .filter(|n| *n > policy.max_component_invocations)
    {
        report.violation(
            PolicyRule::Capability,
            format!(
                "maxComponentInvocations {} exceeds the ceiling of {}",
                requested, policy.max_component_invocations
            ),
        );
    }

    let profile = caps.execution_profile.unwrap_or_default();
    if !policy.allowed_execution_profiles.contains(&profile) {
        report.violation(
            PolicyRule::Capability,
            format!("Execution profile {:?} is not permitted", profile),
        );
    }

    for host in &caps.network_hosts {
        if !is_host_allowed(&policy.allowed_network_hosts, host) {
            report.issue(
                PolicyRule::Network,
                DiagnosticCode::NetworkPolicyBlocked,
                format!("Network host '{}' is not in the allowlist", host),
            );
        }
    }
}

fn check_specifier_into(policy: &SecurityPolicy, specifier: &str, report: &mut Report) {
    if specifier.trim().is_empty() || specifier.chars().any(|c| c.is_control() || c.is_whitespace()) {
        report.violation(
            PolicyRule::Module,
            format!("Specifier {:?} is empty or contains whitespace", specifier),
        );
        return;
    }

    match classify(specifier) {
        SpecifierKind::Url => {
            if !is_host_allowed(&policy.allowed_network_hosts, specifier) {
                report.issue(
                    PolicyRule::Network,
                    DiagnosticCode::NetworkPolicyBlocked,
                    format!("Module URL '{}' is outside the host allowlist", specifier),
                );
            }
        }
        SpecifierKind::Data | SpecifierKind::Blob => {
            if !policy.allow_data_uris {
                report.violation(
                    PolicyRule::Module,
                    "Inline data/blob module specifiers are not permitted".to_string(),
                );
            }
        }
        SpecifierKind::Relative => {}
        SpecifierKind::Bare => {
            if specifier.split('/').any(|segment| segment == ".." || segment == ".") {
                report.violation(
                    PolicyRule::Module,
                    format!("Specifier '{}' contains a relative segment", specifier),
                );
            }
            if !policy.allowed_module_prefixes.is_empty()
                && !policy
                    .allowed_module_prefixes
                    .iter()
                    .any(|prefix| specifier.starts_with(prefix.as_str()))
            {
                report.violation(
                    PolicyRule::Module,
                    format!("Specifier '{}' does not match any allowed module prefix", specifier),
                );
            }
        }
    }
}

fn collect_component_modules(node: &Node, out: &mut BTreeSet<String>) {
    if let Node::Component { module, .. } = node {
        out.insert(module.clone());
    }
    for child in node.children() {
        collect_component_modules(child, out);
    }
}

fn check_props(policy: &SecurityPolicy, props: &Props, location: &str, report: &mut Report) {
    for (key, value) in props {
        if !policy.allow_inline_event_handlers && is_event_handler_prop(key) {
            report.violation(
                PolicyRule::Tree,
                format!("Inline event handler prop '{}' at {}", key, location),
            );
        }
        if is_script_url(value) {
            report.violation(
                PolicyRule::Tree,
                format!("Prop '{}' at {} holds a javascript: URL", key, location),
            );
        }
    }
}

fn check_tree(policy: &SecurityPolicy, root: &Node, report: &mut Report) {
    let mut stack: Vec<(&Node, usize, String)> = vec![(root, 1, "root".to_string())];
    let mut count = 0usize;
    let mut max_depth = 0usize;
    let mut depth_location = None;

    while let Some((node, depth, location)) = stack.pop() {
        count += 1;
        if depth > max_depth {
            max_depth = depth;
        }
        if depth > policy.max_tree_depth && depth_location.is_none() {
            depth_location = Some(location.clone());
        }

        match node {
            Node::Text { .. } => {}
            Node::Element { tag, props, .. } => {
                if policy.blocked_tags.iter().any(|b| b.eq_ignore_ascii_case(tag)) {
                    report.violation(
                        PolicyRule::Tree,
                        format!("Element uses blocked tag <{}> at {}", tag, location),
                    );
                }
                check_props(policy, props, &location, report);
            }
            Node::Component { props, .. } => check_props(policy, props, &location, report),
        }

        // Reverse so children pop in document order.
        for (index, child) in node.children().iter().enumerate().rev() {
            stack.push((child, depth + 1, format!("{}.children[{}]", location, index)));
        }
    }

    if let Some(location) = depth_location {
        report.violation(
            PolicyRule::Tree,
            format!(
                "Tree depth {} exceeds the limit of {} (first at {})",
                max_depth, policy.max_tree_depth, location
            ),
        );
    }
    if count > policy.max_node_count {
        report.violation(
            PolicyRule::Tree,
            format!("Tree has {} nodes, above the limit of {}", count, policy.max_node_count),
        );
    }
}

fn check_state(policy: &SecurityPolicy, model: &StateModel, report: &mut Report) {
    if !(model.initial.is_object() || model.initial.is_null()) {
        report.violation(PolicyRule::State, "Initial state must be an object".to_string());
    }
    if model.transitions.len() > policy.max_transitions {
        report.violation(
            PolicyRule::State,
            format!(
                "State model declares {} transitions, above the limit of {}",
                model.transitions.len(),
                policy.max_transitions
            ),
        );
    }

    for (event, actions) in &model.transitions {
        if actions.len() > policy.max_actions_per_transition {
            report.violation(
                PolicyRule::State,
                format!(
                    "Transition '{}' has {} actions, above the limit of {}",
                    event,
                    actions.len(),
                    policy.max_actions_per_transition
                ),
            );
        }
        for (index, action) in actions.iter().enumerate() {
            if let Err(e) = MutationPath::parse(action.path()) {
                report.issue(
                    PolicyRule::State,
                    DiagnosticCode::UnsafePath,
                    format!("Transition '{}' action #{}: {}", event, index, e),
                );
            }
            if let Some(reference) = action.value().and_then(|v| v.reference()) {
                if let Err(e) = ReferencePath::parse(reference) {
                    report.issue(
                        PolicyRule::State,
                        DiagnosticCode::UnsafePath,
                        format!("Transition '{}' action #{} reference: {}", event, index, e),
                    );
                }
            }
            if let tessera_core::Action::Increment { by, .. } = action {
                if !by.is_finite() {
                    report.issue(
                        PolicyRule::State,
                        DiagnosticCode::InvalidAction,
                        format!("Transition '{}' action #{} increments by a non-finite amount", event, index),
                    );
                }
            }
        }
    }
}

fn check_source(active: &Active, code: &str, report: &mut Report) {
    let policy = &active.policy;
    if code.len() > policy.max_source_bytes {
        report.violation(
            PolicyRule::Source,
            format!(
                "Inline source is {} bytes, above the limit of {}",
                code.len(),
                policy.max_source_bytes
            ),
        );
    }

    let imports = scan_imports(code);
    if imports.len() > policy.max_source_imports {
        report.violation(
            PolicyRule::Source,
            format!(
                "Inline source has {} imports, above the limit of {}",
                imports.len(),
                policy.max_source_imports
            ),
        );
    }

    if !policy.allow_dynamic_import && has_dynamic_import(code) {
        report.violation(PolicyRule::Source, "Inline source uses dynamic import()".to_string());
    }

    for (pattern, regex) in &active.banned {
        if regex.is_match(code) {
            report.violation(
                PolicyRule::Source,
                format!("Inline source matches banned pattern '{}'", pattern),
            );
        }
    }
}
