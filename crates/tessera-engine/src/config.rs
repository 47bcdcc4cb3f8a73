//! Engine configuration.

use serde::{Deserialize, Serialize};
use tessera_core::SUPPORTED_SPEC_VERSIONS;
use tessera_sandbox::IsolationMode;

/// What the engine does with dependency preflight results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PreflightMode {
    /// Skip preflight.
    #[default]
    Off,
    /// Report failures as diagnostics and continue.
    WarnOnly,
    /// Stop execution when any probe fails.
    FailClosed,
}

/// Configuration for the plan engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Bare specifiers must have a manifest entry.
    pub enforce_manifest: bool,

    /// Ceiling on the execution budget; plans may request less.
    pub max_execution_ms: u64,

    /// Ceiling on component invocations per execution.
    pub max_component_invocations: u32,

    /// Ceiling on declared imports resolved per execution.
    pub max_imports: u32,

    pub preflight: PreflightMode,

    /// Isolation for inline source; `None` runs it in-process.
    pub source_isolation: Option<IsolationMode>,

    /// Treat a sandbox failure of inline source as a hard error.
    pub sandbox_fail_closed: bool,

    /// Isolation used for components under the isolated execution profile.
    pub component_isolation_mode: IsolationMode,

    /// Call isolated components directly when no isolate is available.
    pub allow_isolation_fallback: bool,

    pub supported_spec_versions: Vec<String>,

    /// Host patterns remote module URLs must match; `None` allows any host.
    pub allowed_network_hosts: Option<Vec<String>>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            enforce_manifest: true,
            max_execution_ms: 5_000,
            max_component_invocations: 256,
            max_imports: 32,
            preflight: PreflightMode::Off,
            source_isolation: Some(IsolationMode::ThreadIsolate),
            sandbox_fail_closed: false,
            component_isolation_mode: IsolationMode::ThreadIsolate,
            allow_isolation_fallback: true,
            supported_spec_versions: SUPPORTED_SPEC_VERSIONS.iter().map(|v| v.to_string()).collect(),
            allowed_network_hosts: None,
        }
    }
}

impl EngineConfig {
    pub fn supports_spec_version(&self, version: &str) -> bool {
        self.supported_spec_versions.iter().any(|v| v == version)
    }
}
