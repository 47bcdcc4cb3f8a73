//! Sandbox configuration.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::interpreter::ExecutionLimits;
use crate::mode::IsolationMode;

/// What kind of host the dispatcher is embedded in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SandboxHost {
    /// A service process; the in-process interpreter may serve as a last resort.
    #[default]
    Server,
    /// A document host; only isolating mechanisms are used.
    Document,
}

/// Configuration for the sandbox dispatcher.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SandboxConfig {
    pub host: SandboxHost,

    /// Built-in mechanisms to register.
    pub enabled_modes: Vec<IsolationMode>,

    /// Path to the `tessera-sandbox-worker` binary; searched next to the
    /// current executable when unset.
    pub worker_path: Option<PathBuf>,

    /// Timeout applied when the caller gives none, in milliseconds.
    pub default_timeout_ms: u64,

    /// Interpreter loop iteration ceiling.
    pub loop_iteration_limit: u64,

    /// Interpreter recursion ceiling.
    pub recursion_limit: usize,

    /// Append the in-process interpreter to every chain on server hosts.
    pub allow_interpreter_fallback: bool,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            host: SandboxHost::Server,
            enabled_modes: IsolationMode::ALL.to_vec(),
            worker_path: None,
            default_timeout_ms: 5_000,
            loop_iteration_limit: 10_000_000,
            recursion_limit: 512,
            allow_interpreter_fallback: true,
        }
    }
}

impl SandboxConfig {
    pub fn default_timeout(&self) -> Duration {
        Duration::from_millis(self.default_timeout_ms)
    }

    pub fn limits(&self) -> ExecutionLimits {
        ExecutionLimits {
            loop_iteration_limit: self.loop_iteration_limit,
            recursion_limit: self.recursion_limit,
        }
    }
}
