//! Isolation modes and their fallback chains.

use std::fmt;

use serde::{Deserialize, Serialize};

/// How inline source is isolated from the host process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum IsolationMode {
    /// A dedicated OS thread with its own interpreter.
    ThreadIsolate,
    /// A separate worker process.
    DocumentIsolate,
    /// A fresh interpreter realm on the blocking pool.
    RealmIsolate,
    /// The interpreter on the calling task; last resort outside document hosts.
    InterpreterSandbox,
}

impl IsolationMode {
    pub const ALL: [IsolationMode; 4] = [
        IsolationMode::ThreadIsolate,
        IsolationMode::DocumentIsolate,
        IsolationMode::RealmIsolate,
        IsolationMode::InterpreterSandbox,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            IsolationMode::ThreadIsolate => "thread-isolate",
            IsolationMode::DocumentIsolate => "document-isolate",
            IsolationMode::RealmIsolate => "realm-isolate",
            IsolationMode::InterpreterSandbox => "interpreter-sandbox",
        }
    }

    /// The requested mode followed by its fallbacks, in order.
    pub fn fallback_chain(&self) -> &'static [IsolationMode] {
        match self {
            IsolationMode::ThreadIsolate => &[IsolationMode::ThreadIsolate, IsolationMode::DocumentIsolate],
            IsolationMode::DocumentIsolate => &[IsolationMode::DocumentIsolate, IsolationMode::ThreadIsolate],
            IsolationMode::RealmIsolate => &[
                IsolationMode::RealmIsolate,
                IsolationMode::ThreadIsolate,
                IsolationMode::DocumentIsolate,
            ],
            IsolationMode::InterpreterSandbox => &[IsolationMode::InterpreterSandbox],
        }
    }
}

impl fmt::Display for IsolationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_names() {
        assert_eq!(serde_json::to_string(&IsolationMode::DocumentIsolate).unwrap(), "\"document-isolate\"");
        let mode: IsolationMode = serde_json::from_str("\"realm-isolate\"").unwrap();
        assert_eq!(mode, IsolationMode::RealmIsolate);
    }

    #[test]
    fn test_chains_start_with_requested_mode() {
        for mode in IsolationMode::ALL {
            assert_eq!(mode.fallback_chain()[0], mode);
        }
        assert_eq!(
            IsolationMode::RealmIsolate.fallback_chain(),
            &[IsolationMode::RealmIsolate, IsolationMode::ThreadIsolate, IsolationMode::DocumentIsolate]
        );
    }
}
