//! Leveled, coded diagnostics.
//!
//! Hosts key behavior off [`DiagnosticCode`]; message text is for humans only.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Severity of a diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiagnosticLevel {
    Info,
    Warning,
    Error,
}

/// Stable diagnostic identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DiagnosticCode {
    SpecVersionUnsupported,
    SpecVersionMissing,
    ManifestMissing,
    ManifestInvalid,
    IntegrityMissing,
    IntegrityMismatch,
    IntegrityCheckFailed,
    ImportLimitExceeded,
    ImportFailed,
    ComponentLimitExceeded,
    ComponentNotCallable,
    ComponentFailed,
    ComponentOutputInvalid,
    ModuleLoadFailed,
    Timeout,
    Aborted,
    SandboxUnavailable,
    SandboxFailed,
    SandboxFallback,
    NetworkPolicyBlocked,
    SecurityPolicyViolation,
    UnsafePath,
    InvalidAction,
    TranspileFailed,
    PreflightFailed,
    RenderFailed,
    TransitionApplied,
}

impl DiagnosticCode {
    /// The stable wire string.
    pub fn as_str(&self) -> &'static str {
        match self {
            DiagnosticCode::SpecVersionUnsupported => "spec-version-unsupported",
            DiagnosticCode::SpecVersionMissing => "spec-version-missing",
            DiagnosticCode::ManifestMissing => "manifest-missing",
            DiagnosticCode::ManifestInvalid => "manifest-invalid",
            DiagnosticCode::IntegrityMissing => "integrity-missing",
            DiagnosticCode::IntegrityMismatch => "integrity-mismatch",
            DiagnosticCode::IntegrityCheckFailed => "integrity-check-failed",
            DiagnosticCode::ImportLimitExceeded => "import-limit-exceeded",
            DiagnosticCode::ImportFailed => "import-failed",
            DiagnosticCode::ComponentLimitExceeded => "component-limit-exceeded",
            DiagnosticCode::ComponentNotCallable => "component-not-callable",
            DiagnosticCode::ComponentFailed => "component-failed",
            DiagnosticCode::ComponentOutputInvalid => "component-output-invalid",
            DiagnosticCode::ModuleLoadFailed => "module-load-failed",
            DiagnosticCode::Timeout => "timeout",
            DiagnosticCode::Aborted => "aborted",
            DiagnosticCode::SandboxUnavailable => "sandbox-unavailable",
            DiagnosticCode::SandboxFailed => "sandbox-failed",
            DiagnosticCode::SandboxFallback => "sandbox-fallback",
            DiagnosticCode::NetworkPolicyBlocked => "network-policy-blocked",
            DiagnosticCode::SecurityPolicyViolation => "security-policy-violation",
            DiagnosticCode::UnsafePath => "unsafe-path",
            DiagnosticCode::InvalidAction => "invalid-action",
            DiagnosticCode::TranspileFailed => "transpile-failed",
            DiagnosticCode::PreflightFailed => "preflight-failed",
            DiagnosticCode::RenderFailed => "render-failed",
            DiagnosticCode::TransitionApplied => "transition-applied",
        }
    }
}

impl fmt::Display for DiagnosticCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single diagnostic record. Immutable once emitted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub level: DiagnosticLevel,
    pub code: DiagnosticCode,
    pub message: String,
}

impl Diagnostic {
    pub fn new(level: DiagnosticLevel, code: DiagnosticCode, message: impl Into<String>) -> Self {
        Self {
            level,
            code,
            message: message.into(),
        }
    }

    pub fn info(code: DiagnosticCode, message: impl Into<String>) -> Self {
        Self::new(DiagnosticLevel::Info, code, message)
    }

    pub fn warning(code: DiagnosticCode, message: impl Into<String>) -> Self {
        Self::new(DiagnosticLevel::Warning, code, message)
    }

    pub fn error(code: DiagnosticCode, message: impl Into<String>) -> Self {
        Self::new(DiagnosticLevel::Error, code, message)
    }
}

/// Append-only diagnostic log.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Diagnostics {
    entries: Vec<Diagnostic>,
}

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, diagnostic: Diagnostic) {
        self.entries.push(diagnostic);
    }

    pub fn extend(&mut self, other: impl IntoIterator<Item = Diagnostic>) {
        self.entries.extend(other);
    }

    pub fn iter(&self) -> impl Iterator<Item = &Diagnostic> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// True if any entry carries `code`.
    pub fn contains(&self, code: DiagnosticCode) -> bool {
        self.entries.iter().any(|d| d.code == code)
    }

    /// True if any entry is at error level.
    pub fn has_errors(&self) -> bool {
        self.entries.iter().any(|d| d.level == DiagnosticLevel::Error)
    }

    pub fn into_vec(self) -> Vec<Diagnostic> {
        self.entries
    }
}

impl IntoIterator for Diagnostics {
    type Item = Diagnostic;
    type IntoIter = std::vec::IntoIter<Diagnostic>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_serialize_to_stable_strings() {
        let json = serde_json::to_string(&DiagnosticCode::IntegrityMismatch).unwrap();
        assert_eq!(json, "\"integrity-mismatch\"");
        for code in [
            DiagnosticCode::SpecVersionUnsupported,
            DiagnosticCode::ComponentLimitExceeded,
            DiagnosticCode::SandboxFallback,
            DiagnosticCode::NetworkPolicyBlocked,
        ] {
            let wire = serde_json::to_value(code).unwrap();
            assert_eq!(wire.as_str(), Some(code.as_str()));
        }
    }

    #[test]
    fn test_diagnostics_log() {
        let mut log = Diagnostics::new();
        log.push(Diagnostic::info(DiagnosticCode::TransitionApplied, "ok"));
        assert!(!log.has_errors());
        log.push(Diagnostic::error(DiagnosticCode::Timeout, "late"));
        assert!(log.has_errors());
        assert!(log.contains(DiagnosticCode::Timeout));
        assert_eq!(log.len(), 2);
    }
}
