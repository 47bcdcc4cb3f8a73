//! # Tessera Core
//!
//! Core types shared by every Tessera crate.
//!
//! This crate provides the fundamental building blocks:
//! - [`Plan`] - The untrusted declarative input
//! - [`Node`] - Tagged text/element/component tree
//! - [`Action`] and [`MutationPath`] - Validated state mutations
//! - [`Diagnostic`] - Coded, leveled execution records
//! - [`ExecutionResult`] - What a host receives back
//! - [`TesseraError`] - Error type for aborts and contract violations

pub mod diagnostic;
pub mod error;
pub mod node;
pub mod path;
pub mod plan;
pub mod result;
pub mod specifier;
pub mod state;

// Re-exports for convenience
pub use diagnostic::{Diagnostic, DiagnosticCode, DiagnosticLevel, Diagnostics};
pub use error::{Result, TesseraError};
pub use node::{Node, Props, PLACEHOLDER_TAG};
pub use path::{MutationPath, ReferencePath, ReferenceRoot};
pub use plan::{
    Capabilities, ExecutionProfile, ManifestEntry, ModuleManifest, Plan, SourceLanguage,
    SourceModule, SourceRuntime, CURRENT_SPEC_VERSION, SUPPORTED_SPEC_VERSIONS,
};
pub use result::{ExecutionContext, ExecutionResult, PlanEvent, RenderArtifact};
pub use specifier::{ImportRef, SpecifierKind};
pub use state::{Action, StateModel, ValueSource};

/// Prelude module for common imports
pub mod prelude {
    pub use crate::diagnostic::{Diagnostic, DiagnosticCode, DiagnosticLevel, Diagnostics};
    pub use crate::error::{Result, TesseraError};
    pub use crate::node::Node;
    pub use crate::plan::{Capabilities, ExecutionProfile, ManifestEntry, ModuleManifest, Plan};
    pub use crate::result::{ExecutionContext, ExecutionResult, PlanEvent};
    pub use crate::state::{Action, StateModel, ValueSource};
}
