//! # Tessera State
//!
//! Per-plan state persistence and event transition application.

pub mod store;
pub mod transition;

pub use store::{InMemoryStateStore, StateEntry, StateStore};
pub use transition::{apply_action, apply_transition, ActionError, ReferenceScope, TransitionOutcome};
