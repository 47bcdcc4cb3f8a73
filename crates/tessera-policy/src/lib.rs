//! # Tessera Policy
//!
//! Security policy evaluation for untrusted plans.

pub mod checker;
pub mod hosts;
pub mod profile;

pub use checker::{CheckResult, PolicyChecker, PolicyIssue, PolicyRule};
pub use hosts::{is_host_allowed, HostPattern};
pub use profile::{PolicyConfig, PolicyOverrides, SecurityPolicy, SecurityProfile};
