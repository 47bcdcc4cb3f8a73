//! # Tessera Sandbox
//!
//! Runs inline plan source under one of several isolation mechanisms.
//!
//! The [`SandboxDispatcher`] validates a [`SandboxRequest`], picks the first
//! available mechanism in the requested mode's fallback chain, and races the
//! run against a timeout and the caller's cancellation token.

pub mod config;
pub mod dispatcher;
pub mod envelope;
pub mod error;
pub mod interpreter;
pub mod mechanism;
pub mod mode;
pub mod process;
pub mod realm;
pub mod thread;

pub use config::{SandboxConfig, SandboxHost};
pub use dispatcher::{SandboxDispatcher, SandboxOutcome};
pub use envelope::{SandboxRequest, SandboxResponse};
pub use error::SandboxError;
pub use interpreter::{run_module, run_module_until, ExecutionLimits, InterpreterMechanism, LiveIsolates};
pub use mechanism::IsolationMechanism;
pub use mode::IsolationMode;
pub use process::{ProcessMechanism, WORKER_BINARY};
pub use realm::RealmMechanism;
pub use thread::ThreadMechanism;
