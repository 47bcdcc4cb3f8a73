use async_trait::async_trait;

use crate::envelope::{SandboxRequest, SandboxResponse};
use crate::error::SandboxError;
use crate::mode::IsolationMode;

/// One way of running a [`SandboxRequest`] in isolation.
///
/// Dropping the future returned by `run` must tear the isolate down, or
/// leave it to finish under the interpreter's limits without delivering
/// its result.
#[async_trait]
pub trait IsolationMechanism: Send + Sync {
    fn mode(&self) -> IsolationMode;

    /// Whether this mechanism can run in the current host.
    fn is_available(&self) -> bool;

    async fn run(&self, request: SandboxRequest) -> Result<SandboxResponse, SandboxError>;
}
