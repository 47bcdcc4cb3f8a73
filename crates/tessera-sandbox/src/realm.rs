use async_trait::async_trait;

use crate::envelope::{SandboxRequest, SandboxResponse};
use crate::error::SandboxError;
use crate::interpreter::{run_on_blocking_pool, ExecutionLimits, LiveIsolates};
use crate::mechanism::IsolationMechanism;
use crate::mode::IsolationMode;

/// Runs each request in a fresh interpreter realm on the blocking pool.
pub struct RealmMechanism {
    limits: ExecutionLimits,
    live: LiveIsolates,
}

impl RealmMechanism {
    pub fn new(limits: ExecutionLimits) -> Self {
        Self {
            limits,
            live: LiveIsolates::default(),
        }
    }

    pub fn live_isolates(&self) -> usize {
        self.live.count()
    }
}

#[async_trait]
impl IsolationMechanism for RealmMechanism {
    fn mode(&self) -> IsolationMode {
        IsolationMode::RealmIsolate
    }

    /// The blocking pool only exists inside a Tokio runtime.
    fn is_available(&self) -> bool {
        tokio::runtime::Handle::try_current().is_ok()
    }

    async fn run(&self, request: SandboxRequest) -> Result<SandboxResponse, SandboxError> {
        run_on_blocking_pool(IsolationMode::RealmIsolate, request, self.limits, &self.live).await
    }
}
