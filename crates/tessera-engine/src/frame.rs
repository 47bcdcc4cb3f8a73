use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, Instant};

use tessera_core::{Capabilities, ExecutionProfile, Result, TesseraError};
use tokio_util::sync::CancellationToken;

use crate::config::EngineConfig;

/// Deadline and counters shared by one `execute_plan` call.
///
/// Remaining time is always recomputed from `started_at`, so nested calls
/// can never outlive the frame.
#[derive(Debug)]
pub struct ExecutionFrame {
    pub started_at: Instant,
    pub max_execution_ms: u64,
    pub max_component_invocations: u32,
    pub max_imports: u32,
    pub execution_profile: ExecutionProfile,
    component_invocations: AtomicU32,
    abort: CancellationToken,
}

impl ExecutionFrame {
    pub fn new(
        max_execution_ms: u64,
        max_component_invocations: u32,
        max_imports: u32,
        execution_profile: ExecutionProfile,
        abort: CancellationToken,
    ) -> Self {
        Self {
            started_at: Instant::now(),
            max_execution_ms,
            max_component_invocations,
            max_imports,
            execution_profile,
            component_invocations: AtomicU32::new(0),
            abort,
        }
    }

    /// Frame for a plan: capability requests clamped to the engine's ceilings.
    pub fn for_plan(capabilities: &Capabilities, config: &EngineConfig, abort: CancellationToken) -> Self {
        let clamp_u64 = |requested: Option<u64>, ceiling: u64| requested.map_or(ceiling, |r| r.min(ceiling));
        let clamp_u32 = |requested: Option<u32>, ceiling: u32| requested.map_or(ceiling, |r| r.min(ceiling));
        Self::new(
            clamp_u64(capabilities.max_execution_ms, config.max_execution_ms),
            clamp_u32(capabilities.max_component_invocations, config.max_component_invocations),
            clamp_u32(capabilities.max_imports, config.max_imports),
            capabilities.execution_profile.unwrap_or_default(),
            abort,
        )
    }

    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }

    pub fn budget(&self) -> Duration {
        Duration::from_millis(self.max_execution_ms)
    }

    pub fn remaining(&self) -> Duration {
        self.budget().saturating_sub(self.elapsed())
    }

    /// True once the budget is spent.
    pub fn is_expired(&self) -> bool {
        self.remaining().is_zero()
    }

    pub fn abort_token(&self) -> &CancellationToken {
        &self.abort
    }

    /// Fails with an abort error naming `stage` if the signal has fired.
    pub fn check_abort(&self, stage: &str) -> Result<()> {
        if self.abort.is_cancelled() {
            Err(TesseraError::aborted(stage))
        } else {
            Ok(())
        }
    }

    /// Count one component invocation; false once the limit is exceeded.
    pub fn try_invoke(&self) -> bool {
        let count = self.component_invocations.fetch_add(1, Ordering::SeqCst) + 1;
        count <= self.max_component_invocations
    }

    pub fn component_invocations(&self) -> u32 {
        self.component_invocations.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capabilities_are_clamped() {
        let capabilities = Capabilities {
            max_execution_ms: Some(60_000),
            max_component_invocations: Some(3),
            ..Capabilities::default()
        };
        let frame = ExecutionFrame::for_plan(&capabilities, &EngineConfig::default(), CancellationToken::new());
        assert_eq!(frame.max_execution_ms, EngineConfig::default().max_execution_ms);
        assert_eq!(frame.max_component_invocations, 3);
        assert_eq!(frame.max_imports, EngineConfig::default().max_imports);
    }

    #[test]
    fn test_invocation_counter() {
        let frame = ExecutionFrame::new(1_000, 2, 0, ExecutionProfile::Standard, CancellationToken::new());
        assert!(frame.try_invoke());
        assert!(frame.try_invoke());
        assert!(!frame.try_invoke());
        assert_eq!(frame.component_invocations(), 3);
    }

    #[test]
    fn test_zero_budget_is_expired() {
        let frame = ExecutionFrame::new(0, 1, 0, ExecutionProfile::Standard, CancellationToken::new());
        assert!(frame.is_expired());
        assert_eq!(frame.remaining(), Duration::ZERO);
    }

    #[test]
    fn test_abort() {
        let token = CancellationToken::new();
        let frame = ExecutionFrame::new(1_000, 1, 0, ExecutionProfile::Standard, token.clone());
        assert!(frame.check_abort("imports").is_ok());
        token.cancel();
        assert!(frame.check_abort("imports").unwrap_err().is_abort());
    }
}
