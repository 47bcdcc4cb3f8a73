use async_trait::async_trait;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::envelope::{SandboxRequest, SandboxResponse};
use crate::error::SandboxError;
use crate::interpreter::{run_module_until, ExecutionLimits, LiveIsolates};
use crate::mechanism::IsolationMechanism;
use crate::mode::IsolationMode;

/// Runs each request on its own OS thread with a private interpreter.
///
/// If the caller stops waiting, the interpreter is told to stop and the
/// thread exits at its next yield.
pub struct ThreadMechanism {
    limits: ExecutionLimits,
    live: LiveIsolates,
}

impl ThreadMechanism {
    pub fn new(limits: ExecutionLimits) -> Self {
        Self {
            limits,
            live: LiveIsolates::default(),
        }
    }

    /// Isolate threads that have not exited yet.
    pub fn live_isolates(&self) -> usize {
        self.live.count()
    }
}

#[async_trait]
impl IsolationMechanism for ThreadMechanism {
    fn mode(&self) -> IsolationMode {
        IsolationMode::ThreadIsolate
    }

    fn is_available(&self) -> bool {
        true
    }

    async fn run(&self, request: SandboxRequest) -> Result<SandboxResponse, SandboxError> {
        let (tx, rx) = oneshot::channel();
        let limits = self.limits;
        let name = format!("tessera-isolate-{}", request.id);
        let stop = CancellationToken::new();
        let _stop_on_drop = stop.clone().drop_guard();
        let isolate = self.live.enter();

        std::thread::Builder::new()
            .name(name)
            .spawn(move || {
                let _isolate = isolate;
                let response = run_module_until(&request, &limits, &stop);
                if tx.send(response).is_err() {
                    debug!("Isolate thread stopped after its caller left");
                }
            })
            .map_err(|e| SandboxError::Execution {
                mode: IsolationMode::ThreadIsolate,
                message: format!("failed to spawn isolate thread: {}", e),
            })?;

        rx.await
            .map_err(|_| SandboxError::Protocol("isolate thread exited without responding".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SandboxConfig;
    use crate::dispatcher::SandboxDispatcher;
    use serde_json::json;
    use std::sync::Arc;
    use std::time::{Duration, Instant};

    #[tokio::test]
    async fn test_no_isolate_survives_a_timeout() {
        let mechanism = Arc::new(ThreadMechanism::new(ExecutionLimits::default()));
        let dispatcher = SandboxDispatcher::empty(SandboxConfig {
            allow_interpreter_fallback: false,
            ..SandboxConfig::default()
        })
        .with_mechanism(mechanism.clone());
        let request = SandboxRequest::new(
            "nested",
            "export function f() { for (let i = 0; i < 9e6; i++) { for (let j = 0; j < 9e6; j++) {} } return 1; }",
            "f",
            json!({}),
        );

        let err = dispatcher
            .execute(
                IsolationMode::ThreadIsolate,
                request,
                Some(Duration::from_millis(100)),
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, SandboxError::Timeout { .. }));

        let deadline = Instant::now() + Duration::from_secs(2);
        while mechanism.live_isolates() > 0 && Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(mechanism.live_isolates(), 0);
    }

    #[tokio::test]
    async fn test_cancelled_run_stops_its_thread() {
        let mechanism = Arc::new(ThreadMechanism::new(ExecutionLimits::default()));
        let dispatcher = SandboxDispatcher::empty(SandboxConfig {
            allow_interpreter_fallback: false,
            ..SandboxConfig::default()
        })
        .with_mechanism(mechanism.clone());
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });

        let request = SandboxRequest::new("spin", "export function f() { while (true) {} }", "f", json!({}));
        let err = dispatcher
            .execute(IsolationMode::ThreadIsolate, request, Some(Duration::from_secs(30)), &cancel)
            .await
            .unwrap_err();
        assert!(err.is_cancellation());

        let deadline = Instant::now() + Duration::from_secs(2);
        while mechanism.live_isolates() > 0 && Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(mechanism.live_isolates(), 0);
    }

    #[tokio::test]
    async fn test_completed_run_releases_its_thread() {
        let mechanism = ThreadMechanism::new(ExecutionLimits::default());
        let request = SandboxRequest::new("ok", "export default function(i) { return i.n + 1; }", "default", json!({"n": 1}));
        let response = mechanism.run(request).await.unwrap();
        assert_eq!(response.output, Some(json!(2)));

        let deadline = Instant::now() + Duration::from_secs(2);
        while mechanism.live_isolates() > 0 && Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(mechanism.live_isolates(), 0);
    }
}
