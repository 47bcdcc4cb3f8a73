//! End-to-end runs through the `tessera-sandbox-worker` binary.

use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::json;
use tessera_sandbox::{
    ExecutionLimits, IsolationMechanism, IsolationMode, ProcessMechanism, SandboxConfig, SandboxDispatcher,
    SandboxError, SandboxRequest,
};
use tokio_util::sync::CancellationToken;

fn worker() -> Arc<ProcessMechanism> {
    let path = Path::new(env!("CARGO_BIN_EXE_tessera-sandbox-worker"));
    Arc::new(ProcessMechanism::new(Some(path), ExecutionLimits::default()))
}

fn dispatcher(mechanism: Arc<ProcessMechanism>) -> SandboxDispatcher {
    SandboxDispatcher::empty(SandboxConfig {
        enabled_modes: Vec::new(),
        allow_interpreter_fallback: false,
        ..SandboxConfig::default()
    })
    .with_mechanism(mechanism)
}

/// Worker processes spawned by this test binary that are still running.
#[cfg(target_os = "linux")]
fn running_workers() -> usize {
    let me = std::process::id().to_string();
    let Ok(entries) = std::fs::read_dir("/proc") else {
        return 0;
    };
    entries
        .filter_map(|entry| entry.ok())
        .filter_map(|entry| std::fs::read_to_string(entry.path().join("stat")).ok())
        .filter(|stat| {
            let Some((head, tail)) = stat.rsplit_once(')') else {
                return false;
            };
            let fields: Vec<&str> = tail.split_whitespace().collect();
            let alive = fields.first().is_some_and(|state| *state != "Z" && *state != "X");
            let ours = fields.get(1) == Some(&me.as_str());
            head.contains("(tessera-sandbox") && alive && ours
        })
        .count()
}

#[tokio::test]
async fn test_worker_round_trip() {
    let mechanism = worker();
    assert!(mechanism.is_available());
    let dispatcher = dispatcher(mechanism);

    let request = SandboxRequest::new(
        "round-trip",
        "export default async function(input) { return { sum: input.a + input.b, tag: `#${input.a}` }; }",
        "default",
        json!({"a": 40, "b": 2}),
    );
    let outcome = dispatcher
        .execute(
            IsolationMode::DocumentIsolate,
            request,
            Some(Duration::from_secs(20)),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    assert_eq!(outcome.mode_used, IsolationMode::DocumentIsolate);
    assert!(!outcome.fell_back());
    assert_eq!(outcome.output, json!({"sum": 42, "tag": "#40"}));
}

#[tokio::test]
async fn test_worker_reports_script_errors() {
    let dispatcher = dispatcher(worker());
    let request = SandboxRequest::new("throws", "export function f() { throw new Error('kaput'); }", "f", json!({}));

    let err = dispatcher
        .execute(
            IsolationMode::DocumentIsolate,
            request,
            Some(Duration::from_secs(20)),
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();

    match err {
        SandboxError::Execution { mode, message } => {
            assert_eq!(mode, IsolationMode::DocumentIsolate);
            assert!(message.contains("kaput"), "{}", message);
        }
        other => panic!("expected an execution error, got {:?}", other),
    }
}

#[tokio::test]
async fn test_worker_is_killed_on_timeout() {
    let dispatcher = dispatcher(worker());
    let request = SandboxRequest::new(
        "runaway",
        "function spin() { for (let j = 0; j < 100000; j++) {} }
export function f() { for (let i = 0; i < 1e9; i++) { spin(); } return 1; }",
        "f",
        json!({}),
    );

    let started = Instant::now();
    let err = dispatcher
        .execute(
            IsolationMode::DocumentIsolate,
            request,
            Some(Duration::from_millis(300)),
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();

    assert!(matches!(err, SandboxError::Timeout { timeout_ms: 300, .. }), "{:?}", err);
    assert!(started.elapsed() < Duration::from_secs(5));

    #[cfg(target_os = "linux")]
    {
        let deadline = Instant::now() + Duration::from_secs(2);
        while running_workers() > 0 && Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert_eq!(running_workers(), 0);
    }
}
