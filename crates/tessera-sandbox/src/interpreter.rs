//! Module execution on the embedded JavaScript interpreter.
//!
//! Every mechanism ends up here: the request's code is loaded as an ES
//! module through a loader that only accepts `data:` URIs, the named export
//! is called with the runtime input (or read as a value), and the result
//! comes back as a JSON string.
//!
//! The export call runs on the interpreter's budgeted evaluation loop, which
//! hands control back every few hundred instructions. A run checks its stop
//! token at each of those points, so an abandoned isolate exits instead of
//! spinning until the loop limit.

use std::future::{poll_fn, Future};
use std::pin::pin;
use std::rc::Rc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::task::Poll;

use async_trait::async_trait;
use boa_engine::builtins::promise::PromiseState;
use boa_engine::module::{ModuleLoader, Referrer};
use boa_engine::object::builtins::JsPromise;
use boa_engine::{Context, JsError, JsNativeError, JsResult, JsString, JsValue, Module, Script, Source};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tessera_resolver::decode_data_uri;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::envelope::{SandboxRequest, SandboxResponse};
use crate::error::SandboxError;
use crate::mechanism::IsolationMechanism;
use crate::mode::IsolationMode;

const MODULE_GLOBAL: &str = "__tesseraModule";
const RESULT_GLOBAL: &str = "__tesseraResult";

/// Instruction cost between stop-token checks.
const STOP_CHECK_BUDGET: u32 = 256;

/// Interpreter ceilings applied to every run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionLimits {
    pub loop_iteration_limit: u64,
    pub recursion_limit: usize,
}

impl Default for ExecutionLimits {
    fn default() -> Self {
        Self {
            loop_iteration_limit: 10_000_000,
            recursion_limit: 512,
        }
    }
}

/// Number of interpreter runs still executing on their own threads.
#[derive(Debug, Clone, Default)]
pub struct LiveIsolates(Arc<AtomicUsize>);

impl LiveIsolates {
    pub fn count(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }

    pub(crate) fn enter(&self) -> LiveIsolate {
        self.0.fetch_add(1, Ordering::SeqCst);
        LiveIsolate(self.0.clone())
    }
}

/// Held by the thread running an isolate; released when the thread is done.
pub(crate) struct LiveIsolate(Arc<AtomicUsize>);

impl Drop for LiveIsolate {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Resolves imports from `data:` URIs only; anything else must have been
/// inlined before the code reached the sandbox.
struct DataUriLoader;

impl ModuleLoader for DataUriLoader {
    fn load_imported_module(
        &self,
        _referrer: Referrer,
        specifier: JsString,
        finish_load: Box<dyn FnOnce(JsResult<Module>, &mut Context)>,
        context: &mut Context,
    ) {
        let specifier = specifier.to_std_string_escaped();
        let result = decode_data_uri(&specifier)
            .map_err(|e| {
                JsError::from(
                    JsNativeError::typ()
                        .with_message(format!("cannot import '{}': {}", abbreviate(&specifier), e)),
                )
            })
            .and_then(|module| Module::parse(Source::from_bytes(&module.bytes), None, context));
        finish_load(result, context);
    }
}

fn abbreviate(specifier: &str) -> String {
    match specifier.char_indices().nth(64) {
        Some((cut, _)) => format!("{}...", &specifier[..cut]),
        None => specifier.to_string(),
    }
}

/// Script that calls the export on the loaded module's namespace and
/// publishes the serialized result once it settles.
fn call_source(request: &SandboxRequest) -> Result<String, String> {
    let export_name = serde_json::to_string(&request.export_name).map_err(|e| e.to_string())?;
    let input_json = serde_json::to_string(&request.runtime_input).map_err(|e| e.to_string())?;
    let input_literal = serde_json::to_string(&input_json).map_err(|e| e.to_string())?;

    Ok(format!(
        r#"(() => {{
    const __module = globalThis.{MODULE_GLOBAL};
    const __name = {export_name};
    if (!(__name in __module)) {{
        throw new Error("module has no export named " + __name);
    }}
    const __export = __module[__name];
    const __input = JSON.parse({input_literal});
    const __value = typeof __export === "function" ? __export(__input) : __export;
    return Promise.resolve(__value).then((value) => {{
        let json;
        try {{
            json = JSON.stringify(value === undefined ? null : value);
        }} catch (e) {{
            throw new Error("response not serializable: " + (e && e.message ? e.message : e));
        }}
        if (typeof json !== "string") {{
            throw new Error("response not serializable: " + typeof value);
        }}
        globalThis.{RESULT_GLOBAL} = json;
    }});
}})()
"#
    ))
}

fn settled(promise: Option<JsPromise>, what: &str) -> Result<(), String> {
    match promise.map(|p| p.state()) {
        None | Some(PromiseState::Fulfilled(_)) => Ok(()),
        Some(PromiseState::Rejected(reason)) => Err(JsError::from_opaque(reason).to_string()),
        Some(PromiseState::Pending) => Err(format!("{} did not settle", what)),
    }
}

fn evaluate(request: &SandboxRequest, limits: &ExecutionLimits, stop: &CancellationToken) -> Result<Value, String> {
    let mut context = Context::builder()
        .module_loader(Rc::new(DataUriLoader))
        .build()
        .map_err(|e| format!("failed to create interpreter: {}", e))?;
    context
        .runtime_limits_mut()
        .set_loop_iteration_limit(limits.loop_iteration_limit);
    context.runtime_limits_mut().set_recursion_limit(limits.recursion_limit);

    let module = Module::parse(Source::from_bytes(request.code.as_bytes()), None, &mut context)
        .map_err(|e| format!("parse error: {}", e))?;
    let loaded = module.load_link_evaluate(&mut context);
    context.run_jobs();
    settled(Some(loaded), "module evaluation")?;

    if stop.is_cancelled() {
        return Err("execution stopped".to_string());
    }

    let namespace = module.namespace(&mut context);
    context
        .global_object()
        .set(JsString::from(MODULE_GLOBAL), namespace, false, &mut context)
        .map_err(|e| e.to_string())?;

    let source = call_source(request)?;
    let script = Script::parse(Source::from_bytes(source.as_bytes()), None, &mut context)
        .map_err(|e| format!("parse error: {}", e))?;
    let completion = drive_until_stopped(script.evaluate_async_with_budget(&mut context, STOP_CHECK_BUDGET), stop)
        .ok_or_else(|| "execution stopped".to_string())?
        .map_err(|e| e.to_string())?;
    context.run_jobs();
    settled(completion.as_promise(), "export call")?;

    let published = context
        .global_object()
        .get(JsString::from(RESULT_GLOBAL), &mut context)
        .map_err(|e| e.to_string())?;
    let json = published
        .as_string()
        .map(|s| s.to_std_string_escaped())
        .ok_or_else(|| "response not serializable: no result published".to_string())?;

    serde_json::from_str(&json).map_err(|e| format!("response not serializable: {}", e))
}

/// Polls `evaluation` on the current thread until it completes, or returns
/// `None` at the first yield after `stop` fires.
fn drive_until_stopped<F>(evaluation: F, stop: &CancellationToken) -> Option<JsResult<JsValue>>
where
    F: Future<Output = JsResult<JsValue>>,
{
    let mut evaluation = pin!(evaluation);
    futures::executor::block_on(poll_fn(|cx| {
        if stop.is_cancelled() {
            return Poll::Ready(None);
        }
        evaluation.as_mut().poll(cx).map(Some)
    }))
}

/// Run a request to completion on the current thread.
pub fn run_module(request: &SandboxRequest, limits: &ExecutionLimits) -> SandboxResponse {
    run_module_until(request, limits, &CancellationToken::new())
}

/// Run a request on the current thread, giving up once `stop` is cancelled.
pub fn run_module_until(request: &SandboxRequest, limits: &ExecutionLimits, stop: &CancellationToken) -> SandboxResponse {
    match evaluate(request, limits, stop) {
        Ok(output) => SandboxResponse::success(&request.id, output),
        Err(message) => {
            debug!("Sandbox request {} failed: {}", request.id, message);
            SandboxResponse::failure(&request.id, message)
        }
    }
}

/// Runs `request` on the blocking pool. Dropping the returned future stops
/// the interpreter at its next yield.
pub(crate) async fn run_on_blocking_pool(
    mode: IsolationMode,
    request: SandboxRequest,
    limits: ExecutionLimits,
    live: &LiveIsolates,
) -> Result<SandboxResponse, SandboxError> {
    let stop = CancellationToken::new();
    let _stop_on_drop = stop.clone().drop_guard();
    let isolate = live.enter();

    tokio::task::spawn_blocking(move || {
        let _isolate = isolate;
        run_module_until(&request, &limits, &stop)
    })
    .await
    .map_err(|e| SandboxError::Execution {
        mode,
        message: format!("isolate task failed: {}", e),
    })
}

/// Last entry in a fallback chain: a bare interpreter on the blocking pool,
/// bounded by its own limits and stopped when the caller stops waiting.
pub struct InterpreterMechanism {
    limits: ExecutionLimits,
    live: LiveIsolates,
}

impl InterpreterMechanism {
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
impl IsolationMechanism for InterpreterMechanism {
    fn mode(&self) -> IsolationMode {
        IsolationMode::InterpreterSandbox
    }

    fn is_available(&self) -> bool {
        tokio::runtime::Handle::try_current().is_ok()
    }

    async fn run(&self, request: SandboxRequest) -> Result<SandboxResponse, SandboxError> {
        run_on_blocking_pool(IsolationMode::InterpreterSandbox, request, self.limits, &self.live).await
    }
}
