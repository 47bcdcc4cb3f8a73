//! The plan execution engine.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Map, Value};
use tessera_core::specifier::{is_direct, scan_imports};
use tessera_core::{
    Diagnostic, DiagnosticCode, DiagnosticLevel, Diagnostics, ExecutionContext, ExecutionResult,
    ModuleManifest, Node, Plan, PlanEvent, RenderArtifact, Result, SourceModule, SourceRuntime,
    TesseraError,
};
use tessera_resolver::{FetchConfig, ManifestResolver, MaterializeError, Materializer, ResolveUsage};
use tessera_sandbox::{run_module_until, SandboxDispatcher, SandboxError, SandboxRequest};
use tessera_state::{apply_transition, StateStore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::collaborators::{ModuleLoader, ModuleNamespace, RenderBridge, Transpiler};
use crate::config::{EngineConfig, PreflightMode};
use crate::frame::ExecutionFrame;
use crate::imports::{host_permitted, ManifestImports};
use crate::preflight::{preflight_specifiers, probe_dependencies};
use crate::render_lock::RenderLockRegistry;
use crate::resolve::ResolveCx;
use crate::template::TemplateScope;

/// Log a diagnostic at its own level and append it.
pub(crate) fn record(diagnostics: &mut Diagnostics, diagnostic: Diagnostic) {
    match diagnostic.level {
        DiagnosticLevel::Info => info!("[{}] {}", diagnostic.code, diagnostic.message),
        DiagnosticLevel::Warning => warn!("[{}] {}", diagnostic.code, diagnostic.message),
        DiagnosticLevel::Error => error!("[{}] {}", diagnostic.code, diagnostic.message),
    }
    diagnostics.push(diagnostic);
}

/// Race `fut` against the remaining budget and the abort signal.
///
/// Returns `Ok(None)` when the budget runs out first.
pub(crate) async fn race<F: Future>(
    fut: F,
    remaining: Duration,
    abort: &CancellationToken,
    stage: &str,
) -> Result<Option<F::Output>> {
    tokio::select! {
        biased;
        _ = abort.cancelled() => Err(TesseraError::aborted(stage)),
        output = tokio::time::timeout(remaining, fut) => Ok(output.ok()),
    }
}

/// What inline source contributed to the result.
#[derive(Default)]
struct SourceOutput {
    root: Option<Node>,
    artifact: Option<RenderArtifact>,
}

/// Runs plans against host-supplied collaborators.
pub struct PlanEngine {
    pub(crate) config: EngineConfig,
    store: Arc<dyn StateStore>,
    resolver: Arc<ManifestResolver>,
    pub(crate) sandbox: Arc<SandboxDispatcher>,
    materializer: Option<Arc<Materializer>>,
    pub(crate) loader: Option<Arc<dyn ModuleLoader>>,
    transpiler: Option<Arc<dyn Transpiler>>,
    render_bridge: Option<Arc<dyn RenderBridge>>,
    locks: RenderLockRegistry,
}

impl PlanEngine {
    pub fn new(config: EngineConfig, store: Arc<dyn StateStore>, sandbox: Arc<SandboxDispatcher>) -> Self {
        let resolver = Arc::new(ManifestResolver::new(&FetchConfig::default(), config.enforce_manifest));
        Self {
            config,
            store,
            resolver,
            sandbox,
            materializer: None,
            loader: None,
            transpiler: None,
            render_bridge: None,
            locks: RenderLockRegistry::new(),
        }
    }

    pub fn with_resolver(mut self, resolver: Arc<ManifestResolver>) -> Self {
        if resolver.enforces_manifest() != self.config.enforce_manifest {
            warn!(
                "Resolver manifest enforcement ({}) differs from engine config ({})",
                resolver.enforces_manifest(),
                self.config.enforce_manifest
            );
        }
        self.resolver = resolver;
        self
    }

    pub fn with_materializer(mut self, materializer: Arc<Materializer>) -> Self {
        self.materializer = Some(materializer);
        self
    }

    pub fn with_loader(mut self, loader: Arc<dyn ModuleLoader>) -> Self {
        self.loader = Some(loader);
        self
    }

    pub fn with_transpiler(mut self, transpiler: Arc<dyn Transpiler>) -> Self {
        self.transpiler = Some(transpiler);
        self
    }

    pub fn with_render_bridge(mut self, bridge: Arc<dyn RenderBridge>) -> Self {
        self.render_bridge = Some(bridge);
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn StateStore> {
        &self.store
    }

    pub fn locks(&self) -> &RenderLockRegistry {
        &self.locks
    }

    /// Run `execute_plan` after every earlier execution for `target` finished.
    pub async fn execute_for_target(
        &self,
        target: &str,
        plan: &Plan,
        context: &ExecutionContext,
        event: Option<&PlanEvent>,
        state_override: Option<Value>,
        abort: &CancellationToken,
    ) -> Result<ExecutionResult> {
        let _guard = tokio::select! {
            biased;
            _ = abort.cancelled() => return Err(TesseraError::aborted("render queue")),
            guard = self.locks.acquire(target) => guard,
        };
        self.execute_plan(plan, context, event, state_override, abort).await
    }

    /// Drop the serialization lock for `target`.
    pub fn release_target(&self, target: &str) -> bool {
        self.locks.release(target)
    }

    /// Execute `plan` and return the resolved tree with its diagnostics.
    ///
    /// Expected conditions (unsupported version, manifest gaps, exhausted
    /// budget, failing components) are reported as diagnostics. Only an abort
    /// or a fail-closed sandbox failure returns `Err`.
    pub async fn execute_plan(
        &self,
        plan: &Plan,
        context: &ExecutionContext,
        event: Option<&PlanEvent>,
        state_override: Option<Value>,
        abort: &CancellationToken,
    ) -> Result<ExecutionResult> {
        if abort.is_cancelled() {
            return Err(TesseraError::aborted("execution start"));
        }
        let frame = ExecutionFrame::for_plan(&plan.capabilities, &self.config, abort.clone());
        info!("Executing plan {} (version {})", plan.id, plan.version);

        let mut diagnostics = Diagnostics::new();
        let persist = state_override.is_none();
        let mut state = self.resolve_state(plan, state_override).await?;

        let spec_version = plan.effective_spec_version();
        if !self.config.supports_spec_version(spec_version) {
            record(
                &mut diagnostics,
                Diagnostic::error(
                    DiagnosticCode::SpecVersionUnsupported,
                    format!(
                        "Spec version '{}' is not supported (supported: {})",
                        spec_version,
                        self.config.supported_spec_versions.join(", ")
                    ),
                ),
            );
            return Ok(ExecutionResult::diagnostics_only(&plan.id, diagnostics, state));
        }

        let transition = apply_transition(&mut state, plan.state.as_ref(), event, context);
        diagnostics.extend(transition.diagnostics);
        let handled_event = transition.handled_event;
        let applied_actions = transition.applied;

        let halted = |diagnostics: Diagnostics, state: Value| {
            let mut result = ExecutionResult::diagnostics_only(&plan.id, diagnostics, state);
            result.handled_event = handled_event.clone();
            result.applied_actions = applied_actions.clone();
            result
        };

        if !self.verify_manifest_integrity(plan, &frame, &mut diagnostics).await? {
            if persist {
                self.store.persist(&plan.id, state.clone()).await?;
            }
            return Ok(halted(diagnostics, state));
        }

        if self.config.preflight != PreflightMode::Off && !self.preflight(plan, &frame, &mut diagnostics).await? {
            if persist {
                self.store.persist(&plan.id, state.clone()).await?;
            }
            return Ok(halted(diagnostics, state));
        }

        let mut modules: HashMap<String, Arc<dyn ModuleNamespace>> = HashMap::new();
        self.resolve_imports(plan, &frame, &mut modules, &mut diagnostics).await?;

        let event_value = event.map(PlanEvent::as_value).unwrap_or(Value::Null);
        let context_value = Value::Object(context.data.clone());
        let vars_value = Value::Object(context.vars.clone());

        let source_output = match &plan.source {
            Some(source) => {
                let input = json!({
                    "state": state,
                    "event": event_value,
                    "context": context_value,
                    "vars": vars_value,
                });
                self.run_source(plan, source, input, &frame, &mut diagnostics).await?
            }
            None => SourceOutput::default(),
        };

        let start = source_output.root.unwrap_or_else(|| plan.root.clone());
        let root = {
            let scope = TemplateScope {
                state: &state,
                event: &event_value,
                context: &context_value,
                vars: &vars_value,
            };
            let mut cx = ResolveCx {
                plan,
                frame: &frame,
                substituted: scope.embedded_templates(),
                scope,
                modules,
                diagnostics: &mut diagnostics,
                timed_out: false,
                output_depth: 0,
            };
            self.resolve_node(&start, &mut cx).await?
        };

        if persist {
            self.store.persist(&plan.id, state.clone()).await?;
        }

        info!(
            "Plan {} executed: {} diagnostics, {} component invocations in {:?}",
            plan.id,
            diagnostics.len(),
            frame.component_invocations(),
            frame.elapsed()
        );

        Ok(ExecutionResult {
            plan_id: plan.id.clone(),
            root: Some(root),
            diagnostics: diagnostics.into_vec(),
            state,
            handled_event,
            applied_actions,
            render_artifact: source_output.artifact,
        })
    }

    /// Override, else persisted snapshot, else the model's initial state, else `{}`.
    async fn resolve_state(&self, plan: &Plan, state_override: Option<Value>) -> Result<Value> {
        if let Some(state) = state_override {
            return Ok(state);
        }
        if let Some(entry) = self.store.get(&plan.id).await? {
            debug!("Using persisted state v{} for plan {}", entry.version, plan.id);
            return Ok(entry.snapshot);
        }
        Ok(plan
            .state
            .as_ref()
            .map(|model| model.initial.clone())
            .filter(|initial| !initial.is_null())
            .unwrap_or_else(|| Value::Object(Map::new())))
    }

    /// Resolve a specifier through the manifest, the loader's resolution
    /// hook (only when enforcement is off) and the CDN fallback.
    pub fn resolve_specifier(
        &self,
        specifier: &str,
        manifest: &ModuleManifest,
        usage: ResolveUsage,
        diagnostics: &mut Diagnostics,
    ) -> Option<String> {
        let specifier = specifier.trim();
        if !self.config.enforce_manifest && !is_direct(specifier) && !manifest.contains_key(specifier) {
            let hooked = self
                .loader
                .as_ref()
                .and_then(|loader| loader.specifier_resolver())
                .and_then(|resolver| resolver.resolve(specifier));
            if let Some(url) = hooked {
                debug!("Loader resolved '{}' to {}", specifier, url);
                return Some(url);
            }
        }
        self.resolver.resolve_specifier(specifier, manifest, usage, diagnostics)
    }

    /// Resolver for imports found inside fetched code.
    fn nested_imports(&self, manifest: &ModuleManifest) -> ManifestImports {
        ManifestImports::new(
            self.resolver.clone(),
            manifest.clone(),
            self.config.allowed_network_hosts.clone(),
        )
    }

    pub(crate) fn host_allowed(&self, url: &str) -> bool {
        host_permitted(self.config.allowed_network_hosts.as_deref(), url)
    }

    /// Fetch and verify every remote manifest entry that declares integrity.
    /// Returns false when any entry failed.
    async fn verify_manifest_integrity(
        &self,
        plan: &Plan,
        frame: &ExecutionFrame,
        diagnostics: &mut Diagnostics,
    ) -> Result<bool> {
        let mut verified = true;
        for (specifier, entry) in &plan.module_manifest {
            let Some(integrity) = entry.integrity.as_deref().filter(|i| !i.trim().is_empty()) else {
                continue;
            };
            if !entry.is_remote() {
                continue;
            }
            let url = entry.resolved_url.trim();

            if !self.host_allowed(url) {
                record(
                    diagnostics,
                    Diagnostic::error(
                        DiagnosticCode::NetworkPolicyBlocked,
                        format!("Manifest entry '{}' points at a blocked host: {}", specifier, url),
                    ),
                );
                verified = false;
                continue;
            }

            let Some(materializer) = &self.materializer else {
                record(
                    diagnostics,
                    Diagnostic::error(
                        DiagnosticCode::IntegrityCheckFailed,
                        format!("Cannot verify integrity of '{}': no module fetcher is configured", specifier),
                    ),
                );
                verified = false;
                continue;
            };

            let imports = self.nested_imports(&plan.module_manifest);
            match materializer.load(url, Some(integrity), &imports, frame.abort_token()).await {
                Ok(_) => debug!("Integrity verified for '{}' ({})", specifier, url),
                Err(err) if err.is_cancelled() => return Err(TesseraError::aborted("integrity verification")),
                Err(MaterializeError::Blocked { url: blocked }) => {
                    record(
                        diagnostics,
                        Diagnostic::error(
                            DiagnosticCode::NetworkPolicyBlocked,
                            format!("Manifest entry '{}' imports from a blocked host: {}", specifier, blocked),
                        ),
                    );
                    verified = false;
                }
                Err(MaterializeError::Integrity { url, source }) => {
                    record(
                        diagnostics,
                        Diagnostic::error(
                            source.code(),
                            format!("Integrity check failed for '{}' ({}): {}", specifier, url, source),
                        ),
                    );
                    verified = false;
                }
                Err(MaterializeError::Fetch(err)) => {
                    record(
                        diagnostics,
                        Diagnostic::error(
                            DiagnosticCode::IntegrityCheckFailed,
                            format!("Could not fetch '{}' to verify integrity: {}", specifier, err),
                        ),
                    );
                    verified = false;
                }
            }
        }
        Ok(verified)
    }

    /// Returns false when execution must stop.
    async fn preflight(&self, plan: &Plan, frame: &ExecutionFrame, diagnostics: &mut Diagnostics) -> Result<bool> {
        let specifiers = preflight_specifiers(plan);
        let mut scratch = Diagnostics::new();
        let resolve = |specifier: &str| {
            self.resolve_specifier(specifier, &plan.module_manifest, ResolveUsage::Preflight, &mut scratch)
        };
        let fetcher = self.materializer.as_ref().map(|m| m.fetcher());
        let failures = probe_dependencies(
            &specifiers,
            resolve,
            self.config.allowed_network_hosts.as_deref(),
            fetcher,
            frame.abort_token(),
        )
        .await?;

        let fail_closed = self.config.preflight == PreflightMode::FailClosed;
        for failure in &failures {
            let message = format!("Preflight failed for '{}': {}", failure.specifier, failure.reason);
            let diagnostic = if fail_closed {
                Diagnostic::error(DiagnosticCode::PreflightFailed, message)
            } else {
                Diagnostic::warning(DiagnosticCode::PreflightFailed, message)
            };
            record(diagnostics, diagnostic);
        }
        Ok(failures.is_empty() || !fail_closed)
    }

    /// Resolve declared imports and load them when a loader is configured.
    async fn resolve_imports(
        &self,
        plan: &Plan,
        frame: &ExecutionFrame,
        modules: &mut HashMap<String, Arc<dyn ModuleNamespace>>,
        diagnostics: &mut Diagnostics,
    ) -> Result<()> {
        let limit = frame.max_imports as usize;
        if plan.imports.len() > limit {
            record(
                diagnostics,
                Diagnostic::warning(
                    DiagnosticCode::ImportLimitExceeded,
                    format!(
                        "Plan declares {} imports; only the first {} are resolved",
                        plan.imports.len(),
                        limit
                    ),
                ),
            );
        }

        for specifier in plan.imports.iter().take(limit) {
            frame.check_abort("import resolution")?;
            let Some(url) = self.resolve_specifier(specifier, &plan.module_manifest, ResolveUsage::Import, diagnostics)
            else {
                continue;
            };
            if !self.host_allowed(&url) {
                record(
                    diagnostics,
                    Diagnostic::warning(
                        DiagnosticCode::NetworkPolicyBlocked,
                        format!("Import '{}' points at a blocked host: {}", specifier, url),
                    ),
                );
                continue;
            }
            let Some(loader) = &self.loader else {
                debug!("Import '{}' resolved to {} (no loader configured)", specifier, url);
                continue;
            };
            if modules.contains_key(&url) {
                continue;
            }
            if frame.is_expired() {
                record(
                    diagnostics,
                    Diagnostic::warning(DiagnosticCode::Timeout, "Execution budget exhausted while loading imports"),
                );
                break;
            }

            let load = loader.load(
                &url,
                &plan.module_manifest,
                self.config.allowed_network_hosts.as_deref(),
                frame.abort_token(),
            );
            match race(load, frame.remaining(), frame.abort_token(), "import resolution").await? {
                Some(Ok(namespace)) => {
                    debug!("Loaded import '{}' from {}", specifier, url);
                    modules.insert(url, namespace);
                }
                Some(Err(err)) if err.is_abort() => return Err(err),
                Some(Err(TesseraError::PolicyBlocked(blocked))) => record(
                    diagnostics,
                    Diagnostic::warning(
                        DiagnosticCode::NetworkPolicyBlocked,
                        format!("Import '{}' pulls in a blocked host: {}", specifier, blocked),
                    ),
                ),
                Some(Err(err)) => record(
                    diagnostics,
                    Diagnostic::warning(
                        DiagnosticCode::ImportFailed,
                        format!("Failed to load import '{}': {}", specifier, err),
                    ),
                ),
                None => {
                    record(
                        diagnostics,
                        Diagnostic::warning(
                            DiagnosticCode::Timeout,
                            format!("Loading import '{}' exceeded the execution budget", specifier),
                        ),
                    );
                    break;
                }
            }
        }
        Ok(())
    }

    /// Transpile, inline imports, execute and interpret the plan's inline source.
    async fn run_source(
        &self,
        plan: &Plan,
        source: &SourceModule,
        input: Value,
        frame: &ExecutionFrame,
        diagnostics: &mut Diagnostics,
    ) -> Result<SourceOutput> {
        frame.check_abort("inline source")?;
        let abort = frame.abort_token();

        let code = if source.language.needs_transpile() {
            let Some(transpiler) = &self.transpiler else {
                record(
                    diagnostics,
                    Diagnostic::error(
                        DiagnosticCode::TranspileFailed,
                        format!("Inline {:?} source needs a transpiler but none is configured", source.language),
                    ),
                );
                return Ok(SourceOutput::default());
            };
            let transpile = transpiler.transpile(&source.code, source.language);
            match race(transpile, frame.remaining(), abort, "transpile").await? {
                Some(Ok(code)) => code,
                Some(Err(err)) if err.is_abort() => return Err(err),
                Some(Err(err)) => {
                    record(
                        diagnostics,
                        Diagnostic::error(DiagnosticCode::TranspileFailed, format!("Transpile failed: {}", err)),
                    );
                    return Ok(SourceOutput::default());
                }
                None => {
                    record(
                        diagnostics,
                        Diagnostic::warning(DiagnosticCode::Timeout, "Transpile exceeded the execution budget"),
                    );
                    return Ok(SourceOutput::default());
                }
            }
        } else {
            source.code.clone()
        };

        for import in scan_imports(&code) {
            self.resolve_specifier(&import.specifier, &plan.module_manifest, ResolveUsage::SourceImport, diagnostics);
        }
        let code = match &self.materializer {
            Some(materializer) => {
                let imports = self.nested_imports(&plan.module_manifest);
                match materializer.rewrite_source(&code, &imports, abort).await {
                    Ok(rewritten) => rewritten,
                    Err(err) if err.is_cancelled() => return Err(TesseraError::aborted("inline source imports")),
                    Err(MaterializeError::Blocked { url }) => {
                        record(
                            diagnostics,
                            Diagnostic::error(
                                DiagnosticCode::NetworkPolicyBlocked,
                                format!("Inline source imports from a blocked host: {}", url),
                            ),
                        );
                        return Ok(SourceOutput::default());
                    }
                    Err(err) => {
                        record(
                            diagnostics,
                            Diagnostic::warning(
                                DiagnosticCode::ImportFailed,
                                format!("Failed to inline imports of inline source: {}", err),
                            ),
                        );
                        code
                    }
                }
            }
            None => code,
        };

        let request = SandboxRequest::new(format!("{}:source", plan.id), code, source.export_name(), input);
        let output = match self.config.source_isolation {
            Some(mode) => match self
                .sandbox
                .execute(mode, request.clone(), Some(frame.remaining()), abort)
                .await
            {
                Ok(outcome) => {
                    if outcome.fell_back() {
                        record(
                            diagnostics,
                            Diagnostic::warning(
                                DiagnosticCode::SandboxFallback,
                                format!("Inline source ran in {} instead of {}", outcome.mode_used, outcome.requested),
                            ),
                        );
                    }
                    Some(outcome.output)
                }
                Err(err) if err.is_cancellation() => return Err(TesseraError::aborted("inline source")),
                Err(err) if self.config.sandbox_fail_closed => {
                    error!("Sandbox failed for plan {}: {}", plan.id, err);
                    return Err(err.into());
                }
                Err(err) => {
                    let code = match err {
                        SandboxError::Unavailable { .. } => DiagnosticCode::SandboxUnavailable,
                        _ => DiagnosticCode::SandboxFailed,
                    };
                    record(
                        diagnostics,
                        Diagnostic::warning(code, format!("{}; running inline source in-process", err)),
                    );
                    self.run_in_process(request, frame, diagnostics).await?
                }
            },
            None => self.run_in_process(request, frame, diagnostics).await?,
        };

        let Some(output) = output else {
            return Ok(SourceOutput::default());
        };

        match source.runtime {
            SourceRuntime::React => {
                let artifact = self.render_artifact(&output, source.runtime, frame, diagnostics).await?;
                Ok(SourceOutput { root: None, artifact })
            }
            SourceRuntime::Host => {
                let root = match Node::from_value(&output) {
                    Some(node) => Some(node),
                    None => match output {
                        Value::String(text) => Some(Node::text(text)),
                        _ => {
                            record(
                                diagnostics,
                                Diagnostic::warning(
                                    DiagnosticCode::ComponentOutputInvalid,
                                    "Inline source output is not a node; rendering the plan root",
                                ),
                            );
                            None
                        }
                    },
                };
                Ok(SourceOutput { root, artifact: None })
            }
        }
    }

    /// Run inline source on the blocking pool without an isolate.
    async fn run_in_process(
        &self,
        request: SandboxRequest,
        frame: &ExecutionFrame,
        diagnostics: &mut Diagnostics,
    ) -> Result<Option<Value>> {
        if let Err(err) = request.validate() {
            record(
                diagnostics,
                Diagnostic::error(DiagnosticCode::SandboxFailed, err.to_string()),
            );
            return Ok(None);
        }
        let limits = self.sandbox.config().limits();
        let stop = CancellationToken::new();
        let _stop_on_return = stop.clone().drop_guard();
        let task = tokio::task::spawn_blocking(move || run_module_until(&request, &limits, &stop));
        match race(task, frame.remaining(), frame.abort_token(), "inline source").await? {
            Some(Ok(response)) if response.ok => Ok(Some(response.output.unwrap_or(Value::Null))),
            Some(Ok(response)) => {
                record(
                    diagnostics,
                    Diagnostic::error(
                        DiagnosticCode::SandboxFailed,
                        format!(
                            "Inline source failed: {}",
                            response.error.unwrap_or_else(|| "unknown error".to_string())
                        ),
                    ),
                );
                Ok(None)
            }
            Some(Err(err)) => {
                record(
                    diagnostics,
                    Diagnostic::error(DiagnosticCode::SandboxFailed, format!("Inline source task failed: {}", err)),
                );
                Ok(None)
            }
            None => {
                record(
                    diagnostics,
                    Diagnostic::warning(DiagnosticCode::Timeout, "Inline source exceeded the execution budget"),
                );
                Ok(None)
            }
        }
    }

    async fn render_artifact(
        &self,
        output: &Value,
        runtime: SourceRuntime,
        frame: &ExecutionFrame,
        diagnostics: &mut Diagnostics,
    ) -> Result<Option<RenderArtifact>> {
        let Some(bridge) = &self.render_bridge else {
            record(
                diagnostics,
                Diagnostic::warning(
                    DiagnosticCode::RenderFailed,
                    format!("Inline source targets {:?} but no render bridge is configured", runtime),
                ),
            );
            return Ok(None);
        };
        match race(bridge.render(output, runtime), frame.remaining(), frame.abort_token(), "render").await? {
            Some(Ok(markup)) => Ok(Some(RenderArtifact { runtime, markup })),
            Some(Err(err)) if err.is_abort() => Err(err),
            Some(Err(err)) => {
                record(
                    diagnostics,
                    Diagnostic::warning(DiagnosticCode::RenderFailed, format!("Render bridge failed: {}", err)),
                );
                Ok(None)
            }
            None => {
                record(
                    diagnostics,
                    Diagnostic::warning(DiagnosticCode::Timeout, "Rendering exceeded the execution budget"),
                );
                Ok(None)
            }
        }
    }
}
