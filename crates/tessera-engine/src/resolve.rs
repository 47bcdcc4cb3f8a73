//! Recursive node resolution.
//!
//! Depth-first and left to right. Every node first checks the abort signal
//! and the frame budget. Once the budget is gone the current node becomes a
//! single timeout placeholder and no further siblings are resolved.

use std::collections::HashMap;
use std::sync::Arc;

use futures::future::BoxFuture;
use serde_json::{json, Value};
use tessera_core::{
    Diagnostic, DiagnosticCode, Diagnostics, ExecutionProfile, Node, Plan, Props, Result, TesseraError,
};
use tessera_resolver::ResolveUsage;
use tessera_sandbox::{SandboxError, SandboxRequest};
use tracing::debug;

use crate::collaborators::{ComponentFn, Export, ModuleNamespace};
use crate::engine::{race, record, PlanEngine};
use crate::frame::ExecutionFrame;
use crate::template::{interpolate, interpolate_output, interpolate_output_value, interpolate_value, TemplateScope};

/// State threaded through one resolution pass.
pub(crate) struct ResolveCx<'a> {
    pub plan: &'a Plan,
    pub frame: &'a ExecutionFrame,
    pub scope: TemplateScope<'a>,
    /// Loaded modules by resolved URL, shared with import resolution.
    pub modules: HashMap<String, Arc<dyn ModuleNamespace>>,
    pub diagnostics: &'a mut Diagnostics,
    /// Set once the budget ran out; parents stop resolving children.
    pub timed_out: bool,
    /// Template-like scope strings; see [`TemplateScope::embedded_templates`].
    pub substituted: Vec<String>,
    /// Nesting depth inside component output.
    pub output_depth: usize,
}

impl ResolveCx<'_> {
    fn placeholder(&mut self, diagnostic: Diagnostic) -> Node {
        let node = Node::placeholder(diagnostic.code.as_str(), diagnostic.message.clone());
        record(self.diagnostics, diagnostic);
        node
    }

    fn interpolate(&self, text: &str) -> String {
        if self.output_depth == 0 {
            interpolate(text, &self.scope)
        } else {
            interpolate_output(text, &self.scope, &self.substituted)
        }
    }

    fn interpolate_props(&self, props: &Props) -> Props {
        props
            .iter()
            .map(|(key, value)| {
                let value = if self.output_depth == 0 {
                    interpolate_value(value, &self.scope)
                } else {
                    interpolate_output_value(value, &self.scope, &self.substituted)
                };
                (key.clone(), value)
            })
            .collect()
    }
}

impl PlanEngine {
    pub(crate) fn resolve_node<'a, 'b: 'a>(
        &'a self,
        node: &'a Node,
        cx: &'a mut ResolveCx<'b>,
    ) -> BoxFuture<'a, Result<Node>> {
        Box::pin(async move {
            cx.frame.check_abort("node resolution")?;
            if cx.frame.is_expired() {
                cx.timed_out = true;
                let budget = cx.frame.max_execution_ms;
                return Ok(cx.placeholder(Diagnostic::warning(
                    DiagnosticCode::Timeout,
                    format!("Execution budget of {}ms exhausted; rendering stopped", budget),
                )));
            }

            match node {
                Node::Text { value } => Ok(Node::text(cx.interpolate(value))),
                Node::Element { tag, props, children } => {
                    let props = cx.interpolate_props(props);
                    let children = self.resolve_children(children, cx).await?;
                    Ok(Node::Element {
                        tag: tag.clone(),
                        props,
                        children,
                    })
                }
                Node::Component {
                    module,
                    export_name,
                    props,
                    children,
                } => {
                    self.resolve_component(module, export_name.as_deref(), props, children, cx)
                        .await
                }
            }
        })
    }

    async fn resolve_children(&self, children: &[Node], cx: &mut ResolveCx<'_>) -> Result<Vec<Node>> {
        let mut resolved = Vec::with_capacity(children.len());
        for child in children {
            resolved.push(self.resolve_node(child, cx).await?);
            if cx.timed_out {
                break;
            }
        }
        Ok(resolved)
    }

    async fn resolve_component(
        &self,
        module: &str,
        export_name: Option<&str>,
        props: &Props,
        children: &[Node],
        cx: &mut ResolveCx<'_>,
    ) -> Result<Node> {
        if !cx.frame.try_invoke() {
            let limit = cx.frame.max_component_invocations;
            return Ok(cx.placeholder(Diagnostic::warning(
                DiagnosticCode::ComponentLimitExceeded,
                format!("Component limit of {} reached; '{}' was not rendered", limit, module),
            )));
        }

        let before = cx.diagnostics.len();
        let Some(url) = self.resolve_specifier(module, &cx.plan.module_manifest, ResolveUsage::Component, cx.diagnostics)
        else {
            let code = cx
                .diagnostics
                .iter()
                .skip(before)
                .last()
                .map(|d| d.code)
                .unwrap_or(DiagnosticCode::ManifestMissing);
            return Ok(Node::placeholder(code.as_str(), format!("Module '{}' could not be resolved", module)));
        };

        if !self.host_allowed(&url) {
            return Ok(cx.placeholder(Diagnostic::warning(
                DiagnosticCode::NetworkPolicyBlocked,
                format!("Component '{}' points at a blocked host: {}", module, url),
            )));
        }

        let Some(namespace) = self.load_module(module, &url, cx).await? else {
            return Ok(Node::placeholder(
                DiagnosticCode::ModuleLoadFailed.as_str(),
                format!("Module '{}' could not be loaded", module),
            ));
        };

        let export_name = export_name.unwrap_or("default");
        let callable = match namespace.get_export(export_name) {
            Some(Export::Callable(callable)) => callable,
            Some(Export::Value(_)) => {
                return Ok(cx.placeholder(Diagnostic::warning(
                    DiagnosticCode::ComponentNotCallable,
                    format!("Export '{}' of '{}' is not callable", export_name, module),
                )));
            }
            None => {
                return Ok(cx.placeholder(Diagnostic::warning(
                    DiagnosticCode::ComponentNotCallable,
                    format!("Module '{}' has no export '{}'", module, export_name),
                )));
            }
        };

        let props = cx.interpolate_props(props);
        let children = self.resolve_children(children, cx).await?;
        let input = json!({
            "props": props,
            "children": serde_json::to_value(&children)?,
            "context": cx.scope.context,
            "state": cx.scope.state,
        });

        let output = match self.invoke(module, export_name, &namespace, callable, input, cx).await? {
            Ok(output) => output,
            Err(placeholder) => return Ok(placeholder),
        };

        match output {
            Value::String(text) => Ok(Node::text(interpolate_output(&text, &cx.scope, &cx.substituted))),
            value => match Node::from_value(&value) {
                Some(node) => {
                    cx.output_depth += 1;
                    let resolved = self.resolve_node(&node, cx).await;
                    cx.output_depth -= 1;
                    resolved
                }
                None => Ok(cx.placeholder(Diagnostic::warning(
                    DiagnosticCode::ComponentOutputInvalid,
                    format!("Component '{}' returned neither text nor a node", module),
                ))),
            },
        }
    }

    async fn load_module(
        &self,
        module: &str,
        url: &str,
        cx: &mut ResolveCx<'_>,
    ) -> Result<Option<Arc<dyn ModuleNamespace>>> {
        if let Some(namespace) = cx.modules.get(url) {
            return Ok(Some(namespace.clone()));
        }
        let Some(loader) = &self.loader else {
            record(
                cx.diagnostics,
                Diagnostic::warning(
                    DiagnosticCode::ModuleLoadFailed,
                    format!("No module loader configured for '{}'", module),
                ),
            );
            return Ok(None);
        };

        let load = loader.load(
            url,
            &cx.plan.module_manifest,
            self.config.allowed_network_hosts.as_deref(),
            cx.frame.abort_token(),
        );
        match race(load, cx.frame.remaining(), cx.frame.abort_token(), "module load").await? {
            Some(Ok(namespace)) => {
                debug!("Loaded component module '{}' from {}", module, url);
                cx.modules.insert(url.to_string(), namespace.clone());
                Ok(Some(namespace))
            }
            Some(Err(err)) if err.is_abort() => Err(err),
            Some(Err(TesseraError::PolicyBlocked(blocked))) => {
                record(
                    cx.diagnostics,
                    Diagnostic::warning(
                        DiagnosticCode::NetworkPolicyBlocked,
                        format!("Module '{}' imports from a blocked host: {}", module, blocked),
                    ),
                );
                Ok(None)
            }
            Some(Err(err)) => {
                record(
                    cx.diagnostics,
                    Diagnostic::warning(
                        DiagnosticCode::ModuleLoadFailed,
                        format!("Failed to load '{}': {}", module, err),
                    ),
                );
                Ok(None)
            }
            None => {
                record(
                    cx.diagnostics,
                    Diagnostic::warning(
                        DiagnosticCode::Timeout,
                        format!("Loading '{}' exceeded the remaining budget", module),
                    ),
                );
                Ok(None)
            }
        }
    }

    /// Call a component export. The inner `Err` is a placeholder to render
    /// in its place.
    async fn invoke(
        &self,
        module: &str,
        export_name: &str,
        namespace: &Arc<dyn ModuleNamespace>,
        callable: Arc<dyn ComponentFn>,
        input: Value,
        cx: &mut ResolveCx<'_>,
    ) -> Result<std::result::Result<Value, Node>> {
        let frame = cx.frame;

        if frame.execution_profile == ExecutionProfile::Isolated {
            let mode = self.config.component_isolation_mode;
            let unavailable = match namespace.source() {
                Some(code) => {
                    let request = SandboxRequest::new(
                        format!("{}:{}#{}", cx.plan.id, module, frame.component_invocations()),
                        code,
                        export_name,
                        input.clone(),
                    );
                    match self
                        .sandbox
                        .execute(mode, request, Some(frame.remaining()), frame.abort_token())
                        .await
                    {
                        Ok(outcome) => {
                            if outcome.fell_back() {
                                record(
                                    cx.diagnostics,
                                    Diagnostic::warning(
                                        DiagnosticCode::SandboxFallback,
                                        format!(
                                            "Component '{}' ran in {} instead of {}",
                                            module, outcome.mode_used, outcome.requested
                                        ),
                                    ),
                                );
                            }
                            return Ok(Ok(outcome.output));
                        }
                        Err(err) if err.is_cancellation() => {
                            return Err(TesseraError::aborted("component invocation"));
                        }
                        Err(SandboxError::Unavailable { .. }) => "no isolation mechanism is available".to_string(),
                        Err(SandboxError::Timeout { .. }) => {
                            return Ok(Err(cx.placeholder(Diagnostic::warning(
                                DiagnosticCode::Timeout,
                                format!("Component '{}' exceeded the remaining budget", module),
                            ))));
                        }
                        Err(err) => {
                            return Ok(Err(cx.placeholder(Diagnostic::warning(
                                DiagnosticCode::ComponentFailed,
                                format!("Component '{}' failed in the sandbox: {}", module, err),
                            ))));
                        }
                    }
                }
                None => format!("module '{}' has no source to isolate", module),
            };

            if !self.config.allow_isolation_fallback {
                return Ok(Err(cx.placeholder(Diagnostic::error(
                    DiagnosticCode::SandboxUnavailable,
                    format!("Cannot isolate component '{}': {}", module, unavailable),
                ))));
            }
            record(
                cx.diagnostics,
                Diagnostic::warning(
                    DiagnosticCode::SandboxFallback,
                    format!("Cannot isolate component '{}' ({}); calling it directly", module, unavailable),
                ),
            );
        }

        match race(callable.call(input), frame.remaining(), frame.abort_token(), "component invocation").await? {
            Some(Ok(output)) => Ok(Ok(output)),
            Some(Err(err)) if err.is_abort() => Err(err),
            Some(Err(err)) => Ok(Err(cx.placeholder(Diagnostic::warning(
                DiagnosticCode::ComponentFailed,
                format!("Component '{}' failed: {}", module, err),
            )))),
            None => Ok(Err(cx.placeholder(Diagnostic::warning(
                DiagnosticCode::Timeout,
                format!("Component '{}' exceeded the remaining budget", module),
            )))),
        }
    }
}
