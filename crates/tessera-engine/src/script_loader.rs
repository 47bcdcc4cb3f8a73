//! Default module loader: fetch through the resolver, run in the sandbox.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tessera_core::{ModuleManifest, Result};
use tessera_resolver::{ManifestResolver, Materializer};
use tessera_sandbox::{IsolationMode, SandboxDispatcher, SandboxRequest};
use tokio_util::sync::CancellationToken;
use tracing::debug;
use uuid::Uuid;

use crate::collaborators::{ComponentFn, Export, ModuleLoader, ModuleNamespace};
use crate::imports::ManifestImports;

/// Loads component modules through the [`Materializer`] and exposes every
/// export as a callable that runs in the sandbox.
pub struct ScriptModuleLoader {
    materializer: Arc<Materializer>,
    resolver: Arc<ManifestResolver>,
    sandbox: Arc<SandboxDispatcher>,
    mode: IsolationMode,
}

impl ScriptModuleLoader {
    pub fn new(
        materializer: Arc<Materializer>,
        resolver: Arc<ManifestResolver>,
        sandbox: Arc<SandboxDispatcher>,
        mode: IsolationMode,
    ) -> Self {
        Self {
            materializer,
            resolver,
            sandbox,
            mode,
        }
    }
}

#[async_trait]
impl ModuleLoader for ScriptModuleLoader {
    async fn load(
        &self,
        url: &str,
        manifest: &ModuleManifest,
        allowed_hosts: Option<&[String]>,
        cancel: &CancellationToken,
    ) -> Result<Arc<dyn ModuleNamespace>> {
        let integrity = manifest
            .values()
            .find(|entry| entry.resolved_url.trim() == url)
            .and_then(|entry| entry.integrity.clone());

        let imports = ManifestImports::new(
            self.resolver.clone(),
            manifest.clone(),
            allowed_hosts.map(<[String]>::to_vec),
        );

        let module = self
            .materializer
            .load(url, integrity.as_deref(), &imports, cancel)
            .await?;
        debug!("Loaded script module {} ({:?})", url, module.kind);

        Ok(Arc::new(ScriptNamespace {
            code: Arc::from(module.code.as_str()),
            sandbox: self.sandbox.clone(),
            mode: self.mode,
        }))
    }
}

struct ScriptNamespace {
    code: Arc<str>,
    sandbox: Arc<SandboxDispatcher>,
    mode: IsolationMode,
}

impl ModuleNamespace for ScriptNamespace {
    /// Export names are only known once the module runs, so every name is
    /// offered; a missing export fails when called.
    fn get_export(&self, name: &str) -> Option<Export> {
        Some(Export::Callable(Arc::new(ScriptExport {
            code: self.code.clone(),
            export_name: name.to_string(),
            sandbox: self.sandbox.clone(),
            mode: self.mode,
        })))
    }

    fn source(&self) -> Option<&str> {
        Some(&self.code)
    }
}

struct ScriptExport {
    code: Arc<str>,
    export_name: String,
    sandbox: Arc<SandboxDispatcher>,
    mode: IsolationMode,
}

#[async_trait]
impl ComponentFn for ScriptExport {
    async fn call(&self, input: Value) -> Result<Value> {
        let request = SandboxRequest::new(
            Uuid::new_v4().to_string(),
            self.code.as_ref(),
            self.export_name.clone(),
            input,
        );
        // The engine drops this future on timeout or abort, which tears the run down.
        let outcome = self
            .sandbox
            .execute(self.mode, request, None, &CancellationToken::new())
            .await?;
        Ok(outcome.output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tessera_core::ManifestEntry;
    use tessera_resolver::{FetchConfig, HedgedFetcher, StaticFetcher};
    use tessera_sandbox::SandboxConfig;

    const BADGE: &str = "https://cdn.test/badge.js";

    fn loader(fetcher: StaticFetcher) -> ScriptModuleLoader {
        let config = FetchConfig {
            max_retries: 0,
            ..FetchConfig::default()
        };
        let materializer = Arc::new(Materializer::new(Arc::new(HedgedFetcher::new(
            Arc::new(fetcher),
            config.clone(),
        ))));
        let resolver = Arc::new(ManifestResolver::new(&config, true));
        let sandbox = Arc::new(SandboxDispatcher::new(SandboxConfig {
            enabled_modes: vec![IsolationMode::ThreadIsolate],
            allow_interpreter_fallback: false,
            ..SandboxConfig::default()
        }));
        ScriptModuleLoader::new(materializer, resolver, sandbox, IsolationMode::ThreadIsolate)
    }

    #[tokio::test]
    async fn test_exports_run_in_sandbox() {
        let fetcher = StaticFetcher::new().with_module(
            BADGE,
            "text/javascript",
            "export default (input) => 'badge:' + input.props.label;\nexport const Loud = (input) => input.props.label.toUpperCase();",
        );
        let loader = loader(fetcher);
        let mut manifest = ModuleManifest::new();
        manifest.insert("ui/badge".to_string(), ManifestEntry::new(BADGE));

        let namespace = loader.load(BADGE, &manifest, None, &CancellationToken::new()).await.unwrap();
        assert!(namespace.source().unwrap().contains("badge:"));

        let input = json!({"props": {"label": "new"}});
        let Some(Export::Callable(default)) = namespace.get_export("default") else {
            panic!("default export is not callable");
        };
        assert_eq!(default.call(input.clone()).await.unwrap(), json!("badge:new"));

        let Some(Export::Callable(loud)) = namespace.get_export("Loud") else {
            panic!("named export is not callable");
        };
        assert_eq!(loud.call(input.clone()).await.unwrap(), json!("NEW"));

        let Some(Export::Callable(missing)) = namespace.get_export("Missing") else {
            panic!("every export name is offered");
        };
        assert!(missing.call(input).await.is_err());
    }

    #[tokio::test]
    async fn test_load_failure_is_an_error() {
        let loader = loader(StaticFetcher::new());
        let result = loader
            .load("https://cdn.test/absent.js", &ModuleManifest::new(), None, &CancellationToken::new())
            .await;
        assert!(result.is_err());
    }
}
