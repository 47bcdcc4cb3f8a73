//! Host-supplied capabilities the engine consumes.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tessera_core::{ModuleManifest, Result, SourceLanguage, SourceRuntime};
use tokio_util::sync::CancellationToken;

/// A callable module export.
///
/// `input` is `{props, children, context, state}`. The engine races the call
/// against the remaining budget and the abort signal.
#[async_trait]
pub trait ComponentFn: Send + Sync {
    async fn call(&self, input: Value) -> Result<Value>;
}

/// One export of a loaded module.
#[derive(Clone)]
pub enum Export {
    Value(Value),
    Callable(Arc<dyn ComponentFn>),
}

impl Export {
    pub fn is_callable(&self) -> bool {
        matches!(self, Export::Callable(_))
    }
}

/// A loaded module.
pub trait ModuleNamespace: Send + Sync {
    fn get_export(&self, name: &str) -> Option<Export>;

    /// Module source, when the module can also run inside a sandbox.
    fn source(&self) -> Option<&str> {
        None
    }
}

/// Resolves bare specifiers the manifest does not cover.
///
/// Only consulted when manifest enforcement is off. Returning `None` defers
/// to the engine's CDN fallback.
pub trait SpecifierResolver: Send + Sync {
    fn resolve(&self, specifier: &str) -> Option<String>;
}

/// Loads modules by resolved URL.
#[async_trait]
pub trait ModuleLoader: Send + Sync {
    /// Load `url`. Anything it pulls in from the network must stay within
    /// `allowed_hosts` (`None` allows every host).
    async fn load(
        &self,
        url: &str,
        manifest: &ModuleManifest,
        allowed_hosts: Option<&[String]>,
        cancel: &CancellationToken,
    ) -> Result<Arc<dyn ModuleNamespace>>;

    /// Optional resolution hook for bare specifiers.
    fn specifier_resolver(&self) -> Option<&dyn SpecifierResolver> {
        None
    }
}

/// Compiles typed or JSX source into plain module code.
#[async_trait]
pub trait Transpiler: Send + Sync {
    async fn transpile(&self, code: &str, language: SourceLanguage) -> Result<String>;
}

/// Renders a rendering-library value into markup.
#[async_trait]
pub trait RenderBridge: Send + Sync {
    async fn render(&self, value: &Value, runtime: SourceRuntime) -> Result<String>;
}
