//! Application state.

use std::sync::Arc;

use tessera_engine::{PlanEngine, ScriptModuleLoader};
use tessera_policy::PolicyChecker;
use tessera_resolver::{HedgedFetcher, HttpFetcher, ManifestResolver, Materializer, ModuleFetcher};
use tessera_sandbox::SandboxDispatcher;
use tessera_state::{InMemoryStateStore, StateStore};
use tracing::info;

use crate::config::TesseraConfig;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    /// The plan engine.
    pub engine: Arc<PlanEngine>,

    /// Policy gate applied before every execution.
    pub policy: Arc<PolicyChecker>,
}

impl AppState {
    /// Wire every component from configuration, fetching over HTTP.
    pub fn from_config(config: &TesseraConfig) -> anyhow::Result<Self> {
        let fetcher = Arc::new(HttpFetcher::new(&config.fetch)?);
        Self::with_fetcher(config, fetcher)
    }

    /// Wire every component around the given module fetcher.
    pub fn with_fetcher(config: &TesseraConfig, fetcher: Arc<dyn ModuleFetcher>) -> anyhow::Result<Self> {
        let policy = PolicyChecker::from_config(&config.policy)?;

        let mut engine_config = config.engine.clone();
        if engine_config.allowed_network_hosts.is_none() {
            engine_config.allowed_network_hosts = policy.policy().map(|p| p.allowed_network_hosts.clone());
        }

        let materializer = Arc::new(Materializer::new(Arc::new(HedgedFetcher::new(
            fetcher,
            config.fetch.clone(),
        ))));
        let resolver = Arc::new(ManifestResolver::new(&config.fetch, engine_config.enforce_manifest));
        let sandbox = Arc::new(SandboxDispatcher::new(config.sandbox.clone()));
        let loader = ScriptModuleLoader::new(
            materializer.clone(),
            resolver.clone(),
            sandbox.clone(),
            engine_config.component_isolation_mode,
        );
        let store: Arc<dyn StateStore> = Arc::new(InMemoryStateStore::new());

        info!(
            "Policy profile {}, sandbox modes {:?}",
            config.policy.profile, config.sandbox.enabled_modes
        );

        let engine = PlanEngine::new(engine_config, store, sandbox)
            .with_resolver(resolver)
            .with_materializer(materializer)
            .with_loader(Arc::new(loader));

        Ok(Self {
            engine: Arc::new(engine),
            policy: Arc::new(policy),
        })
    }
}
