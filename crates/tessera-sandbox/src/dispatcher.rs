//! Mechanism selection, fallback and supervision.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::{SandboxConfig, SandboxHost};
use crate::envelope::SandboxRequest;
use crate::error::SandboxError;
use crate::interpreter::InterpreterMechanism;
use crate::mechanism::IsolationMechanism;
use crate::mode::IsolationMode;
use crate::process::ProcessMechanism;
use crate::realm::RealmMechanism;
use crate::thread::ThreadMechanism;

/// Result of a successful sandbox run.
#[derive(Debug, Clone, PartialEq)]
pub struct SandboxOutcome {
    pub requested: IsolationMode,
    pub mode_used: IsolationMode,
    pub output: Value,
}

impl SandboxOutcome {
    pub fn fell_back(&self) -> bool {
        self.requested != self.mode_used
    }
}

pub struct SandboxDispatcher {
    config: SandboxConfig,
    mechanisms: HashMap<IsolationMode, Arc<dyn IsolationMechanism>>,
}

impl SandboxDispatcher {
    /// Dispatcher with the built-in mechanisms for `config.enabled_modes`.
    pub fn new(config: SandboxConfig) -> Self {
        let limits = config.limits();
        let mut dispatcher = Self::empty(config);
        for mode in dispatcher.config.enabled_modes.clone() {
            let mechanism: Arc<dyn IsolationMechanism> = match mode {
                IsolationMode::ThreadIsolate => Arc::new(ThreadMechanism::new(limits)),
                IsolationMode::DocumentIsolate => {
                    Arc::new(ProcessMechanism::new(dispatcher.config.worker_path.as_deref(), limits))
                }
                IsolationMode::RealmIsolate => Arc::new(RealmMechanism::new(limits)),
                IsolationMode::InterpreterSandbox => Arc::new(InterpreterMechanism::new(limits)),
            };
            dispatcher.register(mechanism);
        }
        dispatcher
    }

    /// Dispatcher with no mechanisms registered.
    pub fn empty(config: SandboxConfig) -> Self {
        Self {
            config,
            mechanisms: HashMap::new(),
        }
    }

    /// Register a mechanism, replacing any previous one for its mode.
    pub fn register(&mut self, mechanism: Arc<dyn IsolationMechanism>) {
        self.mechanisms.insert(mechanism.mode(), mechanism);
    }

    pub fn with_mechanism(mut self, mechanism: Arc<dyn IsolationMechanism>) -> Self {
        self.register(mechanism);
        self
    }

    pub fn config(&self) -> &SandboxConfig {
        &self.config
    }

    /// Modes tried for `requested`, in order.
    pub fn chain_for(&self, requested: IsolationMode) -> Vec<IsolationMode> {
        let mut chain = requested.fallback_chain().to_vec();
        if self.config.allow_interpreter_fallback
            && self.config.host == SandboxHost::Server
            && !chain.contains(&IsolationMode::InterpreterSandbox)
        {
            chain.push(IsolationMode::InterpreterSandbox);
        }
        chain
    }

    /// First available mechanism in the chain for `requested`.
    pub fn select(&self, requested: IsolationMode) -> Result<Arc<dyn IsolationMechanism>, SandboxError> {
        let chain = self.chain_for(requested);
        chain
            .iter()
            .filter_map(|mode| self.mechanisms.get(mode))
            .find(|mechanism| mechanism.is_available())
            .cloned()
            .ok_or(SandboxError::Unavailable { requested, tried: chain })
    }

    /// Validate `request`, run it on the selected mechanism and return its
    /// output. The run is abandoned when `timeout` elapses or `cancel` fires.
    pub async fn execute(
        &self,
        requested: IsolationMode,
        request: SandboxRequest,
        timeout: Option<Duration>,
        cancel: &CancellationToken,
    ) -> Result<SandboxOutcome, SandboxError> {
        request.validate()?;
        if cancel.is_cancelled() {
            return Err(SandboxError::Cancelled { mode: requested });
        }

        let mechanism = self.select(requested)?;
        let mode_used = mechanism.mode();
        if mode_used != requested {
            info!("Sandbox {} unavailable; running request {} in {}", requested, request.id, mode_used);
        }

        let timeout = timeout.unwrap_or_else(|| self.config.default_timeout());
        let id = request.id.clone();
        debug!("Dispatching sandbox request {} to {} ({:?})", id, mode_used, timeout);

        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!("Sandbox request {} cancelled", id);
                return Err(SandboxError::Cancelled { mode: mode_used });
            }
            result = tokio::time::timeout(timeout, mechanism.run(request)) => match result {
                Ok(response) => response?,
                Err(_) => {
                    warn!("Sandbox request {} timed out in {}", id, mode_used);
                    return Err(SandboxError::Timeout {
                        mode: mode_used,
                        timeout_ms: timeout.as_millis() as u64,
                    });
                }
            },
        };

        if response.id != id {
            return Err(SandboxError::Protocol(format!(
                "response id '{}' does not match request '{}'",
                response.id, id
            )));
        }
        if !response.ok {
            return Err(SandboxError::Execution {
                mode: mode_used,
                message: response.error.unwrap_or_else(|| "unknown error".to_string()),
            });
        }

        Ok(SandboxOutcome {
            requested,
            mode_used,
            output: response.output.unwrap_or(Value::Null),
        })
    }
}
