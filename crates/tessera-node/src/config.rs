//! Host configuration loaded from TOML.

use std::path::Path;

use serde::{Deserialize, Serialize};
use tessera_engine::EngineConfig;
use tessera_policy::PolicyConfig;
use tessera_resolver::FetchConfig;
use tessera_sandbox::SandboxConfig;

/// Environment variable naming the configuration file.
pub const CONFIG_ENV: &str = "TESSERA_CONFIG";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Socket address to listen on.
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:3000".to_string(),
        }
    }
}

/// Everything the node wires together.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TesseraConfig {
    pub server: ServerConfig,
    pub policy: PolicyConfig,
    pub fetch: FetchConfig,
    pub sandbox: SandboxConfig,
    pub engine: EngineConfig,
}

impl TesseraConfig {
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
    }

    /// Parse TOML after expanding `${VAR}` references.
    pub fn parse(content: &str) -> anyhow::Result<Self> {
        let expanded = shellexpand::env(content)?;
        let config: TesseraConfig = toml::from_str(&expanded)?;
        Ok(config)
    }

    /// Load from `$TESSERA_CONFIG`, or defaults when it is unset.
    pub fn from_env() -> anyhow::Result<Self> {
        match std::env::var(CONFIG_ENV) {
            Ok(path) if !path.trim().is_empty() => Self::load(path.trim()),
            _ => Ok(Self::default()),
        }
    }
}
