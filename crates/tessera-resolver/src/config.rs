//! Fetch and resolution configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Configuration for module fetching, caching and import rewriting.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    /// Mirror base URLs; each yields one derived candidate per fetch.
    pub mirrors: Vec<String>,

    /// Retries per candidate after the first attempt.
    pub max_retries: u32,

    /// Linear backoff unit in milliseconds.
    pub backoff_unit_ms: u64,

    /// Candidate `i` starts `i * hedge_delay_multiplier * backoff_unit_ms` after the first.
    pub hedge_delay_multiplier: u32,

    /// Timeout for a single request in milliseconds.
    pub request_timeout_ms: u64,

    /// Maximum materialized modules kept in memory.
    pub cache_max_entries: usize,

    /// Maximum cached bare-specifier resolutions.
    pub resolution_cache_max_entries: usize,

    /// Maximum nesting of recursively inlined script imports.
    pub max_rewrite_depth: usize,

    /// Base URL used for bare specifiers when the manifest is not enforced.
    pub fallback_cdn_base: Option<String>,

    pub user_agent: String,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            mirrors: Vec::new(),
            max_retries: 2,
            backoff_unit_ms: 200,
            hedge_delay_multiplier: 2,
            request_timeout_ms: 10_000,
            cache_max_entries: 256,
            resolution_cache_max_entries: 1_024,
            max_rewrite_depth: 8,
            fallback_cdn_base: Some("https://esm.sh".to_string()),
            user_agent: concat!("tessera/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

impl FetchConfig {
    pub fn backoff_unit(&self) -> Duration {
        Duration::from_millis(self.backoff_unit_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// Start delay for the candidate at `index`.
    pub fn hedge_delay(&self, index: usize) -> Duration {
        self.backoff_unit() * (index as u32).saturating_mul(self.hedge_delay_multiplier)
    }
}
