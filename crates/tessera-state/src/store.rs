//! State store implementations.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tessera_core::Result;
use tokio::sync::RwLock;

/// The persisted snapshot of one plan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateEntry {
    /// The plan this snapshot belongs to.
    pub plan_id: String,

    /// The state snapshot.
    pub snapshot: serde_json::Value,

    /// Store version at which this snapshot was written (monotonically increasing).
    pub version: u64,

    /// Timestamp when this snapshot was written.
    pub timestamp: DateTime<Utc>,
}

/// Trait for per-plan state stores.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Get the persisted snapshot for a plan.
    async fn get(&self, plan_id: &str) -> Result<Option<StateEntry>>;

    /// Overwrite the persisted snapshot for a plan.
    async fn persist(&self, plan_id: &str, snapshot: serde_json::Value) -> Result<StateEntry>;

    /// Remove the persisted snapshot. Returns true if one existed.
    async fn clear(&self, plan_id: &str) -> Result<bool>;

    /// Ids of all plans with persisted state.
    async fn plan_ids(&self) -> Result<Vec<String>>;

    /// Get the current version of the store.
    async fn version(&self) -> u64;
}

/// In-memory implementation of StateStore.
pub struct InMemoryStateStore {
    /// plan id -> latest snapshot.
    state: Arc<RwLock<HashMap<String, StateEntry>>>,

    /// Global version counter.
    version: Arc<RwLock<u64>>,
}

impl InMemoryStateStore {
    /// Create a new in-memory state store.
    pub fn new() -> Self {
        Self {
            state: Arc::new(RwLock::new(HashMap::new())),
            version: Arc::new(RwLock::new(0)),
        }
    }

    /// Get the next version number.
    async fn next_version(&self) -> u64 {
        let mut version = self.version.write().await;
        *version += 1;
        *version
    }
}

impl Default for InMemoryStateStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StateStore for InMemoryStateStore {
    async fn get(&self, plan_id: &str) -> Result<Option<StateEntry>> {
        let state = self.state.read().await;
        Ok(state.get(plan_id).cloned())
    }

    async fn persist(&self, plan_id: &str, snapshot: serde_json::Value) -> Result<StateEntry> {
        let version = self.next_version().await;
        let entry = StateEntry {
            plan_id: plan_id.to_string(),
            snapshot,
            version,
            timestamp: Utc::now(),
        };

        let mut state = self.state.write().await;
        state.insert(plan_id.to_string(), entry.clone());
        tracing::debug!("Persisted state for plan {} at version {}", plan_id, version);

        Ok(entry)
    }

    async fn clear(&self, plan_id: &str) -> Result<bool> {
        let mut state = self.state.write().await;
        let existed = state.remove(plan_id).is_some();
        if existed {
            tracing::info!("Cleared persisted state for plan {}", plan_id);
        }
        Ok(existed)
    }

    async fn plan_ids(&self) -> Result<Vec<String>> {
        let state = self.state.read().await;
        let mut ids: Vec<String> = state.keys().cloned().collect();
        ids.sort();
        Ok(ids)
    }

    async fn version(&self) -> u64 {
        *self.version.read().await
    }
}
