//! Executor registry keyed by executor ID

use super::Executor;
use crate::error::DispatchError;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

/// Maps executor IDs to executors and remembers the last active ID
///
/// Registration calls come from the adapter while the accept loop reads,
/// so both maps sit behind locks.
pub struct ExecutorRegistry {
    /// Map of executor_id -> executor
    executors: RwLock<HashMap<String, Arc<dyn Executor>>>,
    last_executor_id: RwLock<Option<String>>,
}

impl ExecutorRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self {
            executors: RwLock::new(HashMap::new()),
            last_executor_id: RwLock::new(None),
        }
    }

    /// Register an executor, returning the one it replaced
    ///
    /// Does not touch the last active executor ID.
    pub async fn register(
        &self,
        executor_id: impl Into<String>,
        executor: Arc<dyn Executor>,
    ) -> Option<Arc<dyn Executor>> {
        let executor_id = executor_id.into();
        debug!("Registering executor with id: {}", executor_id);
        self.executors.write().await.insert(executor_id, executor)
    }

    /// Remove an executor
    pub async fn unregister(&self, executor_id: &str) -> bool {
        self.executors.write().await.remove(executor_id).is_some()
    }

    /// Find the executor for an ID
    pub async fn lookup(&self, executor_id: &str) -> Result<Arc<dyn Executor>, DispatchError> {
        self.executors
            .read()
            .await
            .get(executor_id)
            .cloned()
            .ok_or_else(|| DispatchError::UnknownExecutor {
                executor_id: executor_id.to_string(),
            })
    }

    /// Record an ID as the most recently active one
    pub async fn mark_active(&self, executor_id: &str) {
        *self.last_executor_id.write().await = Some(executor_id.to_string());
    }

    /// Get the most recently active executor ID, if any request has touched one
    pub async fn last_executor_id(&self) -> Option<String> {
        self.last_executor_id.read().await.clone()
    }

    /// Get all registered IDs, sorted
    pub async fn registered_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.executors.read().await.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Get the number of registered executors
    pub async fn len(&self) -> usize {
        self.executors.read().await.len()
    }

    /// Check if no executor is registered
    pub async fn is_empty(&self) -> bool {
        self.executors.read().await.is_empty()
    }
}

impl Default for ExecutorRegistry {
    fn default() -> Self {
        Self::new()
    }
}
