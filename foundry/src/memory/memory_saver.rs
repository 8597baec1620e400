//! In-memory checkpointer. Not persistent; for dev and tests.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::memory::checkpoint::Checkpoint;
use crate::memory::checkpointer::{CheckpointError, Checkpointer};
use crate::memory::config::RunnableConfig;

/// In-memory checkpointer keyed by `thread_id`; each thread keeps its checkpoint
/// history newest-last.
pub struct MemorySaver<S> {
    inner: Arc<RwLock<HashMap<String, Vec<Checkpoint<S>>>>>,
}

impl<S> MemorySaver<S>
where
    S: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    fn thread_id(config: &RunnableConfig) -> Result<&str, CheckpointError> {
        config
            .thread_id
            .as_deref()
            .ok_or(CheckpointError::ThreadIdRequired)
    }

    /// Number of checkpoints stored for a thread (test helper).
    pub async fn count_for(&self, thread_id: &str) -> usize {
        self.inner
            .read()
            .await
            .get(thread_id)
            .map(|v| v.len())
            .unwrap_or(0)
    }

    /// Thread ids with at least one checkpoint, newest activity not tracked.
    pub async fn thread_ids(&self) -> Vec<String> {
        self.inner.read().await.keys().cloned().collect()
    }
}

impl<S> Default for MemorySaver<S>
where
    S: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<S> Checkpointer<S> for MemorySaver<S>
where
    S: Clone + Send + Sync + 'static,
{
    async fn put(
        &self,
        config: &RunnableConfig,
        checkpoint: &Checkpoint<S>,
    ) -> Result<String, CheckpointError> {
        let key = Self::thread_id(config)?.to_string();
        let id = checkpoint.id.clone();
        self.inner
            .write()
            .await
            .entry(key)
            .or_default()
            .push(checkpoint.clone());
        Ok(id)
    }

    async fn latest(
        &self,
        config: &RunnableConfig,
    ) -> Result<Option<Checkpoint<S>>, CheckpointError> {
        let key = Self::thread_id(config)?;
        Ok(self
            .inner
            .read()
            .await
            .get(key)
            .and_then(|v| v.last())
            .cloned())
    }
}
