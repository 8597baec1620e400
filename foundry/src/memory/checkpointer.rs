//! Checkpointer trait and CheckpointError.

use async_trait::async_trait;

use crate::memory::checkpoint::Checkpoint;
use crate::memory::config::RunnableConfig;

/// Error type for checkpoint operations.
#[derive(Debug, thiserror::Error)]
pub enum CheckpointError {
    #[error("thread_id required")]
    ThreadIdRequired,
    #[error("serialization: {0}")]
    Serialization(String),
    #[error("storage: {0}")]
    Storage(String),
}

/// Saves and loads checkpoints by `thread_id`.
///
/// Injected at compile via `StateGraph::compile_with_checkpointer`; the runtime
/// calls `put` after every node boundary, runners and polling tools call
/// `latest` to resume or report progress.
#[async_trait]
pub trait Checkpointer<S>: Send + Sync
where
    S: Clone + Send + Sync + 'static,
{
    /// Persist a checkpoint for the thread. Returns the checkpoint id used.
    async fn put(
        &self,
        config: &RunnableConfig,
        checkpoint: &Checkpoint<S>,
    ) -> Result<String, CheckpointError>;

    /// Load the most recent checkpoint for the thread, if any.
    async fn latest(&self, config: &RunnableConfig)
        -> Result<Option<Checkpoint<S>>, CheckpointError>;
}
