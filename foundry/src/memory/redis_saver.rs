//! Redis-backed checkpointer.
//!
//! Stores the latest checkpoint per thread as JSON under `checkpoint:{thread_id}`
//! with a 7-day TTL, refreshed on every write. The runtime writes at every node
//! boundary, so the stored snapshot is always the last successful state.

use std::marker::PhantomData;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::memory::checkpoint::Checkpoint;
use crate::memory::checkpointer::{CheckpointError, Checkpointer};
use crate::memory::config::RunnableConfig;

/// Checkpoint retention in seconds (7 days).
pub const CHECKPOINT_RETENTION_SECS: u64 = 7 * 24 * 60 * 60;

/// Redis checkpointer. Key: `checkpoint:{thread_id}`, value: JSON checkpoint.
pub struct RedisSaver<S> {
    conn: ConnectionManager,
    _state: PhantomData<fn() -> S>,
}

impl<S> RedisSaver<S> {
    pub fn new(conn: ConnectionManager) -> Self {
        Self {
            conn,
            _state: PhantomData,
        }
    }

    fn key(config: &RunnableConfig) -> Result<String, CheckpointError> {
        let thread_id = config
            .thread_id
            .as_deref()
            .ok_or(CheckpointError::ThreadIdRequired)?;
        Ok(format!("checkpoint:{}", thread_id))
    }
}

#[async_trait]
impl<S> Checkpointer<S> for RedisSaver<S>
where
    S: Clone + Send + Sync + Serialize + DeserializeOwned + 'static,
{
    async fn put(
        &self,
        config: &RunnableConfig,
        checkpoint: &Checkpoint<S>,
    ) -> Result<String, CheckpointError> {
        let key = Self::key(config)?;
        let payload = serde_json::to_string(checkpoint)
            .map_err(|e| CheckpointError::Serialization(e.to_string()))?;
        let mut conn = self.conn.clone();
        let _: () = redis::cmd("SET")
            .arg(&key)
            .arg(payload)
            .arg("EX")
            .arg(CHECKPOINT_RETENTION_SECS)
            .query_async(&mut conn)
            .await
            .map_err(|e| CheckpointError::Storage(e.to_string()))?;
        Ok(checkpoint.id.clone())
    }

    async fn latest(
        &self,
        config: &RunnableConfig,
    ) -> Result<Option<Checkpoint<S>>, CheckpointError> {
        let key = Self::key(config)?;
        let mut conn = self.conn.clone();
        let payload: Option<String> = redis::cmd("GET")
            .arg(&key)
            .query_async(&mut conn)
            .await
            .map_err(|e| CheckpointError::Storage(e.to_string()))?;
        match payload {
            None => Ok(None),
            Some(json) => serde_json::from_str(&json)
                .map(Some)
                .map_err(|e| CheckpointError::Serialization(e.to_string())),
        }
    }
}
