//! Checkpoint snapshot type.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One checkpoint: a state snapshot with id, timestamp and step counter.
///
/// Produced by the graph runtime at node boundaries; stored by a
/// [`Checkpointer`](super::Checkpointer) keyed by `thread_id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint<S> {
    pub id: String,
    pub ts: DateTime<Utc>,
    /// Node boundary counter within the run (1 after the first node).
    pub step: u64,
    pub state: S,
}

impl<S> Checkpoint<S> {
    /// Creates a checkpoint from the current state.
    pub fn from_state(state: S, step: u64) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            ts: Utc::now(),
            step,
            state,
        }
    }
}
