//! Checkpoint persistence: durable snapshots of graph state per `thread_id`.
//!
//! The runtime writes a checkpoint after every node boundary; polling tools read
//! the latest checkpoint for a thread (jobs use `thread_id = job_id`).
//! Implementations: [`MemorySaver`] (dev/tests) and [`RedisSaver`] (production,
//! 7-day retention).

mod checkpoint;
mod checkpointer;
mod config;
mod memory_saver;
mod redis_saver;

pub use checkpoint::Checkpoint;
pub use checkpointer::{CheckpointError, Checkpointer};
pub use config::RunnableConfig;
pub use memory_saver::MemorySaver;
pub use redis_saver::{RedisSaver, CHECKPOINT_RETENTION_SECS};
