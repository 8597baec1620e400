//! Durable job dispatcher: at-least-once delivery with exactly-once ack.
//!
//! One append-only stream per job kind (`deploy:queue`, `engineering:queue`),
//! consumed by the `workers` consumer group. A worker pulls one entry, runs the
//! kind-specific sub-graph with `thread_id = job_id`, and acknowledges on
//! completion. Handled failures write a terminal failed checkpoint **before**
//! the ack; a worker crash leaves the entry unacked and the visibility timeout
//! redelivers it to another consumer.

mod in_memory;
mod redis_queue;
mod worker;

pub use in_memory::InMemoryJobQueue;
pub use redis_queue::RedisJobQueue;
pub use worker::{process_one, run_worker, JobRunner, WorkerOptions};

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Job kind; one queue stream per kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    Deploy,
    Engineering,
}

impl JobKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobKind::Deploy => "deploy",
            JobKind::Engineering => "engineering",
        }
    }

    /// Queue stream name for this kind.
    pub fn stream(&self) -> &'static str {
        match self {
            JobKind::Deploy => "deploy:queue",
            JobKind::Engineering => "engineering:queue",
        }
    }
}

/// Durable work item payload appended to the queue stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobPayload {
    pub job_id: String,
    pub project_id: String,
    pub user_id: i64,
    pub chat_id: i64,
    pub correlation_id: String,
    pub queued_at: DateTime<Utc>,
    /// Engineering jobs carry the task description; deploys leave it empty.
    #[serde(default)]
    pub task_description: Option<String>,
}

/// One delivered queue entry.
#[derive(Debug, Clone)]
pub struct JobDelivery {
    /// Stream entry id; acknowledged exactly once.
    pub entry_id: String,
    pub payload: JobPayload,
    /// 1 on first delivery, higher after visibility-timeout redelivery.
    pub delivery_count: u32,
}

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("storage: {0}")]
    Storage(String),
    #[error("codec: {0}")]
    Codec(String),
}

/// Generates a job id `{kind}_{project_slug}_{8-hex}`; the checkpoint thread id
/// of the job's sub-graph execution equals this id.
pub fn new_job_id(kind: JobKind, project_slug: &str) -> String {
    let suffix: u32 = rand::thread_rng().gen();
    format!("{}_{}_{:08x}", kind.as_str(), project_slug, suffix)
}

/// Queue contract: append, deliver to exactly one consumer at a time, ack.
#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Appends one entry; returns the stream entry id.
    async fn enqueue(&self, kind: JobKind, payload: &JobPayload) -> Result<String, QueueError>;

    /// Delivers one entry to `consumer`: a stale pending entry past the
    /// visibility timeout if any, else the next new entry. `None` when the block
    /// window elapses with nothing to do.
    async fn read_one(
        &self,
        kind: JobKind,
        consumer: &str,
        block: Duration,
    ) -> Result<Option<JobDelivery>, QueueError>;

    /// Acknowledges a delivered entry; it will never be redelivered.
    async fn ack(&self, kind: JobKind, entry_id: &str) -> Result<(), QueueError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    /// **Scenario**: Job ids carry kind, slug and an 8-hex suffix.
    #[test]
    fn job_id_format() {
        let id = new_job_id(JobKind::Deploy, "hello-world-bot");
        let parts: Vec<&str> = id.rsplitn(2, '_').collect();
        assert!(id.starts_with("deploy_hello-world-bot_"));
        assert_eq!(parts[0].len(), 8);
        assert!(parts[0].chars().all(|c| c.is_ascii_hexdigit()));
    }

    /// **Scenario**: Stream names are fixed per kind.
    #[test]
    fn stream_names() {
        assert_eq!(JobKind::Deploy.stream(), "deploy:queue");
        assert_eq!(JobKind::Engineering.stream(), "engineering:queue");
    }
}
