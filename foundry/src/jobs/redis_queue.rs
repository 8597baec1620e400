//! Redis-stream job queue with the `workers` consumer group.
//!
//! Entries carry one field `payload` (JSON). `read_one` first claims a pending
//! entry idle past the visibility timeout (XAUTOCLAIM; worker-crash recovery),
//! then falls back to new entries (XREADGROUP `>`). `ack` is XACK.

use std::collections::HashSet;
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::streams::{StreamAutoClaimReply, StreamId, StreamReadReply};
use tokio::sync::Mutex;
use tracing::warn;

use super::{JobDelivery, JobKind, JobPayload, JobQueue, QueueError};

/// Consumer group shared by all workers of a kind.
pub const CONSUMER_GROUP: &str = "workers";

/// Pending entries idle longer than this are claimed by another consumer.
pub const DEFAULT_VISIBILITY_TIMEOUT: Duration = Duration::from_secs(5 * 60);

pub struct RedisJobQueue {
    conn: ConnectionManager,
    visibility_timeout: Duration,
    groups_ready: Mutex<HashSet<&'static str>>,
}

impl RedisJobQueue {
    pub fn new(conn: ConnectionManager) -> Self {
        Self {
            conn,
            visibility_timeout: DEFAULT_VISIBILITY_TIMEOUT,
            groups_ready: Mutex::new(HashSet::new()),
        }
    }

    pub fn with_visibility_timeout(mut self, timeout: Duration) -> Self {
        self.visibility_timeout = timeout;
        self
    }

    /// Creates the consumer group once per kind; BUSYGROUP means it already exists.
    async fn ensure_group(&self, kind: JobKind) -> Result<(), QueueError> {
        let mut ready = self.groups_ready.lock().await;
        if ready.contains(kind.stream()) {
            return Ok(());
        }
        let mut conn = self.conn.clone();
        let created: Result<(), redis::RedisError> = redis::cmd("XGROUP")
            .arg("CREATE")
            .arg(kind.stream())
            .arg(CONSUMER_GROUP)
            .arg("$")
            .arg("MKSTREAM")
            .query_async(&mut conn)
            .await;
        match created {
            Ok(()) => {}
            Err(e) if e.to_string().contains("BUSYGROUP") => {}
            Err(e) => return Err(QueueError::Storage(e.to_string())),
        }
        ready.insert(kind.stream());
        Ok(())
    }

    fn decode_entry(entry: &StreamId) -> Result<JobPayload, QueueError> {
        let payload: String = entry
            .get("payload")
            .ok_or_else(|| QueueError::Codec("missing payload field".into()))?;
        serde_json::from_str(&payload).map_err(|e| QueueError::Codec(e.to_string()))
    }
}

#[async_trait]
impl JobQueue for RedisJobQueue {
    async fn enqueue(&self, kind: JobKind, payload: &JobPayload) -> Result<String, QueueError> {
        self.ensure_group(kind).await?;
        let json = serde_json::to_string(payload).map_err(|e| QueueError::Codec(e.to_string()))?;
        let mut conn = self.conn.clone();
        let entry_id: String = redis::cmd("XADD")
            .arg(kind.stream())
            .arg("*")
            .arg("payload")
            .arg(json)
            .query_async(&mut conn)
            .await
            .map_err(|e| QueueError::Storage(e.to_string()))?;
        Ok(entry_id)
    }

    async fn read_one(
        &self,
        kind: JobKind,
        consumer: &str,
        block: Duration,
    ) -> Result<Option<JobDelivery>, QueueError> {
        self.ensure_group(kind).await?;
        let mut conn = self.conn.clone();

        // Claim one stale pending entry first (crash recovery).
        let claim: StreamAutoClaimReply = redis::cmd("XAUTOCLAIM")
            .arg(kind.stream())
            .arg(CONSUMER_GROUP)
            .arg(consumer)
            .arg(self.visibility_timeout.as_millis() as u64)
            .arg("0-0")
            .arg("COUNT")
            .arg(1)
            .query_async(&mut conn)
            .await
            .map_err(|e| QueueError::Storage(e.to_string()))?;
        if let Some(entry) = claim.claimed.first() {
            match Self::decode_entry(entry) {
                Ok(payload) => {
                    return Ok(Some(JobDelivery {
                        entry_id: entry.id.clone(),
                        payload,
                        delivery_count: 2,
                    }))
                }
                Err(e) => {
                    // A poison entry would be claimed forever; drop it explicitly.
                    warn!(entry_id = %entry.id, error = %e, "dropping undecodable queue entry");
                    self.ack(kind, &entry.id).await?;
                }
            }
        }

        let reply: StreamReadReply = redis::cmd("XREADGROUP")
            .arg("GROUP")
            .arg(CONSUMER_GROUP)
            .arg(consumer)
            .arg("COUNT")
            .arg(1)
            .arg("BLOCK")
            .arg(block.as_millis() as u64)
            .arg("STREAMS")
            .arg(kind.stream())
            .arg(">")
            .query_async(&mut conn)
            .await
            .map_err(|e| QueueError::Storage(e.to_string()))?;

        for key in reply.keys {
            for entry in key.ids {
                let payload = Self::decode_entry(&entry)?;
                return Ok(Some(JobDelivery {
                    entry_id: entry.id,
                    payload,
                    delivery_count: 1,
                }));
            }
        }
        Ok(None)
    }

    async fn ack(&self, kind: JobKind, entry_id: &str) -> Result<(), QueueError> {
        let mut conn = self.conn.clone();
        let _: u64 = redis::cmd("XACK")
            .arg(kind.stream())
            .arg(CONSUMER_GROUP)
            .arg(entry_id)
            .query_async(&mut conn)
            .await
            .map_err(|e| QueueError::Storage(e.to_string()))?;
        Ok(())
    }
}
