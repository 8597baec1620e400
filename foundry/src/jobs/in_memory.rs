//! In-memory job queue with real visibility-timeout redelivery, for tests.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;

use super::{JobDelivery, JobKind, JobPayload, JobQueue, QueueError};

struct QueuedEntry {
    entry_id: String,
    payload: JobPayload,
}

struct PendingEntry {
    payload: JobPayload,
    delivered_at: Instant,
    delivery_count: u32,
}

#[derive(Default)]
struct KindQueues {
    fresh: VecDeque<QueuedEntry>,
    pending: HashMap<String, PendingEntry>,
    acked: Vec<String>,
    next_id: u64,
}

/// Process-local queue honoring the consumer-group delivery contract.
pub struct InMemoryJobQueue {
    inner: Mutex<HashMap<JobKind, KindQueues>>,
    visibility_timeout: Duration,
}

impl InMemoryJobQueue {
    pub fn new(visibility_timeout: Duration) -> Self {
        Self {
            inner: Mutex::new(HashMap::new()),
            visibility_timeout,
        }
    }

    /// Entry ids acknowledged so far for a kind (assertion helper).
    pub fn acked(&self, kind: JobKind) -> Vec<String> {
        self.inner
            .lock()
            .expect("poisoned")
            .get(&kind)
            .map(|q| q.acked.clone())
            .unwrap_or_default()
    }

    /// Unacked in-flight entry count (assertion helper).
    pub fn pending_count(&self, kind: JobKind) -> usize {
        self.inner
            .lock()
            .expect("poisoned")
            .get(&kind)
            .map(|q| q.pending.len())
            .unwrap_or(0)
    }
}

impl Default for InMemoryJobQueue {
    fn default() -> Self {
        Self::new(Duration::from_secs(30))
    }
}

#[async_trait]
impl JobQueue for InMemoryJobQueue {
    async fn enqueue(&self, kind: JobKind, payload: &JobPayload) -> Result<String, QueueError> {
        let mut inner = self.inner.lock().expect("poisoned");
        let queues = inner.entry(kind).or_default();
        queues.next_id += 1;
        let entry_id = format!("{}-0", queues.next_id);
        queues.fresh.push_back(QueuedEntry {
            entry_id: entry_id.clone(),
            payload: payload.clone(),
        });
        Ok(entry_id)
    }

    async fn read_one(
        &self,
        kind: JobKind,
        _consumer: &str,
        _block: Duration,
    ) -> Result<Option<JobDelivery>, QueueError> {
        let mut inner = self.inner.lock().expect("poisoned");
        let queues = inner.entry(kind).or_default();
        let now = Instant::now();

        // Redeliver a stale pending entry first (worker-crash recovery).
        let stale = queues
            .pending
            .iter()
            .find(|(_, p)| now.duration_since(p.delivered_at) >= self.visibility_timeout)
            .map(|(id, _)| id.clone());
        if let Some(entry_id) = stale {
            let p = queues.pending.get_mut(&entry_id).expect("just found");
            p.delivered_at = now;
            p.delivery_count += 1;
            return Ok(Some(JobDelivery {
                entry_id,
                payload: p.payload.clone(),
                delivery_count: p.delivery_count,
            }));
        }

        match queues.fresh.pop_front() {
            None => Ok(None),
            Some(entry) => {
                queues.pending.insert(
                    entry.entry_id.clone(),
                    PendingEntry {
                        payload: entry.payload.clone(),
                        delivered_at: now,
                        delivery_count: 1,
                    },
                );
                Ok(Some(JobDelivery {
                    entry_id: entry.entry_id,
                    payload: entry.payload,
                    delivery_count: 1,
                }))
            }
        }
    }

    async fn ack(&self, kind: JobKind, entry_id: &str) -> Result<(), QueueError> {
        let mut inner = self.inner.lock().expect("poisoned");
        let queues = inner.entry(kind).or_default();
        if queues.pending.remove(entry_id).is_some() {
            queues.acked.push(entry_id.to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn payload(job_id: &str) -> JobPayload {
        JobPayload {
            job_id: job_id.into(),
            project_id: "p1".into(),
            user_id: 1,
            chat_id: 1,
            correlation_id: "c1".into(),
            queued_at: Utc::now(),
            task_description: None,
        }
    }

    /// **Scenario**: An entry is delivered to exactly one consumer at a time;
    /// after ack it is never redelivered.
    #[tokio::test]
    async fn delivered_once_then_acked() {
        let queue = InMemoryJobQueue::new(Duration::from_secs(60));
        queue.enqueue(JobKind::Deploy, &payload("j1")).await.unwrap();
        let d = queue
            .read_one(JobKind::Deploy, "w1", Duration::ZERO)
            .await
            .unwrap()
            .unwrap();
        // Second consumer sees nothing while the entry is pending.
        assert!(queue
            .read_one(JobKind::Deploy, "w2", Duration::ZERO)
            .await
            .unwrap()
            .is_none());
        queue.ack(JobKind::Deploy, &d.entry_id).await.unwrap();
        assert_eq!(queue.acked(JobKind::Deploy), vec![d.entry_id.clone()]);
        assert!(queue
            .read_one(JobKind::Deploy, "w2", Duration::ZERO)
            .await
            .unwrap()
            .is_none());
    }

    /// **Scenario**: An unacked entry is redelivered after the visibility timeout
    /// with an incremented delivery count.
    #[tokio::test]
    async fn unacked_entry_redelivered() {
        let queue = InMemoryJobQueue::new(Duration::from_millis(10));
        queue.enqueue(JobKind::Deploy, &payload("j1")).await.unwrap();
        let first = queue
            .read_one(JobKind::Deploy, "w1", Duration::ZERO)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(first.delivery_count, 1);
        tokio::time::sleep(Duration::from_millis(20)).await;
        let second = queue
            .read_one(JobKind::Deploy, "w2", Duration::ZERO)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(second.entry_id, first.entry_id);
        assert_eq!(second.delivery_count, 2);
    }

    /// **Scenario**: Kinds are isolated queues.
    #[tokio::test]
    async fn kinds_are_isolated() {
        let queue = InMemoryJobQueue::default();
        queue.enqueue(JobKind::Deploy, &payload("j1")).await.unwrap();
        assert!(queue
            .read_one(JobKind::Engineering, "w1", Duration::ZERO)
            .await
            .unwrap()
            .is_none());
    }
}
