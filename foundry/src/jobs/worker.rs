//! Worker loop: pull one entry, run the kind-specific sub-graph, ack.
//!
//! Each job runs inside its own task so an unhandled panic is contained: the
//! loop observes the join error, leaves the entry unacked, and the visibility
//! timeout redelivers it to another consumer. Handled failures write a terminal
//! failed checkpoint (via [`JobRunner::record_failure`]) before the ack.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::error::GraphError;

use super::{JobDelivery, JobKind, JobPayload, JobQueue, QueueError};

/// Kind-specific job execution: builds the sub-graph and invokes it with
/// `thread_id = payload.job_id`.
#[async_trait]
pub trait JobRunner: Send + Sync {
    async fn run(&self, payload: &JobPayload) -> Result<(), GraphError>;

    /// Writes the terminal failed state to the job's checkpoint. Called before
    /// ack when `run` returns an error.
    async fn record_failure(&self, payload: &JobPayload, error: &GraphError);
}

/// Worker loop options.
#[derive(Debug, Clone)]
pub struct WorkerOptions {
    pub consumer_name: String,
    pub block: Duration,
}

impl Default for WorkerOptions {
    fn default() -> Self {
        Self {
            consumer_name: format!("worker-{}", std::process::id()),
            block: Duration::from_secs(5),
        }
    }
}

/// Processes exactly one delivery; returns whether an entry was handled.
///
/// Ack rules: success → ack; handled failure → record terminal state, then ack;
/// panic → no ack (redelivery after the visibility timeout).
pub async fn process_one(
    kind: JobKind,
    queue: &dyn JobQueue,
    runner: &Arc<dyn JobRunner>,
    delivery: JobDelivery,
) -> Result<(), QueueError> {
    let JobDelivery {
        entry_id, payload, ..
    } = delivery;
    info!(job_id = %payload.job_id, kind = kind.as_str(), %entry_id, "job started");

    let task_runner = Arc::clone(runner);
    let task_payload = payload.clone();
    let outcome =
        tokio::spawn(async move { task_runner.run(&task_payload).await }).await;

    match outcome {
        Ok(Ok(())) => {
            queue.ack(kind, &entry_id).await?;
            info!(job_id = %payload.job_id, "job completed");
        }
        Ok(Err(e)) => {
            error!(job_id = %payload.job_id, error = %e, "job failed");
            runner.record_failure(&payload, &e).await;
            queue.ack(kind, &entry_id).await?;
        }
        Err(join_error) => {
            // Panic inside the job task: leave the entry unacked so the
            // consumer group redelivers it after the visibility timeout.
            warn!(job_id = %payload.job_id, error = %join_error, "job panicked; entry left unacked");
        }
    }
    Ok(())
}

/// Blocking worker loop for one job kind. Runs until `shutdown` is cancelled.
pub async fn run_worker(
    kind: JobKind,
    queue: Arc<dyn JobQueue>,
    runner: Arc<dyn JobRunner>,
    options: WorkerOptions,
    shutdown: CancellationToken,
) -> Result<(), QueueError> {
    info!(kind = kind.as_str(), consumer = %options.consumer_name, "worker loop started");
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                info!(kind = kind.as_str(), "worker loop stopping");
                return Ok(());
            }
            delivery = queue.read_one(kind, &options.consumer_name, options.block) => {
                match delivery {
                    Ok(Some(d)) => process_one(kind, queue.as_ref(), &runner, d).await?,
                    Ok(None) => {}
                    Err(e) => {
                        error!(error = %e, "queue read failed; backing off");
                        tokio::time::sleep(Duration::from_secs(1)).await;
                    }
                }
            }
        }
    }
}
