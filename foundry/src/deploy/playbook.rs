//! Playbook-runner contract: the deployer hands the actual configuration
//! management to an external Ansible runner over a dedicated queue.

use std::collections::BTreeMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use serde::{Deserialize, Serialize};

use crate::error::GraphError;

/// Queue the external runner consumes.
pub const ANSIBLE_DEPLOY_QUEUE: &str = "ansible:deploy:queue";

/// One deploy request for the playbook runner.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlaybookRequest {
    pub request_id: String,
    pub project_id: String,
    pub server_handle: String,
    pub server_ip: String,
    pub port: u16,
    pub repository_url: String,
    /// Fully resolved environment. Passed over the queue, never checkpointed.
    pub env: BTreeMap<String, String>,
}

/// Result published by the runner on `deploy:result:{request_id}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlaybookResult {
    pub ok: bool,
    #[serde(default)]
    pub message: String,
}

/// Dispatches one deploy playbook run and waits for its result.
#[async_trait]
pub trait PlaybookRunner: Send + Sync {
    async fn run_deploy(&self, request: &PlaybookRequest) -> Result<PlaybookResult, GraphError>;
}

/// Production runner: XADD onto `ansible:deploy:queue`, then block-read the
/// result stream `deploy:result:{request_id}`.
pub struct RedisPlaybookRunner {
    conn: ConnectionManager,
    result_timeout: Duration,
}

impl RedisPlaybookRunner {
    pub fn new(conn: ConnectionManager) -> Self {
        Self {
            conn,
            result_timeout: Duration::from_secs(15 * 60),
        }
    }

    pub fn with_result_timeout(mut self, timeout: Duration) -> Self {
        self.result_timeout = timeout;
        self
    }

    fn result_stream(request_id: &str) -> String {
        format!("deploy:result:{}", request_id)
    }
}

#[async_trait]
impl PlaybookRunner for RedisPlaybookRunner {
    async fn run_deploy(&self, request: &PlaybookRequest) -> Result<PlaybookResult, GraphError> {
        let payload =
            serde_json::to_string(request).map_err(|e| GraphError::ExecutionFailed(e.to_string()))?;
        let mut conn = self.conn.clone();
        let _: String = redis::cmd("XADD")
            .arg(ANSIBLE_DEPLOY_QUEUE)
            .arg("*")
            .arg("payload")
            .arg(payload)
            .query_async(&mut conn)
            .await
            .map_err(|e| GraphError::Transient(e.to_string()))?;

        let stream = Self::result_stream(&request.request_id);
        let deadline = tokio::time::Instant::now() + self.result_timeout;
        let mut cursor = "0".to_string();
        loop {
            if tokio::time::Instant::now() >= deadline {
                return Err(GraphError::Timeout(format!(
                    "no playbook result after {}s",
                    self.result_timeout.as_secs()
                )));
            }
            let reply: redis::streams::StreamReadReply = redis::cmd("XREAD")
                .arg("COUNT")
                .arg(1)
                .arg("BLOCK")
                .arg(5_000)
                .arg("STREAMS")
                .arg(&stream)
                .arg(&cursor)
                .query_async(&mut conn)
                .await
                .map_err(|e| GraphError::Transient(e.to_string()))?;
            for key in reply.keys {
                for entry in key.ids {
                    cursor = entry.id.clone();
                    if let Some(payload) = entry.get::<String>("payload") {
                        return serde_json::from_str(&payload)
                            .map_err(|e| GraphError::ExecutionFailed(e.to_string()));
                    }
                }
            }
        }
    }
}

/// Scripted runner for tests; records every request it receives.
pub struct MockPlaybookRunner {
    result: PlaybookResult,
    requests: Mutex<Vec<PlaybookRequest>>,
}

impl MockPlaybookRunner {
    pub fn succeeding() -> Self {
        Self {
            result: PlaybookResult {
                ok: true,
                message: "deployed".into(),
            },
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn failing(message: &str) -> Self {
        Self {
            result: PlaybookResult {
                ok: false,
                message: message.to_string(),
            },
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn requests(&self) -> Vec<PlaybookRequest> {
        self.requests.lock().expect("poisoned").clone()
    }
}

#[async_trait]
impl PlaybookRunner for MockPlaybookRunner {
    async fn run_deploy(&self, request: &PlaybookRequest) -> Result<PlaybookResult, GraphError> {
        self.requests.lock().expect("poisoned").push(request.clone());
        Ok(self.result.clone())
    }
}
