//! Container manager: uniform lifecycle API over agent factories and drivers.
//!
//! Lifecycle: `initializing → idle ⇄ running → (idle|error) → deleted`.
//! Entering idle pauses the container (suspended CPU, preserved memory);
//! `send_message` resumes it and is the only path for text exchange between the
//! orchestrator and the in-container agent.

use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::config::{image_cache_key, AgentContainerConfig};
use super::context::{SessionContext, SessionContextStore};
use super::driver::{ContainerDriver, ContainerSpec};
use super::factory::{AgentFactory as _, AgentReply, FactoryRegistry};
use super::SandboxError;

/// Default `send_message` timeout.
pub const DEFAULT_MESSAGE_TIMEOUT: Duration = Duration::from_secs(120);

/// Container lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContainerState {
    Initializing,
    Idle,
    Running,
    Error,
    Deleted,
}

/// Status snapshot returned by [`ContainerManager::status`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContainerStatus {
    pub agent_id: String,
    pub state: ContainerState,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    /// TTL deadline; the reaper deletes the container past this instant.
    pub deadline: DateTime<Utc>,
}

struct ContainerRecord {
    config: AgentContainerConfig,
    container_id: String,
    state: ContainerState,
    created_at: DateTime<Utc>,
    last_activity: DateTime<Utc>,
    deadline: DateTime<Utc>,
}

/// Uniform container API regardless of agent family.
pub struct ContainerManager {
    driver: Arc<dyn ContainerDriver>,
    factories: Arc<FactoryRegistry>,
    contexts: Arc<dyn SessionContextStore>,
    records: DashMap<String, ContainerRecord>,
}

impl ContainerManager {
    pub fn new(
        driver: Arc<dyn ContainerDriver>,
        factories: Arc<FactoryRegistry>,
        contexts: Arc<dyn SessionContextStore>,
    ) -> Self {
        Self {
            driver,
            factories,
            contexts,
            records: DashMap::new(),
        }
    }

    /// Provisions a sandbox for the given declarative config and returns the
    /// opaque agent id.
    ///
    /// Reuses the cached image for `(agent, capabilities)` when present;
    /// otherwise runs the factory's install commands against the base image and
    /// commits the result under the cache key. Instruction files (skill docs and
    /// the allowed-tool gate doc) are written on every create.
    pub async fn create(&self, config: AgentContainerConfig) -> Result<String, SandboxError> {
        let factory = self.factories.get(config.agent)?.clone();
        let capabilities = config.resolve_capabilities()?;
        for credential in factory.required_credentials() {
            if !config.env_vars.contains_key(*credential) {
                return Err(SandboxError::InvalidConfig(format!(
                    "missing required credential env var: {}",
                    credential
                )));
            }
        }

        let agent_id = format!("agent-{}", &uuid::Uuid::new_v4().simple().to_string()[..12]);
        let tag = image_cache_key(config.agent, &config.capabilities);
        let cached = self.driver.image_exists(&tag).await?;
        let image = if cached {
            tag.clone()
        } else {
            factory.base_image().to_string()
        };

        // Values stay out of the log line; keys only.
        info!(
            agent_id = %agent_id,
            agent = config.agent.as_str(),
            image = %image,
            cached_image = cached,
            env_keys = ?config.env_vars.keys().collect::<Vec<_>>(),
            "creating agent container"
        );

        let spec = ContainerSpec {
            name: agent_id.clone(),
            image,
            env: config
                .env_vars
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
            has_internet: config.has_internet,
        };
        let container_id = self.driver.create_container(&spec).await?;
        let now = Utc::now();
        self.records.insert(
            agent_id.clone(),
            ContainerRecord {
                config: config.clone(),
                container_id: container_id.clone(),
                state: ContainerState::Initializing,
                created_at: now,
                last_activity: now,
                deadline: now + chrono::Duration::hours(config.ttl_hours as i64),
            },
        );
        self.driver.start(&container_id).await?;

        if !cached {
            let timeout = Duration::from_secs(config.timeout_minutes as u64 * 60);
            for argv in factory.install_commands(&capabilities) {
                let output = self.driver.exec(&container_id, &argv, timeout).await?;
                if output.exit_code != 0 {
                    self.set_state(&agent_id, ContainerState::Error);
                    return Err(SandboxError::Driver(format!(
                        "capability install failed: {}",
                        output.stderr.trim()
                    )));
                }
            }
            self.driver.commit_image(&container_id, &tag).await?;
        }

        for (path, content) in factory.instruction_files(&config, &capabilities) {
            self.driver.write_file(&container_id, &path, &content).await?;
        }

        self.driver.pause(&container_id).await?;
        self.set_state(&agent_id, ContainerState::Idle);
        Ok(agent_id)
    }

    fn set_state(&self, agent_id: &str, state: ContainerState) {
        if let Some(mut record) = self.records.get_mut(agent_id) {
            record.state = state;
            record.last_activity = Utc::now();
        }
    }

    fn live_record(&self, agent_id: &str) -> Result<(String, AgentContainerConfig), SandboxError> {
        let record = self
            .records
            .get(agent_id)
            .ok_or_else(|| SandboxError::NotFound(agent_id.to_string()))?;
        if record.state == ContainerState::Deleted {
            return Err(SandboxError::NotFound(agent_id.to_string()));
        }
        Ok((record.container_id.clone(), record.config.clone()))
    }

    /// One message exchange with the agent. The only text path in or out.
    ///
    /// Loads the stored session context, resumes the container, executes the
    /// factory invocation under `timeout` (default 120 s), persists the updated
    /// context with the container TTL, and re-enters idle.
    pub async fn send_message(
        &self,
        agent_id: &str,
        text: &str,
        timeout: Option<Duration>,
    ) -> Result<AgentReply, SandboxError> {
        let (container_id, config) = self.live_record(agent_id)?;
        let factory = self.factories.get(config.agent)?.clone();
        let timeout = timeout.unwrap_or(DEFAULT_MESSAGE_TIMEOUT);

        let session = self
            .contexts
            .load(agent_id)
            .await?
            .unwrap_or_else(SessionContext::default);

        self.driver.unpause(&container_id).await?;
        self.set_state(agent_id, ContainerState::Running);

        let argv = factory.build_invocation(text, &session);
        let result = self.driver.exec(&container_id, &argv, timeout).await;
        let output = match result {
            Ok(output) => output,
            Err(e) => {
                warn!(agent_id, error = %e, "send_message failed");
                self.set_state(agent_id, ContainerState::Error);
                return Err(e);
            }
        };

        let reply = match factory.parse_reply(&output, &session, text) {
            Ok(reply) => reply,
            Err(e) => {
                self.set_state(agent_id, ContainerState::Error);
                return Err(e);
            }
        };

        let ttl = Duration::from_secs(config.ttl_hours as u64 * 3600);
        self.contexts.save(agent_id, &reply.session, ttl).await?;

        self.driver.pause(&container_id).await?;
        self.set_state(agent_id, ContainerState::Idle);
        debug!(agent_id, reply_len = reply.text.len(), "agent replied");
        Ok(reply)
    }

    /// Writes a file into the agent's workspace.
    pub async fn send_file(
        &self,
        agent_id: &str,
        path: &str,
        content: &str,
    ) -> Result<(), SandboxError> {
        let (container_id, _) = self.live_record(agent_id)?;
        self.driver.unpause(&container_id).await?;
        let result = self.driver.write_file(&container_id, path, content).await;
        self.driver.pause(&container_id).await?;
        result
    }

    /// Runs one shell command in the container (control-plane `send_command`).
    /// Non-zero exits are returned in the output, shell style, not as errors.
    pub async fn run_command(
        &self,
        agent_id: &str,
        command: &str,
    ) -> Result<super::driver::ExecOutput, SandboxError> {
        let (container_id, config) = self.live_record(agent_id)?;
        let timeout = Duration::from_secs(config.timeout_minutes as u64 * 60);
        self.driver.unpause(&container_id).await?;
        self.set_state(agent_id, ContainerState::Running);
        let output = self
            .driver
            .exec(
                &container_id,
                &["sh".to_string(), "-lc".to_string(), command.to_string()],
                timeout,
            )
            .await;
        self.driver.pause(&container_id).await?;
        self.set_state(agent_id, ContainerState::Idle);
        output
    }

    pub fn status(&self, agent_id: &str) -> Result<ContainerStatus, SandboxError> {
        let record = self
            .records
            .get(agent_id)
            .ok_or_else(|| SandboxError::NotFound(agent_id.to_string()))?;
        Ok(ContainerStatus {
            agent_id: agent_id.to_string(),
            state: record.state,
            created_at: record.created_at,
            last_activity: record.last_activity,
            deadline: record.deadline,
        })
    }

    pub async fn logs(&self, agent_id: &str) -> Result<String, SandboxError> {
        let (container_id, _) = self.live_record(agent_id)?;
        self.driver.logs(&container_id).await
    }

    pub async fn pause(&self, agent_id: &str) -> Result<(), SandboxError> {
        let (container_id, _) = self.live_record(agent_id)?;
        self.driver.pause(&container_id).await?;
        self.set_state(agent_id, ContainerState::Idle);
        Ok(())
    }

    pub async fn resume(&self, agent_id: &str) -> Result<(), SandboxError> {
        let (container_id, _) = self.live_record(agent_id)?;
        self.driver.unpause(&container_id).await?;
        self.set_state(agent_id, ContainerState::Running);
        Ok(())
    }

    /// Destroys the container and its session context.
    pub async fn delete(&self, agent_id: &str) -> Result<(), SandboxError> {
        let (container_id, _) = self.live_record(agent_id)?;
        self.driver.remove(&container_id).await?;
        self.contexts.delete(agent_id).await?;
        self.set_state(agent_id, ContainerState::Deleted);
        info!(agent_id, "agent container deleted");
        Ok(())
    }

    /// Deletes every container whose TTL deadline has passed. Returns the ids
    /// reaped.
    pub async fn reap_expired(&self) -> Vec<String> {
        let now = Utc::now();
        let expired: Vec<String> = self
            .records
            .iter()
            .filter(|r| r.state != ContainerState::Deleted && r.deadline <= now)
            .map(|r| r.key().clone())
            .collect();
        let mut reaped = Vec::new();
        for agent_id in expired {
            match self.delete(&agent_id).await {
                Ok(()) => reaped.push(agent_id),
                Err(e) => warn!(agent_id = %agent_id, error = %e, "reap failed"),
            }
        }
        reaped
    }
}
