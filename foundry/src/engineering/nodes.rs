//! Engineering sub-graph nodes.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, warn};

use crate::clients::{CrudApi, RepoHost, RepoHostError};
use crate::error::GraphError;
use crate::graph::{Next, Node};
use crate::llm::LlmClient;
use crate::message::Message;
use crate::sandbox::{AgentContainerConfig, AgentKind, AllowedTool, ContainerManager};
use crate::state::{EngineeringStatus, OrchestratorState};

use super::sandbox::BuildSandbox;

/// Preparer timeout.
const PREPARE_TIMEOUT: Duration = Duration::from_secs(60);
/// Developer exchange timeout.
const DEVELOP_TIMEOUT: Duration = Duration::from_secs(15 * 60);
/// Tester timeout.
const TEST_TIMEOUT: Duration = Duration::from_secs(10 * 60);

/// Structured plan the architect writes into `project_spec`.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub(super) struct ProjectPlan {
    pub task: String,
    #[serde(default)]
    pub modules: Vec<String>,
    #[serde(default)]
    pub instructions: String,
}

impl ProjectPlan {
    pub(super) fn from_state(state: &OrchestratorState) -> Self {
        state
            .project_spec
            .as_deref()
            .and_then(|s| serde_json::from_str(s).ok())
            .unwrap_or_else(|| ProjectPlan {
                task: state.project_spec.clone().unwrap_or_default(),
                modules: Vec::new(),
                instructions: String::new(),
            })
    }
}

const ARCHITECT_PROMPT: &str = "\
You are the architect of a template-driven service generator. Given a task,
select the template modules the project needs and write short developer
instructions. You do not write code. Reply with JSON only:
{\"modules\": [\"...\"], \"instructions\": \"...\"}";

/// Selects template modules and creates the project repository. Does not write
/// code.
pub struct ArchitectNode {
    crud: Arc<dyn CrudApi>,
    repo_host: Arc<dyn RepoHost>,
    llm: Arc<dyn LlmClient>,
}

impl ArchitectNode {
    pub fn new(
        crud: Arc<dyn CrudApi>,
        repo_host: Arc<dyn RepoHost>,
        llm: Arc<dyn LlmClient>,
    ) -> Self {
        Self {
            crud,
            repo_host,
            llm,
        }
    }
}

#[async_trait]
impl Node<OrchestratorState> for ArchitectNode {
    fn id(&self) -> &str {
        "architect"
    }

    async fn run(
        &self,
        mut state: OrchestratorState,
    ) -> Result<(OrchestratorState, Next), GraphError> {
        state.engineering_status = EngineeringStatus::Working;
        let project = state
            .current_project
            .clone()
            .ok_or_else(|| GraphError::ExecutionFailed("engineering job without project".into()))?;

        // Rework iterations re-enter at the developer, but a redelivered job can
        // replay the whole graph; repository work must stay idempotent.
        let mut plan = ProjectPlan::from_state(&state);
        if plan.modules.is_empty() {
            let messages = [
                Message::system(ARCHITECT_PROMPT),
                Message::user(plan.task.clone()),
            ];
            match self.llm.invoke(&messages, &[]).await {
                Ok(response) => {
                    if let Some(body) = extract_object(&response.content) {
                        plan.modules = body
                            .get("modules")
                            .and_then(Value::as_array)
                            .map(|a| {
                                a.iter()
                                    .filter_map(Value::as_str)
                                    .map(String::from)
                                    .collect()
                            })
                            .unwrap_or_default();
                        plan.instructions = body
                            .get("instructions")
                            .and_then(Value::as_str)
                            .unwrap_or_default()
                            .to_string();
                    }
                }
                Err(e) => return Err(e),
            }
            if plan.modules.is_empty() {
                plan.modules = vec!["core".to_string()];
            }
        }

        let repository = match &project.repository_url {
            Some(url) => crate::domain::RepositoryInfo {
                url: url.clone(),
                default_branch: "main".to_string(),
            },
            None => {
                let info = match self.repo_host.create_repository(&project.slug()).await {
                    Ok(info) => info,
                    Err(RepoHostError::AlreadyExists(_)) => crate::domain::RepositoryInfo {
                        url: format!("https://git.example/{}", project.slug()),
                        default_branch: "main".to_string(),
                    },
                    Err(e) => return Err(GraphError::Transient(e.to_string())),
                };
                self.crud
                    .set_repository_url(&project.id, &info.url)
                    .await
                    .map_err(|e| GraphError::Transient(e.to_string()))?;
                // Repo creation is the Initialized waypoint of the lifecycle.
                if project
                    .status
                    .can_transition_to(crate::domain::ProjectStatus::Initialized)
                {
                    if let Err(e) = self
                        .crud
                        .update_project_status(&project.id, crate::domain::ProjectStatus::Initialized)
                        .await
                    {
                        warn!(error = %e, "status update to initialized failed");
                    }
                }
                info
            }
        };

        info!(project = %project.name, modules = ?plan.modules, "architecture ready");
        state.repository = Some(repository);
        state.project_spec = Some(
            serde_json::to_string(&plan)
                .map_err(|e| GraphError::ExecutionFailed(e.to_string()))?,
        );
        Ok((state, Next::Continue))
    }
}

fn extract_object(content: &str) -> Option<Value> {
    let start = content.find('{')?;
    let end = content.rfind('}')?;
    serde_json::from_str(&content[start..=end]).ok()
}

/// Materializes the template in a lightweight sandbox (60 s budget).
pub struct PreparerNode {
    sandbox: Arc<dyn BuildSandbox>,
}

impl PreparerNode {
    pub fn new(sandbox: Arc<dyn BuildSandbox>) -> Self {
        Self { sandbox }
    }
}

#[async_trait]
impl Node<OrchestratorState> for PreparerNode {
    fn id(&self) -> &str {
        "preparer"
    }

    async fn run(
        &self,
        state: OrchestratorState,
    ) -> Result<(OrchestratorState, Next), GraphError> {
        let repository = state
            .repository
            .clone()
            .ok_or_else(|| GraphError::ExecutionFailed("preparer without repository".into()))?;
        let plan = ProjectPlan::from_state(&state);
        self.sandbox
            .prepare_workspace(&repository.url, &plan.modules, &plan.task, PREPARE_TIMEOUT)
            .await?;
        Ok((state, Next::Continue))
    }
}

/// Drives the coding agent container: reads the task, implements, commits.
pub struct DeveloperNode {
    containers: Arc<ContainerManager>,
    /// Credential env vars injected into the agent container.
    credentials: Vec<(String, String)>,
    /// Per-thread container reuse so rework rounds keep their session context.
    agents: DashMap<String, String>,
}

impl DeveloperNode {
    pub fn new(containers: Arc<ContainerManager>, credentials: Vec<(String, String)>) -> Self {
        Self {
            containers,
            credentials,
            agents: DashMap::new(),
        }
    }

    async fn agent_for(&self, thread_id: &str) -> Result<String, GraphError> {
        if let Some(existing) = self.agents.get(thread_id) {
            return Ok(existing.clone());
        }
        let mut config = AgentContainerConfig::new(AgentKind::ClaudeCode)
            .with_capabilities(["git", "node", "python"])
            .with_allowed_tools(vec![AllowedTool::Engineering, AllowedTool::Project]);
        for (key, value) in &self.credentials {
            config = config.with_env(key.clone(), value.clone());
        }
        let agent_id = self
            .containers
            .create(config)
            .await
            .map_err(|e| GraphError::ExecutionFailed(e.to_string()))?;
        self.agents.insert(thread_id.to_string(), agent_id.clone());
        Ok(agent_id)
    }
}

#[async_trait]
impl Node<OrchestratorState> for DeveloperNode {
    fn id(&self) -> &str {
        "developer"
    }

    async fn run(
        &self,
        state: OrchestratorState,
    ) -> Result<(OrchestratorState, Next), GraphError> {
        let thread_id = state.thread_id.clone().unwrap_or_default();
        let repository = state
            .repository
            .clone()
            .ok_or_else(|| GraphError::ExecutionFailed("developer without repository".into()))?;
        let plan = ProjectPlan::from_state(&state);
        let agent_id = self.agent_for(&thread_id).await?;

        let mut prompt = format!(
            "Clone {} and read TASK.md. Write the domain specs, run the template \
             code generator, implement the controllers, then commit and push.\n\
             Instructions: {}",
            repository.url, plan.instructions
        );
        if let Some(feedback) = &state.review_feedback {
            prompt.push_str(&format!("\nPrevious test run failed:\n{}", feedback));
        }

        let reply = self
            .containers
            .send_message(&agent_id, &prompt, Some(DEVELOP_TIMEOUT))
            .await
            .map_err(|e| match e {
                crate::sandbox::SandboxError::Timeout(secs) => {
                    GraphError::Timeout(format!("developer agent after {}s", secs))
                }
                other => GraphError::ExecutionFailed(other.to_string()),
            })?;
        info!(agent_id = %agent_id, reply_len = reply.text.len(), "developer round finished");
        Ok((state, Next::Continue))
    }
}

/// Runs the suite and routes green → done, red → rework (bounded).
pub struct TesterNode {
    crud: Arc<dyn CrudApi>,
    sandbox: Arc<dyn BuildSandbox>,
}

impl TesterNode {
    pub fn new(crud: Arc<dyn CrudApi>, sandbox: Arc<dyn BuildSandbox>) -> Self {
        Self { crud, sandbox }
    }
}

#[async_trait]
impl Node<OrchestratorState> for TesterNode {
    fn id(&self) -> &str {
        "tester"
    }

    async fn run(
        &self,
        mut state: OrchestratorState,
    ) -> Result<(OrchestratorState, Next), GraphError> {
        let repository = state
            .repository
            .clone()
            .ok_or_else(|| GraphError::ExecutionFailed("tester without repository".into()))?;
        let results = self
            .sandbox
            .run_test_suite(&repository.url, TEST_TIMEOUT)
            .await?;
        info!(passed = results.passed, failed = results.failed, "test suite finished");

        if results.failed == 0 {
            state.engineering_status = EngineeringStatus::Done;
            state.test_results = Some(results);
            if let Some(project) = &state.current_project {
                if let Err(e) = self
                    .crud
                    .update_project_status(&project.id, crate::domain::ProjectStatus::Implemented)
                    .await
                {
                    warn!(error = %e, "status update to implemented failed");
                }
            }
            return Ok((state, Next::Continue));
        }

        state.engineering_iterations += 1;
        state.review_feedback = Some(results.summary.clone());
        state.test_results = Some(results);
        if state.engineering_iterations >= crate::state::MAX_ENGINEERING_ITERATIONS {
            state.engineering_status = EngineeringStatus::Blocked;
            state.needs_human_approval = true;
        }
        Ok((state, Next::Continue))
    }
}
