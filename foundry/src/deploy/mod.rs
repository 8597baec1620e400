//! Deployment sub-pipeline.
//!
//! `fetch_project_config → env_analyzer → secret_resolver → readiness_check →
//! {deployer | END} → verify_deployment → END` with a `handle_failure` sink.
//! Nodes record recoverable failures in `state.deploy.error` and the conditional
//! routers steer into the sink; secret **values** never enter the state (only
//! names, classes, and resolved flags), so checkpoints stay credential-free.

mod nodes;
mod playbook;

pub use nodes::{
    DeployerNode, EnvAnalyzerNode, FetchProjectConfigNode, HandleFailureNode, HealthProbe,
    HttpHealthProbe, MockProbe, ReadinessCheckNode, SecretResolverNode, VerifyDeploymentNode,
};
pub use playbook::{
    MockPlaybookRunner, PlaybookRequest, PlaybookResult, PlaybookRunner, RedisPlaybookRunner,
    ANSIBLE_DEPLOY_QUEUE,
};

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::clients::{CrudApi, RepoHost};
use crate::error::GraphError;
use crate::graph::{CompilationError, CompiledStateGraph, StateGraph, END, START};
use crate::jobs::{JobPayload, JobRunner};
use crate::llm::LlmClient;
use crate::memory::{Checkpoint, Checkpointer, RunnableConfig};
use crate::state::{DeployStatus, OrchestratorState};

/// Routes to the failure sink when the previous node recorded an error.
fn error_or(next: &'static str) -> impl Fn(&OrchestratorState) -> String {
    move |state: &OrchestratorState| {
        if state.deploy.error.is_some() {
            "handle_failure".to_string()
        } else {
            next.to_string()
        }
    }
}

/// After readiness: missing user secrets end the run (the coordinator relays
/// the request to the human); otherwise continue into the deployer.
fn after_readiness(state: &OrchestratorState) -> String {
    if state.deploy.status == DeployStatus::FailedMissingSecrets {
        END.to_string()
    } else if state.deploy.error.is_some() {
        "handle_failure".to_string()
    } else {
        "deployer".to_string()
    }
}

/// Builds the compiled deploy sub-graph.
pub fn build_deploy_graph(
    crud: Arc<dyn CrudApi>,
    repo_host: Arc<dyn RepoHost>,
    llm: Arc<dyn LlmClient>,
    playbooks: Arc<dyn PlaybookRunner>,
    probe: Arc<dyn HealthProbe>,
    checkpointer: Arc<dyn Checkpointer<OrchestratorState>>,
) -> Result<CompiledStateGraph<OrchestratorState>, CompilationError> {
    let mut graph = StateGraph::<OrchestratorState>::new();
    graph.add_node("fetch_project_config", Arc::new(FetchProjectConfigNode::new(crud.clone())));
    graph.add_node("env_analyzer", Arc::new(EnvAnalyzerNode::new(llm)));
    graph.add_node("secret_resolver", Arc::new(SecretResolverNode::new(crud.clone())));
    graph.add_node("readiness_check", Arc::new(ReadinessCheckNode));
    graph.add_node(
        "deployer",
        Arc::new(DeployerNode::new(crud.clone(), repo_host, playbooks)),
    );
    graph.add_node("verify_deployment", Arc::new(VerifyDeploymentNode::new(crud, probe)));
    graph.add_node("handle_failure", Arc::new(HandleFailureNode));

    graph.add_edge(START, "fetch_project_config");
    graph.add_conditional_edges(
        "fetch_project_config",
        Arc::new(error_or("env_analyzer")),
        Some(path_map(&["env_analyzer"])),
    );
    graph.add_conditional_edges(
        "env_analyzer",
        Arc::new(error_or("secret_resolver")),
        Some(path_map(&["secret_resolver"])),
    );
    graph.add_conditional_edges(
        "secret_resolver",
        Arc::new(error_or("readiness_check")),
        Some(path_map(&["readiness_check"])),
    );
    graph.add_conditional_edges(
        "readiness_check",
        Arc::new(after_readiness),
        Some(path_map(&["deployer"])),
    );
    graph.add_conditional_edges(
        "deployer",
        Arc::new(error_or("verify_deployment")),
        Some(path_map(&["verify_deployment"])),
    );
    graph.add_conditional_edges(
        "verify_deployment",
        Arc::new(error_or(END)),
        Some(path_map(&[])),
    );
    graph.add_edge("handle_failure", END);
    graph.compile_with_checkpointer(checkpointer)
}

fn path_map(targets: &[&str]) -> HashMap<String, String> {
    let mut map = HashMap::from([
        ("handle_failure".to_string(), "handle_failure".to_string()),
        (END.to_string(), END.to_string()),
    ]);
    for t in targets {
        map.insert(t.to_string(), t.to_string());
    }
    map
}

/// Job runner gluing the deploy graph into the dispatcher: the sub-graph runs
/// with `thread_id = job_id`, resuming from the checkpoint the trigger tool
/// seeded.
pub struct DeployJobRunner {
    graph: CompiledStateGraph<OrchestratorState>,
    checkpointer: Arc<dyn Checkpointer<OrchestratorState>>,
}

impl DeployJobRunner {
    pub fn new(
        graph: CompiledStateGraph<OrchestratorState>,
        checkpointer: Arc<dyn Checkpointer<OrchestratorState>>,
    ) -> Self {
        Self {
            graph,
            checkpointer,
        }
    }
}

#[async_trait]
impl JobRunner for DeployJobRunner {
    async fn run(&self, payload: &JobPayload) -> Result<(), GraphError> {
        let config = RunnableConfig::for_thread(&payload.job_id);
        let state = self
            .checkpointer
            .latest(&config)
            .await
            .map_err(|e| GraphError::Transient(e.to_string()))?
            .map(|cp| cp.state)
            .unwrap_or_else(|| OrchestratorState {
                thread_id: Some(payload.job_id.clone()),
                correlation_id: Some(payload.correlation_id.clone()),
                telegram_user_id: Some(payload.user_id),
                chat_id: Some(payload.chat_id),
                ..Default::default()
            });
        self.graph.invoke(state, Some(config)).await?;
        Ok(())
    }

    async fn record_failure(&self, payload: &JobPayload, error: &GraphError) {
        let config = RunnableConfig::for_thread(&payload.job_id);
        let mut state = self
            .checkpointer
            .latest(&config)
            .await
            .ok()
            .flatten()
            .map(|cp| cp.state)
            .unwrap_or_default();
        state.deploy.status = DeployStatus::Failed;
        state.deploy.error = Some(error.to_string());
        state.deploy.finished_at = Some(chrono::Utc::now());
        let _ = self
            .checkpointer
            .put(&config, &Checkpoint::from_state(state, u64::MAX))
            .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clients::{InMemoryCrud, InMemoryRepoHost};
    use crate::domain::{
        Allocation, Project, ProjectConfig, ProjectStatus, Server, ServerStatus,
    };
    use crate::llm::{MockLlm, ScriptedTurn};
    use crate::memory::MemorySaver;
    use chrono::Utc;

    fn seeded_crud() -> Arc<InMemoryCrud> {
        let crud = Arc::new(InMemoryCrud::new());
        let mut config = ProjectConfig::default();
        config.required_env = vec![
            "DATABASE_URL".into(),
            "SECRET_KEY".into(),
            "APP_NAME".into(),
            "TELEGRAM_BOT_TOKEN".into(),
        ];
        crud.seed_projects(vec![Project {
            id: "p1".into(),
            name: "hello-world-bot".into(),
            owner_id: "user-1".into(),
            repository_url: Some("https://git.example/hello-world-bot".into()),
            status: ProjectStatus::Verified,
            config,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }]);
        crud.seed_servers(vec![Server {
            handle: "vps-267179".into(),
            public_ip: "1.2.3.4".into(),
            is_managed: true,
            available_ram_mb: 2048,
            available_disk_mb: 10_000,
            status: ServerStatus::InUse,
            ssh_key_ref: None,
            last_health_check: None,
        }]);
        crud
    }

    fn classifier_llm() -> Arc<MockLlm> {
        Arc::new(MockLlm::scripted(vec![ScriptedTurn {
            content: r#"{"DATABASE_URL": "infra", "SECRET_KEY": "infra", "APP_NAME": "computed", "TELEGRAM_BOT_TOKEN": "user"}"#.into(),
            tool_calls: vec![],
        }]))
    }

    fn job_state() -> OrchestratorState {
        let mut state = OrchestratorState::default();
        state.thread_id = Some("deploy_hello-world-bot_00000001".into());
        state.current_project = Some(Project {
            id: "p1".into(),
            name: "hello-world-bot".into(),
            owner_id: "user-1".into(),
            repository_url: Some("https://git.example/hello-world-bot".into()),
            status: ProjectStatus::Verified,
            config: ProjectConfig::default(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        });
        state.allocated_resources.insert(
            "hello-world-bot".into(),
            Allocation {
                project_id: "p1".into(),
                server_handle: "vps-267179".into(),
                port: 8080,
                service_name: "hello-world-bot".into(),
                allocated_at: Utc::now(),
            },
        );
        state
    }

    /// **Scenario**: A declared user secret with no stored value
    /// ends the run with failed_missing_secrets and the names listed.
    #[tokio::test]
    async fn missing_user_secret_blocks_pipeline() {
        let crud = seeded_crud();
        let graph = build_deploy_graph(
            crud.clone(),
            Arc::new(InMemoryRepoHost::new()),
            classifier_llm(),
            Arc::new(MockPlaybookRunner::succeeding()),
            Arc::new(MockProbe::healthy()),
            Arc::new(MemorySaver::new()),
        )
        .unwrap();

        let out = graph.invoke(job_state(), None).await.unwrap();
        assert_eq!(out.deploy.status, DeployStatus::FailedMissingSecrets);
        assert_eq!(out.deploy.missing_user_secrets, vec!["TELEGRAM_BOT_TOKEN"]);
        // Infra secrets were generated and stored even though the run blocked.
        assert!(crud.secret("p1", "SECRET_KEY").is_some());
        // The blocked run never reached the playbook runner.
        assert!(out.deploy.deployed_url.is_none());
    }

    /// **Scenario**: With every secret resolvable the pipeline runs
    /// to success and records the deployed URL.
    #[tokio::test]
    async fn full_deploy_success() {
        let crud = seeded_crud();
        crud.store_project_secret("p1", "TELEGRAM_BOT_TOKEN", "123:abc")
            .await
            .unwrap();
        let repo_host = Arc::new(InMemoryRepoHost::new());
        let playbooks = Arc::new(MockPlaybookRunner::succeeding());
        let graph = build_deploy_graph(
            crud.clone(),
            repo_host.clone(),
            classifier_llm(),
            playbooks.clone(),
            Arc::new(MockProbe::healthy()),
            Arc::new(MemorySaver::new()),
        )
        .unwrap();

        let out = graph.invoke(job_state(), None).await.unwrap();
        assert_eq!(out.deploy.status, DeployStatus::Success);
        assert_eq!(out.deploy.deployed_url.as_deref(), Some("http://1.2.3.4:8080"));
        assert!(out.deploy.finished_at.is_some());
        assert_eq!(out.deploy.progress, 100);

        // The playbook request carried the resolved env but the state does not.
        let request = playbooks.requests()[0].clone();
        assert!(request.env.contains_key("TELEGRAM_BOT_TOKEN"));
        assert!(request.env.contains_key("SECRET_KEY"));
        let json = serde_json::to_string(&out).unwrap();
        assert!(!json.contains("123:abc"));
        // CI secrets were uploaded to the repository host.
        assert!(repo_host
            .uploaded_secret_names()
            .contains(&"TELEGRAM_BOT_TOKEN".to_string()));
    }

    /// **Scenario**: A failed health probe routes into the failure sink.
    #[tokio::test]
    async fn failed_probe_routes_to_failure() {
        let crud = seeded_crud();
        crud.store_project_secret("p1", "TELEGRAM_BOT_TOKEN", "123:abc")
            .await
            .unwrap();
        let graph = build_deploy_graph(
            crud,
            Arc::new(InMemoryRepoHost::new()),
            classifier_llm(),
            Arc::new(MockPlaybookRunner::succeeding()),
            Arc::new(MockProbe::unhealthy()),
            Arc::new(MemorySaver::new()),
        )
        .unwrap();
        let out = graph.invoke(job_state(), None).await.unwrap();
        assert_eq!(out.deploy.status, DeployStatus::Failed);
        assert!(out.deploy.error.is_some());
    }

    /// **Scenario**: record_failure writes a terminal Failed checkpoint the
    /// status tool can read.
    #[tokio::test]
    async fn record_failure_writes_terminal_state() {
        let crud = seeded_crud();
        let checkpointer = Arc::new(MemorySaver::new());
        let graph = build_deploy_graph(
            crud,
            Arc::new(InMemoryRepoHost::new()),
            classifier_llm(),
            Arc::new(MockPlaybookRunner::succeeding()),
            Arc::new(MockProbe::healthy()),
            checkpointer.clone(),
        )
        .unwrap();
        let runner = DeployJobRunner::new(graph, checkpointer.clone());
        let payload = JobPayload {
            job_id: "deploy_x_0000dead".into(),
            project_id: "p1".into(),
            user_id: 1,
            chat_id: 1,
            correlation_id: "c".into(),
            queued_at: Utc::now(),
            task_description: None,
        };
        runner
            .record_failure(&payload, &GraphError::ExecutionFailed("boom".into()))
            .await;
        let checkpoint = checkpointer
            .latest(&RunnableConfig::for_thread("deploy_x_0000dead"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(checkpoint.state.deploy.status, DeployStatus::Failed);
        assert_eq!(checkpoint.state.deploy.error.as_deref(), Some("execution failed: boom"));
    }
}
