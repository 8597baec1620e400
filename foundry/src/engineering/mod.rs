//! Engineering sub-pipeline.
//!
//! `architect → preparer → developer → tester → {done | rework}` with the
//! rework loop bounded at three iterations; past the bound the job terminates
//! blocked with `needs_human_approval` set for human review.

mod nodes;
mod sandbox;

pub use nodes::{ArchitectNode, DeveloperNode, PreparerNode, TesterNode};
pub use sandbox::{BuildSandbox, DockerBuildSandbox, MockBuildSandbox};

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::clients::{CrudApi, RepoHost};
use crate::error::GraphError;
use crate::graph::{CompilationError, CompiledStateGraph, StateGraph, END, START};
use crate::jobs::{JobPayload, JobRunner};
use crate::llm::LlmClient;
use crate::memory::{Checkpoint, Checkpointer, RunnableConfig};
use crate::sandbox::ContainerManager;
use crate::state::{EngineeringStatus, OrchestratorState, MAX_ENGINEERING_ITERATIONS};

/// After the tester: green suite is done, red loops back while the bound
/// allows, then the job blocks for human review.
fn after_tester(state: &OrchestratorState) -> String {
    let failed = state.test_results.as_ref().map(|t| t.failed).unwrap_or(0);
    if failed == 0 || state.engineering_iterations >= MAX_ENGINEERING_ITERATIONS {
        END.to_string()
    } else {
        "developer".to_string()
    }
}

/// Builds the compiled engineering sub-graph.
pub fn build_engineering_graph(
    crud: Arc<dyn CrudApi>,
    repo_host: Arc<dyn RepoHost>,
    llm: Arc<dyn LlmClient>,
    containers: Arc<ContainerManager>,
    build_sandbox: Arc<dyn BuildSandbox>,
    agent_credentials: Vec<(String, String)>,
    checkpointer: Arc<dyn Checkpointer<OrchestratorState>>,
) -> Result<CompiledStateGraph<OrchestratorState>, CompilationError> {
    let mut graph = StateGraph::<OrchestratorState>::new();
    graph.add_node(
        "architect",
        Arc::new(ArchitectNode::new(crud.clone(), repo_host, llm)),
    );
    graph.add_node("preparer", Arc::new(PreparerNode::new(build_sandbox.clone())));
    graph.add_node(
        "developer",
        Arc::new(DeveloperNode::new(containers, agent_credentials)),
    );
    graph.add_node("tester", Arc::new(TesterNode::new(crud, build_sandbox)));
    graph.add_edge(START, "architect");
    graph.add_edge("architect", "preparer");
    graph.add_edge("preparer", "developer");
    graph.add_edge("developer", "tester");
    graph.add_conditional_edges(
        "tester",
        Arc::new(after_tester),
        Some(HashMap::from([
            ("developer".to_string(), "developer".to_string()),
            (END.to_string(), END.to_string()),
        ])),
    );
    graph.compile_with_checkpointer(checkpointer)
}

/// Job runner gluing the engineering graph into the dispatcher.
pub struct EngineeringJobRunner {
    graph: CompiledStateGraph<OrchestratorState>,
    checkpointer: Arc<dyn Checkpointer<OrchestratorState>>,
}

impl EngineeringJobRunner {
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
impl JobRunner for EngineeringJobRunner {
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
                project_spec: payload.task_description.clone(),
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
        state.engineering_status = EngineeringStatus::Blocked;
        state.needs_human_approval = true;
        state.review_feedback = Some(error.to_string());
        let _ = self
            .checkpointer
            .put(&config, &Checkpoint::from_state(state, u64::MAX))
            .await;
    }
}
