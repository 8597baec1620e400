//! The central coordinator LLM node.

use std::sync::Arc;

use async_trait::async_trait;

use crate::capabilities::CapabilityRegistry;
use crate::error::GraphError;
use crate::graph::{Next, Node};
use crate::llm::LlmClient;
use crate::message::Message;
use crate::state::{OrchestratorState, StateUpdate};
use crate::tools::ToolRouter;

use super::prompt::build_system_prompt;

/// Coordinator node: binds base ∪ active-capability tools, invokes the LLM, and
/// appends the assistant message (with any tool calls). Each entry counts one
/// iteration toward the per-thread safety cap.
pub struct CoordinatorNode {
    llm: Arc<dyn LlmClient>,
    router: Arc<ToolRouter>,
    registry: Arc<CapabilityRegistry>,
}

impl CoordinatorNode {
    pub fn new(
        llm: Arc<dyn LlmClient>,
        router: Arc<ToolRouter>,
        registry: Arc<CapabilityRegistry>,
    ) -> Self {
        Self {
            llm,
            router,
            registry,
        }
    }
}

#[async_trait]
impl Node<OrchestratorState> for CoordinatorNode {
    fn id(&self) -> &str {
        "coordinator"
    }

    async fn run(
        &self,
        state: OrchestratorState,
    ) -> Result<(OrchestratorState, Next), GraphError> {
        let system = build_system_prompt(&state, &self.registry);
        let mut messages = Vec::with_capacity(state.messages.len() + 1);
        messages.push(Message::system(system));
        messages.extend(state.messages.iter().cloned());

        let specs = self.router.specs_for(&state.active_capabilities);
        let response = self.llm.invoke(&messages, &specs).await?;

        let mut state = state;
        let iteration = state.po_iterations + 1;
        state.apply(StateUpdate {
            messages: vec![Message::assistant_with_tools(
                response.content,
                response.tool_calls,
            )],
            po_iterations: Some(iteration),
            ..Default::default()
        });
        Ok((state, Next::Continue))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capabilities::Capability;
    use crate::llm::MockLlm;
    use crate::tools::test_support::services;

    /// **Scenario**: The node binds only the bounded tool surface and appends
    /// one assistant message per iteration.
    #[tokio::test]
    async fn binds_bounded_surface_and_counts_iterations() {
        let (svc, ..) = services();
        let llm = Arc::new(MockLlm::with_no_tool_calls("hello"));
        let router = Arc::new(ToolRouter::with_defaults(svc.capabilities.clone()));
        let node = CoordinatorNode::new(llm.clone(), router, svc.capabilities.clone());

        let mut state = OrchestratorState::default();
        state.messages.push(Message::user("what projects do I have?"));
        state.active_capabilities.insert(Capability::ProjectManagement);

        let (out, _) = node.run(state).await.unwrap();
        assert_eq!(out.po_iterations, 1);
        assert!(matches!(
            out.messages.last(),
            Some(Message::Assistant { .. })
        ));

        let bound = &llm.tools_seen()[0];
        assert!(bound.contains(&"respond_to_user".to_string()));
        assert!(bound.contains(&"list_projects".to_string()));
        assert!(!bound.contains(&"trigger_deploy".to_string()));
    }
}
