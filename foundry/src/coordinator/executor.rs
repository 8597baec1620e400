//! Tool-executor node: drains the tool calls of the last assistant message.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::error::GraphError;
use crate::graph::{Next, Node};
use crate::message::Message;
use crate::state::OrchestratorState;
use crate::tools::{ToolContext, ToolRouter, ToolServices};

/// Executes every tool call of the preceding LLM turn in order. Each result -
/// success or error; becomes a tool-role message; successful outcomes also
/// merge their state updates (capability grants, awaiting flags, allocations).
pub struct ToolExecutorNode {
    router: Arc<ToolRouter>,
    services: ToolServices,
}

impl ToolExecutorNode {
    pub fn new(router: Arc<ToolRouter>, services: ToolServices) -> Self {
        Self { router, services }
    }
}

#[async_trait]
impl Node<OrchestratorState> for ToolExecutorNode {
    fn id(&self) -> &str {
        "execute_tools"
    }

    async fn run(
        &self,
        state: OrchestratorState,
    ) -> Result<(OrchestratorState, Next), GraphError> {
        let calls: Vec<_> = state.pending_tool_calls().to_vec();
        let mut state = state;
        for call in calls {
            let call_id = call.id.clone().unwrap_or_else(|| call.name.clone());
            let outcome = {
                let ctx = ToolContext {
                    state: &state,
                    services: &self.services,
                };
                self.router.call(&call.name, &call.arguments, &ctx).await
            };
            match outcome {
                Ok(outcome) => {
                    debug!(tool = %call.name, "tool ok");
                    state
                        .messages
                        .push(Message::tool(call_id, &call.name, outcome.text, false));
                    state.apply(outcome.update);
                }
                Err(e) => {
                    warn!(tool = %call.name, error = %e, "tool failed");
                    state
                        .messages
                        .push(Message::tool(call_id, &call.name, e.to_tool_result(), true));
                }
            }
        }
        Ok((state, Next::Continue))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capabilities::Capability;
    use crate::message::ToolCall;
    use crate::tools::test_support::services;

    fn executor() -> ToolExecutorNode {
        let (svc, ..) = services();
        let router = Arc::new(ToolRouter::with_defaults(svc.capabilities.clone()));
        ToolExecutorNode::new(router, svc)
    }

    /// **Scenario**: request_capabilities grants bundles through the executor;
    /// the result is a tool message plus an updated capability set.
    #[tokio::test]
    async fn executes_and_applies_updates() {
        let node = executor();
        let mut state = OrchestratorState::default();
        state.messages.push(Message::user("deploy it"));
        state.messages.push(Message::assistant_with_tools(
            "",
            vec![ToolCall {
                name: "request_capabilities".into(),
                arguments: r#"{"capabilities": ["deploy"], "reason": "user asked"}"#.into(),
                id: Some("c1".into()),
            }],
        ));
        let (out, _) = node.run(state).await.unwrap();
        assert!(out.active_capabilities.contains(&Capability::Deploy));
        assert!(matches!(
            out.messages.last(),
            Some(Message::Tool { is_error: false, .. })
        ));
    }

    /// **Scenario**: A failing tool becomes an error tool message with
    /// {error, error_type}; the graph continues.
    #[tokio::test]
    async fn tool_errors_become_messages() {
        let node = executor();
        let mut state = OrchestratorState::default();
        state.messages.push(Message::user("deploy"));
        state.messages.push(Message::assistant_with_tools(
            "",
            vec![ToolCall {
                name: "trigger_deploy".into(),
                arguments: r#"{"project_id": "p1"}"#.into(),
                id: Some("c1".into()),
            }],
        ));
        let (out, _) = node.run(state).await.unwrap();
        match out.messages.last() {
            Some(Message::Tool {
                is_error, content, ..
            }) => {
                assert!(is_error);
                assert!(content.contains("error_type"));
            }
            other => panic!("expected tool message, got {:?}", other),
        }
    }
}
