//! Top-level coordinator graph.
//!
//! `START → classify_intent → coordinator →(tools? execute_tools : END)`;
//! after tool execution the router observes the state: completion or suspension
//! ends the run, the iteration cap ends it defensively, anything else re-enters
//! the coordinator. Deploy and engineering sub-graphs are reached only through
//! tools that enqueue jobs; never by a direct edge.

use std::collections::HashMap;
use std::sync::Arc;

use crate::capabilities::CapabilityRegistry;
use crate::graph::{CompilationError, CompiledStateGraph, StateGraph, END, START};
use crate::llm::LlmClient;
use crate::memory::Checkpointer;
use crate::state::{OrchestratorState, MAX_PO_ITERATIONS};
use crate::tools::{ToolRouter, ToolServices};

use super::executor::ToolExecutorNode;
use super::intent::{IntentClassifier, IntentClassifierNode};
use super::node::CoordinatorNode;

/// Routing key after the coordinator turn.
fn after_coordinator(state: &OrchestratorState) -> String {
    if state.pending_tool_calls().is_empty() {
        END.to_string()
    } else {
        "execute_tools".to_string()
    }
}

/// Routing key after tool execution.
fn after_tools(state: &OrchestratorState) -> String {
    if state.user_confirmed_complete
        || state.awaiting_user_response
        || state.po_iterations >= MAX_PO_ITERATIONS
    {
        END.to_string()
    } else {
        "coordinator".to_string()
    }
}

/// Builds the compiled coordinator graph.
///
/// * `coordinator_llm`; the frontier model driving the tool loop.
/// * `intent_llm`; the cheap classifier model.
pub fn build_coordinator_graph(
    coordinator_llm: Arc<dyn LlmClient>,
    intent_llm: Arc<dyn LlmClient>,
    services: ToolServices,
    checkpointer: Arc<dyn Checkpointer<OrchestratorState>>,
) -> Result<CompiledStateGraph<OrchestratorState>, CompilationError> {
    let registry: Arc<CapabilityRegistry> = services.capabilities.clone();
    let router = Arc::new(ToolRouter::with_defaults(registry.clone()));

    let classify = IntentClassifierNode::new(IntentClassifier::new(intent_llm, registry.clone()));
    let coordinator = CoordinatorNode::new(coordinator_llm, router.clone(), registry);
    let executor = ToolExecutorNode::new(router, services);

    let mut graph = StateGraph::<OrchestratorState>::new();
    graph.add_node("classify_intent", Arc::new(classify));
    graph.add_node("coordinator", Arc::new(coordinator));
    graph.add_node("execute_tools", Arc::new(executor));
    graph.add_edge(START, "classify_intent");
    graph.add_edge("classify_intent", "coordinator");
    graph.add_conditional_edges(
        "coordinator",
        Arc::new(after_coordinator),
        Some(HashMap::from([
            ("execute_tools".to_string(), "execute_tools".to_string()),
            (END.to_string(), END.to_string()),
        ])),
    );
    graph.add_conditional_edges(
        "execute_tools",
        Arc::new(after_tools),
        Some(HashMap::from([
            ("coordinator".to_string(), "coordinator".to_string()),
            (END.to_string(), END.to_string()),
        ])),
    );
    graph.compile_with_checkpointer(checkpointer)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Message;

    /// **Scenario**: Routing; tool calls go to the executor; completion,
    /// suspension and the iteration cap all end the run.
    #[test]
    fn routing_table() {
        let mut state = OrchestratorState::default();
        assert_eq!(after_coordinator(&state), END);

        state.messages.push(Message::assistant_with_tools(
            "",
            vec![crate::message::ToolCall {
                name: "list_projects".into(),
                arguments: "{}".into(),
                id: None,
            }],
        ));
        assert_eq!(after_coordinator(&state), "execute_tools");

        assert_eq!(after_tools(&state), "coordinator");
        state.awaiting_user_response = true;
        assert_eq!(after_tools(&state), END);

        state.awaiting_user_response = false;
        state.user_confirmed_complete = true;
        assert_eq!(after_tools(&state), END);

        state.user_confirmed_complete = false;
        state.po_iterations = MAX_PO_ITERATIONS;
        assert_eq!(after_tools(&state), END);
    }
}
