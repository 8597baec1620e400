//! The coordinator ("product owner"): intent gate, central LLM node with a
//! bounded tool surface, tool-executor node, and the top-level graph.
//!
//! The coordinator never runs deploy or engineering work inline; its tools
//! enqueue jobs on the dispatcher and progress is observed through checkpoint
//! polls. Routing per turn: `user_confirmed_complete` → END (session released),
//! `awaiting_user_response` → END (session held), iteration cap → END,
//! otherwise back into the coordinator.

mod executor;
mod graph;
mod intent;
mod node;
mod prompt;
mod runner;

pub use executor::ToolExecutorNode;
pub use graph::build_coordinator_graph;
pub use intent::{IntentClassifier, IntentDecision, IntentClassifierNode};
pub use node::CoordinatorNode;
pub use prompt::{build_system_prompt, COORDINATOR_SYSTEM_PROMPT};
pub use runner::{run_chat_service, HandleError, Orchestrator};
