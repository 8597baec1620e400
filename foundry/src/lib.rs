//! # Foundry
//!
//! Core of an autonomous software-delivery orchestrator: natural-language
//! requests arrive over a chat transport, a cheap intent gate seeds the
//! coordinator LLM's tool surface, and multi-stage pipelines (analysis → code
//! generation → testing → deployment) run as durable jobs against ephemeral
//! sandboxed agent containers.
//!
//! ## Design principles
//!
//! - **Single typed state**: one [`OrchestratorState`] record flows through
//!   every graph; partial updates merge through [`StateUpdate`] (messages
//!   append, scalars overwrite, maps merge, unknown keys rejected).
//! - **Errors are values at node boundaries**: recoverable failures live in
//!   state and route to failure sinks via conditional edges; the runtime never
//!   uses exceptions for control flow.
//! - **Jobs break the cycle**: the coordinator enqueues deploy and engineering
//!   work on the [`jobs`] dispatcher and never blocks on sub-graph completion;
//!   progress is read back from checkpoints.
//! - **Trait seams, twin impls**: every external dependency (Redis, Docker,
//!   CRUD layer, playbook runner, LLM) sits behind a trait with a production
//!   implementation and an in-memory one for tests.
//!
//! ## Main modules
//!
//! - [`graph`]: [`StateGraph`], [`CompiledStateGraph`], [`Node`], [`Next`] -
//!   build and run state graphs with per-node checkpointing.
//! - [`state`]: [`OrchestratorState`], [`StateUpdate`] and the tagged enums of
//!   the data model.
//! - [`coordinator`]: intent classifier, coordinator node, tool executor, the
//!   top-level graph and the chat-service runner.
//! - [`tools`]: the [`Tool`] trait, the capability-gated [`ToolRouter`], and
//!   every tool the coordinator can call.
//! - [`capabilities`]: [`Capability`] bundles and their registry.
//! - [`deploy`] / [`engineering`]: the job sub-pipelines.
//! - [`jobs`]: Redis-stream consumer-group dispatcher with checkpointed state.
//! - [`session`]: per-user lock state machine with TTL and thread sequencing.
//! - [`sandbox`]: container manager, agent factories, drivers, control plane.
//! - [`memory`]: [`Checkpointer`] with in-memory and Redis savers.
//! - [`llm`]: [`LlmClient`] with [`ChatOpenAI`] and [`MockLlm`].
//! - [`clients`]: CRUD layer, repository host and knowledge-search contracts.
//! - [`transport`]: chat transport streams.

pub mod capabilities;
pub mod clients;
pub mod coordinator;
pub mod deploy;
pub mod domain;
pub mod engineering;
pub mod error;
pub mod graph;
pub mod jobs;
pub mod llm;
pub mod memory;
pub mod message;
pub mod sandbox;
pub mod session;
pub mod state;
pub mod tools;
pub mod transport;

pub use capabilities::{Capability, CapabilityRegistry};
pub use coordinator::{build_coordinator_graph, run_chat_service, Orchestrator};
pub use error::GraphError;
pub use graph::{
    CompilationError, CompiledStateGraph, Next, Node, RetryPolicy, StateGraph, END, START,
};
pub use llm::{ChatOpenAI, LlmClient, LlmResponse, LlmUsage, MockLlm, ToolSpec};
pub use memory::{Checkpoint, CheckpointError, Checkpointer, MemorySaver, RedisSaver, RunnableConfig};
pub use message::{Message, ToolCall};
pub use state::{OrchestratorState, StateUpdate};
pub use tools::{Tool, ToolError, ToolOutcome, ToolRouter, ToolServices};
