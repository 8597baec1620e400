//! Typed state-graph runtime: nodes + explicit and conditional edges, compiled
//! into an executable graph with durable per-node checkpointing.
//!
//! Build with [`StateGraph::add_node`] / [`StateGraph::add_edge`] (using [`START`]
//! and [`END`]) plus [`StateGraph::add_conditional_edges`], then `compile()` or
//! `compile_with_checkpointer()`. Reachability and edge validity are checked at
//! build time; at run time a checkpoint is written after every node boundary so
//! re-entering with the same `thread_id` resumes from the last good state.

mod compile_error;
mod compiled;
mod conditional;
mod next;
mod node;
mod retry;
mod state_graph;

pub use compile_error::CompilationError;
pub use compiled::CompiledStateGraph;
pub use conditional::{ConditionalRouter, ConditionalRouterFn, NextEntry};
pub use next::Next;
pub use node::Node;
pub use retry::RetryPolicy;
pub use state_graph::{StateGraph, END, START};
