//! Graph node trait: one step over the shared state.

use std::fmt::Debug;

use async_trait::async_trait;

use crate::error::GraphError;

use super::Next;

/// One step in a graph: state in, (state out, next step).
///
/// Variants in this system: LLM nodes (invoke a model with bound tools and append
/// messages), tool-executor nodes (drain pending tool calls), and functional nodes
/// (deterministic transforms). All three implement this trait; the runtime does
/// not distinguish them.
#[async_trait]
pub trait Node<S>: Send + Sync
where
    S: Clone + Send + Sync + Debug + 'static,
{
    /// Node id (e.g. `"coordinator"`, `"env_analyzer"`). Unique within a graph.
    fn id(&self) -> &str;

    /// One step: state in, (state out, next step).
    ///
    /// Recoverable failures should be recorded in the state and routed to a
    /// failure sink via conditional edges; returning `Err` aborts the run and
    /// leaves the checkpoint at the last successful node boundary.
    async fn run(&self, state: S) -> Result<(S, Next), GraphError>;
}
