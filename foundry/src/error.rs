//! Graph execution error types.
//!
//! Returned by `Node::run` and surfaced by `CompiledStateGraph::invoke`. Errors at
//! node boundaries are values the router can observe; nodes that can recover set
//! state fields and route to a failure sink instead of returning `Err`.

use thiserror::Error;

/// Node execution error.
///
/// `Transient` is retriable under the graph's `RetryPolicy`; everything else
/// propagates to the caller and leaves the checkpoint at its last successful state.
#[derive(Debug, Error)]
pub enum GraphError {
    /// Execution failed with a message (e.g. LLM call failed, invariant violated).
    #[error("execution failed: {0}")]
    ExecutionFailed(String),

    /// Transient dependency error (network blip, dependency 5xx). Retried by the
    /// runtime when a retry policy is configured.
    #[error("transient dependency error: {0}")]
    Transient(String),

    /// A per-call timeout elapsed.
    #[error("timed out: {0}")]
    Timeout(String),
}

impl GraphError {
    /// Whether the runtime may retry the failed node under its retry policy.
    pub fn is_retriable(&self) -> bool {
        matches!(self, GraphError::Transient(_))
    }
}
