//! Per-run configuration for graph execution.

/// Run configuration passed to `CompiledStateGraph::invoke`.
///
/// `thread_id` identifies the conversation or job; with a checkpointer attached
/// it keys every persisted snapshot. Without it no persistence happens.
#[derive(Debug, Clone, Default)]
pub struct RunnableConfig {
    pub thread_id: Option<String>,
}

impl RunnableConfig {
    /// Config for an existing or new thread id.
    pub fn for_thread(thread_id: impl Into<String>) -> Self {
        Self {
            thread_id: Some(thread_id.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// **Scenario**: for_thread sets the thread id; default has none.
    #[test]
    fn for_thread_sets_id() {
        assert_eq!(
            RunnableConfig::for_thread("t-9").thread_id.as_deref(),
            Some("t-9")
        );
        assert!(RunnableConfig::default().thread_id.is_none());
    }
}
