//! Compiled state graph: immutable, supports invoke only.
//!
//! Built by `StateGraph::compile` or `compile_with_checkpointer`. Runs from the
//! first node; after each node the runtime persists a checkpoint (when a
//! checkpointer and `thread_id` are present) and resolves the next node from the
//! conditional router or the node's returned `Next`. An error leaves the
//! checkpoint at the last successful node boundary.

use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::Arc;

use tracing::{debug, error, warn};

use crate::error::GraphError;
use crate::memory::{Checkpoint, Checkpointer, RunnableConfig};

use super::conditional::NextEntry;
use super::retry::RetryPolicy;
use super::state_graph::END;
use super::{Next, Node};

/// Compiled graph: immutable structure, supports invoke only.
#[derive(Clone)]
pub struct CompiledStateGraph<S> {
    pub(super) nodes: HashMap<String, Arc<dyn Node<S>>>,
    pub(super) first_node_id: String,
    pub(super) next_map: HashMap<String, NextEntry<S>>,
    pub(super) checkpointer: Option<Arc<dyn Checkpointer<S>>>,
    pub(super) retry_policy: RetryPolicy,
}

impl<S> CompiledStateGraph<S>
where
    S: Clone + Send + Sync + Debug + 'static,
{
    async fn run_node_with_retry(
        &self,
        node: &Arc<dyn Node<S>>,
        state: &S,
    ) -> Result<(S, Next), GraphError> {
        let mut attempt = 0usize;
        loop {
            match node.run(state.clone()).await {
                Ok(output) => return Ok(output),
                Err(e) if e.is_retriable() && self.retry_policy.should_retry(attempt) => {
                    let delay = self.retry_policy.delay(attempt);
                    warn!(node = node.id(), attempt, error = %e, "retrying node after transient error");
                    if delay > std::time::Duration::ZERO {
                        tokio::time::sleep(delay).await;
                    }
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn save_checkpoint(&self, state: &S, config: &RunnableConfig, step: u64) {
        if let (Some(cp), Some(_)) = (&self.checkpointer, config.thread_id.as_ref()) {
            let checkpoint = Checkpoint::from_state(state.clone(), step);
            if let Err(e) = cp.put(config, &checkpoint).await {
                // A failed checkpoint write must not abort the run; the previous
                // checkpoint stays authoritative for resumption.
                error!(error = %e, "checkpoint write failed");
            }
        }
    }

    /// Runs the graph from the first node until a node routes to END.
    ///
    /// When `config.thread_id` is set and the graph was compiled with a
    /// checkpointer, the state is persisted after every node boundary.
    pub async fn invoke(&self, state: S, config: Option<RunnableConfig>) -> Result<S, GraphError> {
        if !self.nodes.contains_key(&self.first_node_id) {
            return Err(GraphError::ExecutionFailed("empty graph".into()));
        }
        let config = config.unwrap_or_default();
        let mut state = state;
        let mut current_id = self.first_node_id.clone();
        let mut step: u64 = 0;

        loop {
            let node = self
                .nodes
                .get(&current_id)
                .cloned()
                .ok_or_else(|| GraphError::ExecutionFailed(format!("unknown node {}", current_id)))?;

            debug!(node = %current_id, step, "running node");
            let (new_state, next) = match self.run_node_with_retry(&node, &state).await {
                Ok(output) => output,
                Err(e) => {
                    error!(node = %current_id, error = %e, "node failed");
                    return Err(e);
                }
            };
            state = new_state;
            step += 1;
            self.save_checkpoint(&state, &config, step).await;

            let next_id: Option<String> =
                if let Some(NextEntry::Conditional(router)) = self.next_map.get(&current_id) {
                    let target = router.resolve_next(&state);
                    debug!(from = %current_id, to = %target, "conditional routing");
                    Some(target)
                } else {
                    match next {
                        Next::End => None,
                        Next::Node(id) => Some(id),
                        Next::Continue => self.next_map.get(&current_id).and_then(|e| match e {
                            NextEntry::Unconditional(id) => Some(id.clone()),
                            NextEntry::Conditional(_) => None,
                        }),
                    }
                };

            match next_id {
                None => return Ok(state),
                Some(id) if id == END => return Ok(state),
                Some(id) => current_id = id,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    use async_trait::async_trait;

    use crate::graph::{StateGraph, START};
    use crate::memory::{Checkpointer as _, MemorySaver};

    #[derive(Clone, Debug, Default)]
    struct CountState {
        hops: Vec<String>,
    }

    struct TraceNode {
        name: &'static str,
        next: Next,
    }

    #[async_trait]
    impl Node<CountState> for TraceNode {
        fn id(&self) -> &str {
            self.name
        }
        async fn run(&self, mut state: CountState) -> Result<(CountState, Next), GraphError> {
            state.hops.push(self.name.to_string());
            Ok((state, self.next.clone()))
        }
    }

    struct FlakyNode {
        attempts: Arc<AtomicU32>,
        fail_times: u32,
    }

    #[async_trait]
    impl Node<CountState> for FlakyNode {
        fn id(&self) -> &str {
            "flaky"
        }
        async fn run(&self, mut state: CountState) -> Result<(CountState, Next), GraphError> {
            let n = self.attempts.fetch_add(1, Ordering::SeqCst);
            if n < self.fail_times {
                return Err(GraphError::Transient("blip".into()));
            }
            state.hops.push("flaky".into());
            Ok((state, Next::Continue))
        }
    }

    /// **Scenario**: Linear graph runs nodes in edge order and stops at END.
    #[tokio::test]
    async fn linear_graph_runs_in_order() {
        let mut graph = StateGraph::<CountState>::new();
        graph.add_node("a", Arc::new(TraceNode { name: "a", next: Next::Continue }));
        graph.add_node("b", Arc::new(TraceNode { name: "b", next: Next::Continue }));
        graph.add_edge(START, "a");
        graph.add_edge("a", "b");
        graph.add_edge("b", END);
        let compiled = graph.compile().unwrap();
        let out = compiled.invoke(CountState::default(), None).await.unwrap();
        assert_eq!(out.hops, vec!["a", "b"]);
    }

    /// **Scenario**: Conditional edge routes by state; the path map resolves node ids.
    #[tokio::test]
    async fn conditional_routing_resolves_from_state() {
        let mut graph = StateGraph::<CountState>::new();
        graph.add_node("gate", Arc::new(TraceNode { name: "gate", next: Next::Continue }));
        graph.add_node("left", Arc::new(TraceNode { name: "left", next: Next::Continue }));
        graph.add_edge(START, "gate");
        graph.add_conditional_edges(
            "gate",
            Arc::new(|s: &CountState| {
                if s.hops.len() == 1 {
                    "go".to_string()
                } else {
                    END.to_string()
                }
            }),
            Some(
                [("go".to_string(), "left".to_string()), (END.to_string(), END.to_string())]
                    .into_iter()
                    .collect(),
            ),
        );
        graph.add_edge("left", END);
        let compiled = graph.compile().unwrap();
        let out = compiled.invoke(CountState::default(), None).await.unwrap();
        assert_eq!(out.hops, vec!["gate", "left"]);
    }

    /// **Scenario**: Transient failures are retried under the policy and then succeed.
    #[tokio::test]
    async fn transient_errors_retried() {
        let attempts = Arc::new(AtomicU32::new(0));
        let mut graph = StateGraph::<CountState>::new();
        graph.add_node(
            "flaky",
            Arc::new(FlakyNode { attempts: attempts.clone(), fail_times: 2 }),
        );
        graph.add_edge(START, "flaky");
        graph.add_edge("flaky", END);
        let compiled = graph
            .with_retry_policy(RetryPolicy::fixed(3, std::time::Duration::from_millis(1)))
            .compile()
            .unwrap();
        let out = compiled.invoke(CountState::default(), None).await.unwrap();
        assert_eq!(out.hops, vec!["flaky"]);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    /// **Scenario**: Every node boundary writes a checkpoint under the thread id.
    #[tokio::test]
    async fn checkpoints_written_per_node() {
        let saver = Arc::new(MemorySaver::<CountState>::new());
        let mut graph = StateGraph::<CountState>::new();
        graph.add_node("a", Arc::new(TraceNode { name: "a", next: Next::Continue }));
        graph.add_node("b", Arc::new(TraceNode { name: "b", next: Next::Continue }));
        graph.add_edge(START, "a");
        graph.add_edge("a", "b");
        graph.add_edge("b", END);
        let compiled = graph.compile_with_checkpointer(saver.clone()).unwrap();
        let config = RunnableConfig::for_thread("t-1");
        compiled
            .invoke(CountState::default(), Some(config.clone()))
            .await
            .unwrap();
        assert_eq!(saver.count_for("t-1").await, 2);
        let latest = saver.latest(&config).await.unwrap().unwrap();
        assert_eq!(latest.state.hops, vec!["a", "b"]);
    }
}
