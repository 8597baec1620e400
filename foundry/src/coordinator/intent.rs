//! Intent classifier: a cheap-model gate that seeds the capability set.
//!
//! Runs once per new thread and is skipped on continuations. Its whole purpose
//! is token economy: hold the coordinator's tool surface down to the two or
//! three bundles the task actually needs.

use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::capabilities::{Capability, CapabilityRegistry};
use crate::error::GraphError;
use crate::graph::{Next, Node};
use crate::llm::LlmClient;
use crate::message::Message;
use crate::state::{Complexity, OrchestratorState, StateUpdate};

const INTENT_PROMPT: &str = "\
You route user requests for a software-delivery assistant. Given the user's \
message and thread hints, reply with JSON only:
{\"capabilities\": [..], \"task_summary\": \"...\", \"complexity\": \"simple\"|\"complex\"}
Pick the smallest set of capability bundles (usually 1-3) from:
";

/// Classifier output.
#[derive(Debug, Clone)]
pub struct IntentDecision {
    pub capabilities: Vec<Capability>,
    pub task_summary: String,
    pub complexity: Complexity,
}

#[derive(Deserialize)]
struct RawDecision {
    #[serde(default)]
    capabilities: Vec<String>,
    #[serde(default)]
    task_summary: String,
    #[serde(default)]
    complexity: Option<String>,
}

/// Cheap LLM call producing the initial capability set and task summary.
pub struct IntentClassifier {
    llm: Arc<dyn LlmClient>,
    registry: Arc<CapabilityRegistry>,
}

impl IntentClassifier {
    pub fn new(llm: Arc<dyn LlmClient>, registry: Arc<CapabilityRegistry>) -> Self {
        Self { llm, registry }
    }

    fn fallback(message: &str) -> IntentDecision {
        IntentDecision {
            capabilities: vec![Capability::ProjectManagement],
            task_summary: message.chars().take(120).collect(),
            complexity: Complexity::Simple,
        }
    }

    /// Classifies one message with minimal thread hints. Unknown capability
    /// names from the model are dropped with a warning; an unparseable reply
    /// falls back to project_management.
    pub async fn classify(
        &self,
        message: &str,
        has_current_project: bool,
        has_allocated_resources: bool,
        last_thread_id: Option<&str>,
    ) -> IntentDecision {
        let prompt = format!(
            "{}{}\n\nHints: has_current_project={}, has_allocated_resources={}, last_thread={}",
            INTENT_PROMPT,
            self.registry.describe_all(),
            has_current_project,
            has_allocated_resources,
            last_thread_id.unwrap_or("none")
        );
        let messages = [Message::system(prompt), Message::user(message.to_string())];
        let response = match self.llm.invoke(&messages, &[]).await {
            Ok(r) => r,
            Err(e) => {
                warn!(error = %e, "intent classification failed; defaulting");
                return Self::fallback(message);
            }
        };

        let raw: RawDecision = match extract_json(&response.content)
            .and_then(|v| serde_json::from_value(v).ok())
        {
            Some(raw) => raw,
            None => {
                warn!("intent reply not parseable; defaulting");
                return Self::fallback(message);
            }
        };

        let mut capabilities = Vec::new();
        for name in &raw.capabilities {
            match Capability::from_str(name) {
                Ok(cap) if self.registry.get(cap).is_some() => {
                    if !capabilities.contains(&cap) {
                        capabilities.push(cap);
                    }
                }
                _ => warn!(name = %name, "classifier suggested unknown capability; dropped"),
            }
        }
        if capabilities.is_empty() {
            capabilities.push(Capability::ProjectManagement);
        }
        let complexity = match raw.complexity.as_deref() {
            Some("complex") => Complexity::Complex,
            _ => Complexity::Simple,
        };
        let decision = IntentDecision {
            capabilities,
            task_summary: if raw.task_summary.is_empty() {
                message.chars().take(120).collect()
            } else {
                raw.task_summary
            },
            complexity,
        };
        debug!(capabilities = ?decision.capabilities, "intent classified");
        decision
    }
}

/// Pulls the first JSON object out of a model reply (tolerates fencing).
fn extract_json(content: &str) -> Option<Value> {
    let start = content.find('{')?;
    let end = content.rfind('}')?;
    serde_json::from_str(&content[start..=end]).ok()
}

/// Graph node wrapping the classifier. Skipped (no-op) on continuations -
/// any thread that already has active capabilities or an assistant turn.
pub struct IntentClassifierNode {
    classifier: IntentClassifier,
}

impl IntentClassifierNode {
    pub fn new(classifier: IntentClassifier) -> Self {
        Self { classifier }
    }
}

#[async_trait]
impl Node<OrchestratorState> for IntentClassifierNode {
    fn id(&self) -> &str {
        "classify_intent"
    }

    async fn run(
        &self,
        state: OrchestratorState,
    ) -> Result<(OrchestratorState, Next), GraphError> {
        let is_continuation = !state.active_capabilities.is_empty()
            || state
                .messages
                .iter()
                .any(|m| matches!(m, Message::Assistant { .. }));
        if is_continuation {
            return Ok((state, Next::Continue));
        }
        let message = state.last_user_message().unwrap_or_default().to_string();
        let decision = self
            .classifier
            .classify(
                &message,
                state.current_project.is_some(),
                !state.allocated_resources.is_empty(),
                state.thread_id.as_deref(),
            )
            .await;
        let mut state = state;
        state.apply(StateUpdate {
            active_capabilities: decision.capabilities.iter().copied().collect(),
            project_intent: Some(decision.task_summary),
            complexity: Some(decision.complexity),
            ..Default::default()
        });
        Ok((state, Next::Continue))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{MockLlm, ScriptedTurn};

    fn classifier(reply: &str) -> IntentClassifier {
        IntentClassifier::new(
            Arc::new(MockLlm::scripted(vec![ScriptedTurn {
                content: reply.to_string(),
                tool_calls: vec![],
            }])),
            Arc::new(CapabilityRegistry::with_defaults()),
        )
    }

    /// **Scenario**: A clean JSON reply selects the named capabilities.
    #[tokio::test]
    async fn parses_capabilities() {
        let c = classifier(
            r#"{"capabilities": ["deploy", "infrastructure"], "task_summary": "deploy the bot", "complexity": "complex"}"#,
        );
        let decision = c.classify("deploy hello-world-bot", true, false, None).await;
        assert_eq!(
            decision.capabilities,
            vec![Capability::Deploy, Capability::Infrastructure]
        );
        assert_eq!(decision.complexity, Complexity::Complex);
    }

    /// **Scenario**: Unknown capability names are dropped; empty set falls back
    /// to project_management.
    #[tokio::test]
    async fn unknown_capabilities_dropped() {
        let c = classifier(r#"{"capabilities": ["time_travel"], "task_summary": "?"}"#);
        let decision = c.classify("what projects do I have?", false, false, None).await;
        assert_eq!(decision.capabilities, vec![Capability::ProjectManagement]);
    }

    /// **Scenario**: Unparseable replies fall back instead of failing the thread.
    #[tokio::test]
    async fn garbage_reply_falls_back() {
        let c = classifier("sure, I'd pick the deployment tools for that");
        let decision = c.classify("deploy it", false, false, None).await;
        assert_eq!(decision.capabilities, vec![Capability::ProjectManagement]);
    }

    /// **Scenario**: The node is a no-op on continuations (active capabilities
    /// already present), so the gate runs once per thread.
    #[tokio::test]
    async fn node_skips_continuations() {
        let c = classifier(r#"{"capabilities": ["deploy"], "task_summary": "x"}"#);
        let node = IntentClassifierNode::new(c);
        let mut state = OrchestratorState::default();
        state.messages.push(Message::user("continue please"));
        state.active_capabilities.insert(Capability::Engineering);
        let (out, _) = node.run(state).await.unwrap();
        assert!(!out.active_capabilities.contains(&Capability::Deploy));
    }

    /// **Scenario**: Fenced JSON is still extracted.
    #[test]
    fn extract_json_tolerates_fencing() {
        let v = extract_json("```json\n{\"capabilities\": []}\n```").unwrap();
        assert!(v.get("capabilities").is_some());
    }
}
