//! Mock LLM for tests.
//!
//! Plays back a scripted sequence of responses, one per `invoke` call, so a test
//! can drive the coordinator through a multi-turn tool conversation without a
//! network. When the script runs out it returns the fallback content with no
//! tool calls.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::error::GraphError;
use crate::llm::{LlmClient, LlmResponse, ToolSpec};
use crate::message::{Message, ToolCall};

/// One scripted turn: assistant text plus optional tool calls.
#[derive(Debug, Clone, Default)]
pub struct ScriptedTurn {
    pub content: String,
    pub tool_calls: Vec<ToolCall>,
}

/// Scripted mock LLM.
pub struct MockLlm {
    script: Mutex<std::collections::VecDeque<ScriptedTurn>>,
    fallback: String,
    calls: AtomicUsize,
    /// Tool names offered on each call, recorded for surface-bounding assertions.
    seen_tools: Mutex<Vec<Vec<String>>>,
}

impl MockLlm {
    /// Creates a mock that plays the given turns in order.
    pub fn scripted(turns: Vec<ScriptedTurn>) -> Self {
        Self {
            script: Mutex::new(turns.into()),
            fallback: "Understood.".to_string(),
            calls: AtomicUsize::new(0),
            seen_tools: Mutex::new(Vec::new()),
        }
    }

    /// Creates a mock that always answers with the given text and no tool calls.
    pub fn with_no_tool_calls(content: impl Into<String>) -> Self {
        Self {
            script: Mutex::new(Default::default()),
            fallback: content.into(),
            calls: AtomicUsize::new(0),
            seen_tools: Mutex::new(Vec::new()),
        }
    }

    /// Shorthand for a turn calling one tool.
    pub fn tool_call_turn(name: &str, arguments: serde_json::Value) -> ScriptedTurn {
        ScriptedTurn {
            content: String::new(),
            tool_calls: vec![ToolCall {
                name: name.to_string(),
                arguments: arguments.to_string(),
                id: Some(format!("call-{}", name)),
            }],
        }
    }

    /// Number of invoke calls made so far.
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Tool names bound on each call (assertion helper).
    pub fn tools_seen(&self) -> Vec<Vec<String>> {
        self.seen_tools.lock().map(|g| g.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl LlmClient for MockLlm {
    async fn invoke(
        &self,
        _messages: &[Message],
        tools: &[ToolSpec],
    ) -> Result<LlmResponse, GraphError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut seen) = self.seen_tools.lock() {
            seen.push(tools.iter().map(|t| t.name.clone()).collect());
        }
        let turn = self
            .script
            .lock()
            .ok()
            .and_then(|mut s| s.pop_front())
            .unwrap_or(ScriptedTurn {
                content: self.fallback.clone(),
                tool_calls: vec![],
            });
        Ok(LlmResponse {
            content: turn.content,
            tool_calls: turn.tool_calls,
            usage: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// **Scenario**: Scripted turns play in order, then the fallback repeats.
    #[tokio::test]
    async fn script_plays_in_order_then_fallback() {
        let llm = MockLlm::scripted(vec![
            MockLlm::tool_call_turn("list_projects", serde_json::json!({})),
            ScriptedTurn {
                content: "done".into(),
                tool_calls: vec![],
            },
        ]);
        let r1 = llm.invoke(&[], &[]).await.unwrap();
        assert_eq!(r1.tool_calls[0].name, "list_projects");
        let r2 = llm.invoke(&[], &[]).await.unwrap();
        assert_eq!(r2.content, "done");
        let r3 = llm.invoke(&[], &[]).await.unwrap();
        assert_eq!(r3.content, "Understood.");
        assert_eq!(llm.call_count(), 3);
    }

    /// **Scenario**: The tool surface offered on each call is recorded.
    #[tokio::test]
    async fn records_bound_tool_names() {
        let llm = MockLlm::with_no_tool_calls("hi");
        let spec = ToolSpec {
            name: "respond_to_user".into(),
            description: None,
            input_schema: serde_json::json!({}),
        };
        llm.invoke(&[], &[spec]).await.unwrap();
        assert_eq!(llm.tools_seen(), vec![vec!["respond_to_user".to_string()]]);
    }
}
