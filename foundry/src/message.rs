//! Conversation event types for graph state.
//!
//! Roles: System (first in the list), User, Assistant (optionally carrying tool
//! calls), Tool (result of one tool call). `OrchestratorState::messages` is an
//! append-only sequence of these; the coordinator node reads the history and the
//! tool-executor node appends `Tool` results.

use serde::{Deserialize, Serialize};

/// A single tool invocation produced by the coordinator LLM and consumed by the
/// tool-executor node.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ToolCall {
    /// Tool name as registered in the tool router.
    pub name: String,
    /// Arguments as JSON string; parsed by the executor when calling the tool.
    pub arguments: String,
    /// Provider call id; echoed in the matching `Message::Tool` as `call_id`.
    pub id: Option<String>,
}

/// A single message in the conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Message {
    /// System prompt; placed first in the message list.
    System(String),
    /// End-user input relayed from the chat transport.
    User(String),
    /// Model reply; `tool_calls` is non-empty when the model invoked tools this turn.
    Assistant {
        content: String,
        #[serde(default)]
        tool_calls: Vec<ToolCall>,
    },
    /// Result of one tool call, appended by the tool-executor node.
    Tool {
        call_id: String,
        name: String,
        content: String,
        #[serde(default)]
        is_error: bool,
    },
}

impl Message {
    /// Creates a system message.
    pub fn system(content: impl Into<String>) -> Self {
        Self::System(content.into())
    }

    /// Creates a user message.
    pub fn user(content: impl Into<String>) -> Self {
        Self::User(content.into())
    }

    /// Creates an assistant message without tool calls.
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::Assistant {
            content: content.into(),
            tool_calls: vec![],
        }
    }

    /// Creates an assistant message carrying tool calls.
    pub fn assistant_with_tools(content: impl Into<String>, tool_calls: Vec<ToolCall>) -> Self {
        Self::Assistant {
            content: content.into(),
            tool_calls,
        }
    }

    /// Creates a tool-result message.
    pub fn tool(
        call_id: impl Into<String>,
        name: impl Into<String>,
        content: impl Into<String>,
        is_error: bool,
    ) -> Self {
        Self::Tool {
            call_id: call_id.into(),
            name: name.into(),
            content: content.into(),
            is_error,
        }
    }

    /// The tool calls of an assistant message; empty slice for other roles.
    pub fn tool_calls(&self) -> &[ToolCall] {
        match self {
            Message::Assistant { tool_calls, .. } => tool_calls,
            _ => &[],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// **Scenario**: Constructors produce the correct variant with content.
    #[test]
    fn message_constructors() {
        assert!(matches!(&Message::system("s"), Message::System(c) if c == "s"));
        assert!(matches!(&Message::user("u"), Message::User(c) if c == "u"));
        let a = Message::assistant("a");
        assert!(matches!(&a, Message::Assistant { content, tool_calls } if content == "a" && tool_calls.is_empty()));
        let t = Message::tool("id1", "list_projects", "[]", false);
        assert!(matches!(&t, Message::Tool { call_id, .. } if call_id == "id1"));
    }

    /// **Scenario**: tool_calls() exposes assistant tool calls and is empty elsewhere.
    #[test]
    fn tool_calls_accessor() {
        let tc = ToolCall {
            name: "respond_to_user".into(),
            arguments: "{}".into(),
            id: Some("c1".into()),
        };
        let a = Message::assistant_with_tools("", vec![tc]);
        assert_eq!(a.tool_calls().len(), 1);
        assert!(Message::user("hi").tool_calls().is_empty());
    }

    /// **Scenario**: Each variant round-trips through serde.
    #[test]
    fn message_serde_roundtrip() {
        for msg in [
            Message::system("sys"),
            Message::user("usr"),
            Message::assistant_with_tools(
                "",
                vec![ToolCall {
                    name: "finish_task".into(),
                    arguments: "{\"summary\":\"done\"}".into(),
                    id: None,
                }],
            ),
            Message::tool("c1", "finish_task", "ok", false),
        ] {
            let json = serde_json::to_string(&msg).expect("serialize");
            let back: Message = serde_json::from_str(&json).expect("deserialize");
            assert_eq!(format!("{:?}", msg), format!("{:?}", back));
        }
    }
}
