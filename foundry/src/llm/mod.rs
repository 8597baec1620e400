//! LLM client abstraction for the coordinator and classifier nodes.
//!
//! A node depends on a callable that takes the message history plus the tools
//! bound for this turn and returns assistant text with optional tool calls.
//! Implementations: [`ChatOpenAI`] (real API) and [`MockLlm`] (scripted, tests).

mod mock;
mod openai;

pub use mock::{MockLlm, ScriptedTurn};
pub use openai::ChatOpenAI;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::GraphError;
use crate::message::{Message, ToolCall};

/// Tool specification bound to an LLM call (name, description, JSON Schema).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: Option<String>,
    pub input_schema: Value,
}

/// Token usage for one LLM call.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct LlmUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

/// Response from an LLM completion: assistant text and optional tool calls.
pub struct LlmResponse {
    pub content: String,
    /// Tool calls for this turn; empty means the model answered in text only.
    pub tool_calls: Vec<ToolCall>,
    pub usage: Option<LlmUsage>,
}

/// LLM client: given messages and the tools exposed this turn, returns assistant
/// text and optional tool calls.
///
/// The tool surface changes per turn (capability activation), so tools are an
/// argument rather than client construction state.
#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn invoke(
        &self,
        messages: &[Message],
        tools: &[ToolSpec],
    ) -> Result<LlmResponse, GraphError>;
}
