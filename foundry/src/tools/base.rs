//! Base tools: always bound to the coordinator regardless of capabilities.

use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::capabilities::Capability;
use crate::clients::{KnowledgeBase as _, KnowledgeScope};
use crate::state::StateUpdate;
use crate::transport::{ChatTransport as _, OutgoingMessage};

use super::{required_str, Tool, ToolContext, ToolError, ToolOutcome};

/// Reply sent when a message arrives while the session is `processing`.
pub const BUSY_NOTICE: &str =
    "I'm still processing your previous request; please wait for it to finish.";

pub(super) fn all() -> Vec<Arc<dyn Tool>> {
    vec![
        Arc::new(RespondToUser),
        Arc::new(SearchKnowledge),
        Arc::new(RequestCapabilities),
        Arc::new(FinishTask),
    ]
}

/// Emits a message to the chat transport; optionally suspends the thread until
/// the user replies.
struct RespondToUser;

#[async_trait]
impl Tool for RespondToUser {
    fn name(&self) -> &'static str {
        "respond_to_user"
    }

    fn description(&self) -> &'static str {
        "Send a message to the user. Set awaiting_response=true when you need an answer before continuing."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "message": { "type": "string" },
                "awaiting_response": { "type": "boolean", "default": false }
            },
            "required": ["message"]
        })
    }

    async fn call(&self, args: Value, ctx: &ToolContext<'_>) -> Result<ToolOutcome, ToolError> {
        let message = required_str(&args, "message")?;
        let awaiting = args
            .get("awaiting_response")
            .and_then(Value::as_bool)
            .unwrap_or(false);
        let (user_id, chat_id) = match (ctx.state.telegram_user_id, ctx.state.chat_id) {
            (Some(u), Some(c)) => (u, c),
            _ => {
                return Err(ToolError::Invariant(
                    "no chat attached to this thread".into(),
                ))
            }
        };
        ctx.services
            .transport
            .publish(OutgoingMessage {
                user_id,
                chat_id,
                text: message.to_string(),
                correlation_id: ctx.state.correlation_id.clone().unwrap_or_default(),
            })
            .await
            .map_err(|e| ToolError::Transient(e.to_string()))?;

        let mut update = StateUpdate::default();
        if awaiting {
            update.awaiting_user_response = Some(true);
        }
        Ok(ToolOutcome {
            text: json!({ "delivered": true, "awaiting_response": awaiting }).to_string(),
            update,
        })
    }
}

/// Delegates to the RAG subsystem and returns a ranked list.
struct SearchKnowledge;

#[async_trait]
impl Tool for SearchKnowledge {
    fn name(&self) -> &'static str {
        "search_knowledge"
    }

    fn description(&self) -> &'static str {
        "Search project knowledge. Scope: docs, code, history, logs, or all."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": { "type": "string" },
                "scope": { "type": "string", "enum": ["docs", "code", "history", "logs", "all"] }
            },
            "required": ["query"]
        })
    }

    async fn call(&self, args: Value, ctx: &ToolContext<'_>) -> Result<ToolOutcome, ToolError> {
        let query = required_str(&args, "query")?;
        let scope = args
            .get("scope")
            .and_then(Value::as_str)
            .unwrap_or("all");
        let scope = KnowledgeScope::from_str(scope).map_err(ToolError::InvalidArguments)?;
        let hits = ctx
            .services
            .knowledge
            .search(query, scope, ctx.state.thread_id.as_deref())
            .await;
        Ok(ToolOutcome::text_only(
            serde_json::to_string(&hits).unwrap_or_else(|_| "[]".into()),
        ))
    }
}

/// Merges validated capabilities into the active set; their tools become
/// callable on the next LLM turn.
struct RequestCapabilities;

#[async_trait]
impl Tool for RequestCapabilities {
    fn name(&self) -> &'static str {
        "request_capabilities"
    }

    fn description(&self) -> &'static str {
        "Activate capability bundles (deploy, infrastructure, project_management, engineering, diagnose, admin). Give a short reason."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "capabilities": { "type": "array", "items": { "type": "string" } },
                "reason": { "type": "string" }
            },
            "required": ["capabilities", "reason"]
        })
    }

    async fn call(&self, args: Value, ctx: &ToolContext<'_>) -> Result<ToolOutcome, ToolError> {
        let names = args
            .get("capabilities")
            .and_then(Value::as_array)
            .ok_or_else(|| ToolError::InvalidArguments("capabilities is required".into()))?;
        let mut parsed = std::collections::BTreeSet::new();
        for name in names {
            let name = name
                .as_str()
                .ok_or_else(|| ToolError::InvalidArguments("capability names must be strings".into()))?;
            let capability = Capability::from_str(name).map_err(ToolError::InvalidArguments)?;
            if ctx.services.capabilities.get(capability).is_none() {
                return Err(ToolError::InvalidArguments(format!(
                    "capability not registered: {}",
                    name
                )));
            }
            parsed.insert(capability);
        }
        let granted: Vec<&str> = parsed.iter().map(|c| c.as_str()).collect();
        let update = StateUpdate {
            active_capabilities: parsed.clone(),
            ..Default::default()
        };
        Ok(ToolOutcome {
            text: json!({ "granted": granted }).to_string(),
            update,
        })
    }
}

/// Marks the task complete. Only after the user confirmed completion; the
/// decision is the model's, from the last user message.
struct FinishTask;

#[async_trait]
impl Tool for FinishTask {
    fn name(&self) -> &'static str {
        "finish_task"
    }

    fn description(&self) -> &'static str {
        "Close the session after the user confirmed the task is done. Summarize what was accomplished."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": { "summary": { "type": "string" } },
            "required": ["summary"]
        })
    }

    async fn call(&self, args: Value, ctx: &ToolContext<'_>) -> Result<ToolOutcome, ToolError> {
        let summary = required_str(&args, "summary")?;
        if ctx.state.last_user_message().is_none() {
            return Err(ToolError::Invariant(
                "cannot finish a thread without a user message".into(),
            ));
        }
        Ok(ToolOutcome {
            text: json!({ "finished": true, "summary": summary }).to_string(),
            update: StateUpdate {
                user_confirmed_complete: Some(true),
                ..Default::default()
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::OrchestratorState;
    use crate::tools::test_support::services;
    use crate::tools::ToolContext;

    fn state_with_chat() -> OrchestratorState {
        OrchestratorState {
            telegram_user_id: Some(625038902),
            chat_id: Some(625038902),
            correlation_id: Some("c-1".into()),
            messages: vec![crate::message::Message::user("hi")],
            ..Default::default()
        }
    }

    /// **Scenario**: respond_to_user publishes to the outgoing stream and sets
    /// awaiting_user_response only when asked to wait.
    #[tokio::test]
    async fn respond_to_user_publishes() {
        let (svc, _, _, transport, _) = services();
        let state = state_with_chat();
        let ctx = ToolContext { state: &state, services: &svc };

        let outcome = RespondToUser
            .call(json!({ "message": "You have one project." }), &ctx)
            .await
            .unwrap();
        assert!(outcome.update.awaiting_user_response.is_none());

        let outcome = RespondToUser
            .call(
                json!({ "message": "Which region?", "awaiting_response": true }),
                &ctx,
            )
            .await
            .unwrap();
        assert_eq!(outcome.update.awaiting_user_response, Some(true));
        assert_eq!(transport.sent().len(), 2);
        assert_eq!(transport.sent()[0].text, "You have one project.");
    }

    /// **Scenario**: request_capabilities validates names against the registry.
    #[tokio::test]
    async fn request_capabilities_validates() {
        let (svc, ..) = services();
        let state = state_with_chat();
        let ctx = ToolContext { state: &state, services: &svc };

        let outcome = RequestCapabilities
            .call(
                json!({ "capabilities": ["deploy", "infrastructure"], "reason": "user wants a deploy" }),
                &ctx,
            )
            .await
            .unwrap();
        assert_eq!(outcome.update.active_capabilities.len(), 2);

        let err = RequestCapabilities
            .call(json!({ "capabilities": ["teleportation"], "reason": "r" }), &ctx)
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::InvalidArguments(_)));
    }

    /// **Scenario**: finish_task flips user_confirmed_complete.
    #[tokio::test]
    async fn finish_task_sets_complete() {
        let (svc, ..) = services();
        let state = state_with_chat();
        let ctx = ToolContext { state: &state, services: &svc };
        let outcome = FinishTask
            .call(json!({ "summary": "listed projects" }), &ctx)
            .await
            .unwrap();
        assert_eq!(outcome.update.user_confirmed_complete, Some(true));
    }

    /// **Scenario**: search_knowledge returns an empty ranked list from the null
    /// backend and rejects unknown scopes.
    #[tokio::test]
    async fn search_knowledge_scopes() {
        let (svc, ..) = services();
        let state = state_with_chat();
        let ctx = ToolContext { state: &state, services: &svc };
        let outcome = SearchKnowledge
            .call(json!({ "query": "how was the bot deployed", "scope": "history" }), &ctx)
            .await
            .unwrap();
        assert_eq!(outcome.text, "[]");
        let err = SearchKnowledge
            .call(json!({ "query": "x", "scope": "emails" }), &ctx)
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::InvalidArguments(_)));
    }
}
