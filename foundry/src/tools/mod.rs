//! Coordinator tools: typed callables bound to the LLM per turn.
//!
//! A tool receives JSON arguments plus a read-only view of the graph state and
//! returns a [`ToolOutcome`]: the text that becomes the tool-result message and
//! a [`StateUpdate`] merged into the state. Errors become tool-result messages
//! `{error, error_type}` the coordinator LLM can observe and react to.
//!
//! The [`ToolRouter`] enforces the bounded surface: base tools are always
//! callable, capability tools only after the capability is active.

mod admin;
mod base;
mod deploy;
mod diagnose;
mod engineering;
mod infra;
mod project;

pub use base::BUSY_NOTICE;

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

use crate::capabilities::{Capability, CapabilityRegistry};
use crate::clients::{CrudApi, KnowledgeBase, RepoHost};
use crate::jobs::JobQueue;
use crate::llm::ToolSpec;
use crate::memory::Checkpointer;
use crate::session::SessionStore;
use crate::state::{OrchestratorState, StateUpdate};
use crate::transport::ChatTransport;

/// Tool-layer error; serialized into the tool-result message as
/// `{error, error_type}`.
#[derive(Debug, Error)]
pub enum ToolError {
    #[error("unknown tool: {0}")]
    UnknownTool(String),
    #[error("invalid arguments: {0}")]
    InvalidArguments(String),
    /// Precondition violated (lock held, deploy without allocation, ...).
    #[error("{0}")]
    Invariant(String),
    /// The end user must act (missing secret, unprovisioned server, ...).
    #[error("{0}")]
    UserActionable(String),
    #[error("transient: {0}")]
    Transient(String),
    #[error("timeout: {0}")]
    Timeout(String),
}

impl ToolError {
    /// Stable tag for the `error_type` field of tool-result messages.
    pub fn error_type(&self) -> &'static str {
        match self {
            ToolError::UnknownTool(_) => "unknown_tool",
            ToolError::InvalidArguments(_) => "invalid_arguments",
            ToolError::Invariant(_) => "invariant_violation",
            ToolError::UserActionable(_) => "user_actionable",
            ToolError::Transient(_) => "transient",
            ToolError::Timeout(_) => "timeout",
        }
    }

    /// JSON body for the tool-result message.
    pub fn to_tool_result(&self) -> String {
        serde_json::json!({ "error": self.to_string(), "error_type": self.error_type() })
            .to_string()
    }
}

/// Result of a successful tool call.
#[derive(Debug, Default)]
pub struct ToolOutcome {
    /// Becomes the tool-result message content.
    pub text: String,
    /// Merged into the graph state after the call.
    pub update: StateUpdate,
}

impl ToolOutcome {
    pub fn text_only(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            update: StateUpdate::default(),
        }
    }
}

/// Shared service handles tools call out through.
#[derive(Clone)]
pub struct ToolServices {
    pub crud: Arc<dyn CrudApi>,
    pub repo_host: Arc<dyn RepoHost>,
    pub queue: Arc<dyn JobQueue>,
    pub checkpointer: Arc<dyn Checkpointer<OrchestratorState>>,
    pub transport: Arc<dyn ChatTransport>,
    pub knowledge: Arc<dyn KnowledgeBase>,
    pub sessions: Arc<dyn SessionStore>,
    pub capabilities: Arc<CapabilityRegistry>,
}

/// Read-only call context: current state plus service handles.
pub struct ToolContext<'a> {
    pub state: &'a OrchestratorState,
    pub services: &'a ToolServices,
}

/// One callable tool.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &'static str;
    fn description(&self) -> &'static str;
    fn input_schema(&self) -> Value;
    async fn call(&self, args: Value, ctx: &ToolContext<'_>) -> Result<ToolOutcome, ToolError>;

    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: self.name().to_string(),
            description: Some(self.description().to_string()),
            input_schema: self.input_schema(),
        }
    }
}

/// Parses tool-call arguments, treating an empty string as `{}`.
pub(crate) fn parse_args(arguments: &str) -> Value {
    if arguments.trim().is_empty() {
        return serde_json::json!({});
    }
    serde_json::from_str(arguments).unwrap_or_else(|e| {
        tracing::warn!(error = %e, "tool arguments JSON parse failed, using empty object");
        serde_json::json!({})
    })
}

pub(crate) fn required_str<'a>(args: &'a Value, key: &str) -> Result<&'a str, ToolError> {
    args.get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| ToolError::InvalidArguments(format!("{} is required", key)))
}

/// Dispatch table for all registered tools plus the capability gate.
pub struct ToolRouter {
    tools: HashMap<&'static str, Arc<dyn Tool>>,
    base: Vec<&'static str>,
    registry: Arc<CapabilityRegistry>,
}

impl ToolRouter {
    /// All tools of this build, in their canonical registration order.
    pub fn with_defaults(registry: Arc<CapabilityRegistry>) -> Self {
        let mut router = Self {
            tools: HashMap::new(),
            base: vec![
                "respond_to_user",
                "search_knowledge",
                "request_capabilities",
                "finish_task",
            ],
            registry,
        };
        for tool in base::all() {
            router.register(tool);
        }
        for tool in project::all() {
            router.register(tool);
        }
        for tool in infra::all() {
            router.register(tool);
        }
        for tool in deploy::all() {
            router.register(tool);
        }
        for tool in engineering::all() {
            router.register(tool);
        }
        for tool in diagnose::all() {
            router.register(tool);
        }
        for tool in admin::all() {
            router.register(tool);
        }
        router
    }

    fn register(&mut self, tool: Arc<dyn Tool>) {
        self.tools.insert(tool.name(), tool);
    }

    /// Names callable with the given active capabilities (base ∪ bundles).
    pub fn surface(&self, active: &BTreeSet<Capability>) -> Vec<&'static str> {
        let mut names: Vec<&'static str> = self.base.clone();
        for name in self.registry.tools_for(active.iter()) {
            if !names.contains(&name) {
                names.push(name);
            }
        }
        names
    }

    /// Tool specs bound to the LLM for this turn.
    pub fn specs_for(&self, active: &BTreeSet<Capability>) -> Vec<ToolSpec> {
        self.surface(active)
            .into_iter()
            .filter_map(|name| self.tools.get(name))
            .map(|t| t.spec())
            .collect()
    }

    /// Calls one tool, enforcing the bounded surface.
    pub async fn call(
        &self,
        name: &str,
        arguments: &str,
        ctx: &ToolContext<'_>,
    ) -> Result<ToolOutcome, ToolError> {
        let surface = self.surface(&ctx.state.active_capabilities);
        if !surface.iter().any(|t| *t == name) {
            if self.tools.contains_key(name) {
                return Err(ToolError::Invariant(format!(
                    "tool {} is not active; request the owning capability first",
                    name
                )));
            }
            return Err(ToolError::UnknownTool(name.to_string()));
        }
        let tool = self
            .tools
            .get(name)
            .ok_or_else(|| ToolError::UnknownTool(name.to_string()))?;
        tool.call(parse_args(arguments), ctx).await
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use test_support::services;

    /// **Scenario**: Base tools are always on the surface; capability tools only
    /// after activation.
    #[tokio::test]
    async fn surface_is_bounded_by_capabilities() {
        let (svc, ..) = services();
        let router = ToolRouter::with_defaults(svc.capabilities.clone());

        let none = router.surface(&BTreeSet::new());
        assert!(none.contains(&"respond_to_user"));
        assert!(!none.contains(&"trigger_deploy"));

        let with_deploy: BTreeSet<_> = [Capability::Deploy].into_iter().collect();
        let surface = router.surface(&with_deploy);
        assert!(surface.contains(&"trigger_deploy"));
        assert!(!surface.contains(&"trigger_engineering"));
    }

    /// **Scenario**: Calling an inactive (but known) tool is an invariant
    /// violation telling the model to request the capability.
    #[tokio::test]
    async fn inactive_tool_rejected() {
        let (svc, ..) = services();
        let router = ToolRouter::with_defaults(svc.capabilities.clone());
        let state = OrchestratorState::default();
        let ctx = ToolContext {
            state: &state,
            services: &svc,
        };
        let err = router.call("trigger_deploy", "{}", &ctx).await.unwrap_err();
        assert!(matches!(err, ToolError::Invariant(_)));
        let err = router.call("no_such_tool", "{}", &ctx).await.unwrap_err();
        assert!(matches!(err, ToolError::UnknownTool(_)));
    }

    /// **Scenario**: Tool errors serialize as {error, error_type} for the LLM.
    #[test]
    fn error_serialization() {
        let err = ToolError::UserActionable("missing secret TELEGRAM_BOT_TOKEN".into());
        let body: Value = serde_json::from_str(&err.to_tool_result()).unwrap();
        assert_eq!(body["error_type"], "user_actionable");
        assert!(body["error"].as_str().unwrap().contains("TELEGRAM_BOT_TOKEN"));
    }
}
