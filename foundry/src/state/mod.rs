//! Orchestrator graph state and its merge policy.
//!
//! One typed record flows through every graph (coordinator, deploy, engineering).
//! Nodes produce a [`StateUpdate`] (a partial record) which
//! [`OrchestratorState::apply`] merges: `messages` is appended, enumerated flags
//! and scalars are overwritten, maps and sets are merged key-wise (last writer
//! wins). Unknown keys in a serialized update are rejected at deserialization
//! (`deny_unknown_fields`).

use std::collections::{BTreeMap, BTreeSet, HashMap};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::capabilities::Capability;
use crate::domain::{Allocation, Project, RepositoryInfo};
use crate::message::Message;

/// Coordinator iterations allowed per thread before the safety cap ends the run.
pub const MAX_PO_ITERATIONS: u32 = 20;

/// Rework iterations allowed in the engineering sub-graph.
pub const MAX_ENGINEERING_ITERATIONS: u32 = 3;

/// Estimated task complexity, set by the intent classifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Complexity {
    Simple,
    Complex,
}

/// Engineering sub-pipeline status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineeringStatus {
    #[default]
    Idle,
    Working,
    Done,
    Blocked,
}

/// Deploy sub-pipeline status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeployStatus {
    #[default]
    Idle,
    Queued,
    Running,
    Success,
    Failed,
    FailedMissingSecrets,
}

impl DeployStatus {
    /// Whether this is a terminal outcome a polling client can stop at.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            DeployStatus::Success | DeployStatus::Failed | DeployStatus::FailedMissingSecrets
        )
    }
}

/// Three-way classification of a required env variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnvVarClass {
    /// Auto-generated (internal URLs, app secret keys, random tokens).
    Infra,
    /// Derived from the project (name, environment label, backend URL template).
    Computed,
    /// External key a human must supply. The analyzer defaults here when in doubt.
    User,
}

/// Classification result for one required variable. Secret **values** never enter
/// state; only the name, class, and whether a value is available.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnvVarPlan {
    pub name: String,
    pub class: EnvVarClass,
    #[serde(default)]
    pub resolved: bool,
}

/// Parsed test-suite outcome from the engineering tester node.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TestResults {
    pub passed: u32,
    pub failed: u32,
    pub summary: String,
}

/// Deploy-scoped fields of the graph state.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DeployState {
    #[serde(default)]
    pub status: DeployStatus,
    /// Coarse progress 0–100 for polling clients.
    #[serde(default)]
    pub progress: u8,
    #[serde(default)]
    pub logs: Vec<String>,
    #[serde(default)]
    pub deployed_url: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub finished_at: Option<DateTime<Utc>>,
    /// Env classification plan (names and classes only).
    #[serde(default)]
    pub plan: Vec<EnvVarPlan>,
    /// Non-secret computed values (project name, environment label, ...).
    #[serde(default)]
    pub computed: BTreeMap<String, String>,
    /// User variables with no stored value; deploy blocks until these resolve.
    #[serde(default)]
    pub missing_user_secrets: Vec<String>,
    /// Target placement chosen before `trigger_deploy`.
    #[serde(default)]
    pub target_server: Option<String>,
    #[serde(default)]
    pub target_port: Option<u16>,
}

/// The shared typed state for all graph executions.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OrchestratorState {
    /// Ordered, append-only conversation history.
    #[serde(default)]
    pub messages: Vec<Message>,
    #[serde(default)]
    pub current_project: Option<Project>,
    #[serde(default)]
    pub project_spec: Option<String>,
    #[serde(default)]
    pub project_intent: Option<String>,
    /// Allocated resources by service name.
    #[serde(default)]
    pub allocated_resources: HashMap<String, Allocation>,
    #[serde(default)]
    pub repository: Option<RepositoryInfo>,
    #[serde(default)]
    pub complexity: Option<Complexity>,
    #[serde(default)]
    pub engineering_status: EngineeringStatus,
    #[serde(default)]
    pub review_feedback: Option<String>,
    /// Monotonically non-decreasing within a thread; ≤ [`MAX_ENGINEERING_ITERATIONS`].
    #[serde(default)]
    pub engineering_iterations: u32,
    #[serde(default)]
    pub test_results: Option<TestResults>,
    #[serde(default)]
    pub needs_human_approval: bool,
    #[serde(default)]
    pub active_capabilities: BTreeSet<Capability>,
    /// Monotonically non-decreasing within a thread; ≤ [`MAX_PO_ITERATIONS`].
    #[serde(default)]
    pub po_iterations: u32,
    /// Mutually exclusive with `user_confirmed_complete`.
    #[serde(default)]
    pub awaiting_user_response: bool,
    /// Mutually exclusive with `awaiting_user_response`.
    #[serde(default)]
    pub user_confirmed_complete: bool,
    #[serde(default)]
    pub telegram_user_id: Option<i64>,
    /// Chat to reply into; carried from the incoming payload.
    #[serde(default)]
    pub chat_id: Option<i64>,
    /// Internal user id from the CRUD layer.
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub thread_id: Option<String>,
    #[serde(default)]
    pub correlation_id: Option<String>,
    #[serde(default)]
    pub deploy: DeployState,
}

/// Partial update produced by a node or tool. Fields left `None` (or empty, for
/// collections) leave the state untouched. Serialized updates with unknown keys
/// are rejected.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct StateUpdate {
    /// Appended to `messages` in order.
    pub messages: Vec<Message>,
    pub current_project: Option<Project>,
    pub project_spec: Option<String>,
    pub project_intent: Option<String>,
    /// Merged key-wise; last writer wins.
    pub allocated_resources: HashMap<String, Allocation>,
    pub repository: Option<RepositoryInfo>,
    pub complexity: Option<Complexity>,
    pub engineering_status: Option<EngineeringStatus>,
    pub review_feedback: Option<String>,
    /// Merged as `max(current, new)`; counters never decrease within a thread.
    pub engineering_iterations: Option<u32>,
    pub test_results: Option<TestResults>,
    pub needs_human_approval: Option<bool>,
    /// Union-merged into the active set.
    pub active_capabilities: BTreeSet<Capability>,
    /// Merged as `max(current, new)`.
    pub po_iterations: Option<u32>,
    pub awaiting_user_response: Option<bool>,
    pub user_confirmed_complete: Option<bool>,
    pub deploy: Option<DeployState>,
}

impl OrchestratorState {
    /// Merges a partial update into the state.
    ///
    /// Append for `messages`, overwrite for scalars and enums, key-wise merge for
    /// maps and sets, `max` for iteration counters. Setting one of the mutually
    /// exclusive completion flags clears the other.
    pub fn apply(&mut self, update: StateUpdate) {
        self.messages.extend(update.messages);
        if let Some(p) = update.current_project {
            self.current_project = Some(p);
        }
        if let Some(s) = update.project_spec {
            self.project_spec = Some(s);
        }
        if let Some(i) = update.project_intent {
            self.project_intent = Some(i);
        }
        for (k, v) in update.allocated_resources {
            self.allocated_resources.insert(k, v);
        }
        if let Some(r) = update.repository {
            self.repository = Some(r);
        }
        if let Some(c) = update.complexity {
            self.complexity = Some(c);
        }
        if let Some(s) = update.engineering_status {
            self.engineering_status = s;
        }
        if let Some(f) = update.review_feedback {
            self.review_feedback = Some(f);
        }
        if let Some(n) = update.engineering_iterations {
            self.engineering_iterations = self.engineering_iterations.max(n);
        }
        if let Some(t) = update.test_results {
            self.test_results = Some(t);
        }
        if let Some(b) = update.needs_human_approval {
            self.needs_human_approval = b;
        }
        self.active_capabilities.extend(update.active_capabilities);
        if let Some(n) = update.po_iterations {
            self.po_iterations = self.po_iterations.max(n);
        }
        if let Some(b) = update.awaiting_user_response {
            self.awaiting_user_response = b;
            if b {
                self.user_confirmed_complete = false;
            }
        }
        if let Some(b) = update.user_confirmed_complete {
            self.user_confirmed_complete = b;
            if b {
                self.awaiting_user_response = false;
            }
        }
        if let Some(d) = update.deploy {
            self.deploy = d;
        }
    }

    /// Content of the chronologically last assistant message, if any.
    pub fn last_assistant_reply(&self) -> Option<String> {
        self.messages.iter().rev().find_map(|m| match m {
            Message::Assistant { content, .. } => Some(content.clone()),
            _ => None,
        })
    }

    /// Content of the chronologically last user message, if any.
    pub fn last_user_message(&self) -> Option<&str> {
        self.messages.iter().rev().find_map(|m| match m {
            Message::User(s) => Some(s.as_str()),
            _ => None,
        })
    }

    /// The tool calls pending execution: those of the last assistant message.
    pub fn pending_tool_calls(&self) -> &[crate::message::ToolCall] {
        self.messages
            .last()
            .map(|m| m.tool_calls())
            .unwrap_or(&[])
    }
}
