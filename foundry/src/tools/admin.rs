//! Admin capability tools.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::clients::CrudApi as _;
use crate::session::SessionStore as _;

use super::{Tool, ToolContext, ToolError, ToolOutcome};

pub(super) fn all() -> Vec<Arc<dyn Tool>> {
    vec![Arc::new(UpsertUser), Arc::new(ReleaseSession)]
}

fn required_i64(args: &Value, key: &str) -> Result<i64, ToolError> {
    args.get(key)
        .and_then(Value::as_i64)
        .ok_or_else(|| ToolError::InvalidArguments(format!("{} is required", key)))
}

struct UpsertUser;

#[async_trait]
impl Tool for UpsertUser {
    fn name(&self) -> &'static str {
        "upsert_user"
    }

    fn description(&self) -> &'static str {
        "Create or fetch the internal user record for a telegram id."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": { "telegram_id": { "type": "integer" } },
            "required": ["telegram_id"]
        })
    }

    async fn call(&self, args: Value, ctx: &ToolContext<'_>) -> Result<ToolOutcome, ToolError> {
        let telegram_id = required_i64(&args, "telegram_id")?;
        let user = ctx
            .services
            .crud
            .upsert_user(telegram_id)
            .await
            .map_err(|e| ToolError::Transient(e.to_string()))?;
        Ok(ToolOutcome::text_only(
            json!({ "user_id": user.id, "telegram_id": user.telegram_id }).to_string(),
        ))
    }
}

/// Force-releases a stuck session lock (operator action).
struct ReleaseSession;

#[async_trait]
impl Tool for ReleaseSession {
    fn name(&self) -> &'static str {
        "release_session"
    }

    fn description(&self) -> &'static str {
        "Force-release another user's session lock when it is stuck."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": { "telegram_id": { "type": "integer" } },
            "required": ["telegram_id"]
        })
    }

    async fn call(&self, args: Value, ctx: &ToolContext<'_>) -> Result<ToolOutcome, ToolError> {
        let telegram_id = required_i64(&args, "telegram_id")?;
        ctx.services
            .sessions
            .release(telegram_id)
            .await
            .map_err(|e| ToolError::Transient(e.to_string()))?;
        Ok(ToolOutcome::text_only(
            json!({ "released": telegram_id }).to_string(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{SessionLock, SessionState, SessionStore};
    use crate::state::OrchestratorState;
    use crate::tools::test_support::services;

    /// **Scenario**: release_session clears the user's lock record.
    #[tokio::test]
    async fn release_session_clears_lock() {
        let (svc, ..) = services();
        svc.sessions
            .try_acquire(
                42,
                &SessionLock {
                    thread_id: "thread_42_1".into(),
                    state: SessionState::Processing,
                    locked_at: chrono::Utc::now(),
                },
                std::time::Duration::from_secs(60),
            )
            .await
            .unwrap();
        let state = OrchestratorState::default();
        let ctx = ToolContext { state: &state, services: &svc };
        ReleaseSession
            .call(json!({ "telegram_id": 42 }), &ctx)
            .await
            .unwrap();
        assert!(svc.sessions.get(42).await.unwrap().is_none());
    }

    /// **Scenario**: upsert_user returns the internal id.
    #[tokio::test]
    async fn upsert_user_returns_id() {
        let (svc, ..) = services();
        let state = OrchestratorState::default();
        let ctx = ToolContext { state: &state, services: &svc };
        let outcome = UpsertUser
            .call(json!({ "telegram_id": 625038902 }), &ctx)
            .await
            .unwrap();
        let body: Value = serde_json::from_str(&outcome.text).unwrap();
        assert_eq!(body["telegram_id"], 625038902);
        assert!(body["user_id"].as_str().unwrap().starts_with("user-"));
    }
}
