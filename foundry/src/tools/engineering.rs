//! Engineering capability tools: trigger and status poll.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{json, Value};

use crate::clients::CrudApi as _;
use crate::jobs::{new_job_id, JobKind, JobPayload, JobQueue as _};
use crate::memory::{Checkpoint, Checkpointer as _, RunnableConfig};
use crate::state::{EngineeringStatus, OrchestratorState};

use super::{required_str, Tool, ToolContext, ToolError, ToolOutcome};

pub(super) fn all() -> Vec<Arc<dyn Tool>> {
    vec![Arc::new(TriggerEngineering), Arc::new(GetEngineeringStatus)]
}

struct TriggerEngineering;

#[async_trait]
impl Tool for TriggerEngineering {
    fn name(&self) -> &'static str {
        "trigger_engineering"
    }

    fn description(&self) -> &'static str {
        "Queue an engineering job (architecture, code, tests) for the project."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "project_id": { "type": "string" },
                "task_description": { "type": "string" }
            },
            "required": ["project_id", "task_description"]
        })
    }

    async fn call(&self, args: Value, ctx: &ToolContext<'_>) -> Result<ToolOutcome, ToolError> {
        let project_id = required_str(&args, "project_id")?;
        let task_description = required_str(&args, "task_description")?;
        let project = ctx
            .services
            .crud
            .get_project(project_id)
            .await
            .map_err(|e| ToolError::UserActionable(e.to_string()))?;

        let job_id = new_job_id(JobKind::Engineering, &project.slug());
        let payload = JobPayload {
            job_id: job_id.clone(),
            project_id: project_id.to_string(),
            user_id: ctx.state.telegram_user_id.unwrap_or_default(),
            chat_id: ctx.state.chat_id.unwrap_or_default(),
            correlation_id: ctx.state.correlation_id.clone().unwrap_or_default(),
            queued_at: Utc::now(),
            task_description: Some(task_description.to_string()),
        };
        ctx.services
            .queue
            .enqueue(JobKind::Engineering, &payload)
            .await
            .map_err(|e| ToolError::Transient(e.to_string()))?;

        let seed_state = OrchestratorState {
            current_project: Some(project),
            project_spec: Some(task_description.to_string()),
            engineering_status: EngineeringStatus::Working,
            telegram_user_id: ctx.state.telegram_user_id,
            chat_id: ctx.state.chat_id,
            user_id: ctx.state.user_id.clone(),
            thread_id: Some(job_id.clone()),
            correlation_id: ctx.state.correlation_id.clone(),
            ..Default::default()
        };
        ctx.services
            .checkpointer
            .put(
                &RunnableConfig::for_thread(&job_id),
                &Checkpoint::from_state(seed_state, 0),
            )
            .await
            .map_err(|e| ToolError::Transient(e.to_string()))?;

        Ok(ToolOutcome::text_only(
            json!({ "job_id": job_id, "status": "queued" }).to_string(),
        ))
    }
}

struct GetEngineeringStatus;

#[async_trait]
impl Tool for GetEngineeringStatus {
    fn name(&self) -> &'static str {
        "get_engineering_status"
    }

    fn description(&self) -> &'static str {
        "Poll an engineering job's checkpoint by job id."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": { "job_id": { "type": "string" } },
            "required": ["job_id"]
        })
    }

    async fn call(&self, args: Value, ctx: &ToolContext<'_>) -> Result<ToolOutcome, ToolError> {
        let job_id = required_str(&args, "job_id")?;
        let checkpoint = ctx
            .services
            .checkpointer
            .latest(&RunnableConfig::for_thread(job_id))
            .await
            .map_err(|e| ToolError::Transient(e.to_string()))?
            .ok_or_else(|| ToolError::UserActionable(format!("no such job: {}", job_id)))?;
        let state = &checkpoint.state;
        Ok(ToolOutcome::text_only(
            json!({
                "job_id": job_id,
                "engineering_status": state.engineering_status,
                "iterations": state.engineering_iterations,
                "needs_human_approval": state.needs_human_approval,
                "test_results": state.test_results,
                "review_feedback": state.review_feedback,
            })
            .to_string(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Project, ProjectConfig, ProjectStatus};
    use crate::jobs::JobQueue;
    use crate::memory::Checkpointer;
    use crate::tools::test_support::services;

    fn seed(crud: &crate::clients::InMemoryCrud) {
        crud.seed_projects(vec![Project {
            id: "p1".into(),
            name: "hello-world-bot".into(),
            owner_id: "user-1".into(),
            repository_url: None,
            status: ProjectStatus::Initialized,
            config: ProjectConfig::default(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }]);
    }

    /// **Scenario**: trigger_engineering queues the job with the task text and
    /// seeds a Working checkpoint under the job id.
    #[tokio::test]
    async fn trigger_engineering_enqueues() {
        let (svc, crud, queue, _, checkpointer) = services();
        seed(&crud);
        let state = OrchestratorState {
            user_id: Some("user-1".into()),
            ..Default::default()
        };
        let ctx = ToolContext { state: &state, services: &svc };
        let outcome = TriggerEngineering
            .call(
                json!({ "project_id": "p1", "task_description": "build a telegram echo bot" }),
                &ctx,
            )
            .await
            .unwrap();
        let body: Value = serde_json::from_str(&outcome.text).unwrap();
        let job_id = body["job_id"].as_str().unwrap();
        assert!(job_id.starts_with("engineering_hello-world-bot_"));

        let delivery = queue
            .read_one(JobKind::Engineering, "w1", std::time::Duration::ZERO)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(
            delivery.payload.task_description.as_deref(),
            Some("build a telegram echo bot")
        );

        let checkpoint = checkpointer
            .latest(&RunnableConfig::for_thread(job_id))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(
            checkpoint.state.engineering_status,
            EngineeringStatus::Working
        );
    }

    /// **Scenario**: get_engineering_status surfaces iterations and approval flag.
    #[tokio::test]
    async fn get_engineering_status_reads_checkpoint() {
        let (svc, _, _, _, checkpointer) = services();
        let mut job_state = OrchestratorState::default();
        job_state.engineering_status = EngineeringStatus::Blocked;
        job_state.engineering_iterations = 3;
        job_state.needs_human_approval = true;
        checkpointer
            .put(
                &RunnableConfig::for_thread("engineering_x_00000001"),
                &Checkpoint::from_state(job_state, 9),
            )
            .await
            .unwrap();
        let state = OrchestratorState::default();
        let ctx = ToolContext { state: &state, services: &svc };
        let outcome = GetEngineeringStatus
            .call(json!({ "job_id": "engineering_x_00000001" }), &ctx)
            .await
            .unwrap();
        let body: Value = serde_json::from_str(&outcome.text).unwrap();
        assert_eq!(body["engineering_status"], "blocked");
        assert_eq!(body["iterations"], 3);
        assert_eq!(body["needs_human_approval"], true);
    }
}
