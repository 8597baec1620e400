//! Deploy capability tools: readiness, trigger, status poll, secret storage.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{json, Value};

use crate::clients::CrudApi as _;
use crate::jobs::{new_job_id, JobKind, JobPayload, JobQueue as _};
use crate::memory::{Checkpoint, Checkpointer as _, RunnableConfig};
use crate::state::{DeployState, DeployStatus, OrchestratorState, StateUpdate};

use super::{required_str, Tool, ToolContext, ToolError, ToolOutcome};

pub(super) fn all() -> Vec<Arc<dyn Tool>> {
    vec![
        Arc::new(CheckDeployReadiness),
        Arc::new(TriggerDeploy),
        Arc::new(GetDeployStatus),
        Arc::new(StoreProjectSecret),
    ]
}

/// What a deploy needs before it can be queued.
async fn readiness(
    ctx: &ToolContext<'_>,
    project_id: &str,
) -> Result<(Value, Vec<&'static str>), ToolError> {
    let project = ctx
        .services
        .crud
        .get_project(project_id)
        .await
        .map_err(|e| ToolError::UserActionable(e.to_string()))?;
    let mut missing = Vec::new();
    if project.repository_url.is_none() {
        missing.push("repository");
    }
    if ctx.state.allocated_resources.is_empty() {
        missing.push("allocated_resources");
    }
    let report = json!({
        "ready": missing.is_empty(),
        "missing": missing,
        "project_id": project.id,
    });
    Ok((report, missing))
}

struct CheckDeployReadiness;

#[async_trait]
impl Tool for CheckDeployReadiness {
    fn name(&self) -> &'static str {
        "check_deploy_readiness"
    }

    fn description(&self) -> &'static str {
        "Check whether a project can be deployed; lists what is missing."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": { "project_id": { "type": "string" } },
            "required": ["project_id"]
        })
    }

    async fn call(&self, args: Value, ctx: &ToolContext<'_>) -> Result<ToolOutcome, ToolError> {
        let project_id = required_str(&args, "project_id")?;
        let (report, _) = readiness(ctx, project_id).await?;
        Ok(ToolOutcome::text_only(report.to_string()))
    }
}

struct TriggerDeploy;

#[async_trait]
impl Tool for TriggerDeploy {
    fn name(&self) -> &'static str {
        "trigger_deploy"
    }

    fn description(&self) -> &'static str {
        "Queue a deployment job for the project. Requires readiness (repository + allocated resources)."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": { "project_id": { "type": "string" } },
            "required": ["project_id"]
        })
    }

    async fn call(&self, args: Value, ctx: &ToolContext<'_>) -> Result<ToolOutcome, ToolError> {
        let project_id = required_str(&args, "project_id")?;

        // One deploy in flight per user: the session's thread state carries the
        // last queued deploy.
        if matches!(
            ctx.state.deploy.status,
            DeployStatus::Queued | DeployStatus::Running
        ) {
            return Err(ToolError::Invariant(
                "a deploy is already in progress for this session".into(),
            ));
        }

        let (_, missing) = readiness(ctx, project_id).await?;
        if !missing.is_empty() {
            return Err(ToolError::UserActionable(format!(
                "project is not deploy-ready; missing: {}",
                missing.join(", ")
            )));
        }

        let project = ctx
            .services
            .crud
            .get_project(project_id)
            .await
            .map_err(|e| ToolError::Transient(e.to_string()))?;
        let job_id = new_job_id(JobKind::Deploy, &project.slug());
        let allocation = ctx.state.allocated_resources.values().next();

        let payload = JobPayload {
            job_id: job_id.clone(),
            project_id: project_id.to_string(),
            user_id: ctx.state.telegram_user_id.unwrap_or_default(),
            chat_id: ctx.state.chat_id.unwrap_or_default(),
            correlation_id: ctx.state.correlation_id.clone().unwrap_or_default(),
            queued_at: Utc::now(),
            task_description: None,
        };
        ctx.services
            .queue
            .enqueue(JobKind::Deploy, &payload)
            .await
            .map_err(|e| ToolError::Transient(e.to_string()))?;

        // Seed the job's checkpoint so status polls resolve before the worker
        // picks the entry up.
        let deploy = DeployState {
            status: DeployStatus::Queued,
            started_at: Some(Utc::now()),
            target_server: allocation.map(|a| a.server_handle.clone()),
            target_port: allocation.map(|a| a.port),
            ..Default::default()
        };
        let seed_state = OrchestratorState {
            current_project: Some(project),
            allocated_resources: ctx.state.allocated_resources.clone(),
            telegram_user_id: ctx.state.telegram_user_id,
            chat_id: ctx.state.chat_id,
            user_id: ctx.state.user_id.clone(),
            thread_id: Some(job_id.clone()),
            correlation_id: ctx.state.correlation_id.clone(),
            deploy: deploy.clone(),
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

        Ok(ToolOutcome {
            text: json!({ "job_id": job_id, "status": "queued" }).to_string(),
            update: StateUpdate {
                deploy: Some(deploy),
                ..Default::default()
            },
        })
    }
}

struct GetDeployStatus;

#[async_trait]
impl Tool for GetDeployStatus {
    fn name(&self) -> &'static str {
        "get_deploy_status"
    }

    fn description(&self) -> &'static str {
        "Poll a deploy job's checkpoint by job id."
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
        let deploy = &checkpoint.state.deploy;
        Ok(ToolOutcome::text_only(
            json!({
                "job_id": job_id,
                "status": deploy.status,
                "progress": deploy.progress,
                "deployed_url": deploy.deployed_url,
                "missing_user_secrets": deploy.missing_user_secrets,
                "error": deploy.error,
            })
            .to_string(),
        ))
    }
}

struct StoreProjectSecret;

#[async_trait]
impl Tool for StoreProjectSecret {
    fn name(&self) -> &'static str {
        "store_project_secret"
    }

    fn description(&self) -> &'static str {
        "Store one user-supplied secret value for a project. The value is never echoed back."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "project_id": { "type": "string" },
                "name": { "type": "string" },
                "value": { "type": "string" }
            },
            "required": ["project_id", "name", "value"]
        })
    }

    async fn call(&self, args: Value, ctx: &ToolContext<'_>) -> Result<ToolOutcome, ToolError> {
        let project_id = required_str(&args, "project_id")?;
        let name = required_str(&args, "name")?;
        let value = required_str(&args, "value")?;
        ctx.services
            .crud
            .store_project_secret(project_id, name, value)
            .await
            .map_err(|e| ToolError::Transient(e.to_string()))?;
        Ok(ToolOutcome::text_only(
            json!({ "stored": name }).to_string(),
        ))
    }
}
