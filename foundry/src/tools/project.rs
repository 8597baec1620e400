//! Project-management capability tools.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::clients::CrudApi as _;
use crate::domain::ProjectStatus;
use crate::state::StateUpdate;

use super::{required_str, Tool, ToolContext, ToolError, ToolOutcome};

pub(super) fn all() -> Vec<Arc<dyn Tool>> {
    vec![
        Arc::new(ListProjects),
        Arc::new(GetProject),
        Arc::new(UpdateProjectStatus),
    ]
}

fn owner_id(ctx: &ToolContext<'_>) -> Result<String, ToolError> {
    ctx.state
        .user_id
        .clone()
        .ok_or_else(|| ToolError::Invariant("no internal user id on this thread".into()))
}

struct ListProjects;

#[async_trait]
impl Tool for ListProjects {
    fn name(&self) -> &'static str {
        "list_projects"
    }

    fn description(&self) -> &'static str {
        "List the user's projects with their lifecycle status."
    }

    fn input_schema(&self) -> Value {
        json!({ "type": "object", "properties": {} })
    }

    async fn call(&self, _args: Value, ctx: &ToolContext<'_>) -> Result<ToolOutcome, ToolError> {
        let owner = owner_id(ctx)?;
        let projects = ctx
            .services
            .crud
            .list_projects(&owner)
            .await
            .map_err(|e| ToolError::Transient(e.to_string()))?;
        let listing: Vec<Value> = projects
            .iter()
            .map(|p| json!({ "id": p.id, "name": p.name, "status": p.status }))
            .collect();
        Ok(ToolOutcome::text_only(json!(listing).to_string()))
    }
}

struct GetProject;

#[async_trait]
impl Tool for GetProject {
    fn name(&self) -> &'static str {
        "get_project"
    }

    fn description(&self) -> &'static str {
        "Fetch one project and make it the current project of this thread."
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
        let project = ctx
            .services
            .crud
            .get_project(project_id)
            .await
            .map_err(|e| ToolError::UserActionable(e.to_string()))?;
        let text = json!({
            "id": project.id,
            "name": project.name,
            "status": project.status,
            "repository_url": project.repository_url,
            "required_env": project.config.required_env,
        })
        .to_string();
        Ok(ToolOutcome {
            text,
            update: StateUpdate {
                current_project: Some(project),
                ..Default::default()
            },
        })
    }
}

struct UpdateProjectStatus;

#[async_trait]
impl Tool for UpdateProjectStatus {
    fn name(&self) -> &'static str {
        "update_project_status"
    }

    fn description(&self) -> &'static str {
        "Move a project along its lifecycle. Transitions outside the lifecycle DAG are rejected."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "project_id": { "type": "string" },
                "status": { "type": "string" }
            },
            "required": ["project_id", "status"]
        })
    }

    async fn call(&self, args: Value, ctx: &ToolContext<'_>) -> Result<ToolOutcome, ToolError> {
        let project_id = required_str(&args, "project_id")?;
        let status: ProjectStatus =
            serde_json::from_value(json!(required_str(&args, "status")?))
                .map_err(|e| ToolError::InvalidArguments(format!("status: {}", e)))?;
        let project = ctx
            .services
            .crud
            .get_project(project_id)
            .await
            .map_err(|e| ToolError::UserActionable(e.to_string()))?;
        if !project.status.can_transition_to(status) {
            return Err(ToolError::Invariant(format!(
                "lifecycle forbids {:?} -> {:?}",
                project.status, status
            )));
        }
        let updated = ctx
            .services
            .crud
            .update_project_status(project_id, status)
            .await
            .map_err(|e| ToolError::Transient(e.to_string()))?;
        Ok(ToolOutcome {
            text: json!({ "id": updated.id, "status": updated.status }).to_string(),
            update: StateUpdate {
                current_project: Some(updated),
                ..Default::default()
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Project, ProjectConfig};
    use crate::state::OrchestratorState;
    use crate::tools::test_support::services;
    use chrono::Utc;

    fn project(id: &str, owner: &str, status: ProjectStatus) -> Project {
        Project {
            id: id.into(),
            name: "hello-world-bot".into(),
            owner_id: owner.into(),
            repository_url: None,
            status,
            config: ProjectConfig::default(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn state_for(owner: &str) -> OrchestratorState {
        OrchestratorState {
            user_id: Some(owner.into()),
            ..Default::default()
        }
    }

    /// **Scenario**: list_projects is scoped to the thread's owner.
    #[tokio::test]
    async fn list_projects_scoped() {
        let (svc, crud, ..) = services();
        crud.seed_projects(vec![
            project("p1", "user-1", ProjectStatus::Draft),
            project("p2", "user-2", ProjectStatus::Draft),
        ]);
        let state = state_for("user-1");
        let ctx = ToolContext { state: &state, services: &svc };
        let outcome = ListProjects.call(json!({}), &ctx).await.unwrap();
        let listing: Vec<Value> = serde_json::from_str(&outcome.text).unwrap();
        assert_eq!(listing.len(), 1);
        assert_eq!(listing[0]["name"], "hello-world-bot");
        assert_eq!(listing[0]["status"], "draft");
    }

    /// **Scenario**: get_project sets the thread's current project.
    #[tokio::test]
    async fn get_project_sets_current() {
        let (svc, crud, ..) = services();
        crud.seed_projects(vec![project("p1", "user-1", ProjectStatus::Draft)]);
        let state = state_for("user-1");
        let ctx = ToolContext { state: &state, services: &svc };
        let outcome = GetProject
            .call(json!({ "project_id": "p1" }), &ctx)
            .await
            .unwrap();
        assert_eq!(outcome.update.current_project.unwrap().id, "p1");
    }

    /// **Scenario**: Lifecycle-violating status changes are invariant errors.
    #[tokio::test]
    async fn update_status_respects_lifecycle() {
        let (svc, crud, ..) = services();
        crud.seed_projects(vec![project("p1", "user-1", ProjectStatus::Draft)]);
        let state = state_for("user-1");
        let ctx = ToolContext { state: &state, services: &svc };
        let err = UpdateProjectStatus
            .call(json!({ "project_id": "p1", "status": "implementing" }), &ctx)
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::Invariant(_)));

        let ok = UpdateProjectStatus
            .call(json!({ "project_id": "p1", "status": "estimated" }), &ctx)
            .await
            .unwrap();
        assert!(ok.text.contains("estimated"));
    }
}
