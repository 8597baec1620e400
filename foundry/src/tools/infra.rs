//! Infrastructure capability tools: server selection and port allocation.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use rand::Rng;
use serde_json::{json, Value};

use crate::clients::{ApiError, CrudApi as _};
use crate::domain::{Allocation, PORT_RANGE};
use crate::state::StateUpdate;

use super::{required_str, Tool, ToolContext, ToolError, ToolOutcome};

/// Attempts before giving up on a port (each retry picks a fresh random port).
const ALLOCATE_ATTEMPTS: usize = 10;

pub(super) fn all() -> Vec<Arc<dyn Tool>> {
    vec![
        Arc::new(FindSuitableServer),
        Arc::new(AllocatePort),
        Arc::new(ListAllocations),
    ]
}

struct FindSuitableServer;

#[async_trait]
impl Tool for FindSuitableServer {
    fn name(&self) -> &'static str {
        "find_suitable_server"
    }

    fn description(&self) -> &'static str {
        "Pick the managed server with the most available RAM that satisfies the requirement."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": { "ram_mb": { "type": "integer", "minimum": 1 } },
            "required": ["ram_mb"]
        })
    }

    async fn call(&self, args: Value, ctx: &ToolContext<'_>) -> Result<ToolOutcome, ToolError> {
        let ram_mb = args
            .get("ram_mb")
            .and_then(Value::as_u64)
            .ok_or_else(|| ToolError::InvalidArguments("ram_mb is required".into()))? as u32;
        let servers = ctx
            .services
            .crud
            .list_servers(true)
            .await
            .map_err(|e| ToolError::Transient(e.to_string()))?;
        let best = servers
            .into_iter()
            .filter(|s| s.status.accepts_allocations() && s.available_ram_mb >= ram_mb)
            .max_by_key(|s| s.available_ram_mb);
        match best {
            Some(server) => Ok(ToolOutcome::text_only(
                json!({
                    "handle": server.handle,
                    "ip": server.public_ip,
                    "available_ram_mb": server.available_ram_mb,
                })
                .to_string(),
            )),
            None => Err(ToolError::UserActionable(format!(
                "no managed server with {} MB available RAM; provision one first",
                ram_mb
            ))),
        }
    }
}

struct AllocatePort;

#[async_trait]
impl Tool for AllocatePort {
    fn name(&self) -> &'static str {
        "allocate_port"
    }

    fn description(&self) -> &'static str {
        "Reserve an unused port on a server for the project's service."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "server_handle": { "type": "string" },
                "project_id": { "type": "string" }
            },
            "required": ["server_handle", "project_id"]
        })
    }

    async fn call(&self, args: Value, ctx: &ToolContext<'_>) -> Result<ToolOutcome, ToolError> {
        let server_handle = required_str(&args, "server_handle")?;
        let project_id = required_str(&args, "project_id")?;
        let project = ctx
            .services
            .crud
            .get_project(project_id)
            .await
            .map_err(|e| ToolError::UserActionable(e.to_string()))?;

        // Unique (server, port) is enforced by the CRUD layer; a conflict means
        // we raced another allocator, so retry with a fresh port.
        let mut last_conflict = None;
        for _ in 0..ALLOCATE_ATTEMPTS {
            let port: u16 = rand::thread_rng().gen_range(PORT_RANGE);
            let allocation = Allocation {
                project_id: project_id.to_string(),
                server_handle: server_handle.to_string(),
                port,
                service_name: project.slug(),
                allocated_at: Utc::now(),
            };
            match ctx.services.crud.create_allocation(&allocation).await {
                Ok(created) => {
                    let mut update = StateUpdate::default();
                    update
                        .allocated_resources
                        .insert(created.service_name.clone(), created.clone());
                    return Ok(ToolOutcome {
                        text: json!({
                            "server_handle": created.server_handle,
                            "port": created.port,
                            "service_name": created.service_name,
                        })
                        .to_string(),
                        update,
                    });
                }
                Err(ApiError::Conflict(message)) => last_conflict = Some(message),
                Err(e) => return Err(ToolError::Transient(e.to_string())),
            }
        }
        Err(ToolError::Transient(format!(
            "could not reserve a free port after {} attempts: {}",
            ALLOCATE_ATTEMPTS,
            last_conflict.unwrap_or_default()
        )))
    }
}

struct ListAllocations;

#[async_trait]
impl Tool for ListAllocations {
    fn name(&self) -> &'static str {
        "list_allocations"
    }

    fn description(&self) -> &'static str {
        "List service allocations on a server."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": { "server_handle": { "type": "string" } },
            "required": ["server_handle"]
        })
    }

    async fn call(&self, args: Value, ctx: &ToolContext<'_>) -> Result<ToolOutcome, ToolError> {
        let server_handle = required_str(&args, "server_handle")?;
        let allocations = ctx
            .services
            .crud
            .list_allocations(server_handle)
            .await
            .map_err(|e| ToolError::Transient(e.to_string()))?;
        Ok(ToolOutcome::text_only(
            serde_json::to_string(&allocations).unwrap_or_else(|_| "[]".into()),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Project, ProjectConfig, ProjectStatus, Server, ServerStatus};
    use crate::state::OrchestratorState;
    use crate::tools::test_support::services;

    fn server(handle: &str, ram: u32, status: ServerStatus) -> Server {
        Server {
            handle: handle.into(),
            public_ip: "1.2.3.4".into(),
            is_managed: true,
            available_ram_mb: ram,
            available_disk_mb: 10_000,
            status,
            ssh_key_ref: None,
            last_health_check: None,
        }
    }

    fn seed_project(crud: &crate::clients::InMemoryCrud) {
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

    /// **Scenario**: find_suitable_server picks the ready/in-use server with the
    /// greatest available RAM meeting the requirement.
    #[tokio::test]
    async fn find_server_picks_largest() {
        let (svc, crud, ..) = services();
        crud.seed_servers(vec![
            server("vps-small", 512, ServerStatus::Ready),
            server("vps-big", 4096, ServerStatus::InUse),
            server("vps-error", 8192, ServerStatus::Error),
        ]);
        let state = OrchestratorState::default();
        let ctx = ToolContext { state: &state, services: &svc };
        let outcome = FindSuitableServer
            .call(json!({ "ram_mb": 512 }), &ctx)
            .await
            .unwrap();
        let body: Value = serde_json::from_str(&outcome.text).unwrap();
        assert_eq!(body["handle"], "vps-big");
    }

    /// **Scenario**: No satisfying server is a user-actionable error.
    #[tokio::test]
    async fn find_server_none_available() {
        let (svc, crud, ..) = services();
        crud.seed_servers(vec![server("vps-small", 256, ServerStatus::Ready)]);
        let state = OrchestratorState::default();
        let ctx = ToolContext { state: &state, services: &svc };
        let err = FindSuitableServer
            .call(json!({ "ram_mb": 512 }), &ctx)
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::UserActionable(_)));
    }

    /// **Scenario**: allocate_port records the allocation and exposes it in the
    /// state update keyed by service name.
    #[tokio::test]
    async fn allocate_port_records() {
        let (svc, crud, ..) = services();
        seed_project(&crud);
        let state = OrchestratorState::default();
        let ctx = ToolContext { state: &state, services: &svc };
        let outcome = AllocatePort
            .call(json!({ "server_handle": "vps-1", "project_id": "p1" }), &ctx)
            .await
            .unwrap();
        let body: Value = serde_json::from_str(&outcome.text).unwrap();
        let port = body["port"].as_u64().unwrap() as u16;
        assert!(PORT_RANGE.contains(&port));
        assert_eq!(crud.allocations().len(), 1);
        assert!(outcome.update.allocated_resources.contains_key("hello-world-bot"));
    }

    /// **Scenario**: Conflicting ports are retried; all allocations end distinct.
    #[tokio::test]
    async fn allocate_port_retries_conflicts() {
        let (svc, crud, ..) = services();
        seed_project(&crud);
        let state = OrchestratorState::default();
        let ctx = ToolContext { state: &state, services: &svc };
        for _ in 0..20 {
            AllocatePort
                .call(json!({ "server_handle": "vps-1", "project_id": "p1" }), &ctx)
                .await
                .unwrap();
        }
        let allocations = crud.allocations();
        let mut ports: Vec<u16> = allocations.iter().map(|a| a.port).collect();
        ports.sort_unstable();
        ports.dedup();
        assert_eq!(ports.len(), allocations.len(), "ports must be pairwise distinct");
    }
}
