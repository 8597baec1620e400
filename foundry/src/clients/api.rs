//! CRUD layer contract and the in-memory twin used by tests.
//!
//! Project records are mutated only through this API; the core treats them as
//! read-mostly caches (concurrent writers race, last writer wins). Allocations
//! are serialized by a unique constraint on (server, port): the API returns
//! `Conflict` and the allocator retries with another port.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::{Allocation, Project, ProjectStatus, Server};

/// Error from the CRUD layer.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("not found: {0}")]
    NotFound(String),
    /// Unique-constraint violation (e.g. a (server, port) already allocated).
    #[error("conflict: {0}")]
    Conflict(String),
    /// Attempted to change an immutable field (e.g. repository URL once set).
    #[error("immutable: {0}")]
    Immutable(String),
    #[error("transient: {0}")]
    Transient(String),
    #[error("protocol: {0}")]
    Protocol(String),
}

/// Internal user record owned by the CRUD layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserRecord {
    pub id: String,
    pub telegram_id: i64,
}

/// Incident record created when infrastructure degrades.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Incident {
    pub id: String,
    pub server_handle: String,
    pub summary: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub resolved: bool,
}

/// Outbound contract to the CRUD / infra services.
#[async_trait]
pub trait CrudApi: Send + Sync {
    async fn list_projects(&self, owner_id: &str) -> Result<Vec<Project>, ApiError>;
    async fn get_project(&self, id: &str) -> Result<Project, ApiError>;
    async fn update_project_status(
        &self,
        id: &str,
        status: ProjectStatus,
    ) -> Result<Project, ApiError>;
    /// Sets the repository URL; immutable once set to a different value.
    async fn set_repository_url(&self, id: &str, url: &str) -> Result<Project, ApiError>;
    /// Stores one project secret value (user-supplied or generated infra value).
    async fn store_project_secret(
        &self,
        project_id: &str,
        name: &str,
        value: &str,
    ) -> Result<(), ApiError>;

    async fn list_servers(&self, managed_only: bool) -> Result<Vec<Server>, ApiError>;
    /// Records an allocation; `Conflict` when (server, port) is taken.
    async fn create_allocation(&self, allocation: &Allocation) -> Result<Allocation, ApiError>;
    async fn list_allocations(&self, server_handle: &str) -> Result<Vec<Allocation>, ApiError>;

    async fn upsert_user(&self, telegram_id: i64) -> Result<UserRecord, ApiError>;
    async fn get_user_by_telegram(&self, telegram_id: i64) -> Result<Option<UserRecord>, ApiError>;

    async fn create_incident(&self, server_handle: &str, summary: &str)
        -> Result<Incident, ApiError>;
    async fn active_incidents(&self) -> Result<Vec<Incident>, ApiError>;
}

/// In-memory CRUD twin for tests and local development.
#[derive(Default)]
pub struct InMemoryCrud {
    inner: Mutex<InMemoryCrudInner>,
}

#[derive(Default)]
struct InMemoryCrudInner {
    projects: HashMap<String, Project>,
    servers: Vec<Server>,
    allocations: Vec<Allocation>,
    users: HashMap<i64, UserRecord>,
    incidents: Vec<Incident>,
    next_user: u64,
}

impl InMemoryCrud {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_projects(self, projects: Vec<Project>) -> Self {
        {
            let mut inner = self.inner.lock().expect("poisoned");
            for p in projects {
                inner.projects.insert(p.id.clone(), p);
            }
        }
        self
    }

    pub fn with_servers(self, servers: Vec<Server>) -> Self {
        {
            let mut inner = self.inner.lock().expect("poisoned");
            inner.servers = servers;
        }
        self
    }

    /// Seed projects through a shared handle (test helper).
    pub fn seed_projects(&self, projects: Vec<Project>) {
        let mut inner = self.inner.lock().expect("poisoned");
        for p in projects {
            inner.projects.insert(p.id.clone(), p);
        }
    }

    /// Seed servers through a shared handle (test helper).
    pub fn seed_servers(&self, servers: Vec<Server>) {
        self.inner.lock().expect("poisoned").servers = servers;
    }

    /// Snapshot of allocations (assertion helper).
    pub fn allocations(&self) -> Vec<Allocation> {
        self.inner.lock().expect("poisoned").allocations.clone()
    }

    /// Stored secret value for a project (assertion helper).
    pub fn secret(&self, project_id: &str, name: &str) -> Option<String> {
        self.inner
            .lock()
            .expect("poisoned")
            .projects
            .get(project_id)
            .and_then(|p| p.config.secrets.get(name).cloned())
    }
}

#[async_trait]
impl CrudApi for InMemoryCrud {
    async fn list_projects(&self, owner_id: &str) -> Result<Vec<Project>, ApiError> {
        let inner = self.inner.lock().expect("poisoned");
        Ok(inner
            .projects
            .values()
            .filter(|p| p.owner_id == owner_id)
            .cloned()
            .collect())
    }

    async fn get_project(&self, id: &str) -> Result<Project, ApiError> {
        self.inner
            .lock()
            .expect("poisoned")
            .projects
            .get(id)
            .cloned()
            .ok_or_else(|| ApiError::NotFound(format!("project {}", id)))
    }

    async fn update_project_status(
        &self,
        id: &str,
        status: ProjectStatus,
    ) -> Result<Project, ApiError> {
        let mut inner = self.inner.lock().expect("poisoned");
        let project = inner
            .projects
            .get_mut(id)
            .ok_or_else(|| ApiError::NotFound(format!("project {}", id)))?;
        project.status = status;
        project.updated_at = Utc::now();
        Ok(project.clone())
    }

    async fn set_repository_url(&self, id: &str, url: &str) -> Result<Project, ApiError> {
        let mut inner = self.inner.lock().expect("poisoned");
        let project = inner
            .projects
            .get_mut(id)
            .ok_or_else(|| ApiError::NotFound(format!("project {}", id)))?;
        match &project.repository_url {
            Some(existing) if existing != url => {
                return Err(ApiError::Immutable(format!(
                    "repository_url already set for project {}",
                    id
                )))
            }
            _ => project.repository_url = Some(url.to_string()),
        }
        project.updated_at = Utc::now();
        Ok(project.clone())
    }

    async fn store_project_secret(
        &self,
        project_id: &str,
        name: &str,
        value: &str,
    ) -> Result<(), ApiError> {
        let mut inner = self.inner.lock().expect("poisoned");
        let project = inner
            .projects
            .get_mut(project_id)
            .ok_or_else(|| ApiError::NotFound(format!("project {}", project_id)))?;
        project
            .config
            .secrets
            .insert(name.to_string(), value.to_string());
        Ok(())
    }

    async fn list_servers(&self, managed_only: bool) -> Result<Vec<Server>, ApiError> {
        let inner = self.inner.lock().expect("poisoned");
        Ok(inner
            .servers
            .iter()
            .filter(|s| !managed_only || s.is_managed)
            .cloned()
            .collect())
    }

    async fn create_allocation(&self, allocation: &Allocation) -> Result<Allocation, ApiError> {
        let mut inner = self.inner.lock().expect("poisoned");
        let taken = inner.allocations.iter().any(|a| {
            a.server_handle == allocation.server_handle && a.port == allocation.port
        });
        if taken {
            return Err(ApiError::Conflict(format!(
                "port {} on {} already allocated",
                allocation.port, allocation.server_handle
            )));
        }
        inner.allocations.push(allocation.clone());
        Ok(allocation.clone())
    }

    async fn list_allocations(&self, server_handle: &str) -> Result<Vec<Allocation>, ApiError> {
        let inner = self.inner.lock().expect("poisoned");
        Ok(inner
            .allocations
            .iter()
            .filter(|a| a.server_handle == server_handle)
            .cloned()
            .collect())
    }

    async fn upsert_user(&self, telegram_id: i64) -> Result<UserRecord, ApiError> {
        let mut inner = self.inner.lock().expect("poisoned");
        if let Some(user) = inner.users.get(&telegram_id) {
            return Ok(user.clone());
        }
        inner.next_user += 1;
        let user = UserRecord {
            id: format!("user-{}", inner.next_user),
            telegram_id,
        };
        inner.users.insert(telegram_id, user.clone());
        Ok(user)
    }

    async fn get_user_by_telegram(&self, telegram_id: i64) -> Result<Option<UserRecord>, ApiError> {
        Ok(self
            .inner
            .lock()
            .expect("poisoned")
            .users
            .get(&telegram_id)
            .cloned())
    }

    async fn create_incident(
        &self,
        server_handle: &str,
        summary: &str,
    ) -> Result<Incident, ApiError> {
        let mut inner = self.inner.lock().expect("poisoned");
        let incident = Incident {
            id: uuid::Uuid::new_v4().to_string(),
            server_handle: server_handle.to_string(),
            summary: summary.to_string(),
            created_at: Utc::now(),
            resolved: false,
        };
        inner.incidents.push(incident.clone());
        Ok(incident)
    }

    async fn active_incidents(&self) -> Result<Vec<Incident>, ApiError> {
        let inner = self.inner.lock().expect("poisoned");
        Ok(inner
            .incidents
            .iter()
            .filter(|i| !i.resolved)
            .cloned()
            .collect())
    }
}
