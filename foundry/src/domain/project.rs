//! Project entity and lifecycle.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Project lifecycle status. Transitions obey [`ProjectStatus::can_transition_to`];
/// no transition skips the `Initialized` waypoint (projects not yet provisioned
/// remain in Draft / Estimated).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProjectStatus {
    Draft,
    Estimated,
    Provisioning,
    Initialized,
    Designing,
    Designed,
    Implementing,
    Implemented,
    Verifying,
    Verified,
    Deploying,
    Active,
    Maintenance,
    Error,
    Archived,
    Missing,
}

impl ProjectStatus {
    /// Successors allowed by the lifecycle DAG. `Error` is reachable from any
    /// working state; `Archived` from any state.
    pub fn can_transition_to(self, next: ProjectStatus) -> bool {
        use ProjectStatus::*;
        if next == Archived || next == Error {
            return self != Archived;
        }
        matches!(
            (self, next),
            (Draft, Estimated)
                | (Estimated, Provisioning)
                | (Provisioning, Initialized)
                | (Initialized, Designing)
                | (Designing, Designed)
                | (Designed, Implementing)
                | (Implementing, Implemented)
                | (Implemented, Verifying)
                | (Verifying, Verified)
                | (Verified, Deploying)
                | (Deploying, Active)
                | (Active, Maintenance)
                | (Maintenance, Active)
                | (Error, Maintenance)
                | (Missing, Draft)
        )
    }
}

/// Project configuration mapping, including declared required secrets.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProjectConfig {
    /// Names of environment variables the project requires at deploy time
    /// (the parsed `.env.example`).
    #[serde(default)]
    pub required_env: Vec<String>,
    /// Stored secret values (user-supplied and generated infra values).
    /// Values never enter graph state or logs.
    #[serde(default)]
    pub secrets: BTreeMap<String, String>,
    /// RAM the service needs on its target server.
    #[serde(default)]
    pub required_ram_mb: Option<u32>,
    /// Free-form extras (template name, environment label, ...).
    #[serde(default)]
    pub extra: BTreeMap<String, String>,
}

/// Repository info populated after repo creation. The URL is immutable once set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepositoryInfo {
    pub url: String,
    pub default_branch: String,
}

/// Owned project entity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
    pub id: String,
    pub name: String,
    pub owner_id: String,
    #[serde(default)]
    pub repository_url: Option<String>,
    pub status: ProjectStatus,
    #[serde(default)]
    pub config: ProjectConfig,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Project {
    /// URL-safe slug of the project name, used in job ids.
    pub fn slug(&self) -> String {
        self.name
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '-' {
                    c.to_ascii_lowercase()
                } else {
                    '-'
                }
            })
            .collect()
    }
}
