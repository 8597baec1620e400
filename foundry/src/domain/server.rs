//! Server and allocation entities.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Ports an allocation may reserve.
pub const PORT_RANGE: std::ops::RangeInclusive<u16> = 1024..=65535;

/// Server lifecycle status. A transition from `Ready` to `Error` generates an
/// incident record at the CRUD layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServerStatus {
    Discovered,
    PendingSetup,
    Provisioning,
    Ready,
    InUse,
    Error,
    Reserved,
    Decommissioned,
    ForceRebuild,
}

impl ServerStatus {
    /// Whether the server can accept a new service allocation.
    pub fn accepts_allocations(self) -> bool {
        matches!(self, ServerStatus::Ready | ServerStatus::InUse)
    }
}

/// External server resource; read-mostly in the core.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Server {
    pub handle: String,
    pub public_ip: String,
    pub is_managed: bool,
    pub available_ram_mb: u32,
    pub available_disk_mb: u32,
    pub status: ServerStatus,
    #[serde(default)]
    pub ssh_key_ref: Option<String>,
    #[serde(default)]
    pub last_health_check: Option<DateTime<Utc>>,
}

/// A (server, port) reservation for a project's service. Unique per (server, port);
/// released only by explicit owner action or project deletion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Allocation {
    pub project_id: String,
    pub server_handle: String,
    pub port: u16,
    pub service_name: String,
    pub allocated_at: DateTime<Utc>,
}
