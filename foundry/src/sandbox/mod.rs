//! Agent sandboxes: ephemeral containers hosting CLI coding agents.
//!
//! The [`ContainerManager`] owns the container lifecycle
//! (`initializing → idle ⇄ running → (idle|error) → deleted`) and is the only
//! path for text exchange with an agent. Agent families are pluggable through
//! [`AgentFactory`] implementations dispatched by the [`FactoryRegistry`];
//! container I/O goes through the [`ContainerDriver`] trait (Docker via bollard
//! in production, a mock in tests). Session continuity across ephemeral
//! processes is carried by [`SessionContext`] records with the container's TTL.

mod config;
mod context;
mod control_plane;
mod docker;
mod driver;
mod factories;
mod factory;
mod manager;

pub use config::{
    image_cache_key, AgentContainerConfig, AgentKind, AllowedTool, CapabilitySpec,
    KNOWN_CAPABILITIES,
};
pub use context::{
    HistoryEntry, InMemoryContextStore, RedisContextStore, SessionContext, SessionContextStore,
};
pub use control_plane::{ControlPlaneServer, ControlRequest, ControlResponse, COMMANDS_STREAM, RESPONSES_STREAM};
pub use docker::DockerDriver;
pub use driver::{ContainerDriver, ContainerSpec, ExecOutput, MockDriver};
pub use factories::{ClaudeCodeFactory, CodexFactory};
pub use factory::{AgentFactory, AgentReply, FactoryRegistry};
pub use manager::{ContainerManager, ContainerState, ContainerStatus, DEFAULT_MESSAGE_TIMEOUT};

use thiserror::Error;

/// Error from sandbox operations.
#[derive(Debug, Error)]
pub enum SandboxError {
    /// Unknown agent type, unknown capability, or malformed declarative config.
    #[error("invalid config: {0}")]
    InvalidConfig(String),
    /// No such agent container (or already deleted).
    #[error("agent not found: {0}")]
    NotFound(String),
    /// A per-call timeout elapsed.
    #[error("timed out after {0}s")]
    Timeout(u64),
    /// The in-container agent failed (non-zero exit, unparseable reply).
    #[error("agent error: {0}")]
    AgentError(String),
    /// Container runtime failure.
    #[error("driver: {0}")]
    Driver(String),
    /// Session-context store failure.
    #[error("session context: {0}")]
    Context(String),
}
