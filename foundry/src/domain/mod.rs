//! Owned and external entities: projects, servers, allocations.
//!
//! The core treats these as read-mostly caches of the external CRUD layer;
//! mutation happens through [`crate::clients::CrudApi`]. Lifecycle enums carry
//! their transition rules so nodes can validate before patching.

mod project;
mod server;

pub use project::{Project, ProjectConfig, ProjectStatus, RepositoryInfo};
pub use server::{Allocation, Server, ServerStatus, PORT_RANGE};
