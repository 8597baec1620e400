//! Capability registry: named bundles of tools exposed to the coordinator LLM.
//!
//! A capability is activated atomically: all of its tools become callable on the
//! coordinator's next turn. The registry is built once at startup from
//! [`CapabilityRegistry::with_defaults`] and treated as read-only afterwards.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Canonical capability names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    Deploy,
    Infrastructure,
    ProjectManagement,
    Engineering,
    Diagnose,
    Admin,
}

impl Capability {
    pub fn as_str(&self) -> &'static str {
        match self {
            Capability::Deploy => "deploy",
            Capability::Infrastructure => "infrastructure",
            Capability::ProjectManagement => "project_management",
            Capability::Engineering => "engineering",
            Capability::Diagnose => "diagnose",
            Capability::Admin => "admin",
        }
    }

    pub fn all() -> &'static [Capability] {
        &[
            Capability::Deploy,
            Capability::Infrastructure,
            Capability::ProjectManagement,
            Capability::Engineering,
            Capability::Diagnose,
            Capability::Admin,
        ]
    }
}

impl std::str::FromStr for Capability {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "deploy" => Ok(Capability::Deploy),
            "infrastructure" => Ok(Capability::Infrastructure),
            "project_management" => Ok(Capability::ProjectManagement),
            "engineering" => Ok(Capability::Engineering),
            "diagnose" => Ok(Capability::Diagnose),
            "admin" => Ok(Capability::Admin),
            _ => Err(format!("unknown capability: {}", s)),
        }
    }
}

impl std::fmt::Display for Capability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One registry entry: what the bundle does and which tools it exposes.
#[derive(Debug, Clone)]
pub struct CapabilityEntry {
    pub description: &'static str,
    pub tools: &'static [&'static str],
}

/// Process-wide mapping `capability → (description, tool set)`.
#[derive(Debug, Clone, Default)]
pub struct CapabilityRegistry {
    entries: BTreeMap<Capability, CapabilityEntry>,
}

impl CapabilityRegistry {
    /// The canonical registry for this build. Tool names must match the names
    /// registered with the tool router.
    pub fn with_defaults() -> Self {
        let mut entries = BTreeMap::new();
        entries.insert(
            Capability::ProjectManagement,
            CapabilityEntry {
                description: "List, inspect and update the user's projects",
                tools: &["list_projects", "get_project", "update_project_status"],
            },
        );
        entries.insert(
            Capability::Infrastructure,
            CapabilityEntry {
                description: "Find servers and reserve ports for a project's services",
                tools: &["find_suitable_server", "allocate_port", "list_allocations"],
            },
        );
        entries.insert(
            Capability::Deploy,
            CapabilityEntry {
                description: "Check readiness, queue deployments and poll their progress",
                tools: &[
                    "check_deploy_readiness",
                    "trigger_deploy",
                    "get_deploy_status",
                    "store_project_secret",
                ],
            },
        );
        entries.insert(
            Capability::Engineering,
            CapabilityEntry {
                description: "Queue engineering jobs (design, code, test) and poll their progress",
                tools: &["trigger_engineering", "get_engineering_status"],
            },
        );
        entries.insert(
            Capability::Diagnose,
            CapabilityEntry {
                description: "Inspect active incidents and service health",
                tools: &["list_active_incidents", "report_incident"],
            },
        );
        entries.insert(
            Capability::Admin,
            CapabilityEntry {
                description: "Administrative operations on users and sessions",
                tools: &["upsert_user", "release_session"],
            },
        );
        Self { entries }
    }

    pub fn get(&self, capability: Capability) -> Option<&CapabilityEntry> {
        self.entries.get(&capability)
    }

    /// Tool names exposed by the given capabilities, deduplicated, stable order.
    pub fn tools_for<'a>(&self, caps: impl IntoIterator<Item = &'a Capability>) -> Vec<&'static str> {
        let mut out: Vec<&'static str> = Vec::new();
        for cap in caps {
            if let Some(entry) = self.entries.get(cap) {
                for t in entry.tools {
                    if !out.contains(t) {
                        out.push(t);
                    }
                }
            }
        }
        out
    }

    /// One line per capability for the classifier / request_capabilities prompts.
    pub fn describe_all(&self) -> String {
        self.entries
            .iter()
            .map(|(cap, e)| format!("- {}: {}", cap, e.description))
            .collect::<Vec<_>>()
            .join("\n")
    }
}
