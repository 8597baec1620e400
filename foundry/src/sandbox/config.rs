//! Declarative agent-container configuration.
//!
//! The JSON contract recognizes exactly: `agent`, `capabilities`,
//! `allowed_tools`, `has_internet`, `ttl_hours`, `timeout_minutes`, `env_vars`.
//! Unknown fields are rejected. Env var values are credentials: the custom
//! `Debug` impl redacts them so no log record can carry a value.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::SandboxError;

/// Supported agent families (one factory each).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AgentKind {
    ClaudeCode,
    Codex,
}

impl AgentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentKind::ClaudeCode => "claude-code",
            AgentKind::Codex => "codex",
        }
    }
}

/// Orchestrator API surfaces an in-container agent may touch, enforced by the
/// generated agent documentation and the in-container CLI gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AllowedTool {
    Project,
    Deploy,
    Engineering,
    Infra,
    Respond,
    Admin,
}

impl AllowedTool {
    pub fn as_str(&self) -> &'static str {
        match self {
            AllowedTool::Project => "project",
            AllowedTool::Deploy => "deploy",
            AllowedTool::Engineering => "engineering",
            AllowedTool::Infra => "infra",
            AllowedTool::Respond => "respond",
            AllowedTool::Admin => "admin",
        }
    }
}

/// One installable capability: system packages plus the skill documentation
/// written into the container.
#[derive(Debug, Clone)]
pub struct CapabilitySpec {
    pub name: &'static str,
    pub apt_packages: &'static [&'static str],
    /// Present in the base image already; never re-installed.
    pub preinstalled: bool,
    pub skill_doc: &'static str,
}

/// Capabilities this build can install into agent containers.
pub const KNOWN_CAPABILITIES: &[CapabilitySpec] = &[
    CapabilitySpec {
        name: "git",
        apt_packages: &["git"],
        preinstalled: true,
        skill_doc: "Use git for all repository work. Commit early, push to the task branch.",
    },
    CapabilitySpec {
        name: "node",
        apt_packages: &["nodejs", "npm"],
        preinstalled: false,
        skill_doc: "Node.js and npm are available for JavaScript/TypeScript projects.",
    },
    CapabilitySpec {
        name: "python",
        apt_packages: &["python3", "python3-pip"],
        preinstalled: false,
        skill_doc: "Python 3 and pip are available. Prefer virtualenvs under /workspace.",
    },
    CapabilitySpec {
        name: "rust",
        apt_packages: &["rustc", "cargo"],
        preinstalled: false,
        skill_doc: "The Rust toolchain is available (rustc, cargo).",
    },
    CapabilitySpec {
        name: "docker-cli",
        apt_packages: &["docker.io"],
        preinstalled: false,
        skill_doc: "The docker CLI is available for building images; the daemon is remote.",
    },
];

fn default_has_internet() -> bool {
    true
}

fn default_ttl_hours() -> u32 {
    2
}

fn default_timeout_minutes() -> u32 {
    10
}

/// Declarative container config (JSON contract of the control plane).
#[derive(Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AgentContainerConfig {
    /// Selects the factory.
    pub agent: AgentKind,
    /// Ordered capability names; each maps to a package + skill-file set.
    #[serde(default)]
    pub capabilities: Vec<String>,
    /// Capability-level authorization for orchestrator APIs.
    #[serde(default)]
    pub allowed_tools: Vec<AllowedTool>,
    #[serde(default = "default_has_internet")]
    pub has_internet: bool,
    /// Container deletion deadline.
    #[serde(default = "default_ttl_hours")]
    pub ttl_hours: u32,
    /// Per-command timeout inside the container.
    #[serde(default = "default_timeout_minutes")]
    pub timeout_minutes: u32,
    /// Injected into the container; never logged, never echoed into prompts.
    #[serde(default)]
    pub env_vars: BTreeMap<String, String>,
}

impl AgentContainerConfig {
    pub fn new(agent: AgentKind) -> Self {
        Self {
            agent,
            capabilities: Vec::new(),
            allowed_tools: Vec::new(),
            has_internet: default_has_internet(),
            ttl_hours: default_ttl_hours(),
            timeout_minutes: default_timeout_minutes(),
            env_vars: BTreeMap::new(),
        }
    }

    pub fn with_capabilities<I: IntoIterator<Item = &'static str>>(mut self, caps: I) -> Self {
        self.capabilities = caps.into_iter().map(String::from).collect();
        self
    }

    pub fn with_allowed_tools(mut self, tools: Vec<AllowedTool>) -> Self {
        self.allowed_tools = tools;
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env_vars.insert(key.into(), value.into());
        self
    }

    /// Resolves capability names to specs. Unknown names are a config error.
    pub fn resolve_capabilities(&self) -> Result<Vec<&'static CapabilitySpec>, SandboxError> {
        self.capabilities
            .iter()
            .map(|name| {
                KNOWN_CAPABILITIES
                    .iter()
                    .find(|c| c.name == name)
                    .ok_or_else(|| SandboxError::InvalidConfig(format!("unknown capability: {}", name)))
            })
            .collect()
    }
}

impl std::fmt::Debug for AgentContainerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentContainerConfig")
            .field("agent", &self.agent)
            .field("capabilities", &self.capabilities)
            .field("allowed_tools", &self.allowed_tools)
            .field("has_internet", &self.has_internet)
            .field("ttl_hours", &self.ttl_hours)
            .field("timeout_minutes", &self.timeout_minutes)
            .field("env_vars", &self.env_vars.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Image cache key: `sha256(agent_type, capabilities_sorted)`, truncated. A
/// different capability set produces a distinct image tag.
pub fn image_cache_key(agent: AgentKind, capabilities: &[String]) -> String {
    let mut sorted: Vec<&str> = capabilities.iter().map(String::as_str).collect();
    sorted.sort_unstable();
    let mut hasher = Sha256::new();
    hasher.update(agent.as_str().as_bytes());
    for cap in sorted {
        hasher.update(b"\0");
        hasher.update(cap.as_bytes());
    }
    let digest = hasher.finalize();
    format!("foundry-agent:{}", &hex::encode(digest)[..16])
}
