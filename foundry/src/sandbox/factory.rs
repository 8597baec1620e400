//! Agent factory trait and registry.
//!
//! A factory is polymorphic over the per-family capability set: install-command
//! generation, invocation command, required env vars, instruction-file
//! generation, and reply parsing. New agent types are added by registering a
//! factory; no coordinator changes required. The registry is built once at
//! startup and read-only afterwards.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;

use super::config::{AgentContainerConfig, AgentKind, CapabilitySpec};
use super::context::SessionContext;
use super::driver::ExecOutput;
use super::SandboxError;

/// Parsed agent reply plus the session context to persist for the next call.
#[derive(Debug, Clone)]
pub struct AgentReply {
    pub text: String,
    pub session: SessionContext,
    pub metadata: Value,
}

/// Agent-family behavior behind the uniform manager API.
pub trait AgentFactory: Send + Sync + std::fmt::Debug {
    fn kind(&self) -> AgentKind;

    /// Base image used when no cached image exists for the capability set.
    fn base_image(&self) -> &'static str;

    /// Env var names that must be present in the container config for this
    /// agent to authenticate. Credentials flow only through these variables.
    fn required_credentials(&self) -> &'static [&'static str];

    /// Shell commands installing the non-preinstalled capabilities.
    fn install_commands(&self, capabilities: &[&CapabilitySpec]) -> Vec<Vec<String>>;

    /// In-container skill/documentation files derived from the configured
    /// capability set and allowed-tool list.
    fn instruction_files(
        &self,
        config: &AgentContainerConfig,
        capabilities: &[&CapabilitySpec],
    ) -> Vec<(String, String)>;

    /// Argv for one message exchange, given the stored session context.
    fn build_invocation(&self, text: &str, session: &SessionContext) -> Vec<String>;

    /// Parses the command output into a reply and the updated session context.
    fn parse_reply(
        &self,
        output: &ExecOutput,
        previous: &SessionContext,
        user_text: &str,
    ) -> Result<AgentReply, SandboxError>;
}

/// Process-wide mapping `agent type → factory`.
#[derive(Clone)]
pub struct FactoryRegistry {
    factories: HashMap<AgentKind, Arc<dyn AgentFactory>>,
}

impl FactoryRegistry {
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// The registry with both built-in CLI brands registered.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(super::factories::ClaudeCodeFactory));
        registry.register(Arc::new(super::factories::CodexFactory));
        registry
    }

    pub fn register(&mut self, factory: Arc<dyn AgentFactory>) {
        self.factories.insert(factory.kind(), factory);
    }

    pub fn get(&self, kind: AgentKind) -> Result<&Arc<dyn AgentFactory>, SandboxError> {
        self.factories
            .get(&kind)
            .ok_or_else(|| SandboxError::InvalidConfig(format!("unknown agent type: {}", kind.as_str())))
    }
}

impl Default for FactoryRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// **Scenario**: The default registry dispatches both built-in agent kinds.
    #[test]
    fn defaults_register_both_brands() {
        let registry = FactoryRegistry::with_defaults();
        assert!(registry.get(AgentKind::ClaudeCode).is_ok());
        assert!(registry.get(AgentKind::Codex).is_ok());
    }

    /// **Scenario**: An empty registry reports unknown agent types as InvalidConfig.
    #[test]
    fn empty_registry_rejects() {
        let registry = FactoryRegistry::new();
        let err = registry.get(AgentKind::Codex).unwrap_err();
        assert!(matches!(err, SandboxError::InvalidConfig(_)));
    }
}
