//! Built-in agent factories: the Claude Code CLI and the Codex CLI.
//!
//! Claude Code supports native session resumption (`--resume`), so its context
//! carries the continuation id. Codex has no resume flag in headless mode; its
//! factory replays the stored history as part of the prompt instead.

use serde_json::{json, Value};

use super::config::{AgentContainerConfig, AgentKind, CapabilitySpec};
use super::context::SessionContext;
use super::driver::ExecOutput;
use super::factory::{AgentFactory, AgentReply};
use super::SandboxError;

fn apt_install_commands(capabilities: &[&CapabilitySpec]) -> Vec<Vec<String>> {
    let packages: Vec<&str> = capabilities
        .iter()
        .filter(|c| !c.preinstalled)
        .flat_map(|c| c.apt_packages.iter().copied())
        .collect();
    if packages.is_empty() {
        return Vec::new();
    }
    vec![vec![
        "sh".to_string(),
        "-lc".to_string(),
        format!(
            "apt-get update -qq && apt-get install -y -qq {}",
            packages.join(" ")
        ),
    ]]
}

fn skill_files(
    config: &AgentContainerConfig,
    capabilities: &[&CapabilitySpec],
    agent_doc_path: &str,
) -> Vec<(String, String)> {
    let mut files = Vec::new();
    for cap in capabilities {
        files.push((
            format!("/workspace/.skills/{}.md", cap.name),
            format!("# {}\n\n{}\n", cap.name, cap.skill_doc),
        ));
    }
    let allowed: Vec<&str> = config.allowed_tools.iter().map(|t| t.as_str()).collect();
    files.push((
        agent_doc_path.to_string(),
        format!(
            "# Orchestrator access\n\nYou may call the orchestrator CLI only for: {}.\n\
             Calls outside this list are rejected by the gate.\n",
            if allowed.is_empty() {
                "nothing (read-only sandbox)".to_string()
            } else {
                allowed.join(", ")
            }
        ),
    ));
    files
}

fn require_success(output: &ExecOutput) -> Result<(), SandboxError> {
    if output.exit_code != 0 {
        return Err(SandboxError::AgentError(format!(
            "agent exited with {}: {}",
            output.exit_code,
            output.stderr.trim()
        )));
    }
    Ok(())
}

/// Factory for the Claude Code CLI.
#[derive(Debug)]
pub struct ClaudeCodeFactory;

impl AgentFactory for ClaudeCodeFactory {
    fn kind(&self) -> AgentKind {
        AgentKind::ClaudeCode
    }

    fn base_image(&self) -> &'static str {
        "foundry-base:claude-code"
    }

    fn required_credentials(&self) -> &'static [&'static str] {
        &["ANTHROPIC_API_KEY"]
    }

    fn install_commands(&self, capabilities: &[&CapabilitySpec]) -> Vec<Vec<String>> {
        apt_install_commands(capabilities)
    }

    fn instruction_files(
        &self,
        config: &AgentContainerConfig,
        capabilities: &[&CapabilitySpec],
    ) -> Vec<(String, String)> {
        skill_files(config, capabilities, "/workspace/CLAUDE.md")
    }

    fn build_invocation(&self, text: &str, session: &SessionContext) -> Vec<String> {
        let mut argv = vec![
            "claude".to_string(),
            "-p".to_string(),
            text.to_string(),
            "--output-format".to_string(),
            "json".to_string(),
        ];
        if let Some(session_id) = &session.session_id {
            argv.push("--resume".to_string());
            argv.push(session_id.clone());
        }
        argv
    }

    fn parse_reply(
        &self,
        output: &ExecOutput,
        previous: &SessionContext,
        user_text: &str,
    ) -> Result<AgentReply, SandboxError> {
        require_success(output)?;
        let mut session = previous.clone();
        let (text, metadata) = match serde_json::from_str::<Value>(&output.stdout) {
            Ok(body) => {
                if let Some(id) = body.get("session_id").and_then(Value::as_str) {
                    session.session_id = Some(id.to_string());
                }
                let text = body
                    .get("result")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                (text, body)
            }
            // Older CLI builds print plain text.
            Err(_) => (output.stdout.trim().to_string(), json!({})),
        };
        session.push_exchange(user_text, &text);
        Ok(AgentReply {
            text,
            session,
            metadata,
        })
    }
}

/// Factory for the Codex CLI.
#[derive(Debug)]
pub struct CodexFactory;

impl AgentFactory for CodexFactory {
    fn kind(&self) -> AgentKind {
        AgentKind::Codex
    }

    fn base_image(&self) -> &'static str {
        "foundry-base:codex"
    }

    fn required_credentials(&self) -> &'static [&'static str] {
        &["OPENAI_API_KEY"]
    }

    fn install_commands(&self, capabilities: &[&CapabilitySpec]) -> Vec<Vec<String>> {
        apt_install_commands(capabilities)
    }

    fn instruction_files(
        &self,
        config: &AgentContainerConfig,
        capabilities: &[&CapabilitySpec],
    ) -> Vec<(String, String)> {
        skill_files(config, capabilities, "/workspace/AGENTS.md")
    }

    /// No resume flag: prior exchanges are replayed as prompt history.
    fn build_invocation(&self, text: &str, session: &SessionContext) -> Vec<String> {
        let mut prompt = String::new();
        for entry in &session.history {
            prompt.push_str(&format!("[{}] {}\n", entry.role, entry.text));
        }
        prompt.push_str(text);
        vec![
            "codex".to_string(),
            "exec".to_string(),
            "--skip-git-repo-check".to_string(),
            prompt,
        ]
    }

    fn parse_reply(
        &self,
        output: &ExecOutput,
        previous: &SessionContext,
        user_text: &str,
    ) -> Result<AgentReply, SandboxError> {
        require_success(output)?;
        let text = output.stdout.trim().to_string();
        let mut session = previous.clone();
        session.push_exchange(user_text, &text);
        Ok(AgentReply {
            text,
            session,
            metadata: json!({}),
        })
    }
}
