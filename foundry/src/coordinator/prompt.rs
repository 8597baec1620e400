//! Coordinator system prompt assembly.

use crate::capabilities::CapabilityRegistry;
use crate::state::OrchestratorState;

/// Fixed part of the coordinator prompt.
pub const COORDINATOR_SYSTEM_PROMPT: &str = "\
You are the product owner of an autonomous software-delivery service. You talk \
to one user over chat and drive their projects through design, engineering, \
and deployment by calling tools.

Rules:
- respond_to_user is the only way to reach the user. Set awaiting_response=true \
whenever you need their answer before continuing.
- Long-running work (deploy, engineering) is queued as jobs; report the job id \
and poll the matching status tool when the user asks for progress.
- Your tool surface is intentionally small. When a task needs tools you do not \
see, call request_capabilities with the bundle name and a short reason.
- Call finish_task only after the user's latest message clearly confirms the \
task is done (for example thanks, ok, looks good). Never call it preemptively.
- On tool errors, read error_type: user_actionable errors should be relayed to \
the user; invariant_violation means you must call a corrective tool first.";

/// Builds the per-turn system prompt: fixed rules plus current thread context.
pub fn build_system_prompt(state: &OrchestratorState, registry: &CapabilityRegistry) -> String {
    let mut prompt = String::from(COORDINATOR_SYSTEM_PROMPT);
    prompt.push_str("\n\nAvailable capability bundles:\n");
    prompt.push_str(&registry.describe_all());

    prompt.push_str("\n\nThread context:\n");
    match &state.current_project {
        Some(p) => prompt.push_str(&format!(
            "- current project: {} ({:?})\n",
            p.name, p.status
        )),
        None => prompt.push_str("- current project: none\n"),
    }
    if state.allocated_resources.is_empty() {
        prompt.push_str("- allocated resources: none\n");
    } else {
        for (service, a) in &state.allocated_resources {
            prompt.push_str(&format!(
                "- allocation: {} on {} port {}\n",
                service, a.server_handle, a.port
            ));
        }
    }
    let active: Vec<&str> = state.active_capabilities.iter().map(|c| c.as_str()).collect();
    prompt.push_str(&format!(
        "- active capabilities: {}\n",
        if active.is_empty() {
            "none".to_string()
        } else {
            active.join(", ")
        }
    ));
    if let Some(summary) = &state.project_intent {
        prompt.push_str(&format!("- task summary: {}\n", summary));
    }
    prompt
}
