//! Diagnose capability tools: incidents.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::clients::CrudApi as _;

use super::{required_str, Tool, ToolContext, ToolError, ToolOutcome};

pub(super) fn all() -> Vec<Arc<dyn Tool>> {
    vec![Arc::new(ListActiveIncidents), Arc::new(ReportIncident)]
}

struct ListActiveIncidents;

#[async_trait]
impl Tool for ListActiveIncidents {
    fn name(&self) -> &'static str {
        "list_active_incidents"
    }

    fn description(&self) -> &'static str {
        "List unresolved infrastructure incidents."
    }

    fn input_schema(&self) -> Value {
        json!({ "type": "object", "properties": {} })
    }

    async fn call(&self, _args: Value, ctx: &ToolContext<'_>) -> Result<ToolOutcome, ToolError> {
        let incidents = ctx
            .services
            .crud
            .active_incidents()
            .await
            .map_err(|e| ToolError::Transient(e.to_string()))?;
        Ok(ToolOutcome::text_only(
            serde_json::to_string(&incidents).unwrap_or_else(|_| "[]".into()),
        ))
    }
}

struct ReportIncident;

#[async_trait]
impl Tool for ReportIncident {
    fn name(&self) -> &'static str {
        "report_incident"
    }

    fn description(&self) -> &'static str {
        "Create an incident record for a degraded server."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "server_handle": { "type": "string" },
                "summary": { "type": "string" }
            },
            "required": ["server_handle", "summary"]
        })
    }

    async fn call(&self, args: Value, ctx: &ToolContext<'_>) -> Result<ToolOutcome, ToolError> {
        let server_handle = required_str(&args, "server_handle")?;
        let summary = required_str(&args, "summary")?;
        let incident = ctx
            .services
            .crud
            .create_incident(server_handle, summary)
            .await
            .map_err(|e| ToolError::Transient(e.to_string()))?;
        Ok(ToolOutcome::text_only(
            json!({ "incident_id": incident.id }).to_string(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::OrchestratorState;
    use crate::tools::test_support::services;

    /// **Scenario**: Reported incidents show up in the active list.
    #[tokio::test]
    async fn report_then_list() {
        let (svc, ..) = services();
        let state = OrchestratorState::default();
        let ctx = ToolContext { state: &state, services: &svc };
        ReportIncident
            .call(
                json!({ "server_handle": "vps-1", "summary": "health probe failing" }),
                &ctx,
            )
            .await
            .unwrap();
        let outcome = ListActiveIncidents.call(json!({}), &ctx).await.unwrap();
        assert!(outcome.text.contains("health probe failing"));
    }
}
