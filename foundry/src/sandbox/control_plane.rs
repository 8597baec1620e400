//! Container control plane over Redis streams.
//!
//! Requests arrive on `cli-agent:commands` as `{request_id, cmd, agent_id?,
//! payload}`; replies go to `cli-agent:responses` keyed by `request_id` with
//! `{ok, result?, error?}`. Structured agent replies are mirrored to
//! `agents:{agent_id}:response` and state transitions to `agents:{agent_id}:status`.

use std::sync::Arc;

use redis::aio::ConnectionManager;
use redis::streams::StreamReadReply;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use super::config::AgentContainerConfig;
use super::manager::ContainerManager;
use super::SandboxError;

/// Request stream.
pub const COMMANDS_STREAM: &str = "cli-agent:commands";
/// Response stream.
pub const RESPONSES_STREAM: &str = "cli-agent:responses";

/// One control-plane request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControlRequest {
    pub request_id: String,
    pub cmd: String,
    #[serde(default)]
    pub agent_id: Option<String>,
    #[serde(default)]
    pub payload: Value,
}

/// One control-plane response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControlResponse {
    pub request_id: String,
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ControlResponse {
    fn ok(request_id: &str, result: Value) -> Self {
        Self {
            request_id: request_id.to_string(),
            ok: true,
            result: Some(result),
            error: None,
        }
    }

    fn err(request_id: &str, error: &SandboxError) -> Self {
        Self {
            request_id: request_id.to_string(),
            ok: false,
            result: None,
            error: Some(error.to_string()),
        }
    }
}

/// Serves the control-plane streams, delegating to the [`ContainerManager`].
pub struct ControlPlaneServer {
    conn: ConnectionManager,
    manager: Arc<ContainerManager>,
}

impl ControlPlaneServer {
    pub fn new(conn: ConnectionManager, manager: Arc<ContainerManager>) -> Self {
        Self { conn, manager }
    }

    async fn xadd(&self, stream: &str, payload: &str) {
        let mut conn = self.conn.clone();
        let added: Result<String, _> = redis::cmd("XADD")
            .arg(stream)
            .arg("*")
            .arg("payload")
            .arg(payload)
            .query_async(&mut conn)
            .await;
        if let Err(e) = added {
            error!(stream, error = %e, "control-plane publish failed");
        }
    }

    async fn publish_status(&self, agent_id: &str) {
        if let Ok(status) = self.manager.status(agent_id) {
            if let Ok(json) = serde_json::to_string(&status) {
                self.xadd(&format!("agents:{}:status", agent_id), &json).await;
            }
        }
    }

    fn require_agent_id(request: &ControlRequest) -> Result<&str, SandboxError> {
        request
            .agent_id
            .as_deref()
            .ok_or_else(|| SandboxError::InvalidConfig("agent_id required".into()))
    }

    /// Dispatches one request to the manager.
    pub async fn handle(&self, request: &ControlRequest) -> ControlResponse {
        let outcome: Result<Value, SandboxError> = match request.cmd.as_str() {
            "create" => {
                let config: AgentContainerConfig =
                    match serde_json::from_value(request.payload.clone()) {
                        Ok(c) => c,
                        Err(e) => {
                            return ControlResponse::err(
                                &request.request_id,
                                &SandboxError::InvalidConfig(e.to_string()),
                            )
                        }
                    };
                self.manager
                    .create(config)
                    .await
                    .map(|agent_id| json!({ "agent_id": agent_id }))
            }
            "send_message" => match Self::require_agent_id(request) {
                Ok(agent_id) => {
                    let text = request
                        .payload
                        .get("text")
                        .and_then(Value::as_str)
                        .unwrap_or_default();
                    match self.manager.send_message(agent_id, text, None).await {
                        Ok(reply) => {
                            let body = json!({ "text": reply.text, "metadata": reply.metadata });
                            self.xadd(
                                &format!("agents:{}:response", agent_id),
                                &body.to_string(),
                            )
                            .await;
                            Ok(body)
                        }
                        Err(e) => Err(e),
                    }
                }
                Err(e) => Err(e),
            },
            "send_command" => match Self::require_agent_id(request) {
                Ok(agent_id) => {
                    let command = request
                        .payload
                        .get("command")
                        .and_then(Value::as_str)
                        .unwrap_or_default();
                    match self.manager.run_command(agent_id, command).await {
                        Ok(output) => {
                            self.xadd(
                                &format!("agents:{}:command_exit", agent_id),
                                &json!({ "exit_code": output.exit_code }).to_string(),
                            )
                            .await;
                            Ok(json!({
                                "exit_code": output.exit_code,
                                "stdout": output.stdout,
                                "stderr": output.stderr,
                            }))
                        }
                        Err(e) => Err(e),
                    }
                }
                Err(e) => Err(e),
            },
            "send_file" => match Self::require_agent_id(request) {
                Ok(agent_id) => {
                    let path = request
                        .payload
                        .get("path")
                        .and_then(Value::as_str)
                        .unwrap_or_default();
                    let content = request
                        .payload
                        .get("content")
                        .and_then(Value::as_str)
                        .unwrap_or_default();
                    self.manager
                        .send_file(agent_id, path, content)
                        .await
                        .map(|()| json!({}))
                }
                Err(e) => Err(e),
            },
            "status" => Self::require_agent_id(request).and_then(|agent_id| {
                self.manager
                    .status(agent_id)
                    .and_then(|s| serde_json::to_value(s).map_err(|e| SandboxError::Driver(e.to_string())))
            }),
            "logs" => match Self::require_agent_id(request) {
                Ok(agent_id) => self
                    .manager
                    .logs(agent_id)
                    .await
                    .map(|logs| json!({ "logs": logs })),
                Err(e) => Err(e),
            },
            "delete" => match Self::require_agent_id(request) {
                Ok(agent_id) => self.manager.delete(agent_id).await.map(|()| json!({})),
                Err(e) => Err(e),
            },
            other => Err(SandboxError::InvalidConfig(format!("unknown cmd: {}", other))),
        };

        if let Some(agent_id) = request.agent_id.as_deref() {
            self.publish_status(agent_id).await;
        }
        match outcome {
            Ok(result) => ControlResponse::ok(&request.request_id, result),
            Err(e) => {
                warn!(cmd = %request.cmd, error = %e, "control-plane command failed");
                ControlResponse::err(&request.request_id, &e)
            }
        }
    }

    /// Blocking serve loop; runs until `shutdown` is cancelled.
    pub async fn serve(&self, shutdown: CancellationToken) {
        info!("container control plane started");
        let mut cursor = "$".to_string();
        loop {
            if shutdown.is_cancelled() {
                info!("container control plane stopping");
                return;
            }
            let mut conn = self.conn.clone();
            let reply: Result<StreamReadReply, _> = redis::cmd("XREAD")
                .arg("COUNT")
                .arg(8)
                .arg("BLOCK")
                .arg(2_000)
                .arg("STREAMS")
                .arg(COMMANDS_STREAM)
                .arg(&cursor)
                .query_async(&mut conn)
                .await;
            let reply = match reply {
                Ok(r) => r,
                Err(e) => {
                    error!(error = %e, "control-plane read failed; backing off");
                    tokio::time::sleep(std::time::Duration::from_secs(1)).await;
                    continue;
                }
            };
            for key in reply.keys {
                for entry in key.ids {
                    cursor = entry.id.clone();
                    let Some(payload) = entry.get::<String>("payload") else {
                        warn!(entry_id = %entry.id, "command entry without payload");
                        continue;
                    };
                    match serde_json::from_str::<ControlRequest>(&payload) {
                        Ok(request) => {
                            let response = self.handle(&request).await;
                            if let Ok(json) = serde_json::to_string(&response) {
                                self.xadd(RESPONSES_STREAM, &json).await;
                            }
                        }
                        Err(e) => warn!(error = %e, "undecodable control request"),
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// **Scenario**: Requests and responses round-trip the documented JSON shape.
    #[test]
    fn request_response_wire_shape() {
        let request: ControlRequest = serde_json::from_str(
            r#"{"request_id": "r1", "cmd": "send_message", "agent_id": "agent-1",
                "payload": {"text": "hello"}}"#,
        )
        .unwrap();
        assert_eq!(request.cmd, "send_message");
        assert_eq!(request.agent_id.as_deref(), Some("agent-1"));

        let response = ControlResponse::ok("r1", json!({"text": "hi"}));
        let rendered = serde_json::to_value(&response).unwrap();
        assert_eq!(rendered["ok"], true);
        assert!(rendered.get("error").is_none());
    }
}
