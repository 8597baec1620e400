//! Agent session context: opaque per-container state carried across ephemeral
//! agent processes.
//!
//! Owned exclusively by the Container Manager; the coordinator never reads
//! these records. Lifetime equals the container TTL; deleting the container
//! deletes the context.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::SandboxError;

/// One prior exchange, replayed as history for agents without a resume flag.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub role: String,
    pub text: String,
}

/// Per-container session state.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionContext {
    /// Native continuation id when the agent CLI supports resuming.
    #[serde(default)]
    pub session_id: Option<String>,
    /// Prior exchanges for history replay.
    #[serde(default)]
    pub history: Vec<HistoryEntry>,
    /// Agent-specific opaque blob.
    #[serde(default)]
    pub data: Value,
}

impl SessionContext {
    pub fn push_exchange(&mut self, user_text: &str, assistant_text: &str) {
        self.history.push(HistoryEntry {
            role: "user".into(),
            text: user_text.to_string(),
        });
        self.history.push(HistoryEntry {
            role: "assistant".into(),
            text: assistant_text.to_string(),
        });
    }
}

/// Storage for session contexts, keyed by agent id.
#[async_trait]
pub trait SessionContextStore: Send + Sync {
    async fn load(&self, agent_id: &str) -> Result<Option<SessionContext>, SandboxError>;
    async fn save(
        &self,
        agent_id: &str,
        context: &SessionContext,
        ttl: Duration,
    ) -> Result<(), SandboxError>;
    async fn delete(&self, agent_id: &str) -> Result<(), SandboxError>;
}

/// Process-local store for tests.
#[derive(Default)]
pub struct InMemoryContextStore {
    entries: Mutex<HashMap<String, SessionContext>>,
}

impl InMemoryContextStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionContextStore for InMemoryContextStore {
    async fn load(&self, agent_id: &str) -> Result<Option<SessionContext>, SandboxError> {
        Ok(self.entries.lock().expect("poisoned").get(agent_id).cloned())
    }

    async fn save(
        &self,
        agent_id: &str,
        context: &SessionContext,
        _ttl: Duration,
    ) -> Result<(), SandboxError> {
        self.entries
            .lock()
            .expect("poisoned")
            .insert(agent_id.to_string(), context.clone());
        Ok(())
    }

    async fn delete(&self, agent_id: &str) -> Result<(), SandboxError> {
        self.entries.lock().expect("poisoned").remove(agent_id);
        Ok(())
    }
}

/// Redis store: `agent_session:{agent_id}` (JSON) with TTL = container TTL.
pub struct RedisContextStore {
    conn: ConnectionManager,
}

impl RedisContextStore {
    pub fn new(conn: ConnectionManager) -> Self {
        Self { conn }
    }

    fn key(agent_id: &str) -> String {
        format!("agent_session:{}", agent_id)
    }
}

#[async_trait]
impl SessionContextStore for RedisContextStore {
    async fn load(&self, agent_id: &str) -> Result<Option<SessionContext>, SandboxError> {
        let mut conn = self.conn.clone();
        let payload: Option<String> = redis::cmd("GET")
            .arg(Self::key(agent_id))
            .query_async(&mut conn)
            .await
            .map_err(|e| SandboxError::Context(e.to_string()))?;
        match payload {
            None => Ok(None),
            Some(json) => serde_json::from_str(&json)
                .map(Some)
                .map_err(|e| SandboxError::Context(e.to_string())),
        }
    }

    async fn save(
        &self,
        agent_id: &str,
        context: &SessionContext,
        ttl: Duration,
    ) -> Result<(), SandboxError> {
        let payload =
            serde_json::to_string(context).map_err(|e| SandboxError::Context(e.to_string()))?;
        let mut conn = self.conn.clone();
        let _: () = redis::cmd("SET")
            .arg(Self::key(agent_id))
            .arg(payload)
            .arg("EX")
            .arg(ttl.as_secs().max(1))
            .query_async(&mut conn)
            .await
            .map_err(|e| SandboxError::Context(e.to_string()))?;
        Ok(())
    }

    async fn delete(&self, agent_id: &str) -> Result<(), SandboxError> {
        let mut conn = self.conn.clone();
        let _: () = redis::cmd("DEL")
            .arg(Self::key(agent_id))
            .query_async(&mut conn)
            .await
            .map_err(|e| SandboxError::Context(e.to_string()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// **Scenario**: Save, load and delete round-trip in the in-memory store.
    #[tokio::test]
    async fn in_memory_roundtrip() {
        let store = InMemoryContextStore::new();
        let mut ctx = SessionContext::default();
        ctx.session_id = Some("s-1".into());
        ctx.push_exchange("write tests", "done");
        store.save("agent-1", &ctx, Duration::from_secs(60)).await.unwrap();
        let loaded = store.load("agent-1").await.unwrap().unwrap();
        assert_eq!(loaded.session_id.as_deref(), Some("s-1"));
        assert_eq!(loaded.history.len(), 2);
        store.delete("agent-1").await.unwrap();
        assert!(store.load("agent-1").await.unwrap().is_none());
    }

    /// **Scenario**: The Redis key format matches the external contract.
    #[test]
    fn redis_key_format() {
        assert_eq!(RedisContextStore::key("agent-42"), "agent_session:agent-42");
    }
}
