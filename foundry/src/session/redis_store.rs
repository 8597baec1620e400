//! Redis-backed session store.
//!
//! Lock: `session:lock:{user_id}` (JSON, SET NX EX for acquire, SET EX for
//! refresh). Sequence: `thread:sequence:{user_id}` via INCR, never expired.

use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;

use super::{SessionError, SessionLock, SessionStore};

pub struct RedisSessionStore {
    conn: ConnectionManager,
}

impl RedisSessionStore {
    pub fn new(conn: ConnectionManager) -> Self {
        Self { conn }
    }

    fn lock_key(user_id: i64) -> String {
        format!("session:lock:{}", user_id)
    }

    fn seq_key(user_id: i64) -> String {
        format!("thread:sequence:{}", user_id)
    }

    fn encode(lock: &SessionLock) -> Result<String, SessionError> {
        serde_json::to_string(lock).map_err(|e| SessionError::Serialization(e.to_string()))
    }
}

#[async_trait]
impl SessionStore for RedisSessionStore {
    async fn try_acquire(
        &self,
        user_id: i64,
        lock: &SessionLock,
        ttl: Duration,
    ) -> Result<bool, SessionError> {
        let mut conn = self.conn.clone();
        let set: Option<String> = redis::cmd("SET")
            .arg(Self::lock_key(user_id))
            .arg(Self::encode(lock)?)
            .arg("NX")
            .arg("EX")
            .arg(ttl.as_secs().max(1))
            .query_async(&mut conn)
            .await
            .map_err(|e| SessionError::Storage(e.to_string()))?;
        Ok(set.is_some())
    }

    async fn get(&self, user_id: i64) -> Result<Option<SessionLock>, SessionError> {
        let mut conn = self.conn.clone();
        let payload: Option<String> = redis::cmd("GET")
            .arg(Self::lock_key(user_id))
            .query_async(&mut conn)
            .await
            .map_err(|e| SessionError::Storage(e.to_string()))?;
        match payload {
            None => Ok(None),
            Some(json) => serde_json::from_str(&json)
                .map(Some)
                .map_err(|e| SessionError::Serialization(e.to_string())),
        }
    }

    async fn update(
        &self,
        user_id: i64,
        lock: &SessionLock,
        ttl: Duration,
    ) -> Result<(), SessionError> {
        let mut conn = self.conn.clone();
        let _: () = redis::cmd("SET")
            .arg(Self::lock_key(user_id))
            .arg(Self::encode(lock)?)
            .arg("EX")
            .arg(ttl.as_secs().max(1))
            .query_async(&mut conn)
            .await
            .map_err(|e| SessionError::Storage(e.to_string()))?;
        Ok(())
    }

    async fn release(&self, user_id: i64) -> Result<(), SessionError> {
        let mut conn = self.conn.clone();
        let _: () = redis::cmd("DEL")
            .arg(Self::lock_key(user_id))
            .query_async(&mut conn)
            .await
            .map_err(|e| SessionError::Storage(e.to_string()))?;
        Ok(())
    }

    async fn next_thread_seq(&self, user_id: i64) -> Result<u64, SessionError> {
        let mut conn = self.conn.clone();
        let seq: u64 = redis::cmd("INCR")
            .arg(Self::seq_key(user_id))
            .query_async(&mut conn)
            .await
            .map_err(|e| SessionError::Storage(e.to_string()))?;
        Ok(seq)
    }

    async fn current_thread_seq(&self, user_id: i64) -> Result<u64, SessionError> {
        let mut conn = self.conn.clone();
        let seq: Option<u64> = redis::cmd("GET")
            .arg(Self::seq_key(user_id))
            .query_async(&mut conn)
            .await
            .map_err(|e| SessionError::Storage(e.to_string()))?;
        Ok(seq.unwrap_or(0))
    }
}
