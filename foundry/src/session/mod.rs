//! Per-user session lock and lifecycle state machine.
//!
//! Serializes a user's traffic: at most one graph execution per user at any
//! time. The lock record lives under `session:lock:{user_id}` with a TTL
//! (default 30 min, refreshed on activity); thread ids come from the persistent
//! counter `thread:sequence:{user_id}` and are strictly increasing per user.

mod coordinator;
mod in_memory;
mod redis_store;

pub use coordinator::{Continuation, SessionCoordinator, DEFAULT_SESSION_TTL};
pub use in_memory::InMemorySessionStore;
pub use redis_store::RedisSessionStore;

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Lock lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// A graph execution is in flight; new messages are rejected.
    Processing,
    /// The agent asked the user something; the next message continues the thread.
    Awaiting,
}

/// Per-user lock record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionLock {
    pub thread_id: String,
    pub state: SessionState,
    pub locked_at: DateTime<Utc>,
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("storage: {0}")]
    Storage(String),
    #[error("serialization: {0}")]
    Serialization(String),
}

/// Storage behind the session coordinator.
///
/// `try_acquire` must be atomic set-if-absent with TTL; `next_thread_seq` must
/// be a persistent, monotonically increasing counter per user.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Creates the lock iff none exists. Returns whether it succeeded.
    async fn try_acquire(
        &self,
        user_id: i64,
        lock: &SessionLock,
        ttl: Duration,
    ) -> Result<bool, SessionError>;

    /// Current lock, if present and unexpired.
    async fn get(&self, user_id: i64) -> Result<Option<SessionLock>, SessionError>;

    /// Overwrites the lock and refreshes its TTL.
    async fn update(
        &self,
        user_id: i64,
        lock: &SessionLock,
        ttl: Duration,
    ) -> Result<(), SessionError>;

    /// Removes the lock.
    async fn release(&self, user_id: i64) -> Result<(), SessionError>;

    /// Next value of the persistent per-user thread sequence.
    async fn next_thread_seq(&self, user_id: i64) -> Result<u64, SessionError>;

    /// Current value of the sequence without advancing it; 0 when the user has
    /// never started a thread. Used to enumerate a user's past threads.
    async fn current_thread_seq(&self, user_id: i64) -> Result<u64, SessionError>;
}
