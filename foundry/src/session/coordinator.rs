//! Session coordinator: acquire / continue_or_start / update / release.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::debug;

use super::{SessionError, SessionLock, SessionState, SessionStore};

/// Default lock TTL: 30 minutes. Expiry is equivalent to abandonment.
pub const DEFAULT_SESSION_TTL: Duration = Duration::from_secs(30 * 60);

/// Outcome of [`SessionCoordinator::continue_or_start`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Continuation {
    /// No lock existed: a fresh thread was allocated and locked.
    Started { thread_id: String },
    /// The lock was `Awaiting`: flipped back to `Processing`, same thread.
    Continued { thread_id: String },
    /// The lock is `Processing`: the caller must reject the message with a
    /// user-visible notice and must not enqueue it.
    Busy,
}

/// Per-user lock state machine over a [`SessionStore`].
pub struct SessionCoordinator {
    store: Arc<dyn SessionStore>,
    ttl: Duration,
}

impl SessionCoordinator {
    pub fn new(store: Arc<dyn SessionStore>) -> Self {
        Self {
            store,
            ttl: DEFAULT_SESSION_TTL,
        }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    fn new_lock(thread_id: String) -> SessionLock {
        SessionLock {
            thread_id,
            state: SessionState::Processing,
            locked_at: Utc::now(),
        }
    }

    /// Atomically creates the lock for a known thread id. Returns whether it
    /// succeeded.
    pub async fn acquire(&self, user_id: i64, thread_id: &str) -> Result<bool, SessionError> {
        self.store
            .try_acquire(user_id, &Self::new_lock(thread_id.to_string()), self.ttl)
            .await
    }

    /// Transitions the lock state (Processing ⇄ Awaiting) and refreshes the TTL.
    /// No-op when the lock is gone (expired or released).
    pub async fn update_state(
        &self,
        user_id: i64,
        state: SessionState,
    ) -> Result<(), SessionError> {
        if let Some(mut lock) = self.store.get(user_id).await? {
            lock.state = state;
            self.store.update(user_id, &lock, self.ttl).await?;
        }
        Ok(())
    }

    /// Removes the lock.
    pub async fn release(&self, user_id: i64) -> Result<(), SessionError> {
        self.store.release(user_id).await
    }

    /// Routes an incoming message: new thread, continuation, or busy-reject.
    ///
    /// Thread ids are `thread_{user}_{seq}` with a strictly increasing per-user
    /// sequence, so a fresh thread always sorts after every previous one.
    pub async fn continue_or_start(&self, user_id: i64) -> Result<Continuation, SessionError> {
        match self.store.get(user_id).await? {
            None => {
                let seq = self.store.next_thread_seq(user_id).await?;
                let thread_id = format!("thread_{}_{}", user_id, seq);
                // Lost race: another message locked first; treat as busy.
                if !self.acquire(user_id, &thread_id).await? {
                    return Ok(Continuation::Busy);
                }
                debug!(user_id, %thread_id, "session started");
                Ok(Continuation::Started { thread_id })
            }
            Some(lock) if lock.state == SessionState::Awaiting => {
                let mut lock = lock;
                lock.state = SessionState::Processing;
                self.store.update(user_id, &lock, self.ttl).await?;
                debug!(user_id, thread_id = %lock.thread_id, "session continued");
                Ok(Continuation::Continued {
                    thread_id: lock.thread_id,
                })
            }
            Some(_) => Ok(Continuation::Busy),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::InMemorySessionStore;

    fn coordinator() -> SessionCoordinator {
        SessionCoordinator::new(Arc::new(InMemorySessionStore::new()))
    }

    /// **Scenario**: First message starts a thread; a second during Processing is Busy.
    #[tokio::test]
    async fn start_then_busy() {
        let c = coordinator();
        let first = c.continue_or_start(7).await.unwrap();
        let thread_id = match first {
            Continuation::Started { thread_id } => thread_id,
            other => panic!("expected Started, got {:?}", other),
        };
        assert!(thread_id.starts_with("thread_7_"));
        assert_eq!(c.continue_or_start(7).await.unwrap(), Continuation::Busy);
    }

    /// **Scenario**: After update_state(Awaiting), the next message continues the
    /// same thread and flips back to Processing.
    #[tokio::test]
    async fn awaiting_flips_to_continued() {
        let c = coordinator();
        let Continuation::Started { thread_id } = c.continue_or_start(7).await.unwrap() else {
            panic!("expected Started");
        };
        c.update_state(7, SessionState::Awaiting).await.unwrap();
        match c.continue_or_start(7).await.unwrap() {
            Continuation::Continued { thread_id: t } => assert_eq!(t, thread_id),
            other => panic!("expected Continued, got {:?}", other),
        }
        // Now Processing again: further messages are rejected.
        assert_eq!(c.continue_or_start(7).await.unwrap(), Continuation::Busy);
    }

    /// **Scenario**: Released sessions start fresh threads with increasing ids.
    #[tokio::test]
    async fn thread_ids_strictly_increase() {
        let c = coordinator();
        let mut seqs = Vec::new();
        for _ in 0..3 {
            let Continuation::Started { thread_id } = c.continue_or_start(9).await.unwrap() else {
                panic!("expected Started");
            };
            let seq: u64 = thread_id.rsplit('_').next().unwrap().parse().unwrap();
            seqs.push(seq);
            c.release(9).await.unwrap();
        }
        assert!(seqs.windows(2).all(|w| w[0] < w[1]), "{:?}", seqs);
    }

    /// **Scenario**: TTL expiry abandons the session; the next message starts a
    /// fresh thread rather than continuing.
    #[tokio::test]
    async fn expired_lock_starts_fresh_thread() {
        let c = SessionCoordinator::new(Arc::new(InMemorySessionStore::new()))
            .with_ttl(Duration::from_millis(10));
        let Continuation::Started { thread_id: first } = c.continue_or_start(5).await.unwrap()
        else {
            panic!("expected Started");
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        match c.continue_or_start(5).await.unwrap() {
            Continuation::Started { thread_id } => assert_ne!(thread_id, first),
            other => panic!("expected Started, got {:?}", other),
        }
    }
}
