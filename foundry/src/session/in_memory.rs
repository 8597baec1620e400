//! In-memory session store for tests and local development.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;

use super::{SessionError, SessionLock, SessionStore};

struct Entry {
    lock: SessionLock,
    expires_at: Instant,
}

/// Session store with real TTL expiry, backed by a process-local map.
#[derive(Default)]
pub struct InMemorySessionStore {
    locks: Mutex<HashMap<i64, Entry>>,
    sequences: Mutex<HashMap<i64, u64>>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn try_acquire(
        &self,
        user_id: i64,
        lock: &SessionLock,
        ttl: Duration,
    ) -> Result<bool, SessionError> {
        let mut locks = self.locks.lock().expect("poisoned");
        let now = Instant::now();
        match locks.get(&user_id) {
            Some(entry) if entry.expires_at > now => Ok(false),
            _ => {
                locks.insert(
                    user_id,
                    Entry {
                        lock: lock.clone(),
                        expires_at: now + ttl,
                    },
                );
                Ok(true)
            }
        }
    }

    async fn get(&self, user_id: i64) -> Result<Option<SessionLock>, SessionError> {
        let mut locks = self.locks.lock().expect("poisoned");
        let now = Instant::now();
        match locks.get(&user_id) {
            Some(entry) if entry.expires_at > now => Ok(Some(entry.lock.clone())),
            Some(_) => {
                locks.remove(&user_id);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn update(
        &self,
        user_id: i64,
        lock: &SessionLock,
        ttl: Duration,
    ) -> Result<(), SessionError> {
        self.locks.lock().expect("poisoned").insert(
            user_id,
            Entry {
                lock: lock.clone(),
                expires_at: Instant::now() + ttl,
            },
        );
        Ok(())
    }

    async fn release(&self, user_id: i64) -> Result<(), SessionError> {
        self.locks.lock().expect("poisoned").remove(&user_id);
        Ok(())
    }

    async fn next_thread_seq(&self, user_id: i64) -> Result<u64, SessionError> {
        let mut sequences = self.sequences.lock().expect("poisoned");
        let seq = sequences.entry(user_id).or_insert(0);
        *seq += 1;
        Ok(*seq)
    }

    async fn current_thread_seq(&self, user_id: i64) -> Result<u64, SessionError> {
        Ok(self
            .sequences
            .lock()
            .expect("poisoned")
            .get(&user_id)
            .copied()
            .unwrap_or(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::SessionState;
    use chrono::Utc;

    fn lock(thread: &str) -> SessionLock {
        SessionLock {
            thread_id: thread.into(),
            state: SessionState::Processing,
            locked_at: Utc::now(),
        }
    }

    /// **Scenario**: Acquire is set-if-absent; a live lock blocks a second acquire.
    #[tokio::test]
    async fn acquire_is_exclusive() {
        let store = InMemorySessionStore::new();
        assert!(store
            .try_acquire(1, &lock("t1"), Duration::from_secs(60))
            .await
            .unwrap());
        assert!(!store
            .try_acquire(1, &lock("t2"), Duration::from_secs(60))
            .await
            .unwrap());
    }

    /// **Scenario**: TTL expiry is equivalent to abandonment; acquire succeeds again.
    #[tokio::test]
    async fn expired_lock_can_be_reacquired() {
        let store = InMemorySessionStore::new();
        assert!(store
            .try_acquire(1, &lock("t1"), Duration::from_millis(10))
            .await
            .unwrap());
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(store.get(1).await.unwrap().is_none());
        assert!(store
            .try_acquire(1, &lock("t2"), Duration::from_secs(60))
            .await
            .unwrap());
    }

    /// **Scenario**: The per-user sequence is strictly increasing and isolated
    /// by user; the read-only view tracks it without advancing.
    #[tokio::test]
    async fn sequence_monotonic_per_user() {
        let store = InMemorySessionStore::new();
        assert_eq!(store.current_thread_seq(1).await.unwrap(), 0);
        let a = store.next_thread_seq(1).await.unwrap();
        let b = store.next_thread_seq(1).await.unwrap();
        let other = store.next_thread_seq(2).await.unwrap();
        assert!(b > a);
        assert_eq!(other, 1);
        assert_eq!(store.current_thread_seq(1).await.unwrap(), b);
        assert_eq!(store.current_thread_seq(1).await.unwrap(), b);
    }
}
