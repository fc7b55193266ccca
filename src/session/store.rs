//! In-memory registry of chat sessions.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use super::chat::ChatSession;

/// Idle time after which a session may be pruned.
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(30 * 60);

/// Thread-safe store for all active chat sessions.
///
/// Idle sessions are pruned whenever a new one is inserted.
#[derive(Debug, Clone)]
pub struct SessionStore {
    inner: Arc<SessionStoreInner>,
}

#[derive(Debug)]
struct SessionStoreInner {
    sessions: RwLock<HashMap<String, ChatSession>>,
    idle_timeout: Duration,
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new(DEFAULT_IDLE_TIMEOUT)
    }
}

impl SessionStore {
    #[must_use]
    pub fn new(idle_timeout: Duration) -> Self {
        Self {
            inner: Arc::new(SessionStoreInner {
                sessions: RwLock::new(HashMap::new()),
                idle_timeout,
            }),
        }
    }

    /// Register `session`, pruning idle ones first.
    pub fn insert(&self, session: ChatSession) -> ChatSession {
        let pruned = self.cleanup_expired();
        if pruned > 0 {
            tracing::debug!(pruned, "Pruned idle chat sessions");
        }

        let mut guard = self.inner.sessions.write().unwrap();
        guard.insert(session.id().to_string(), session.clone());
        session
    }

    /// Get a session by ID.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<ChatSession> {
        let guard = self.inner.sessions.read().unwrap();
        guard.get(id).cloned()
    }

    /// Remove a session by ID, cancelling any turn in flight.
    pub fn remove(&self, id: &str) -> Option<ChatSession> {
        let removed = self.inner.sessions.write().unwrap().remove(id);
        if let Some(session) = &removed {
            session.cancel();
        }
        removed
    }

    /// Get the number of active sessions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.sessions.read().unwrap().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remove sessions idle longer than the store's timeout.
    ///
    /// Sessions awaiting a reply are kept. Returns the number removed.
    pub fn cleanup_expired(&self) -> usize {
        self.cleanup_expired_with_timeout(self.inner.idle_timeout)
    }

    /// Remove sessions that have been inactive longer than `timeout`.
    pub fn cleanup_expired_with_timeout(&self, timeout: Duration) -> usize {
        let mut guard = self.inner.sessions.write().unwrap();
        let before = guard.len();
        guard.retain(|_, session| {
            session.is_awaiting_response() || !session.is_expired_with_timeout(timeout)
        });
        before - guard.len()
    }
}
