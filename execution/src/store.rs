use meltdown_types::meltdown::{GameSession, SessionId, SessionInvariantError};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::Mutex as SessionLock;

/// A session behind its own lock. Holding the lock serializes every action and transition of
/// that session; other sessions are unaffected.
pub type SharedSession = Arc<SessionLock<GameSession>>;

/// Live sessions keyed by identifier.
///
/// The map lock is only held for lookups and inserts, never across an await.
#[derive(Default)]
pub struct SessionStore {
    sessions: Mutex<HashMap<SessionId, SharedSession>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a new session identified by `now_ms`, or the next free identifier above it.
    pub fn create(
        &self,
        pot: u64,
        channel: Option<String>,
        now_ms: u64,
    ) -> Result<(SessionId, SharedSession), SessionInvariantError> {
        let mut sessions = self.sessions.lock().unwrap_or_else(PoisonError::into_inner);
        let mut id = SessionId(now_ms);
        while sessions.contains_key(&id) {
            id = SessionId(id.0.wrapping_add(1));
        }
        let session = GameSession::new(id, pot)?.with_channel(channel);
        let shared = Arc::new(SessionLock::new(session));
        sessions.insert(id, Arc::clone(&shared));
        Ok((id, shared))
    }

    pub fn get(&self, id: SessionId) -> Option<SharedSession> {
        self.sessions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&id)
            .cloned()
    }

    pub fn remove(&self, id: SessionId) -> Option<SharedSession> {
        self.sessions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id)
    }

    pub fn len(&self) -> usize {
        self.sessions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn ids(&self) -> Vec<SessionId> {
        let mut ids: Vec<_> = self
            .sessions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .copied()
            .collect();
        ids.sort();
        ids
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_bumps_colliding_ids() {
        let store = SessionStore::new();
        let (first, _) = store.create(100, None, 1_000).unwrap();
        let (second, _) = store.create(100, None, 1_000).unwrap();
        let (third, _) = store.create(100, None, 1_001).unwrap();
        assert_eq!(first, SessionId(1_000));
        assert_eq!(second, SessionId(1_001));
        assert_eq!(third, SessionId(1_002));
        assert_eq!(store.ids(), vec![first, second, third]);
    }

    #[test]
    fn test_create_rejects_empty_pot() {
        let store = SessionStore::new();
        assert!(matches!(
            store.create(0, None, 1),
            Err(SessionInvariantError::EmptyPot)
        ));
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_remove_drops_session() {
        let store = SessionStore::new();
        let (id, _) = store.create(50, Some("general".to_string()), 7).unwrap();
        let shared = store.get(id).unwrap();
        assert_eq!(shared.lock().await.channel.as_deref(), Some("general"));

        assert!(store.remove(id).is_some());
        assert!(store.get(id).is_none());
        assert_eq!(store.len(), 0);
    }
}
