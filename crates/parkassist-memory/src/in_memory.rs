//! Process-local TTL session store

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parkassist_core::{SessionState, SessionStore, SessionStoreError};

struct Entry {
    expires_at: Instant,
    state: SessionState,
}

/// TTL map keyed by `session_id`. Expired entries are dropped on read, so
/// they are never observable through `get`. Clones share state.
pub struct InMemorySessionStore {
    entries: Arc<RwLock<HashMap<String, Entry>>>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self {
            entries: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Number of live (non-expired) sessions.
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.entries
            .read()
            .values()
            .filter(|entry| entry.expires_at > now)
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for InMemorySessionStore {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for InMemorySessionStore {
    fn clone(&self) -> Self {
        Self {
            entries: Arc::clone(&self.entries),
        }
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn get(&self, session_id: &str) -> Result<Option<SessionState>, SessionStoreError> {
        let now = Instant::now();
        {
            let entries = self.entries.read();
            match entries.get(session_id) {
                Some(entry) if entry.expires_at > now => return Ok(Some(entry.state.clone())),
                Some(_) => {}
                None => return Ok(None),
            }
        }
        // Entry exists but has expired; drop it under the write lock.
        self.entries.write().remove(session_id);
        Ok(None)
    }

    async fn put(
        &self,
        session_id: &str,
        state: SessionState,
        ttl: Duration,
    ) -> Result<(), SessionStoreError> {
        let ttl = ttl.max(Duration::from_secs(1));
        self.entries.write().insert(
            session_id.to_string(),
            Entry {
                expires_at: Instant::now() + ttl,
                state,
            },
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parkassist_core::{SlotKey, TurnRecord};

    fn state_with_plate(plate_no: &str) -> SessionState {
        let mut state = SessionState::default();
        state.slots.set(SlotKey::PlateNo, plate_no);
        state
    }

    #[tokio::test]
    async fn test_put_get_roundtrip() {
        let store = InMemorySessionStore::new();
        store
            .put("ses-1", state_with_plate("沪SCN020"), Duration::from_secs(60))
            .await
            .unwrap();

        let state = store.get("ses-1").await.unwrap().unwrap();
        assert_eq!(state.slots.get(SlotKey::PlateNo), Some("沪SCN020"));
    }

    #[tokio::test]
    async fn test_missing_session_is_none() {
        let store = InMemorySessionStore::new();
        assert!(store.get("nope").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_sessions_are_isolated() {
        let store = InMemorySessionStore::new();
        store
            .put("ses-a", state_with_plate("沪SCN020"), Duration::from_secs(60))
            .await
            .unwrap();

        assert!(store.get("ses-b").await.unwrap().is_none());
        let a = store.get("ses-a").await.unwrap().unwrap();
        assert_eq!(a.slots.get(SlotKey::PlateNo), Some("沪SCN020"));
    }

    #[tokio::test]
    async fn test_expired_entry_not_observable() {
        let store = InMemorySessionStore::new();
        // Minimum TTL is clamped to 1s, so write directly with an expired entry.
        store.entries.write().insert(
            "ses-old".to_string(),
            Entry {
                expires_at: Instant::now() - Duration::from_secs(1),
                state: state_with_plate("沪A00001"),
            },
        );

        assert!(store.get("ses-old").await.unwrap().is_none());
        assert_eq!(store.len(), 0);
    }

    #[tokio::test]
    async fn test_last_writer_wins() {
        let store = InMemorySessionStore::new();
        store
            .put("ses-1", state_with_plate("沪A00001"), Duration::from_secs(60))
            .await
            .unwrap();

        let mut newer = state_with_plate("沪A00002");
        newer.push_turn(
            TurnRecord {
                turn_id: "t2".into(),
                query: "q".into(),
                intent: None,
                order_no: None,
            },
            10,
        );
        store
            .put("ses-1", newer, Duration::from_secs(60))
            .await
            .unwrap();

        let state = store.get("ses-1").await.unwrap().unwrap();
        assert_eq!(state.slots.get(SlotKey::PlateNo), Some("沪A00002"));
        assert_eq!(state.turns.len(), 1);
    }

    #[tokio::test]
    async fn test_clone_shares_entries() {
        let store = InMemorySessionStore::new();
        let cloned = store.clone();
        store
            .put("ses-1", SessionState::default(), Duration::from_secs(60))
            .await
            .unwrap();
        assert!(cloned.get("ses-1").await.unwrap().is_some());
    }
}
