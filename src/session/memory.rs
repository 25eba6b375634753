use super::{SessionError, SessionId, SessionState, SessionStore};
use async_trait::async_trait;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::debug;

struct Entry {
    payload: String,
    written_at: Instant,
}

/// In-process store holding each session as its JSON record.
///
/// Entries expire `ttl` after their last write; expired entries are pruned on write.
pub struct MemorySessionStore {
    ttl: Duration,
    entries: RwLock<HashMap<SessionId, Entry>>,
}

impl MemorySessionStore {
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: RwLock::new(HashMap::new()),
        }
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn get(&self, id: &SessionId) -> Result<SessionState, SessionError> {
        let entries = self.entries.read().await;
        match entries.get(id) {
            Some(entry) if entry.written_at.elapsed() < self.ttl => {
                Ok(serde_json::from_str(&entry.payload)?)
            }
            _ => Ok(SessionState::empty()),
        }
    }

    async fn put(&self, id: &SessionId, state: SessionState) -> Result<(), SessionError> {
        let payload = serde_json::to_string(&state)?;
        let mut entries = self.entries.write().await;
        entries.retain(|_, entry| entry.written_at.elapsed() < self.ttl);
        entries.insert(
            id.clone(),
            Entry {
                payload,
                written_at: Instant::now(),
            },
        );
        debug!(sessions = entries.len(), "session stored");
        Ok(())
    }

    async fn clear(&self, id: &SessionId) -> Result<(), SessionError> {
        self.entries.write().await.remove(id);
        Ok(())
    }
}
