//! Pluggable session storage.

use super::Session;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Backend holding the live sessions.
///
/// Implementations must serialize access internally; every method can be
/// called from multiple connections at once.
pub trait SessionStore: Send + Sync {
    /// Create and retain a new session under `id`.
    fn create(&self, id: String) -> Arc<Session>;

    /// Look up an existing session.
    fn get(&self, id: &str) -> Option<Arc<Session>>;

    /// Drop the session with the given id.
    fn destroy(&self, id: &str);

    /// Drop every session idle for longer than `max_idle`; returns how
    /// many were removed.
    fn destroy_expired(&self, max_idle: Duration) -> usize;
}

/// The default in-memory store: one mutex around the whole map.
#[derive(Debug, Default)]
pub struct MemoryStore {
    sessions: Mutex<HashMap<String, Arc<Session>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live sessions.
    pub fn len(&self) -> usize {
        self.sessions.lock().expect("session store poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl SessionStore for MemoryStore {
    fn create(&self, id: String) -> Arc<Session> {
        let session = Arc::new(Session::new(id.clone()));
        self.sessions
            .lock()
            .expect("session store poisoned")
            .insert(id, Arc::clone(&session));
        session
    }

    fn get(&self, id: &str) -> Option<Arc<Session>> {
        self.sessions
            .lock()
            .expect("session store poisoned")
            .get(id)
            .cloned()
    }

    fn destroy(&self, id: &str) {
        self.sessions
            .lock()
            .expect("session store poisoned")
            .remove(id);
    }

    fn destroy_expired(&self, max_idle: Duration) -> usize {
        let mut sessions = self.sessions.lock().expect("session store poisoned");
        let before = sessions.len();
        sessions.retain(|_, s| s.idle_time() <= max_idle);
        before - sessions.len()
    }
}
