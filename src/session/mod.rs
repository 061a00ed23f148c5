//! Cookie-keyed server-side sessions.
//!
//! A [`SessionManager`] hands out [`Session`]s keyed by a request cookie,
//! minting a new session (and setting the cookie on the response) when the
//! request carries none. Storage is pluggable through [`SessionStore`].

mod storage;

pub use storage::{MemoryStore, SessionStore};

use crate::http::{RequestHead, Response};
use cookie::{Cookie, SameSite};
use rand::Rng;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant, SystemTime};

/// Default name of the session cookie.
pub const DEFAULT_COOKIE_NAME: &str = "sessionId";

const SESSION_ID_LENGTH: usize = 32;

/// A single client's server-side state.
pub struct Session {
    id: String,
    created: SystemTime,
    inner: Mutex<SessionInner>,
}

struct SessionInner {
    last_access: Instant,
    values: HashMap<String, String>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("created", &self.created)
            .finish_non_exhaustive()
    }
}

impl Session {
    pub(crate) fn new(id: String) -> Self {
        Self {
            id,
            created: SystemTime::now(),
            inner: Mutex::new(SessionInner {
                last_access: Instant::now(),
                values: HashMap::new(),
            }),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn created(&self) -> SystemTime {
        self.created
    }

    /// Add or update a key/value pair. Empty keys and values are refused.
    pub fn set(&self, key: &str, value: impl Into<String>) -> bool {
        let value = value.into();
        if key.is_empty() || value.is_empty() {
            return false;
        }
        let mut inner = self.inner.lock().expect("session poisoned");
        inner.last_access = Instant::now();
        inner.values.insert(key.to_owned(), value);
        true
    }

    /// The value stored under `key`, if any.
    pub fn get(&self, key: &str) -> Option<String> {
        if key.is_empty() {
            return None;
        }
        let mut inner = self.inner.lock().expect("session poisoned");
        inner.last_access = Instant::now();
        inner.values.get(key).cloned()
    }

    /// Remove a key/value pair; returns whether one was removed.
    pub fn remove(&self, key: &str) -> bool {
        if key.is_empty() {
            return false;
        }
        let mut inner = self.inner.lock().expect("session poisoned");
        inner.last_access = Instant::now();
        inner.values.remove(key).is_some()
    }

    /// Time since the session was last touched.
    pub fn idle_time(&self) -> Duration {
        self.inner
            .lock()
            .expect("session poisoned")
            .last_access
            .elapsed()
    }

    fn make_cookie(&self, name: &str) -> Cookie<'static> {
        Cookie::build((name.to_owned(), self.id.clone()))
            .http_only(true)
            .secure(true)
            .same_site(SameSite::Strict)
            .path("/")
            .build()
    }
}

/// Hands out sessions keyed by the session cookie.
pub struct SessionManager {
    store: Arc<dyn SessionStore>,
    cookie_name: String,
}

impl std::fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionManager")
            .field("cookie_name", &self.cookie_name)
            .finish_non_exhaustive()
    }
}

impl SessionManager {
    pub fn new(store: Arc<dyn SessionStore>) -> Self {
        Self {
            store,
            cookie_name: DEFAULT_COOKIE_NAME.to_owned(),
        }
    }

    pub fn with_cookie_name(mut self, name: impl Into<String>) -> Self {
        self.cookie_name = name.into();
        self
    }

    /// The session belonging to the request, or a fresh one.
    ///
    /// When a new session is minted its cookie
    /// (`HttpOnly; Secure; SameSite=Strict; Path=/`) is set on `response`.
    pub fn get_or_create(&self, head: &RequestHead, response: &mut Response) -> Arc<Session> {
        if let Some(id) = head.cookie(&self.cookie_name) {
            if let Some(session) = self.store.get(&id) {
                return session;
            }
        }

        let id = generate_session_id();
        let session = self.store.create(id);
        response.add_cookie(&session.make_cookie(&self.cookie_name));
        tracing::debug!(session_id = %session.id(), "created session");
        session
    }

    /// Destroy the request's session (if any) and expire the cookie on the
    /// response.
    pub fn destroy(&self, head: &RequestHead, response: &mut Response) {
        let Some(id) = head.cookie(&self.cookie_name) else {
            return;
        };
        self.store.destroy(&id);

        let mut expired = Cookie::build((self.cookie_name.clone(), ""))
            .http_only(true)
            .secure(true)
            .same_site(SameSite::Strict)
            .path("/")
            .build();
        expired.make_removal();
        response.add_cookie(&expired);
    }

    /// Sweep sessions idle for longer than `max_idle`.
    pub fn destroy_expired(&self, max_idle: Duration) -> usize {
        if max_idle.is_zero() {
            return 0;
        }
        let removed = self.store.destroy_expired(max_idle);
        if removed > 0 {
            tracing::debug!(removed, "swept expired sessions");
        }
        removed
    }
}

/// A fresh 32-character session id drawn from the thread-local CSPRNG.
fn generate_session_id() -> String {
    let mut rng = rand::thread_rng();
    (0..SESSION_ID_LENGTH)
        .map(|_| rng.gen_range(b'a'..=b'z') as char)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::{Method, StatusCode};
    use http::header;

    fn request_with_cookie(name: &str, value: &str) -> RequestHead {
        let mut head = RequestHead::new(Method::GET, "/");
        head.headers.insert(
            header::COOKIE,
            format!("{name}={value}").parse().unwrap(),
        );
        head
    }

    #[test]
    fn ids_are_32_lowercase_letters() {
        let id = generate_session_id();
        assert_eq!(id.len(), 32);
        assert!(id.bytes().all(|b| b.is_ascii_lowercase()));
        assert_ne!(id, generate_session_id());
    }

    #[test]
    fn new_session_sets_the_cookie() {
        let manager = SessionManager::new(Arc::new(MemoryStore::new()));
        let head = RequestHead::new(Method::GET, "/");
        let mut resp = Response::new(StatusCode::OK);

        let session = manager.get_or_create(&head, &mut resp);
        let set_cookie = resp.header(header::SET_COOKIE).unwrap().to_owned();
        assert!(set_cookie.starts_with(&format!("sessionId={}", session.id())));
        assert!(set_cookie.contains("HttpOnly"));
        assert!(set_cookie.contains("Secure"));
        assert!(set_cookie.contains("SameSite=Strict"));
        assert!(set_cookie.contains("Path=/"));
    }

    #[test]
    fn existing_session_is_reused_without_a_new_cookie() {
        let store = Arc::new(MemoryStore::new());
        let manager = SessionManager::new(Arc::clone(&store) as Arc<dyn SessionStore>);

        let mut resp = Response::new(StatusCode::OK);
        let first = manager.get_or_create(&RequestHead::new(Method::GET, "/"), &mut resp);
        first.set("user", "alice");

        let head = request_with_cookie(DEFAULT_COOKIE_NAME, first.id());
        let mut resp2 = Response::new(StatusCode::OK);
        let second = manager.get_or_create(&head, &mut resp2);

        assert_eq!(second.id(), first.id());
        assert_eq!(second.get("user").as_deref(), Some("alice"));
        assert!(resp2.header(header::SET_COOKIE).is_none());
    }

    #[test]
    fn values_refuse_empty_keys_and_values() {
        let session = Session::new("abc".into());
        assert!(!session.set("", "x"));
        assert!(!session.set("k", ""));
        assert!(session.set("k", "v"));
        assert_eq!(session.get("k").as_deref(), Some("v"));
        assert!(session.remove("k"));
        assert!(!session.remove("k"));
    }

    #[test]
    fn expiry_sweep_removes_idle_sessions() {
        let store = Arc::new(MemoryStore::new());
        let manager = SessionManager::new(Arc::clone(&store) as Arc<dyn SessionStore>);

        let mut resp = Response::new(StatusCode::OK);
        manager.get_or_create(&RequestHead::new(Method::GET, "/"), &mut resp);
        assert_eq!(store.len(), 1);

        // nothing is old enough yet
        assert_eq!(manager.destroy_expired(Duration::from_secs(3600)), 0);
        assert_eq!(store.len(), 1);

        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(manager.destroy_expired(Duration::from_millis(1)), 1);
        assert!(store.is_empty());
    }
}
