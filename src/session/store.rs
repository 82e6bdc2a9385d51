//! Container-owned session storage

use indexmap::IndexMap;
use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::{Duration, SystemTime}
};
use uuid::Uuid;
use super::{AttributeValue, HttpSession, SessionAccess, SessionConfig};
use crate::error::Error;

#[inline]
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Data held for a single session
#[derive(Debug, Clone)]
pub struct SessionState {
    /// Session id, carried by the tracking cookie
    pub id: String,
    /// Bound attributes, keys are unique
    pub attributes: IndexMap<String, AttributeValue>,
    /// Creation timestamp
    pub created: SystemTime,
    /// Timestamp of the last request that carried this session
    pub last_accessed: SystemTime,
    /// Idle time after which the session expires, `None` means never
    pub max_inactive_interval: Option<Duration>,
    /// `true` until a client sends the session id back
    pub is_new: bool,
    valid: bool,
}

impl SessionState {
    /// Creates a fresh state for the session `id`
    pub fn new(id: impl Into<String>, max_inactive_interval: Option<Duration>) -> Self {
        let now = SystemTime::now();
        Self {
            id: id.into(),
            attributes: IndexMap::new(),
            created: now,
            last_accessed: now,
            max_inactive_interval,
            is_new: true,
            valid: true,
        }
    }

    /// Returns `false` once the session was really invalidated
    #[inline]
    pub fn is_valid(&self) -> bool {
        self.valid
    }

    /// Returns `true` if the session stayed idle longer than allowed at `now`
    pub fn is_expired(&self, now: SystemTime) -> bool {
        match self.max_inactive_interval {
            None => false,
            Some(interval) => now
                .duration_since(self.last_accessed)
                .map(|idle| idle > interval)
                .unwrap_or(false),
        }
    }
}

/// A session living in a [`SessionStore`]
#[derive(Debug)]
pub struct StoredSession {
    state: Mutex<SessionState>
}

impl StoredSession {
    fn new(state: SessionState) -> Self {
        Self { state: Mutex::new(state) }
    }

    /// Returns `false` once the session was really invalidated
    #[inline]
    pub fn is_valid(&self) -> bool {
        lock(&self.state).valid
    }

    /// Returns a copy of the current session state
    pub fn snapshot(&self) -> SessionState {
        lock(&self.state).clone()
    }

    fn with_valid<R>(&self, f: impl FnOnce(&mut SessionState) -> R) -> Result<R, Error> {
        let mut state = lock(&self.state);
        if state.valid {
            Ok(f(&mut state))
        } else {
            Err(Error::session_invalidated(&state.id))
        }
    }

    fn touch(&self, now: SystemTime) {
        let mut state = lock(&self.state);
        state.last_accessed = now;
        state.is_new = false;
    }
}

impl HttpSession for StoredSession {
    fn id(&self) -> String {
        lock(&self.state).id.clone()
    }

    fn attribute(&self, name: &str) -> Result<Option<AttributeValue>, Error> {
        self.with_valid(|state| state.attributes.get(name).cloned())
    }

    fn attribute_names(&self) -> Result<Vec<String>, Error> {
        self.with_valid(|state| state.attributes.keys().cloned().collect())
    }

    fn set_attribute(&self, name: &str, value: AttributeValue) -> Result<(), Error> {
        self.with_valid(|state| {
            state.attributes.insert(name.to_owned(), value);
        })
    }

    fn remove_attribute(&self, name: &str) -> Result<(), Error> {
        self.with_valid(|state| {
            state.attributes.shift_remove(name);
        })
    }

    fn creation_time(&self) -> Result<SystemTime, Error> {
        self.with_valid(|state| state.created)
    }

    fn last_accessed_time(&self) -> Result<SystemTime, Error> {
        self.with_valid(|state| state.last_accessed)
    }

    fn max_inactive_interval(&self) -> Option<Duration> {
        lock(&self.state).max_inactive_interval
    }

    fn set_max_inactive_interval(&self, interval: Option<Duration>) {
        lock(&self.state).max_inactive_interval = interval;
    }

    fn is_new(&self) -> Result<bool, Error> {
        self.with_valid(|state| state.is_new)
    }

    fn invalidate(&self) -> Result<(), Error> {
        self.with_valid(|state| {
            state.valid = false;
            state.attributes.clear();
            tracing::debug!(session = %state.id, "session invalidated");
        })
    }
}

/// Holds every live session of a deployment
#[derive(Debug)]
pub struct SessionStore {
    sessions: Mutex<HashMap<String, Arc<StoredSession>>>,
    max_inactive_interval: Option<Duration>,
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new(&SessionConfig::default())
    }
}

impl SessionStore {
    /// Creates an empty store for the given configuration
    pub fn new(config: &SessionConfig) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            max_inactive_interval: config.max_inactive_interval(),
        }
    }

    /// Creates and registers a new session
    pub fn create(&self) -> Arc<StoredSession> {
        let id = Uuid::new_v4().simple().to_string();
        let session = Arc::new(StoredSession::new(
            SessionState::new(id.clone(), self.max_inactive_interval)));

        lock(&self.sessions).insert(id.clone(), session.clone());
        tracing::debug!(session = %id, "session created");
        session
    }

    /// Looks up the session a client referred to and records the access.
    ///
    /// Invalidated and expired sessions are dropped and reported as absent.
    pub fn find(&self, id: &str) -> Option<Arc<StoredSession>> {
        let now = SystemTime::now();
        let mut sessions = lock(&self.sessions);
        let session = sessions.get(id)?.clone();

        let state = session.snapshot();
        if !state.is_valid() {
            sessions.remove(id);
            return None;
        }
        if state.is_expired(now) {
            sessions.remove(id);
            drop(sessions);
            tracing::debug!(session = %id, "session expired");
            let _ = session.invalidate();
            return None;
        }

        session.touch(now);
        Some(session)
    }

    /// Returns the registered session without recording an access
    pub fn get(&self, id: &str) -> Option<Arc<StoredSession>> {
        lock(&self.sessions)
            .get(id)
            .filter(|session| session.is_valid())
            .cloned()
    }

    /// Returns the number of live sessions
    pub fn len(&self) -> usize {
        lock(&self.sessions)
            .values()
            .filter(|session| session.is_valid())
            .count()
    }

    /// Returns `true` if there is no live session
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Cookie-tracked session access for one request
#[derive(Debug)]
pub struct ContainerSessions {
    store: Arc<SessionStore>,
    requested_id: Mutex<Option<String>>,
    current: Mutex<Option<Arc<StoredSession>>>,
    created: Mutex<Option<Arc<StoredSession>>>,
}

impl ContainerSessions {
    /// Creates the access for a request that carried `requested_id` in its cookie
    pub fn new(store: Arc<SessionStore>, requested_id: Option<String>) -> Self {
        Self {
            store,
            requested_id: Mutex::new(requested_id),
            current: Mutex::new(None),
            created: Mutex::new(None),
        }
    }

    /// Returns the session created during this request if it is still live
    pub fn created(&self) -> Option<Arc<StoredSession>> {
        lock(&self.created)
            .as_ref()
            .filter(|session| session.is_valid())
            .cloned()
    }

    /// Returns the id of the session this request touched, if any
    pub fn current_id(&self) -> Option<String> {
        lock(&self.current)
            .as_ref()
            .map(|session| session.id())
    }
}

impl SessionAccess for ContainerSessions {
    fn session(&self, create: bool) -> Result<Option<Arc<dyn HttpSession>>, Error> {
        let mut current = lock(&self.current);
        if let Some(session) = current.as_ref() {
            if session.is_valid() {
                return Ok(Some(session.clone() as Arc<dyn HttpSession>));
            }
            *current = None;
        }

        // the cookie is honored once per request
        let requested = lock(&self.requested_id).take();
        if let Some(session) = requested.and_then(|id| self.store.find(&id)) {
            *current = Some(session.clone());
            return Ok(Some(session as Arc<dyn HttpSession>));
        }

        if !create {
            return Ok(None);
        }

        let session = self.store.create();
        *current = Some(session.clone());
        *lock(&self.created) = Some(session.clone());
        Ok(Some(session as Arc<dyn HttpSession>))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn store() -> Arc<SessionStore> {
        Arc::new(SessionStore::default())
    }

    #[test]
    fn it_creates_new_session() {
        let store = store();
        let session = store.create();

        assert!(session.is_new().unwrap());
        assert!(session.is_valid());
        assert_eq!(store.len(), 1);
        assert_eq!(session.max_inactive_interval(), Some(super::super::DEFAULT_MAX_INACTIVE_INTERVAL));
    }

    #[test]
    fn it_keeps_attribute_keys_unique_and_ordered() {
        let session = store().create();
        session.set_attribute("b", json!(1)).unwrap();
        session.set_attribute("a", json!(2)).unwrap();
        session.set_attribute("b", json!(3)).unwrap();

        assert_eq!(session.attribute_names().unwrap(), vec!["b", "a"]);
        assert_eq!(session.attribute("b").unwrap(), Some(json!(3)));
    }

    #[test]
    fn it_removes_attribute() {
        let session = store().create();
        session.set_attribute("user", json!("alice")).unwrap();
        session.remove_attribute("user").unwrap();

        assert_eq!(session.attribute("user").unwrap(), None);
    }

    #[test]
    fn it_fails_operations_after_invalidation() {
        let session = store().create();
        session.set_attribute("user", json!("alice")).unwrap();
        session.invalidate().unwrap();

        assert!(!session.is_valid());
        assert!(session.attribute("user").unwrap_err().is_session_invalidated());
        assert!(session.set_attribute("x", json!(1)).unwrap_err().is_session_invalidated());
        assert!(session.invalidate().unwrap_err().is_session_invalidated());
    }

    #[test]
    fn it_finds_session_and_marks_it_joined() {
        let store = store();
        let id = store.create().id();

        let found = store.find(&id).unwrap();

        assert!(!found.is_new().unwrap());
    }

    #[test]
    fn it_drops_invalidated_session_on_lookup() {
        let store = store();
        let session = store.create();
        session.invalidate().unwrap();

        assert!(store.find(&session.id()).is_none());
        assert!(store.is_empty());
    }

    #[test]
    fn it_drops_expired_session_on_lookup() {
        let store = store();
        let session = store.create();
        session.set_max_inactive_interval(Some(Duration::ZERO));
        std::thread::sleep(Duration::from_millis(5));

        assert!(store.find(&session.id()).is_none());
        assert!(!session.is_valid());
    }

    #[test]
    fn it_never_expires_without_interval() {
        let mut state = SessionState::new("id", None);
        state.last_accessed = SystemTime::UNIX_EPOCH;

        assert!(!state.is_expired(SystemTime::now()));
    }

    #[test]
    fn it_returns_none_without_cookie_and_create() {
        let sessions = ContainerSessions::new(store(), None);

        assert!(sessions.session(false).unwrap().is_none());
        assert!(sessions.created().is_none());
    }

    #[test]
    fn it_creates_session_once_per_request() {
        let store = store();
        let sessions = ContainerSessions::new(store.clone(), None);

        let first = sessions.session(true).unwrap().unwrap();
        let second = sessions.session(true).unwrap().unwrap();

        assert_eq!(first.id(), second.id());
        assert_eq!(store.len(), 1);
        assert_eq!(sessions.created().unwrap().id(), first.id());
        assert_eq!(sessions.current_id(), Some(first.id()));
    }

    #[test]
    fn it_resolves_session_from_cookie() {
        let store = store();
        let id = store.create().id();
        let sessions = ContainerSessions::new(store, Some(id.clone()));

        let session = sessions.session(false).unwrap().unwrap();

        assert_eq!(session.id(), id);
        assert!(sessions.created().is_none());
    }

    #[test]
    fn it_ignores_unknown_cookie() {
        let sessions = ContainerSessions::new(store(), Some("unknown".into()));

        assert!(sessions.session(false).unwrap().is_none());
    }

    #[test]
    fn it_reports_absent_session_after_invalidation() {
        let sessions = ContainerSessions::new(store(), None);
        let session = sessions.session(true).unwrap().unwrap();
        session.invalidate().unwrap();

        assert!(sessions.session(false).unwrap().is_none());
        assert!(sessions.created().is_none());
    }
}
