//! Session capability set and cookie-based session tracking
//!
//! [`HttpSession`] is the full set of operations a filter or front controller
//! may perform on a session. The container hands out [`StoredSession`]s from
//! a [`SessionStore`]; the lifecycle coordinator in [`coordinator`] wraps them
//! so that invalidation is deferred until the filter chain has returned.
//!
//! Sessions are tracked through a cookie only. Session ids embedded in the
//! request path (`;jsessionid=...`) are never interpreted.

use std::{
    sync::Arc,
    time::{Duration, SystemTime}
};
use crate::error::Error;

pub use coordinator::{
    lazy_invalidation,
    DeferredInvalidation,
    DeferredSession,
    DeferredSessions,
    InvalidationState
};
pub use store::{ContainerSessions, SessionState, SessionStore, StoredSession};

pub mod coordinator;
pub mod store;

/// Default name of the session tracking cookie
pub const DEFAULT_COOKIE_NAME: &str = "JSESSIONID";

/// Default time a session may stay idle before it expires
pub const DEFAULT_MAX_INACTIVE_INTERVAL: Duration = Duration::from_secs(30 * 60);

/// A session attribute value
pub type AttributeValue = serde_json::Value;

/// Operations available on an HTTP session
pub trait HttpSession: Send + Sync {
    /// Returns the session id
    fn id(&self) -> String;

    /// Returns the attribute bound under `name`
    fn attribute(&self, name: &str) -> Result<Option<AttributeValue>, Error>;

    /// Returns the names of all bound attributes in insertion order
    fn attribute_names(&self) -> Result<Vec<String>, Error>;

    /// Binds `value` under `name`, replacing any previous value
    fn set_attribute(&self, name: &str, value: AttributeValue) -> Result<(), Error>;

    /// Unbinds the attribute under `name`
    fn remove_attribute(&self, name: &str) -> Result<(), Error>;

    /// Returns the time the session was created
    fn creation_time(&self) -> Result<SystemTime, Error>;

    /// Returns the last time a request carried this session
    fn last_accessed_time(&self) -> Result<SystemTime, Error>;

    /// Returns how long the session may stay idle, `None` means forever
    fn max_inactive_interval(&self) -> Option<Duration>;

    /// Changes how long the session may stay idle
    fn set_max_inactive_interval(&self, interval: Option<Duration>);

    /// Returns `true` if the client has not yet joined the session
    fn is_new(&self) -> Result<bool, Error>;

    /// Invalidates the session
    fn invalidate(&self) -> Result<(), Error>;

    /// Returns `true` if invalidation was requested but has not run yet
    fn is_invalidation_pending(&self) -> bool {
        false
    }
}

/// Request-level access to the session of the current client
pub trait SessionAccess: Send + Sync {
    /// Returns the current session, creating one when `create` is `true`
    fn session(&self, create: bool) -> Result<Option<Arc<dyn HttpSession>>, Error>;
}

/// Represents a session tracking configuration
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Name of the tracking cookie
    ///
    /// Default: `JSESSIONID`
    cookie_name: String,

    /// Idle time after which a session expires
    ///
    /// Default: 30 minutes
    max_inactive_interval: Option<Duration>,

    /// `Path` attribute of the tracking cookie
    ///
    /// Default: the deployment context path
    cookie_path: Option<String>,
}

impl Default for SessionConfig {
    #[inline]
    fn default() -> Self {
        Self {
            cookie_name: DEFAULT_COOKIE_NAME.into(),
            max_inactive_interval: Some(DEFAULT_MAX_INACTIVE_INTERVAL),
            cookie_path: None,
        }
    }
}

impl SessionConfig {
    /// Creates a default session configuration
    ///
    /// Defaults:
    /// - cookie_name: `JSESSIONID`
    /// - max_inactive_interval: 30 minutes
    /// - cookie_path: deployment context path
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the tracking cookie name
    pub fn with_cookie_name(mut self, name: impl Into<String>) -> Self {
        self.cookie_name = name.into();
        self
    }

    /// Sets the idle time after which new sessions expire
    pub fn with_max_inactive_interval(mut self, interval: Duration) -> Self {
        self.max_inactive_interval = Some(interval);
        self
    }

    /// Makes new sessions never expire
    pub fn without_expiration(mut self) -> Self {
        self.max_inactive_interval = None;
        self
    }

    /// Sets the `Path` attribute of the tracking cookie
    pub fn with_cookie_path(mut self, path: impl Into<String>) -> Self {
        self.cookie_path = Some(path.into());
        self
    }

    /// Returns the tracking cookie name
    #[inline]
    pub fn cookie_name(&self) -> &str {
        &self.cookie_name
    }

    /// Returns the idle time after which new sessions expire
    #[inline]
    pub fn max_inactive_interval(&self) -> Option<Duration> {
        self.max_inactive_interval
    }

    /// Returns the explicitly configured cookie path
    #[inline]
    pub fn cookie_path(&self) -> Option<&str> {
        self.cookie_path.as_deref()
    }
}
