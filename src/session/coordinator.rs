//! Session lifecycle coordinator
//!
//! Execution-context bridges copy session-scoped values back out of the
//! deployment after the front controller returned. A handler that
//! invalidates the session in the middle of the chain would make that copy
//! fail, so the [`lazy_invalidation`] filter, installed as the outermost link
//! of the chain, hands downstream code a [`DeferredSessions`] access. Every
//! session it returns is a [`DeferredSession`]: all operations forward to the
//! real session except [`invalidate`](HttpSession::invalidate), which only
//! records the request. Once the whole chain has returned, the filter removes
//! the attributes and invalidates the real session.
//!
//! Per request the coordinator moves through
//! `Active -> InvalidationRequested -> Invalidated`.

use std::{
    sync::{Arc, atomic::{AtomicU8, Ordering}},
    time::{Duration, SystemTime}
};
use super::{AttributeValue, HttpSession, SessionAccess};
use crate::{
    error::Error,
    middleware::{make_fn, FilterFn, HttpContext, Next}
};

const ACTIVE: u8 = 0;
const INVALIDATION_REQUESTED: u8 = 1;
const INVALIDATED: u8 = 2;

/// Lifecycle state of the session within one request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvalidationState {
    /// No invalidation was requested
    Active,
    /// Invalidation was requested and waits for the chain to return
    InvalidationRequested,
    /// The deferred invalidation has run
    Invalidated,
}

/// Per-request invalidation state shared by the filter and its wrappers
#[derive(Debug, Default)]
pub struct DeferredInvalidation {
    state: AtomicU8
}

impl DeferredInvalidation {
    /// Creates the state in [`InvalidationState::Active`]
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the current state
    pub fn state(&self) -> InvalidationState {
        match self.state.load(Ordering::Acquire) {
            ACTIVE => InvalidationState::Active,
            INVALIDATION_REQUESTED => InvalidationState::InvalidationRequested,
            _ => InvalidationState::Invalidated,
        }
    }

    /// Returns `true` while an invalidation waits for the chain to return
    #[inline]
    pub fn is_pending(&self) -> bool {
        self.state() == InvalidationState::InvalidationRequested
    }

    /// Records an invalidation request.
    ///
    /// Returns `true` only for the call that moved the state out of `Active`.
    #[inline]
    pub fn request(&self) -> bool {
        self.state
            .compare_exchange(ACTIVE, INVALIDATION_REQUESTED, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Marks the deferred invalidation as executed.
    ///
    /// Returns `true` only for the call that moved the state out of
    /// `InvalidationRequested`.
    #[inline]
    fn complete(&self) -> bool {
        self.state
            .compare_exchange(INVALIDATION_REQUESTED, INVALIDATED, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

/// Forwarding wrapper around a real session that defers invalidation
pub struct DeferredSession {
    inner: Arc<dyn HttpSession>,
    invalidation: Arc<DeferredInvalidation>
}

impl DeferredSession {
    /// Wraps `inner`, reporting invalidation requests to `invalidation`
    pub fn new(inner: Arc<dyn HttpSession>, invalidation: Arc<DeferredInvalidation>) -> Self {
        Self { inner, invalidation }
    }
}

impl HttpSession for DeferredSession {
    #[inline]
    fn id(&self) -> String {
        self.inner.id()
    }

    #[inline]
    fn attribute(&self, name: &str) -> Result<Option<AttributeValue>, Error> {
        self.inner.attribute(name)
    }

    #[inline]
    fn attribute_names(&self) -> Result<Vec<String>, Error> {
        self.inner.attribute_names()
    }

    #[inline]
    fn set_attribute(&self, name: &str, value: AttributeValue) -> Result<(), Error> {
        self.inner.set_attribute(name, value)
    }

    #[inline]
    fn remove_attribute(&self, name: &str) -> Result<(), Error> {
        self.inner.remove_attribute(name)
    }

    #[inline]
    fn creation_time(&self) -> Result<SystemTime, Error> {
        self.inner.creation_time()
    }

    #[inline]
    fn last_accessed_time(&self) -> Result<SystemTime, Error> {
        self.inner.last_accessed_time()
    }

    #[inline]
    fn max_inactive_interval(&self) -> Option<Duration> {
        self.inner.max_inactive_interval()
    }

    #[inline]
    fn set_max_inactive_interval(&self, interval: Option<Duration>) {
        self.inner.set_max_inactive_interval(interval)
    }

    #[inline]
    fn is_new(&self) -> Result<bool, Error> {
        self.inner.is_new()
    }

    fn invalidate(&self) -> Result<(), Error> {
        if self.invalidation.request() {
            tracing::debug!(session = %self.inner.id(), "session invalidation deferred");
        }
        Ok(())
    }

    #[inline]
    fn is_invalidation_pending(&self) -> bool {
        self.invalidation.is_pending()
    }
}

/// Session access that hands out [`DeferredSession`] wrappers
pub struct DeferredSessions {
    inner: Arc<dyn SessionAccess>,
    invalidation: Arc<DeferredInvalidation>
}

impl DeferredSessions {
    /// Wraps the container session access `inner`
    pub fn new(inner: Arc<dyn SessionAccess>, invalidation: Arc<DeferredInvalidation>) -> Self {
        Self { inner, invalidation }
    }
}

impl SessionAccess for DeferredSessions {
    fn session(&self, create: bool) -> Result<Option<Arc<dyn HttpSession>>, Error> {
        let session = self.inner
            .session(create)?
            .map(|session| {
                let wrapper = DeferredSession::new(session, self.invalidation.clone());
                Arc::new(wrapper) as Arc<dyn HttpSession>
            });
        Ok(session)
    }
}

/// Creates the filter that defers session invalidation until the rest of
/// the chain has returned
pub fn lazy_invalidation() -> FilterFn {
    make_fn(|mut ctx: HttpContext, next: Next| async move {
        let invalidation = Arc::new(DeferredInvalidation::new());
        let sessions = ctx.sessions();
        ctx.set_sessions(Arc::new(DeferredSessions::new(sessions.clone(), invalidation.clone())));

        let result = next(ctx).await;

        if invalidation.is_pending() {
            match invalidate_actually(sessions.as_ref()) {
                Ok(()) => {
                    invalidation.complete();
                }
                // the chain error is the one the caller needs to see
                Err(err) if result.is_err() => {
                    tracing::error!("deferred session invalidation failed: {err:#}");
                }
                Err(err) => return Err(err),
            }
        }
        result
    })
}

/// Removes every attribute of the real session, then invalidates it.
///
/// A session that is already gone is left alone.
fn invalidate_actually(sessions: &dyn SessionAccess) -> Result<(), Error> {
    let Some(session) = sessions.session(false)? else {
        tracing::debug!("deferred invalidation skipped, session no longer exists");
        return Ok(());
    };

    let result = session
        .attribute_names()
        .and_then(|names| names
            .iter()
            .try_for_each(|name| session.remove_attribute(name)))
        .and_then(|_| session.invalidate());

    match result {
        Ok(()) => {
            tracing::debug!(session = %session.id(), "deferred session invalidation executed");
            Ok(())
        }
        Err(err) if err.is_session_invalidated() => Ok(()),
        Err(err) => Err(err),
    }
}
