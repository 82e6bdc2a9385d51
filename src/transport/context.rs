//! Per-request correlation state

use std::sync::{Arc, Mutex, MutexGuard};
use crate::{
    bridge::ExecutionContext,
    session::AttributeValue,
    signal::{completion, CompletionNotifier, CompletionSignal}
};

#[inline]
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Correlates one submitted request with its completion signal and the
/// request-scoped storage the deployment sees.
///
/// Lives for exactly one request/response cycle.
#[derive(Debug)]
pub struct RequestContext {
    id: u64,
    signal: CompletionSignal,
    scope: RequestScope,
}

/// Request-scoped storage shared between the transport and the filter chain.
///
/// Holds the writing half of the completion signal until the
/// execution-context bridge takes it.
#[derive(Debug, Clone)]
pub struct RequestScope {
    inner: Arc<ScopeInner>
}

#[derive(Debug)]
struct ScopeInner {
    id: u64,
    notifier: Mutex<Option<CompletionNotifier>>,
    execution: Mutex<ExecutionContext>,
    session_id: Mutex<Option<String>>,
}

impl RequestContext {
    /// Registers a fresh completion signal for request `id`
    pub(crate) fn new(id: u64, execution: ExecutionContext) -> Self {
        let (notifier, signal) = completion();
        let scope = RequestScope {
            inner: Arc::new(ScopeInner {
                id,
                notifier: Mutex::new(Some(notifier)),
                execution: Mutex::new(execution),
                session_id: Mutex::new(None),
            })
        };
        Self { id, signal, scope }
    }

    /// Returns the sequence number of the request
    #[inline]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Returns the reading half of the completion signal
    #[inline]
    pub fn signal(&self) -> &CompletionSignal {
        &self.signal
    }

    /// Returns the request-scoped storage
    #[inline]
    pub fn scope(&self) -> &RequestScope {
        &self.scope
    }

    /// Consumes the context and returns the execution context as the
    /// bridge left it
    pub(crate) fn into_execution(self) -> ExecutionContext {
        let Self { scope, .. } = self;
        match Arc::try_unwrap(scope.inner) {
            Ok(inner) => inner.execution
                .into_inner()
                .unwrap_or_else(|poisoned| poisoned.into_inner()),
            Err(inner) => {
                let execution = lock(&inner.execution);
                execution.clone()
            }
        }
    }
}

impl RequestScope {
    /// Returns the sequence number of the request
    #[inline]
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    /// Takes the completion notifier, leaving `None` behind.
    ///
    /// Only the first caller gets it.
    pub fn take_notifier(&self) -> Option<CompletionNotifier> {
        lock(&self.inner.notifier).take()
    }

    /// Returns `true` while nobody has taken the completion notifier
    pub fn has_notifier(&self) -> bool {
        lock(&self.inner.notifier).is_some()
    }

    /// Returns a request-scoped variable
    pub fn var(&self, name: &str) -> Option<AttributeValue> {
        lock(&self.inner.execution)
            .request_scoped_var(name)
            .cloned()
    }

    /// Sets a request-scoped variable
    pub fn set_var(&self, name: &str, value: AttributeValue) {
        lock(&self.inner.execution)
            .request_scope_mut()
            .insert(name.into(), value);
    }

    /// Runs `f` with exclusive access to the execution context
    pub fn with_execution<R>(&self, f: impl FnOnce(&mut ExecutionContext) -> R) -> R {
        f(&mut lock(&self.inner.execution))
    }

    /// Returns the id of the session the request ended up with
    pub fn session_id(&self) -> Option<String> {
        lock(&self.inner.session_id).clone()
    }

    #[inline]
    pub(crate) fn record_session(&self, id: Option<String>) {
        *lock(&self.inner.session_id) = id;
    }
}
