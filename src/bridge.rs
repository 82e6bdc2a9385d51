//! Execution-context bridge between test code and the deployment
//!
//! Test code passes an [`ExecutionContext`] along with each request. Before
//! the front controller runs, the bridge writes its session-scoped variables
//! into the client session; after the front controller returned, it reads
//! the session back into the context and fires the completion signal so the
//! transport knows the copy is finished.

use indexmap::IndexMap;
use std::sync::Arc;
use crate::{
    error::Error,
    middleware::{make_fn, FilterFn, HttpContext, Next},
    session::{AttributeValue, SessionAccess},
    transport::RequestScope
};

/// Request- and session-scoped variables exchanged with the deployment
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExecutionContext {
    request_scope: IndexMap<String, AttributeValue>,
    session_scope: IndexMap<String, AttributeValue>,
}

impl ExecutionContext {
    /// Creates an empty [`ExecutionContext`]
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a request-scoped variable
    #[inline]
    pub fn request_scoped_var(&self, name: &str) -> Option<&AttributeValue> {
        self.request_scope.get(name)
    }

    /// Sets a request-scoped variable
    pub fn set_request_scoped_var(&mut self, name: impl Into<String>, value: AttributeValue) -> &mut Self {
        self.request_scope.insert(name.into(), value);
        self
    }

    /// Returns all request-scoped variables
    #[inline]
    pub fn request_scope(&self) -> &IndexMap<String, AttributeValue> {
        &self.request_scope
    }

    /// Returns a session-scoped variable
    #[inline]
    pub fn session_scoped_var(&self, name: &str) -> Option<&AttributeValue> {
        self.session_scope.get(name)
    }

    /// Sets a session-scoped variable
    pub fn set_session_scoped_var(&mut self, name: impl Into<String>, value: AttributeValue) -> &mut Self {
        self.session_scope.insert(name.into(), value);
        self
    }

    /// Returns all session-scoped variables
    #[inline]
    pub fn session_scope(&self) -> &IndexMap<String, AttributeValue> {
        &self.session_scope
    }

    #[inline]
    pub(crate) fn request_scope_mut(&mut self) -> &mut IndexMap<String, AttributeValue> {
        &mut self.request_scope
    }

    #[inline]
    pub(crate) fn replace_session_scope(&mut self, scope: IndexMap<String, AttributeValue>) {
        self.session_scope = scope;
    }
}

/// Copies state between test code and the deployment around the front controller
pub trait StateBridge: Send + Sync + 'static {
    /// Called before the front controller runs
    fn restore(&self, sessions: &dyn SessionAccess, scope: &RequestScope) -> Result<(), Error>;

    /// Called after the front controller returned
    fn capture(&self, sessions: &dyn SessionAccess, scope: &RequestScope) -> Result<(), Error>;

    /// Fires the completion signal of the request.
    ///
    /// Called after [`capture`](Self::capture), whether it succeeded or not.
    fn complete(&self, scope: &RequestScope) {
        if let Some(notifier) = scope.take_notifier() {
            notifier.signal();
        }
    }
}

/// Default [`StateBridge`] that copies session-scoped variables
#[derive(Debug, Clone, Copy, Default)]
pub struct ExecutionContextBridge;

impl StateBridge for ExecutionContextBridge {
    fn restore(&self, sessions: &dyn SessionAccess, scope: &RequestScope) -> Result<(), Error> {
        let vars = scope.with_execution(|execution| execution.session_scope().clone());
        if vars.is_empty() {
            return Ok(());
        }

        if let Some(session) = sessions.session(true)? {
            for (name, value) in vars {
                session.set_attribute(&name, value)?;
            }
        }
        Ok(())
    }

    fn capture(&self, sessions: &dyn SessionAccess, scope: &RequestScope) -> Result<(), Error> {
        let mut captured = IndexMap::new();
        if let Some(session) = sessions.session(false)? {
            // a session waiting for invalidation is about to lose every attribute
            if !session.is_invalidation_pending() {
                for name in session.attribute_names()? {
                    if let Some(value) = session.attribute(&name)? {
                        captured.insert(name, value);
                    }
                }
            }
        }

        scope.with_execution(|execution| execution.replace_session_scope(captured));
        Ok(())
    }
}

/// Wraps the front controller so that `bridge` runs around it
pub(crate) fn bridged(front_controller: FilterFn, bridge: Arc<dyn StateBridge>) -> FilterFn {
    make_fn(move |ctx: HttpContext, next: Next| {
        let front_controller = front_controller.clone();
        let bridge = bridge.clone();
        async move {
            let sessions = ctx.sessions();
            let scope = ctx.scope().clone();

            let result = match bridge.restore(sessions.as_ref(), &scope) {
                Ok(()) => front_controller(ctx, next).await,
                Err(err) => Err(err),
            };

            let captured = bridge.capture(sessions.as_ref(), &scope);
            bridge.complete(&scope);

            let response = result?;
            captured.map(|_| response)
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        http::Results,
        middleware::http_context::tests::context,
        session::lazy_invalidation
    };
    use serde_json::json;

    fn not_found() -> Next {
        Arc::new(|_: HttpContext| Box::pin(async { Results::not_found() }))
    }

    fn front_controller() -> FilterFn {
        make_fn(|ctx: HttpContext, _| async move {
            let session = ctx.session(true)?.unwrap();
            let visits = session
                .attribute("visits")?
                .and_then(|v| v.as_i64())
                .unwrap_or(0);
            session.set_attribute("visits", json!(visits + 1))?;
            ctx.set_var("handled", json!(true));
            Results::text("ok")
        })
    }

    #[test]
    fn it_builds_execution_context() {
        let mut ctx = ExecutionContext::new();
        ctx.set_request_scoped_var("a", json!(1))
            .set_session_scoped_var("b", json!(2));

        assert_eq!(ctx.request_scoped_var("a"), Some(&json!(1)));
        assert_eq!(ctx.session_scoped_var("b"), Some(&json!(2)));
        assert_eq!(ctx.request_scope().len(), 1);
        assert_eq!(ctx.session_scope().len(), 1);
    }

    #[tokio::test]
    async fn it_restores_and_captures_session_scope() {
        let ctx = context("/");
        let scope = ctx.scope().clone();
        scope.with_execution(|execution| {
            execution.set_session_scoped_var("visits", json!(41));
        });

        let filter = bridged(front_controller(), Arc::new(ExecutionContextBridge));
        filter(ctx, not_found()).await.unwrap();

        let execution = scope.with_execution(|execution| execution.clone());
        assert_eq!(execution.session_scoped_var("visits"), Some(&json!(42)));
        assert_eq!(execution.request_scoped_var("handled"), Some(&json!(true)));
    }

    #[tokio::test]
    async fn it_fires_completion_after_capture() {
        let ctx = context("/");
        let scope = ctx.scope().clone();
        assert!(scope.has_notifier());

        let filter = bridged(front_controller(), Arc::new(ExecutionContextBridge));
        filter(ctx, not_found()).await.unwrap();

        assert!(!scope.has_notifier());
    }

    #[tokio::test]
    async fn it_captures_empty_session_when_invalidation_is_pending() {
        let ctx = context("/");
        let scope = ctx.scope().clone();
        let invalidating = make_fn(|ctx: HttpContext, _| async move {
            let session = ctx.session(true)?.unwrap();
            session.set_attribute("user", json!("alice"))?;
            session.invalidate()?;
            Results::text("bye")
        });

        let bridge = bridged(invalidating, Arc::new(ExecutionContextBridge));
        let next: Next = Arc::new(move |ctx: HttpContext| bridge(ctx, not_found()));
        lazy_invalidation()(ctx, next).await.unwrap();

        let execution = scope.with_execution(|execution| execution.clone());
        assert!(execution.session_scope().is_empty());
    }
}
