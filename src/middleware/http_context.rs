//! Utilities for managing HTTP request scope

use bytes::Bytes;
use std::sync::Arc;
use crate::{
    error::Error,
    http::{HeaderMap, HttpRequest, Method, Uri},
    session::{AttributeValue, HttpSession, SessionAccess},
    transport::RequestScope
};

/// Describes current HTTP context which consists of the current HTTP request,
/// the session access of the current client and the request-scoped storage
pub struct HttpContext {
    /// Current HTTP request
    pub request: HttpRequest,
    sessions: Arc<dyn SessionAccess>,
    scope: RequestScope,
    path_info: String
}

impl std::fmt::Debug for HttpContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpContext")
            .field("request", &self.request)
            .field("path_info", &self.path_info)
            .finish_non_exhaustive()
    }
}

impl HttpContext {
    /// Creates a new [`HttpContext`]
    #[inline]
    pub(crate) fn new(
        request: HttpRequest,
        sessions: Arc<dyn SessionAccess>,
        scope: RequestScope
    ) -> Self {
        let path_info = request.uri().path().to_owned();
        Self { request, sessions, scope, path_info }
    }

    /// Sets the request path relative to the deployment context path
    #[inline]
    pub(crate) fn with_path_info(mut self, path_info: String) -> Self {
        self.path_info = path_info;
        self
    }

    /// Returns the HTTP method
    #[inline]
    pub fn method(&self) -> &Method {
        self.request.method()
    }

    /// Returns the full request URI
    #[inline]
    pub fn uri(&self) -> &Uri {
        self.request.uri()
    }

    /// Returns the request path relative to the deployment context path
    #[inline]
    pub fn path(&self) -> &str {
        &self.path_info
    }

    /// Returns the request headers
    #[inline]
    pub fn headers(&self) -> &HeaderMap {
        self.request.headers()
    }

    /// Returns the buffered request body
    #[inline]
    pub fn body(&self) -> &Bytes {
        self.request.body()
    }

    /// Returns the session of the current client.
    ///
    /// With `create` set, a new session is started if there is none.
    #[inline]
    pub fn session(&self, create: bool) -> Result<Option<Arc<dyn HttpSession>>, Error> {
        self.sessions.session(create)
    }

    /// Returns the session access installed for this request
    #[inline]
    pub fn sessions(&self) -> Arc<dyn SessionAccess> {
        self.sessions.clone()
    }

    /// Replaces the session access seen by the rest of the chain
    #[inline]
    pub fn set_sessions(&mut self, sessions: Arc<dyn SessionAccess>) {
        self.sessions = sessions;
    }

    /// Returns the request-scoped storage
    #[inline]
    pub fn scope(&self) -> &RequestScope {
        &self.scope
    }

    /// Returns a request-scoped variable
    #[inline]
    pub fn var(&self, name: &str) -> Option<AttributeValue> {
        self.scope.var(name)
    }

    /// Sets a request-scoped variable
    #[inline]
    pub fn set_var(&self, name: &str, value: AttributeValue) {
        self.scope.set_var(name, value)
    }
}
