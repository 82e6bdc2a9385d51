//! Error Handling tools

use bytes::Bytes;
use crate::http::{header, HeaderValue, HttpResponse, StatusCode};

use std::{
    convert::Infallible,
    fmt,
    io::Error as IoError,
    error::Error as StdError
};

type BoxError = Box<
    dyn StdError
    + Send
    + Sync
>;

/// Describes what part of the harness failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The in-memory connection could not be set up or driven
    Transport,
    /// The deployment produced bytes that are not a valid HTTP response
    Protocol,
    /// A wait on the completion signal or a shutdown join was interrupted
    Interrupted,
    /// An operation touched a session that was already invalidated
    SessionInvalidated,
    /// A resource root could not be resolved at deployment time
    InvalidResourceRoot,
    /// A filter or front controller failed while handling a request
    Handler,
    /// The HTTP dump sink failed to persist a response
    Dump,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self {
            ErrorKind::Transport => "transport error",
            ErrorKind::Protocol => "protocol error",
            ErrorKind::Interrupted => "interrupted",
            ErrorKind::SessionInvalidated => "session invalidated",
            ErrorKind::InvalidResourceRoot => "invalid resource root",
            ErrorKind::Handler => "handler error",
            ErrorKind::Dump => "dump error",
        };
        f.write_str(kind)
    }
}

/// Generic harness error
#[derive(Debug)]
pub struct Error {
    kind: ErrorKind,
    inner: BoxError
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.inner)
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        Some(self.inner.as_ref())
    }
}

impl From<Infallible> for Error {
    fn from(infallible: Infallible) -> Error {
        match infallible {}
    }
}

impl From<IoError> for Error {
    #[inline]
    fn from(err: IoError) -> Self {
        Self::transport(err)
    }
}

impl From<hyper::Error> for Error {
    #[inline]
    fn from(err: hyper::Error) -> Self {
        Self::transport(err)
    }
}

impl From<hyper::http::Error> for Error {
    #[inline]
    fn from(err: hyper::http::Error) -> Self {
        Self::handler(err)
    }
}

impl From<httparse::Error> for Error {
    #[inline]
    fn from(err: httparse::Error) -> Self {
        Self::protocol(err)
    }
}

impl From<serde_json::Error> for Error {
    #[inline]
    fn from(err: serde_json::Error) -> Self {
        Self::handler(err)
    }
}

impl From<Error> for IoError {
    #[inline]
    fn from(err: Error) -> Self {
        Self::other(err)
    }
}

impl Error {
    /// Creates a new [`Error`] of the given kind
    pub fn new(kind: ErrorKind, err: impl Into<BoxError>) -> Self {
        Self { kind, inner: err.into() }
    }

    /// Creates a transport error
    #[inline]
    pub fn transport(err: impl Into<BoxError>) -> Self {
        Self::new(ErrorKind::Transport, err)
    }

    /// Creates a protocol error
    #[inline]
    pub fn protocol(err: impl Into<BoxError>) -> Self {
        Self::new(ErrorKind::Protocol, err)
    }

    /// Creates an error reporting an interrupted wait
    #[inline]
    pub fn interrupted(what: &str) -> Self {
        Self::new(ErrorKind::Interrupted, format!("{what} was interrupted"))
    }

    /// Creates an error for an operation on an invalidated session
    #[inline]
    pub fn session_invalidated(id: &str) -> Self {
        Self::new(
            ErrorKind::SessionInvalidated,
            format!("session {id} has already been invalidated"))
    }

    /// Creates a handler error
    #[inline]
    pub fn handler(err: impl Into<BoxError>) -> Self {
        Self::new(ErrorKind::Handler, err)
    }

    /// Returns the kind of this error
    #[inline]
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Unwraps the inner error
    pub fn into_inner(self) -> BoxError {
        self.inner
    }

    /// Returns `true` if a wait was interrupted
    #[inline]
    pub fn is_interrupted(&self) -> bool {
        self.kind == ErrorKind::Interrupted
    }

    /// Returns `true` if a session was used after its real invalidation
    #[inline]
    pub fn is_session_invalidated(&self) -> bool {
        self.kind == ErrorKind::SessionInvalidated
    }

    /// Converts an error escaping the filter chain into the response the
    /// container writes for it.
    pub(crate) fn into_response(self) -> HttpResponse {
        tracing::error!("unhandled error in filter chain: {self:#}");
        let mut response = HttpResponse::new(Bytes::from(self.to_string()));
        *response.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
        response.headers_mut().insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("text/plain; charset=utf-8"));
        response
    }
}
