//! Helpers for producing [`HttpResponse`] values inside filters

use bytes::Bytes;
use super::{header, HttpResponse, HttpResult, StatusCode};
use crate::error::Error;

/// Creates an HTTP response with `status`, `body` and `headers`
#[macro_export]
macro_rules! response {
    ($status:expr, $body:expr) => {
        $crate::response!($status, $body, [])
    };
    ($status:expr, $body:expr, [ $( ($key:expr, $value:expr) ),* $(,)? ]) => {
        $crate::http::Response::builder()
            .status($status)
        $(
            .header($key, $value)
        )*
            .body(::bytes::Bytes::from($body))
            .map_err($crate::error::Error::handler)
    };
}

/// Shortcuts for the responses a front controller usually writes
#[derive(Debug)]
pub struct Results;

impl Results {
    /// Produces an `OK 200` response with a plain text body
    #[inline]
    pub fn text(body: impl Into<String>) -> HttpResult {
        crate::response!(StatusCode::OK, body.into(), [
            (header::CONTENT_TYPE, mime::TEXT_PLAIN_UTF_8.as_ref())
        ])
    }

    /// Produces an `OK 200` response with an HTML body
    #[inline]
    pub fn html(body: impl Into<String>) -> HttpResult {
        crate::response!(StatusCode::OK, body.into(), [
            (header::CONTENT_TYPE, mime::TEXT_HTML_UTF_8.as_ref())
        ])
    }

    /// Produces an `OK 200` response with a JSON body
    #[inline]
    pub fn json(value: &serde_json::Value) -> HttpResult {
        let body = serde_json::to_vec(value)?;
        crate::response!(StatusCode::OK, body, [
            (header::CONTENT_TYPE, mime::APPLICATION_JSON.as_ref())
        ])
    }

    /// Produces a response with the given status and a plain text body
    #[inline]
    pub fn status(status: StatusCode, body: impl Into<String>) -> HttpResult {
        crate::response!(status, body.into(), [
            (header::CONTENT_TYPE, mime::TEXT_PLAIN_UTF_8.as_ref())
        ])
    }

    /// Produces a response from a raw status code.
    ///
    /// The code is kept as the literal value, so `303` stays `303`.
    pub fn code(code: u16) -> HttpResult {
        let status = StatusCode::from_u16(code).map_err(Error::handler)?;
        crate::response!(status, Bytes::new())
    }

    /// Produces a redirect with the exact status code and `Location` header
    ///
    /// # Example
    /// ```no_run
    /// use loopwire::http::Results;
    ///
    /// let response = Results::redirect(303, "/done");
    /// ```
    pub fn redirect(code: u16, location: &str) -> HttpResult {
        let status = StatusCode::from_u16(code).map_err(Error::handler)?;
        crate::response!(status, Bytes::new(), [
            (header::LOCATION, location)
        ])
    }

    /// Produces `404 Not Found`
    #[inline]
    pub fn not_found() -> HttpResult {
        Self::status(StatusCode::NOT_FOUND, "Not Found")
    }

    /// Produces `405 Method Not Allowed` with the allowed methods
    #[inline]
    pub fn method_not_allowed(allow: &str) -> HttpResult {
        crate::response!(StatusCode::METHOD_NOT_ALLOWED, Bytes::new(), [
            (header::ALLOW, allow)
        ])
    }

    /// Produces an `OK 200` response carrying file content
    #[inline]
    pub fn file(content: Bytes, content_type: &str) -> HttpResult {
        crate::response!(StatusCode::OK, content, [
            (header::CONTENT_TYPE, content_type)
        ])
    }

    /// Produces an empty response with the given status
    #[inline]
    pub fn empty(status: StatusCode) -> HttpResult {
        crate::response!(status, Bytes::new())
    }
}

/// Returns `true` if the response carries a redirect `Location`
#[inline]
pub(crate) fn has_location(response: &HttpResponse) -> bool {
    response.headers().contains_key(header::LOCATION)
}
