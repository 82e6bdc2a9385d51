//! Server-side HTTP tools used by filters and front controllers

// Re-exporting HTTP status codes, Request, Response and headers from hyper/http
pub use hyper::{
    http::{Extensions, HeaderMap, HeaderValue, Method, Uri, Version, header},
    Request,
    Response,
    StatusCode,
};

use bytes::Bytes;
use crate::error::Error;

pub use cookie::Cookies;
pub use response::Results;

pub mod cookie;
pub mod response;

/// A fully buffered request as seen by the filter chain
pub type HttpRequest = Request<Bytes>;

/// A fully buffered response produced by the filter chain
pub type HttpResponse = Response<Bytes>;

/// Result of a filter chain link
pub type HttpResult = Result<HttpResponse, Error>;
