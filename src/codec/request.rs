//! Synthetic request building and serialization

use bytes::{BufMut, Bytes, BytesMut};
use httparse::{Request as RawRequest, Status, EMPTY_HEADER};
use std::{borrow::Cow, fmt};
use super::{CRLF, MAX_HEADERS};
use crate::{error::Error, transport::DEFAULT_HOST};

const HOST: &str = "host";
const COOKIE: &str = "cookie";
const CONTENT_LENGTH: &str = "content-length";
const TRANSFER_ENCODING: &str = "transfer-encoding";

/// A test-constructed HTTP/1.1 request
#[derive(Debug, Clone, PartialEq)]
pub struct SyntheticRequest {
    method: String,
    host: Option<String>,
    path: String,
    headers: Vec<(String, String)>,
    body: Bytes,
}

impl SyntheticRequest {
    /// Creates a request with the given `method` and `path`
    pub fn new(method: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            host: None,
            path: path.into(),
            headers: Vec::new(),
            body: Bytes::new(),
        }
    }

    /// Creates a `GET` request
    #[inline]
    pub fn get(path: impl Into<String>) -> Self {
        Self::new("GET", path)
    }

    /// Creates a `POST` request
    #[inline]
    pub fn post(path: impl Into<String>) -> Self {
        Self::new("POST", path)
    }

    /// Creates a `HEAD` request
    #[inline]
    pub fn head(path: impl Into<String>) -> Self {
        Self::new("HEAD", path)
    }

    /// Sets the `Host` header
    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = Some(host.into());
        self
    }

    /// Appends a header
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        let name = name.into();
        if name.eq_ignore_ascii_case(HOST) {
            self.host = Some(value.into());
        } else {
            self.headers.push((name, value.into()));
        }
        self
    }

    /// Adds a cookie, merging it into an existing `Cookie` header
    pub fn with_cookie(mut self, name: &str, value: &str) -> Self {
        let pair = format!("{name}={value}");
        match self.headers.iter_mut().find(|(n, _)| n.eq_ignore_ascii_case(COOKIE)) {
            Some((_, existing)) => {
                existing.push_str("; ");
                existing.push_str(&pair);
            }
            None => self.headers.push(("Cookie".into(), pair)),
        }
        self
    }

    /// Sets the request body
    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    /// Returns the request method
    #[inline]
    pub fn method(&self) -> &str {
        &self.method
    }

    /// Returns the host, falling back to the loopback address
    pub fn host(&self) -> &str {
        match self.host.as_deref() {
            Some(host) if !host.is_empty() => host,
            _ => DEFAULT_HOST,
        }
    }

    /// Returns the request target
    #[inline]
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Returns the headers other than `Host`, in insertion order
    #[inline]
    pub fn headers(&self) -> &[(String, String)] {
        &self.headers
    }

    /// Returns the first value of the header `name`
    pub fn header(&self, name: &str) -> Option<&str> {
        if name.eq_ignore_ascii_case(HOST) {
            return self.host.as_deref();
        }
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Returns the request body
    #[inline]
    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// Serializes the request to HTTP/1.1 wire format.
    ///
    /// `Content-Length` is added for a non-empty body unless the request
    /// already frames it. A request without a host is sent without a `Host`
    /// header and gets one from the transport.
    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(128 + self.body.len());
        buf.put_slice(self.to_string().as_bytes());
        buf.put_slice(CRLF);

        if let Some(host) = self.host.as_deref().filter(|h| !h.is_empty()) {
            put_header(&mut buf, "Host", host);
        }
        for (name, value) in &self.headers {
            put_header(&mut buf, name, value);
        }

        let framed = self.headers
            .iter()
            .any(|(n, _)| n.eq_ignore_ascii_case(CONTENT_LENGTH) || n.eq_ignore_ascii_case(TRANSFER_ENCODING));
        if !framed && !self.body.is_empty() {
            put_header(&mut buf, "Content-Length", &self.body.len().to_string());
        }

        buf.put_slice(CRLF);
        buf.put_slice(&self.body);
        buf.freeze()
    }

    /// Parses wire-format request bytes
    pub fn parse(raw: &[u8]) -> Result<Self, Error> {
        let mut headers = [EMPTY_HEADER; MAX_HEADERS];
        let mut req = RawRequest::new(&mut headers);

        let head_len = match req.parse(raw)? {
            Status::Complete(len) => len,
            Status::Partial => return Err(Error::protocol("request head is incomplete")),
        };

        let method = req.method.ok_or_else(|| Error::protocol("no method specified"))?;
        let path = req.path.ok_or_else(|| Error::protocol("no path specified"))?;
        let mut request = Self::new(method, path);

        for header in req.headers.iter() {
            let value = std::str::from_utf8(header.value).map_err(Error::protocol)?;
            request = request.with_header(header.name, value);
        }

        Ok(request.with_body(Bytes::copy_from_slice(&raw[head_len..])))
    }
}

impl fmt::Display for SyntheticRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} HTTP/1.1", self.method, self.path)
    }
}

impl From<SyntheticRequest> for Bytes {
    #[inline]
    fn from(request: SyntheticRequest) -> Self {
        request.to_bytes()
    }
}

#[inline]
fn put_header(buf: &mut BytesMut, name: &str, value: &str) {
    buf.put_slice(name.as_bytes());
    buf.put_slice(b": ");
    buf.put_slice(value.as_bytes());
    buf.put_slice(CRLF);
}

/// Inserts `Host: {host}` right after the request line if `raw` carries no
/// `Host` header or only a blank one
pub(crate) fn ensure_host<'a>(raw: &'a [u8], host: &str) -> Result<Cow<'a, [u8]>, Error> {
    let (head_len, has_host) = {
        let mut headers = [EMPTY_HEADER; MAX_HEADERS];
        let mut req = RawRequest::new(&mut headers);
        let Status::Complete(head_len) = req.parse(raw)? else {
            return Err(Error::protocol("request head is incomplete"));
        };
        let has_host = req.headers
            .iter()
            .any(|h| h.name.eq_ignore_ascii_case(HOST) && !h.value.trim_ascii().is_empty());
        (head_len, has_host)
    };

    if has_host {
        return Ok(Cow::Borrowed(raw));
    }

    // httparse tolerates empty lines ahead of the request line
    let start = raw
        .iter()
        .take_while(|b| **b == b'\r' || **b == b'\n')
        .count();
    let line_end = memchr::memchr(b'\n', &raw[start..])
        .map(|pos| start + pos + 1)
        .ok_or_else(|| Error::protocol("request line is not terminated"))?;

    let mut patched = Vec::with_capacity(raw.len() + host.len() + 8);
    patched.extend_from_slice(&raw[..line_end]);
    patched.extend_from_slice(b"Host: ");
    patched.extend_from_slice(host.as_bytes());
    patched.extend_from_slice(CRLF);
    raw[line_end..head_len]
        .split_inclusive(|b| *b == b'\n')
        .filter(|line| !is_blank_host(line))
        .for_each(|line| patched.extend_from_slice(line));
    patched.extend_from_slice(&raw[head_len..]);

    tracing::trace!(host, "default host inserted");
    Ok(Cow::Owned(patched))
}

/// Returns `true` for a `Host:` header line without a value
#[inline]
fn is_blank_host(line: &[u8]) -> bool {
    line.len() > HOST.len()
        && line[..HOST.len()].eq_ignore_ascii_case(HOST.as_bytes())
        && line[HOST.len()] == b':'
        && line[HOST.len() + 1..].trim_ascii().is_empty()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn it_serializes_get_request() {
        let request = SyntheticRequest::get("/users?id=1")
            .with_host("example.com")
            .with_header("Accept", "text/html");

        assert_eq!(
            request.to_bytes().as_ref(),
            b"GET /users?id=1 HTTP/1.1\r\nHost: example.com\r\nAccept: text/html\r\n\r\n"
        );
    }

    #[test]
    fn it_adds_content_length_for_body() {
        let request = SyntheticRequest::post("/form").with_body("a=1");

        assert_eq!(
            request.to_bytes().as_ref(),
            b"POST /form HTTP/1.1\r\nContent-Length: 3\r\n\r\na=1"
        );
    }

    #[test]
    fn it_keeps_explicit_framing() {
        let request = SyntheticRequest::post("/")
            .with_header("Content-Length", "2")
            .with_body("ab");

        let bytes = request.to_bytes();
        let text = std::str::from_utf8(&bytes).unwrap();
        assert_eq!(text.matches("Content-Length").count(), 1);
    }

    #[test]
    fn it_merges_cookies() {
        let request = SyntheticRequest::get("/")
            .with_cookie("JSESSIONID", "abc")
            .with_cookie("theme", "dark");

        assert_eq!(request.header("cookie"), Some("JSESSIONID=abc; theme=dark"));
    }

    #[test]
    fn it_defaults_host_to_loopback() {
        assert_eq!(SyntheticRequest::get("/").host(), "127.0.0.1");
        assert_eq!(SyntheticRequest::get("/").with_host("").host(), "127.0.0.1");
        assert_eq!(SyntheticRequest::get("/").with_header("Host", "a.test").host(), "a.test");
    }

    #[test]
    fn it_parses_serialized_request() {
        let raw = b"PUT /items/1 HTTP/1.1\r\nHost: a.test\r\nContent-Length: 2\r\n\r\n{}";

        let request = SyntheticRequest::parse(raw).unwrap();

        assert_eq!(request.method(), "PUT");
        assert_eq!(request.path(), "/items/1");
        assert_eq!(request.host(), "a.test");
        assert_eq!(request.header("content-length"), Some("2"));
        assert_eq!(request.body().as_ref(), b"{}");
        assert_eq!(request.to_string(), "PUT /items/1 HTTP/1.1");
    }

    #[test]
    fn it_rejects_incomplete_request() {
        let err = SyntheticRequest::parse(b"GET / HTTP/1.1\r\nHost: a").unwrap_err();

        assert_eq!(err.kind(), crate::error::ErrorKind::Protocol);
    }

    #[test]
    fn it_inserts_missing_host() {
        let patched = ensure_host(b"GET / HTTP/1.1\r\nAccept: */*\r\n\r\n", "127.0.0.1").unwrap();

        assert_eq!(
            patched.as_ref(),
            b"GET / HTTP/1.1\r\nHost: 127.0.0.1\r\nAccept: */*\r\n\r\n"
        );
    }

    #[test]
    fn it_replaces_blank_host() {
        let raw = b"POST / HTTP/1.1\r\nHOST:  \r\nContent-Length: 2\r\n\r\nhi";

        let patched = ensure_host(raw, "10.0.0.1").unwrap();

        assert_eq!(
            patched.as_ref(),
            b"POST / HTTP/1.1\r\nHost: 10.0.0.1\r\nContent-Length: 2\r\n\r\nhi"
        );
    }

    #[test]
    fn it_keeps_existing_host() {
        let raw: &[u8] = b"GET / HTTP/1.1\r\nhost: a.test\r\n\r\n";

        let patched = ensure_host(raw, "127.0.0.1").unwrap();

        assert!(matches!(patched, Cow::Borrowed(_)));
    }
}
