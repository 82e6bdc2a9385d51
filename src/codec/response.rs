//! Raw response bytes and their parsed form

use bytes::{Bytes, BytesMut};
use cookie::Cookie;
use httparse::{Response as RawResponse, Status, EMPTY_HEADER};
use serde::de::DeserializeOwned;
use std::borrow::Cow;
use super::{CRLF, MAX_HEADERS};
use crate::error::Error;

/// Raw response bytes as returned by the transport.
///
/// Parsing consumes the value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportResponse(Bytes);

impl TransportResponse {
    /// Wraps raw response bytes
    #[inline]
    pub fn new(bytes: impl Into<Bytes>) -> Self {
        Self(bytes.into())
    }

    /// Returns the raw bytes
    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Unwraps the raw bytes
    #[inline]
    pub fn into_bytes(self) -> Bytes {
        self.0
    }

    /// Parses the bytes into a [`TestResponse`]
    pub fn parse(self) -> Result<TestResponse, Error> {
        let raw = self.0;
        let mut headers = [EMPTY_HEADER; MAX_HEADERS];
        let mut res = RawResponse::new(&mut headers);

        let head_len = match res.parse(&raw)? {
            Status::Complete(len) => len,
            Status::Partial => return Err(Error::protocol("response head is incomplete")),
        };

        let status = res.code.ok_or_else(|| Error::protocol("no status code"))?;
        let version = res.version.unwrap_or(1);
        let reason = res.reason.unwrap_or_default().to_owned();
        let headers = res.headers
            .iter()
            .map(|h| {
                std::str::from_utf8(h.value)
                    .map(|value| (h.name.to_owned(), value.to_owned()))
                    .map_err(Error::protocol)
            })
            .collect::<Result<Vec<_>, Error>>()?;

        let mut response = TestResponse {
            status,
            reason,
            version,
            headers,
            body: Bytes::new(),
            raw: raw.clone(),
        };
        response.body = response.decode_body(raw.slice(head_len..))?;
        Ok(response)
    }
}

impl From<Bytes> for TransportResponse {
    #[inline]
    fn from(bytes: Bytes) -> Self {
        Self(bytes)
    }
}

/// A parsed response: literal status code, headers in wire order and the
/// decoded body
#[derive(Debug, Clone, PartialEq)]
pub struct TestResponse {
    status: u16,
    reason: String,
    version: u8,
    headers: Vec<(String, String)>,
    body: Bytes,
    raw: Bytes,
}

impl TestResponse {
    /// Returns the literal status code
    #[inline]
    pub fn status_code(&self) -> u16 {
        self.status
    }

    /// Returns the reason phrase
    #[inline]
    pub fn reason(&self) -> &str {
        &self.reason
    }

    /// Returns the minor HTTP version, `1` for HTTP/1.1
    #[inline]
    pub fn version(&self) -> u8 {
        self.version
    }

    /// Returns all headers in wire order
    #[inline]
    pub fn headers(&self) -> &[(String, String)] {
        &self.headers
    }

    /// Returns the first value of the header `name`
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Returns every value of the header `name`
    pub fn header_values(&self, name: &str) -> Vec<&str> {
        self.headers
            .iter()
            .filter(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
            .collect()
    }

    /// Returns the `Location` header
    #[inline]
    pub fn location(&self) -> Option<&str> {
        self.header("location")
    }

    /// Returns the value of cookie `name` set by the response
    pub fn cookie(&self, name: &str) -> Option<String> {
        self.header_values("set-cookie")
            .into_iter()
            .filter_map(|value| Cookie::parse(value).ok())
            .find(|cookie| cookie.name() == name)
            .map(|cookie| cookie.value().to_owned())
    }

    /// Returns the decoded body
    #[inline]
    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// Returns the body as text, replacing invalid UTF-8
    #[inline]
    pub fn text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.body)
    }

    /// Deserializes the JSON body
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, Error> {
        serde_json::from_slice(&self.body).map_err(Error::protocol)
    }

    /// Returns the exact bytes the response was parsed from
    #[inline]
    pub fn raw(&self) -> &Bytes {
        &self.raw
    }

    fn decode_body(&self, rest: Bytes) -> Result<Bytes, Error> {
        if matches!(self.status, 100..=199 | 204 | 304) {
            return Ok(Bytes::new());
        }

        let chunked = self.header("transfer-encoding")
            .is_some_and(|te| te.to_ascii_lowercase().contains("chunked"));
        if chunked {
            return decode_chunked(&rest);
        }

        match self.header("content-length") {
            // a response to HEAD announces a length it never sends
            Some(_) if rest.is_empty() => Ok(rest),
            Some(len) => {
                let len = len.trim().parse::<usize>().map_err(Error::protocol)?;
                if rest.len() < len {
                    return Err(Error::protocol(format!(
                        "body is truncated: expected {len} bytes, got {}", rest.len()
                    )));
                }
                Ok(rest.slice(..len))
            }
            None => Ok(rest),
        }
    }
}

/// Decodes a `Transfer-Encoding: chunked` body, trailers are dropped
fn decode_chunked(mut input: &[u8]) -> Result<Bytes, Error> {
    let mut body = BytesMut::with_capacity(input.len());
    loop {
        let line_end = memchr::memmem::find(input, CRLF)
            .ok_or_else(|| Error::protocol("chunk size line is not terminated"))?;
        let line = std::str::from_utf8(&input[..line_end]).map_err(Error::protocol)?;
        let size = line.split(';').next().unwrap_or_default().trim();
        let size = usize::from_str_radix(size, 16).map_err(Error::protocol)?;
        input = &input[line_end + CRLF.len()..];

        if size == 0 {
            return Ok(body.freeze());
        }
        if input.len() < size + CRLF.len() {
            return Err(Error::protocol("chunk is truncated"));
        }
        body.extend_from_slice(&input[..size]);
        input = &input[size + CRLF.len()..];
    }
}
