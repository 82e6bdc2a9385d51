//! Wire-format codec for synthetic requests and raw responses
//!
//! Requests are built with [`SyntheticRequest`] and serialized to HTTP/1.1
//! bytes. Response bytes come back from the transport as a
//! [`TransportResponse`] and are parsed once into a [`TestResponse`].
//! Status codes are kept as exact literal values.

pub use request::SyntheticRequest;
pub use response::{TestResponse, TransportResponse};

pub(crate) use request::ensure_host;

pub mod request;
pub mod response;

const MAX_HEADERS: usize = 64;
const CRLF: &[u8] = b"\r\n";
