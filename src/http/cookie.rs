//! Set of utils to work with Cookies

use std::ops::{Deref, DerefMut};
use cookie::{Cookie, CookieJar};
use super::{header::{COOKIE, SET_COOKIE}, HeaderMap};

/// Represents HTTP cookies
#[derive(Debug, Default, Clone)]
pub struct Cookies(CookieJar);

impl Deref for Cookies {
    type Target = CookieJar;

    #[inline]
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl DerefMut for Cookies {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.0
    }
}

impl From<&HeaderMap> for Cookies {
    #[inline]
    fn from(headers: &HeaderMap) -> Self {
        let mut jar = CookieJar::new();
        let cookies = headers
            .get_all(COOKIE)
            .into_iter()
            .filter_map(|value| value.to_str().ok())
            .flat_map(|value| value.split(';'))
            .filter_map(|cookie| Cookie::parse_encoded(cookie.trim().to_owned()).ok());

        for cookie in cookies {
            jar.add_original(cookie);
        }

        Self(jar)
    }
}

impl Cookies {
    /// Creates a new [`Cookies`]
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the value of the cookie with the given name
    #[inline]
    pub fn value(&self, name: &str) -> Option<&str> {
        self.0.get(name).map(Cookie::value)
    }

    /// Sets the added cookies to the HTTP headers
    #[inline]
    pub(crate) fn set_cookies(&self, headers: &mut HeaderMap) {
        for cookie in self.delta() {
            if let Ok(header_value) = cookie.encoded().to_string().parse() {
                headers.append(SET_COOKIE, header_value);
            }
        }
    }
}

/// Builds the cookie that carries a session id back to the client
pub(crate) fn session_cookie(name: &str, id: &str, path: &str) -> Cookie<'static> {
    Cookie::build((name.to_owned(), id.to_owned()))
        .path(path.to_owned())
        .http_only(true)
        .build()
}
