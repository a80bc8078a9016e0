//! Incoming HTTP request type.

use std::collections::HashMap;

use bytes::Bytes;
use http::request::Parts;
use http::{HeaderMap, Uri};
use serde::de::DeserializeOwned;
use tokio_util::sync::CancellationToken;

use crate::error::Error;

/// An incoming HTTP request with its body already collected.
///
/// Owned, so it can move into the task the timeout middleware spawns. The
/// request carries a [`CancellationToken`] that wrapping layers may replace
/// with a deadline-bound child; handlers that care can poll
/// [`cancelled`](Request::cancelled) to stop early.
#[derive(Debug)]
pub struct Request {
    head: Parts,
    body: Bytes,
    params: HashMap<String, String>,
    cancel: CancellationToken,
}

impl Request {
    pub fn new(req: http::Request<Bytes>) -> Self {
        let (head, body) = req.into_parts();
        Self { head, body, params: HashMap::new(), cancel: CancellationToken::new() }
    }

    pub fn method(&self) -> &http::Method { &self.head.method }
    pub fn uri(&self) -> &Uri { &self.head.uri }
    pub fn path(&self) -> &str { self.head.uri.path() }
    pub fn headers(&self) -> &HeaderMap { &self.head.headers }
    pub fn body(&self) -> &Bytes { &self.body }

    /// Header lookup. Names are case-insensitive; non-UTF-8 values read as `None`.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.head.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Returns a named path parameter.
    ///
    /// For a route `/users/{id}`, `req.param("id")` on `/users/42` returns `Some("42")`.
    pub fn param(&self, key: &str) -> Option<&str> {
        self.params.get(key).map(String::as_str)
    }

    /// Decodes the body as JSON. See [`json::decode`](crate::json::decode).
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, Error> {
        crate::json::decode(self)
    }

    pub fn cancellation(&self) -> &CancellationToken { &self.cancel }

    pub fn is_cancelled(&self) -> bool { self.cancel.is_cancelled() }

    /// Resolves once the request's deadline has passed or its caller gave up.
    pub async fn cancelled(&self) {
        self.cancel.cancelled().await;
    }

    pub(crate) fn set_params(&mut self, params: HashMap<String, String>) {
        self.params = params;
    }

    pub(crate) fn set_cancellation(&mut self, token: CancellationToken) {
        self.cancel = token;
    }
}

impl From<http::Request<Bytes>> for Request {
    fn from(req: http::Request<Bytes>) -> Self { Self::new(req) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_lookup_ignores_case() {
        let req = Request::new(
            http::Request::builder()
                .uri("/users?page=2")
                .header("X-Request-Id", "abc")
                .body(Bytes::new())
                .unwrap(),
        );
        assert_eq!(req.header("x-request-id"), Some("abc"));
        assert_eq!(req.path(), "/users");
        assert_eq!(req.param("id"), None);
    }
}
