//! Error body formats.
//!
//! Every error response the framework writes on its own goes through a
//! [`Responder`]: the timeout body, the panic-recovery body and the `500` the
//! router writes for a handler's `Err`. [`JsonResponder`] is the default;
//! set another one with [`RouterConfig::responder`](crate::RouterConfig::responder).

use std::sync::Arc;

use http::StatusCode;

use crate::error::Error;
use crate::json;
use crate::response::{self, ResponseWriter};

/// Writes an error response in some format.
///
/// Only [`error`](Responder::error) is required; the other methods fix the
/// status and default message and delegate to it.
pub trait Responder: Send + Sync {
    fn error(&self, w: &ResponseWriter, status: StatusCode, message: &str) -> Result<(), Error>;

    /// `404` with `message`, or `resource not found`.
    fn not_found(&self, w: &ResponseWriter, message: Option<&str>) -> Result<(), Error> {
        self.error(w, StatusCode::NOT_FOUND, message.unwrap_or("resource not found"))
    }

    fn bad_request(&self, w: &ResponseWriter, message: &str) -> Result<(), Error> {
        self.error(w, StatusCode::BAD_REQUEST, message)
    }

    /// `500` with `internal server error`, followed by `: <err>` when given.
    fn internal_error(&self, w: &ResponseWriter, err: Option<&Error>) -> Result<(), Error> {
        let message = match err {
            Some(err) => format!("internal server error: {err}"),
            None => "internal server error".to_owned(),
        };
        self.error(w, StatusCode::INTERNAL_SERVER_ERROR, &message)
    }
}

/// A responder shared between the router and its built-in middleware.
pub type SharedResponder = Arc<dyn Responder>;

/// `{"error":"<message>"}` as `application/json`.
#[derive(Clone, Copy, Debug, Default)]
pub struct JsonResponder;

impl Responder for JsonResponder {
    fn error(&self, w: &ResponseWriter, status: StatusCode, message: &str) -> Result<(), Error> {
        json::error(w, status, message)
    }
}

/// `<message>\n` as `text/plain`, like the default `404`/`405` pages.
#[derive(Clone, Copy, Debug, Default)]
pub struct TextResponder;

impl Responder for TextResponder {
    fn error(&self, w: &ResponseWriter, status: StatusCode, message: &str) -> Result<(), Error> {
        response::text_error(w, status, message).map_err(Error::Write)
    }
}

pub(crate) fn default_responder() -> SharedResponder {
    Arc::new(JsonResponder)
}

#[cfg(test)]
mod tests {
    use http::header::CONTENT_TYPE;

    use super::*;
    use crate::response::test_support::body_of;
    use crate::response::Recorder;

    #[test]
    fn text_responder_writes_plain_text() {
        let rec = Recorder::new();
        TextResponder.internal_error(&rec.writer(), Some(&Error::other("db down"))).unwrap();

        let res = rec.finish();
        assert_eq!(res.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(res.headers()[CONTENT_TYPE], "text/plain; charset=utf-8");
        assert_eq!(body_of(&res), "internal server error: db down\n");
    }

    #[test]
    fn provided_methods_route_through_error() {
        struct Bare;

        impl Responder for Bare {
            fn error(&self, w: &ResponseWriter, status: StatusCode, _message: &str) -> Result<(), Error> {
                let reason = status.canonical_reason().unwrap_or("error");
                response::text_error(w, status, reason).map_err(Error::Write)
            }
        }

        let rec = Recorder::new();
        Bare.internal_error(&rec.writer(), Some(&Error::other("secret detail"))).unwrap();
        assert_eq!(body_of(&rec.finish()), "Internal Server Error\n");

        let rec = Recorder::new();
        Bare.not_found(&rec.writer(), None).unwrap();
        assert_eq!(rec.finish().status(), StatusCode::NOT_FOUND);
    }
}
