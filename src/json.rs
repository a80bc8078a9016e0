//! JSON request/response helpers.
//!
//! The error helpers here always write the [`JsonResponder`] shape:
//!
//! ```text
//! {"error":"<message>"}
//! ```
//!
//! Errors the framework writes on its own use the router's configured
//! [`Responder`](crate::Responder) instead.

use http::header::CONTENT_TYPE;
use http::{HeaderValue, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::Error;
use crate::request::Request;
use crate::responder::{JsonResponder, Responder};
use crate::response::ResponseWriter;

#[derive(Serialize)]
struct ErrorBody<'a> {
    error: &'a str,
}

/// Serializes `data`, then sets `content-type: application/json`, commits
/// `status` and writes the body.
///
/// Serialization happens first, so an encoding failure leaves the writer
/// untouched for an outer layer to answer.
pub fn write<T: Serialize + ?Sized>(w: &ResponseWriter, status: StatusCode, data: &T) -> Result<(), Error> {
    let body = serde_json::to_vec(data).map_err(Error::Encode)?;
    w.set_header(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    w.write_header(status);
    w.write_all(&body).map_err(Error::Write)
}

/// `{"error": message}` with `status`.
pub fn error(w: &ResponseWriter, status: StatusCode, message: &str) -> Result<(), Error> {
    write(w, status, &ErrorBody { error: message })
}

/// `404` with `message`, or `resource not found`.
pub fn not_found(w: &ResponseWriter, message: Option<&str>) -> Result<(), Error> {
    JsonResponder.not_found(w, message)
}

pub fn bad_request(w: &ResponseWriter, message: &str) -> Result<(), Error> {
    JsonResponder.bad_request(w, message)
}

/// `500` with `internal server error`, followed by `: <err>` when given.
pub fn internal_error(w: &ResponseWriter, err: Option<&Error>) -> Result<(), Error> {
    JsonResponder.internal_error(w, err)
}

/// Decodes the request body as JSON.
///
/// An empty body is [`Error::EmptyBody`]; anything serde rejects is
/// [`Error::Decode`]. Mapping either onto a response is up to the handler.
pub fn decode<T: DeserializeOwned>(req: &Request) -> Result<T, Error> {
    if req.body().is_empty() {
        return Err(Error::EmptyBody);
    }
    serde_json::from_slice(req.body()).map_err(Error::Decode)
}
