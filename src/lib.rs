//! # vibe
//!
//! A thin router and middleware layer over hyper for JSON APIs.
//!
//! Handlers write into a [`ResponseWriter`] and return `Result<(), Error>`.
//! The router wraps every route in middleware when it is registered. By
//! default that is a 30 s timeout with panic recovery inside it, then
//! whatever you add globally, per [`Group`] and per route. An `Err` that
//! escapes the chain becomes a `500` with `{"error":"<message>"}`, or
//! whatever shape the configured [`Responder`] writes.
//!
//! - Radix-tree routing via [`matchit`], with `405` and `Allow` for wrong methods
//! - Route groups with prefix and middleware inheritance
//! - Recovery, timeout, CORS and request tracing middleware
//! - Graceful shutdown on SIGTERM / Ctrl-C, draining in-flight connections
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use http::StatusCode;
//! use vibe::{json, Error, Request, ResponseWriter, Router, Server};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Error> {
//!     vibe::logging::init()?;
//!
//!     let app = Router::new();
//!     let users = app.group("/users");
//!     users
//!         .get("/{id}", get_user)
//!         .post("", create_user);
//!
//!     Server::bind("0.0.0.0:3000")?.serve(app).await
//! }
//!
//! async fn get_user(req: Request, w: ResponseWriter) -> Result<(), Error> {
//!     let id = req.param("id").unwrap_or("unknown");
//!     json::write(&w, StatusCode::OK, &serde_json::json!({ "id": id }))
//! }
//!
//! async fn create_user(req: Request, w: ResponseWriter) -> Result<(), Error> {
//!     let user: serde_json::Value = match json::decode(&req) {
//!         Ok(user) => user,
//!         Err(e) => return json::bad_request(&w, &e.to_string()),
//!     };
//!     json::write(&w, StatusCode::CREATED, &user)
//! }
//! ```

mod capture;
mod error;
mod group;
mod handler;
mod method;
mod mux;
mod request;
mod responder;
mod response;
mod router;
mod server;

pub mod json;
pub mod logging;
pub mod middleware;

pub use capture::Capture;
pub use error::{BoxError, Error};
pub use group::Group;
pub use handler::{BoxFuture, BoxedHandler, ErasedHandler, Handler, HandlerResult};
pub use logging::Logger;
pub use method::Method;
pub use request::Request;
pub use responder::{JsonResponder, Responder, SharedResponder, TextResponder};
pub use response::{Recorder, ResponseWriter, Sink};
pub use router::{Router, RouterConfig, DEFAULT_TIMEOUT};
pub use server::Server;
