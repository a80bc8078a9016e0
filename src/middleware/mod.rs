//! Middleware layer.
//!
//! A [`Middleware`] turns one handler into another. Cross-cutting behavior
//! (panic recovery, deadlines, CORS, request tracing) lives here as layers the
//! router composes around each route at registration time.
//!
//! ```text
//! chain(handler, &[a, b, c])  ==  a(b(c(handler)))
//!
//! request ──► a ──► b ──► c ──► handler
//! ```
//!
//! Write your own with [`Middleware::from_fn`]:
//!
//! ```rust
//! use http::{HeaderName, HeaderValue};
//! use vibe::middleware::{Middleware, Next};
//! use vibe::{Error, Request, ResponseWriter};
//!
//! async fn powered_by(req: Request, w: ResponseWriter, next: Next) -> Result<(), Error> {
//!     w.set_header(HeaderName::from_static("x-powered-by"), HeaderValue::from_static("vibe"));
//!     next.run(req, w).await
//! }
//!
//! let mw = Middleware::from_fn(powered_by);
//! ```

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use crate::handler::{BoxFuture, BoxedHandler, ErasedHandler, HandlerResult};
use crate::request::Request;
use crate::response::ResponseWriter;

pub mod cors;
pub mod recovery;
pub mod timeout;
pub mod trace;

pub use cors::{cors, CorsConfig};
pub use recovery::{recovery, recovery_with};
pub use timeout::{timeout, timeout_with, TIMEOUT_STATUS};
pub use trace::trace;

/// A handler-to-handler transformation. Cheap to clone.
#[derive(Clone)]
pub struct Middleware(Arc<dyn Fn(BoxedHandler) -> BoxedHandler + Send + Sync>);

impl Middleware {
    pub fn new(wrap: impl Fn(BoxedHandler) -> BoxedHandler + Send + Sync + 'static) -> Self {
        Self(Arc::new(wrap))
    }

    /// Builds middleware from an async function that receives the inner
    /// handler as [`Next`].
    pub fn from_fn<F, Fut>(f: F) -> Self
    where
        F: Fn(Request, ResponseWriter, Next) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        let f = Arc::new(f);
        Self::new(move |next| Arc::new(FromFn { f: Arc::clone(&f), next: Next(next) }))
    }

    pub fn apply(&self, handler: BoxedHandler) -> BoxedHandler {
        (self.0)(handler)
    }
}

impl fmt::Debug for Middleware {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Middleware { .. }")
    }
}

/// The rest of the chain, as seen from inside a [`Middleware::from_fn`] layer.
#[derive(Clone)]
pub struct Next(BoxedHandler);

impl Next {
    pub fn run(&self, req: Request, w: ResponseWriter) -> BoxFuture {
        self.0.call(req, w)
    }
}

struct FromFn<F> {
    f: Arc<F>,
    next: Next,
}

impl<F, Fut> ErasedHandler for FromFn<F>
where
    F: Fn(Request, ResponseWriter, Next) -> Fut + Send + Sync,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    fn call(&self, req: Request, w: ResponseWriter) -> BoxFuture {
        Box::pin((self.f)(req, w, self.next.clone()))
    }
}

/// Wraps `handler` in `middleware`, first element outermost.
///
/// Composition is associative: `chain(chain(h, b), a)` behaves the same as
/// `chain(h, [a, b].concat())`.
pub fn chain(handler: BoxedHandler, middleware: &[Middleware]) -> BoxedHandler {
    middleware.iter().rev().fold(handler, |inner, mw| mw.apply(inner))
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use bytes::Bytes;

    use super::*;
    use crate::error::Error;
    use crate::handler::Handler;
    use crate::response::Recorder;

    type Trail = Arc<Mutex<Vec<&'static str>>>;

    fn label(trail: &Trail, name: &'static str) -> Middleware {
        let trail = Arc::clone(trail);
        Middleware::from_fn(move |req: Request, w: ResponseWriter, next: Next| {
            let trail = Arc::clone(&trail);
            async move {
                trail.lock().unwrap().push(name);
                let res = next.run(req, w).await;
                trail.lock().unwrap().push(name);
                res
            }
        })
    }

    fn terminal(trail: &Trail) -> BoxedHandler {
        let trail = Arc::clone(trail);
        let handler = move |_req: Request, _w: ResponseWriter| {
            let trail = Arc::clone(&trail);
            async move {
                trail.lock().unwrap().push("handler");
                Ok::<(), Error>(())
            }
        };
        handler.into_boxed_handler()
    }

    fn request() -> Request {
        Request::new(http::Request::new(Bytes::new()))
    }

    async fn run(handler: BoxedHandler) {
        let rec = Recorder::new();
        handler.call(request(), rec.writer()).await.unwrap();
    }

    #[tokio::test]
    async fn first_middleware_is_outermost() {
        let trail = Trail::default();
        let mws = [label(&trail, "a"), label(&trail, "b"), label(&trail, "c")];

        run(chain(terminal(&trail), &mws)).await;

        assert_eq!(*trail.lock().unwrap(), ["a", "b", "c", "handler", "c", "b", "a"]);
    }

    #[tokio::test]
    async fn composition_is_associative() {
        let once = Trail::default();
        let all = [label(&once, "a"), label(&once, "b"), label(&once, "c")];
        run(chain(terminal(&once), &all)).await;

        let nested = Trail::default();
        let outer = [label(&nested, "a")];
        let inner = [label(&nested, "b"), label(&nested, "c")];
        run(chain(chain(terminal(&nested), &inner), &outer)).await;

        assert_eq!(*once.lock().unwrap(), *nested.lock().unwrap());
    }

    #[tokio::test]
    async fn empty_chain_is_the_handler() {
        let trail = Trail::default();
        run(chain(terminal(&trail), &[])).await;
        assert_eq!(*trail.lock().unwrap(), ["handler"]);
    }
}
