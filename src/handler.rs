//! Handler trait and type erasure.
//!
//! # How async handlers are stored
//!
//! The multiplexer holds handlers of *different* types in a single tree, and
//! middleware has to wrap whatever it is given. Both need one concrete type, so
//! every handler is erased behind [`ErasedHandler`] and shared as a
//! [`BoxedHandler`].
//!
//! ```text
//! async fn hello(req: Request, w: ResponseWriter) -> Result<(), Error> { … }
//!        ↓ router.get("/", hello)
//! hello.into_boxed_handler()                       ← Handler blanket impl
//!        ↓
//! Arc::new(FnHandler(hello))                       ← heap-allocated wrapper
//!        ↓  middleware::chain(handler, &middleware) ← each layer wraps the Arc
//! handler.call(req, w)  at request time            ← one vtable dispatch per layer
//! ```

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::error::Error;
use crate::request::Request;
use crate::response::ResponseWriter;

/// What every handler and middleware layer resolves to.
pub type HandlerResult = Result<(), Error>;

/// A heap-allocated, type-erased handler future.
///
/// `Send + 'static` so the timeout middleware can move it onto its own task.
pub type BoxFuture = Pin<Box<dyn Future<Output = HandlerResult> + Send + 'static>>;

/// Object-safe dispatch interface shared by handlers and middleware layers.
///
/// Implement this directly when writing middleware as a struct: hold the next
/// [`BoxedHandler`] and decide when to call it.
pub trait ErasedHandler {
    fn call(&self, req: Request, w: ResponseWriter) -> BoxFuture;
}

/// A type-erased handler shared across concurrent requests.
pub type BoxedHandler = Arc<dyn ErasedHandler + Send + Sync + 'static>;

/// Implemented for every valid route handler.
///
/// You never implement this yourself. It is satisfied by any `async fn` (or
/// closure returning a future) with the signature:
///
/// ```text
/// async fn name(req: Request, w: ResponseWriter) -> Result<(), Error>
/// ```
///
/// Sealed: only the blanket impl below can satisfy it.
pub trait Handler: private::Sealed + Send + Sync + 'static {
    #[doc(hidden)]
    fn into_boxed_handler(self) -> BoxedHandler;
}

mod private {
    pub trait Sealed {}
}

impl<F, Fut> private::Sealed for F
where
    F: Fn(Request, ResponseWriter) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
}

impl<F, Fut> Handler for F
where
    F: Fn(Request, ResponseWriter) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    fn into_boxed_handler(self) -> BoxedHandler {
        Arc::new(FnHandler(self))
    }
}

/// Bridges a concrete handler `F` to the trait-object world.
struct FnHandler<F>(F);

impl<F, Fut> ErasedHandler for FnHandler<F>
where
    F: Fn(Request, ResponseWriter) -> Fut + Send + Sync,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    fn call(&self, req: Request, w: ResponseWriter) -> BoxFuture {
        Box::pin((self.0)(req, w))
    }
}
