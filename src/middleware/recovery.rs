//! Panic recovery.
//!
//! A panic anywhere inside the wrapped handler (while it is being built or
//! while it is being polled) is caught, logged, and answered with a `500`
//! JSON error. The panic never leaves this layer.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures_util::FutureExt;
use tracing::error;

use crate::error::{BoxError, Error};
use crate::handler::{BoxFuture, BoxedHandler, ErasedHandler};
use crate::logging::Logger;
use crate::middleware::Middleware;
use crate::request::Request;
use crate::responder::{default_responder, SharedResponder};
use crate::response::ResponseWriter;

/// Recovers from panics, logging them through `logger`.
///
/// Pass `Logger::default()` to log through the ambient dispatcher.
pub fn recovery(logger: Logger) -> Middleware {
    recovery_with(logger, default_responder())
}

/// Like [`recovery`], writing the `500` through `responder`.
pub fn recovery_with(logger: Logger, responder: SharedResponder) -> Middleware {
    Middleware::new(move |next| {
        Arc::new(Recover { next, logger: logger.clone(), responder: Arc::clone(&responder) })
    })
}

struct Recover {
    next: BoxedHandler,
    logger: Logger,
    responder: SharedResponder,
}

impl ErasedHandler for Recover {
    fn call(&self, req: Request, w: ResponseWriter) -> BoxFuture {
        let next = Arc::clone(&self.next);
        let logger = self.logger.clone();
        let responder = Arc::clone(&self.responder);

        Box::pin(async move {
            let method = req.method().clone();
            let path = req.path().to_owned();

            let inner = w.clone();
            let guarded = AssertUnwindSafe(async move { next.call(req, inner).await });
            let payload = match guarded.catch_unwind().await {
                Ok(res) => return res,
                Err(payload) => payload,
            };

            let err = normalize(payload);
            logger.scope(|| error!(method = %method, path = %path, error = %err, "recovered from panic"));

            if let Err(write_err) = responder.internal_error(&w, Some(&err)) {
                logger.scope(|| error!(error = %write_err, "failed to write error response"));
            }
            Ok(())
        })
    }
}

/// Turns a panic payload into an [`Error`].
///
/// Payloads that already are errors are reused; string payloads become
/// [`Error::Panic`] with the message.
pub(crate) fn normalize(payload: Box<dyn Any + Send>) -> Error {
    let payload = match payload.downcast::<Error>() {
        Ok(err) => return *err,
        Err(other) => other,
    };
    let payload = match payload.downcast::<BoxError>() {
        Ok(err) => return Error::Other(*err),
        Err(other) => other,
    };
    if let Some(msg) = payload.downcast_ref::<&'static str>() {
        return Error::Panic((*msg).to_owned());
    }
    match payload.downcast::<String>() {
        Ok(msg) => Error::Panic(*msg),
        Err(_) => Error::Panic("unknown panic".to_owned()),
    }
}
