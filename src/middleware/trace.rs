//! Per-request tracing: method, path, status, latency.

use std::sync::Arc;
use std::time::Instant;

use tracing::info;

use crate::handler::{BoxFuture, BoxedHandler, ErasedHandler};
use crate::logging::Logger;
use crate::middleware::Middleware;
use crate::request::Request;
use crate::response::ResponseWriter;

/// Logs each request on the way in and once the inner chain returns.
pub fn trace(logger: Logger) -> Middleware {
    Middleware::new(move |next| Arc::new(Trace { next, logger: logger.clone() }))
}

struct Trace {
    next: BoxedHandler,
    logger: Logger,
}

impl ErasedHandler for Trace {
    fn call(&self, req: Request, w: ResponseWriter) -> BoxFuture {
        let next = Arc::clone(&self.next);
        let logger = self.logger.clone();

        Box::pin(async move {
            let method = req.method().clone();
            let path = req.path().to_owned();
            let start = Instant::now();
            logger.scope(|| info!(method = %method, path = %path, "request"));

            let res = next.call(req, w.clone()).await;

            // Nothing committed yet means an outer layer decides the status.
            let status = w.status().map(|s| s.as_u16());
            let elapsed = start.elapsed();
            logger.scope(|| info!(method = %method, path = %path, status, elapsed = ?elapsed, "completed"));
            res
        })
    }
}
