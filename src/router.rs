//! The application router.
//!
//! Routes live in a [`Mux`](crate::mux) (one radix tree per method). Every
//! handler is composed with its middleware once, when it is registered: the
//! router's global list as it stands at that moment, then any group and route
//! middleware. Nothing is composed per request.
//!
//! ```text
//! request ──► timeout ──► recovery ──► use_middleware(..) ──► group ──► route ──► handler
//!             (built-in, unless disabled)
//! ```

use std::fmt;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use bytes::Bytes;
use http::header::ALLOW;
use http::{HeaderValue, StatusCode};
use http_body_util::Full;
use tracing::{debug, error};

use crate::error::Error;
use crate::group::Group;
use crate::handler::{BoxedHandler, Handler};
use crate::logging::Logger;
use crate::method::Method;
use crate::middleware::{self, Middleware};
use crate::mux::{Lookup, Mux};
use crate::request::Request;
use crate::responder::{JsonResponder, Responder, SharedResponder};
use crate::response::{self, Recorder, ResponseWriter};

/// Per-request deadline applied by the built-in timeout middleware.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Construction-time router settings.
///
/// `responder` formats every error body the router and its built-in
/// middleware write: timeouts, recovered panics and handler errors.
///
/// ```rust
/// use std::time::Duration;
/// use vibe::{Router, RouterConfig};
///
/// let router = Router::with_config(
///     RouterConfig::default().timeout_duration(Duration::from_secs(5)),
/// );
/// ```
#[derive(Clone)]
pub struct RouterConfig {
    /// Install the panic-recovery middleware. On by default.
    pub recovery: bool,
    /// Install the timeout middleware. On by default.
    pub timeout: bool,
    /// Deadline for the timeout middleware. Ignored when `timeout` is off.
    pub timeout_duration: Duration,
    pub logger: Logger,
    pub responder: SharedResponder,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            recovery: true,
            timeout: true,
            timeout_duration: DEFAULT_TIMEOUT,
            logger: Logger::default(),
            responder: Arc::new(JsonResponder),
        }
    }
}

impl fmt::Debug for RouterConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RouterConfig")
            .field("recovery", &self.recovery)
            .field("timeout", &self.timeout)
            .field("timeout_duration", &self.timeout_duration)
            .field("logger", &self.logger)
            .finish_non_exhaustive()
    }
}

impl RouterConfig {
    pub fn without_recovery(mut self) -> Self {
        self.recovery = false;
        self
    }

    pub fn without_timeout(mut self) -> Self {
        self.timeout = false;
        self
    }

    pub fn timeout_duration(mut self, duration: Duration) -> Self {
        self.timeout_duration = duration;
        self
    }

    pub fn logger(mut self, logger: Logger) -> Self {
        self.logger = logger;
        self
    }

    pub fn responder(mut self, responder: impl Responder + 'static) -> Self {
        self.responder = Arc::new(responder);
        self
    }
}

/// Generates the per-method registration shorthands for [`Router`] and
/// [`Group`], each delegating to the type's own `on`/`on_with`.
macro_rules! method_shorthands {
    ($($name:ident, $name_with:ident => $method:ident $verb:literal;)*) => {$(
        #[doc = concat!("Registers a `", $verb, "` route.")]
        pub fn $name(&self, pattern: &str, handler: impl Handler) -> &Self {
            self.on(Method::$method, pattern, handler)
        }

        #[doc = concat!("Registers a `", $verb, "` route wrapped in `middleware`, first element outermost.")]
        pub fn $name_with(
            &self,
            pattern: &str,
            middleware: impl IntoIterator<Item = Middleware>,
            handler: impl Handler,
        ) -> &Self {
            self.on_with(Method::$method, pattern, middleware, handler)
        }
    )*};
}

pub(crate) use method_shorthands;

/// Cheap-to-clone handle to a routing table.
///
/// Clones share the same routes and global middleware; that is how
/// [`Group`]s register into their router. Registration takes `&self`, so
/// calls chain:
///
/// ```rust
/// use http::StatusCode;
/// use vibe::{json, Error, Request, ResponseWriter, Router};
///
/// async fn list(_req: Request, w: ResponseWriter) -> Result<(), Error> {
///     json::write(&w, StatusCode::OK, &serde_json::json!([]))
/// }
///
/// async fn show(req: Request, w: ResponseWriter) -> Result<(), Error> {
///     json::write(&w, StatusCode::OK, &serde_json::json!({ "id": req.param("id") }))
/// }
///
/// let router = Router::new();
/// router
///     .get("/todos", list)
///     .get("/todos/{id}", show);
/// ```
///
/// # Panics
///
/// Registering a pattern matchit rejects, or one that conflicts with an
/// existing pattern of the same method, panics. Registering the exact same
/// method and pattern twice replaces the first handler.
#[derive(Clone)]
pub struct Router {
    shared: Arc<Shared>,
}

struct Shared {
    mux: RwLock<Mux>,
    middleware: RwLock<Vec<Middleware>>,
    logger: Logger,
    responder: SharedResponder,
}

impl Router {
    /// A router with a 30 s timeout and panic recovery installed.
    pub fn new() -> Self {
        Self::with_config(RouterConfig::default())
    }

    pub fn with_config(config: RouterConfig) -> Self {
        let RouterConfig { recovery, timeout, timeout_duration, logger, responder } = config;

        // Recovery goes inside the timeout so it runs on the handler's own
        // task, and still sees panics from handlers that were abandoned.
        let mut global = Vec::new();
        if timeout {
            global.push(middleware::timeout_with(timeout_duration, logger.clone(), Arc::clone(&responder)));
        }
        if recovery {
            global.push(middleware::recovery_with(logger.clone(), Arc::clone(&responder)));
        }

        Self {
            shared: Arc::new(Shared {
                mux: RwLock::new(Mux::default()),
                middleware: RwLock::new(global),
                logger,
                responder,
            }),
        }
    }

    /// Appends to the global middleware list. Only routes registered after
    /// this call are wrapped.
    pub fn use_middleware(&self, mw: Middleware) -> &Self {
        self.middleware_mut().push(mw);
        self
    }

    /// Registers `handler` for `method` + `pattern`.
    ///
    /// Patterns use matchit syntax: `{name}` for a segment, `{*name}` for the
    /// rest of the path. Read them back with [`Request::param`].
    pub fn on(&self, method: Method, pattern: &str, handler: impl Handler) -> &Self {
        self.register(method, pattern, Vec::new(), handler.into_boxed_handler());
        self
    }

    /// Like [`on`](Self::on), with route middleware applied inside the global
    /// middleware.
    pub fn on_with(
        &self,
        method: Method,
        pattern: &str,
        middleware: impl IntoIterator<Item = Middleware>,
        handler: impl Handler,
    ) -> &Self {
        self.register(method, pattern, middleware.into_iter().collect(), handler.into_boxed_handler());
        self
    }

    method_shorthands! {
        get, get_with => Get "GET";
        post, post_with => Post "POST";
        put, put_with => Put "PUT";
        delete, delete_with => Delete "DELETE";
        patch, patch_with => Patch "PATCH";
        options, options_with => Options "OPTIONS";
        head, head_with => Head "HEAD";
    }

    /// Installs the handler for requests no route matches, wrapped in the
    /// global middleware as it stands now.
    pub fn not_found(&self, handler: impl Handler) -> &Self {
        let handler = middleware::chain(handler.into_boxed_handler(), &self.middleware());
        self.mux_mut().set_not_found(handler);
        self
    }

    pub fn group(&self, prefix: &str) -> Group {
        Group::new(self.clone(), prefix.to_owned(), Vec::new())
    }

    pub fn group_with(&self, prefix: &str, middleware: impl IntoIterator<Item = Middleware>) -> Group {
        Group::new(self.clone(), prefix.to_owned(), middleware.into_iter().collect())
    }

    /// Runs one request end to end and returns the recorded response.
    pub async fn dispatch(&self, req: http::Request<Bytes>) -> http::Response<Full<Bytes>> {
        let recorder = Recorder::new();
        self.serve(Request::new(req), recorder.writer()).await;
        recorder.finish()
    }

    /// Routes `req` and answers through `w`.
    pub async fn serve(&self, mut req: Request, w: ResponseWriter) {
        // The read guard must be gone before anything is awaited.
        let lookup = {
            let mux = self.mux();
            match Method::from_http(req.method()) {
                Some(method) => mux.lookup(method, req.path()),
                None => mux.miss(req.path()),
            }
        };

        match lookup {
            Lookup::Found(handler, params) => {
                req.set_params(params);
                self.run(handler, req, w).await;
            }
            Lookup::MethodNotAllowed(_) if *req.method() == http::Method::OPTIONS => {
                w.write_header(StatusCode::OK);
            }
            Lookup::MethodNotAllowed(allowed) => {
                let allow = allowed.iter().map(|m| m.as_str()).collect::<Vec<_>>().join(", ");
                if let Ok(value) = HeaderValue::from_str(&allow) {
                    w.set_header(ALLOW, value);
                }
                let res = response::text_error(&w, StatusCode::METHOD_NOT_ALLOWED, "Method Not Allowed");
                self.log_write_failure(res);
            }
            Lookup::NotFound(Some(handler)) => self.run(handler, req, w).await,
            Lookup::NotFound(None) => {
                let res = response::text_error(&w, StatusCode::NOT_FOUND, "404 page not found");
                self.log_write_failure(res);
            }
        }
    }

    /// Calls a composed chain and turns an `Err` into a response, unless the
    /// chain already committed one.
    async fn run(&self, handler: BoxedHandler, req: Request, w: ResponseWriter) {
        let method = req.method().clone();
        let path = req.path().to_owned();

        let Err(err) = handler.call(req, w.clone()).await else {
            return;
        };

        let logger = &self.shared.logger;
        if w.is_committed() {
            logger.scope(|| debug!(method = %method, path = %path, error = %err, "handler error after response was committed"));
            return;
        }

        logger.scope(|| error!(method = %method, path = %path, error = %err, "handler error"));
        if let Err(write_err) = self.shared.responder.error(&w, StatusCode::INTERNAL_SERVER_ERROR, &err.to_string()) {
            logger.scope(|| error!(method = %method, path = %path, error = %write_err, "failed to write error response"));
        }
    }

    fn register(&self, method: Method, pattern: &str, route: Vec<Middleware>, handler: BoxedHandler) {
        let mut layers = self.middleware().clone();
        layers.extend(route);
        let handler = middleware::chain(handler, &layers);
        self.mux_mut().insert(method, pattern, handler);
    }

    fn log_write_failure(&self, res: std::io::Result<()>) {
        if let Err(err) = res {
            self.shared.logger.scope(|| error!(error = %Error::Write(err), "failed to write response"));
        }
    }

    fn mux(&self) -> RwLockReadGuard<'_, Mux> {
        self.shared.mux.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn mux_mut(&self) -> RwLockWriteGuard<'_, Mux> {
        self.shared.mux.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn middleware(&self) -> RwLockReadGuard<'_, Vec<Middleware>> {
        self.shared.middleware.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn middleware_mut(&self) -> RwLockWriteGuard<'_, Vec<Middleware>> {
        self.shared.middleware.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for Router {
    fn default() -> Self { Self::new() }
}

impl fmt::Debug for Router {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Router")
            .field("global_middleware", &self.middleware().len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::json;
    use crate::response::test_support::body_of;

    fn get(path: &str) -> http::Request<Bytes> {
        http::Request::get(path).body(Bytes::new()).unwrap()
    }

    #[tokio::test]
    async fn error_after_commit_keeps_the_committed_response() {
        async fn half_done(_req: Request, w: ResponseWriter) -> Result<(), Error> {
            json::write(&w, StatusCode::ACCEPTED, &serde_json::json!({ "queued": true }))?;
            Err(Error::other("follow-up failed"))
        }

        let router = Router::with_config(RouterConfig::default().without_timeout());
        router.get("/jobs", half_done);

        let res = router.dispatch(get("/jobs")).await;
        assert_eq!(res.status(), StatusCode::ACCEPTED);
        assert_eq!(body_of(&res), r#"{"queued":true}"#);
    }

    #[tokio::test]
    async fn unknown_method_token_is_405() {
        async fn ok(_req: Request, w: ResponseWriter) -> Result<(), Error> {
            w.write_header(StatusCode::OK);
            Ok(())
        }

        let router = Router::new();
        router.get("/todos", ok);

        let req = http::Request::builder()
            .method(http::Method::from_bytes(b"PURGE").unwrap())
            .uri("/todos")
            .body(Bytes::new())
            .unwrap();
        let res = router.dispatch(req).await;
        assert_eq!(res.status(), StatusCode::METHOD_NOT_ALLOWED);
        assert_eq!(res.headers()[ALLOW], "GET, HEAD");
    }

    #[tokio::test]
    async fn middleware_added_later_skips_earlier_routes() {
        async fn ok(_req: Request, w: ResponseWriter) -> Result<(), Error> {
            w.write_header(StatusCode::OK);
            Ok(())
        }

        let router = Router::new();
        router.get("/before", ok);
        router.use_middleware(Middleware::from_fn(|req: Request, w: ResponseWriter, next: middleware::Next| {
            w.set_header(http::header::HeaderName::from_static("x-late"), HeaderValue::from_static("1"));
            next.run(req, w)
        }));
        router.get("/after", ok);

        assert!(router.dispatch(get("/before")).await.headers().get("x-late").is_none());
        assert_eq!(router.dispatch(get("/after")).await.headers()["x-late"], "1");
    }
}
