//! Cross-origin resource sharing.

use std::sync::Arc;

use http::header::{
    ACCESS_CONTROL_ALLOW_CREDENTIALS, ACCESS_CONTROL_ALLOW_HEADERS, ACCESS_CONTROL_ALLOW_METHODS,
    ACCESS_CONTROL_ALLOW_ORIGIN, ACCESS_CONTROL_MAX_AGE,
};
use http::{HeaderValue, StatusCode};
use serde::Deserialize;

use crate::error::Error;
use crate::handler::{BoxFuture, BoxedHandler, ErasedHandler};
use crate::method::Method;
use crate::middleware::Middleware;
use crate::request::Request;
use crate::response::ResponseWriter;

/// One day, in seconds.
pub const DEFAULT_MAX_AGE: u64 = 86_400;

/// CORS settings. Defaults allow any origin for the common REST verbs.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct CorsConfig {
    pub allow_origin: String,
    pub allow_methods: String,
    pub allow_headers: String,
    pub allow_credentials: bool,
    /// Seconds a preflight may be cached. `0` omits the header.
    pub max_age: u64,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            allow_origin: "*".to_owned(),
            allow_methods: "GET, POST, PUT, DELETE, OPTIONS".to_owned(),
            allow_headers: "Content-Type, Authorization".to_owned(),
            allow_credentials: false,
            max_age: DEFAULT_MAX_AGE,
        }
    }
}

impl CorsConfig {
    pub fn allow_origin(mut self, origin: impl Into<String>) -> Self {
        self.allow_origin = origin.into();
        self
    }

    pub fn allow_methods(mut self, methods: impl Into<String>) -> Self {
        self.allow_methods = methods.into();
        self
    }

    pub fn allow_headers(mut self, headers: impl Into<String>) -> Self {
        self.allow_headers = headers.into();
        self
    }

    pub fn allow_credentials(mut self, allow: bool) -> Self {
        self.allow_credentials = allow;
        self
    }

    pub fn max_age(mut self, seconds: u64) -> Self {
        self.max_age = seconds;
        self
    }
}

/// Header values, validated once when the middleware is built.
struct Headers {
    origin: HeaderValue,
    methods: HeaderValue,
    headers: HeaderValue,
    credentials: bool,
    max_age: Option<HeaderValue>,
}

/// Sets CORS headers on every response and answers `OPTIONS` with a bare
/// `200` without calling inward.
///
/// Middleware only runs for a matched route. An `OPTIONS` request to a path
/// that has routes for other methods only is answered by the router with a
/// bare `200` and no CORS headers, so browser preflights need an `OPTIONS`
/// route on each such path (its handler is never reached):
///
/// ```rust
/// use vibe::middleware::{cors, CorsConfig};
/// use vibe::{Error, Request, ResponseWriter, Router};
///
/// async fn create(_req: Request, _w: ResponseWriter) -> Result<(), Error> { Ok(()) }
/// async fn preflight(_req: Request, _w: ResponseWriter) -> Result<(), Error> { Ok(()) }
///
/// # fn main() -> Result<(), Error> {
/// let router = Router::new();
/// router.use_middleware(cors(CorsConfig::default())?);
/// router.post("/todos", create).options("/todos", preflight);
/// # Ok(())
/// # }
/// ```
///
/// Fails if a configured value is not a valid header value.
pub fn cors(config: CorsConfig) -> Result<Middleware, Error> {
    let headers = Arc::new(Headers {
        origin: HeaderValue::from_str(&config.allow_origin)?,
        methods: HeaderValue::from_str(&config.allow_methods)?,
        headers: HeaderValue::from_str(&config.allow_headers)?,
        credentials: config.allow_credentials,
        max_age: (config.max_age > 0).then(|| HeaderValue::from(config.max_age)),
    });

    Ok(Middleware::new(move |next| Arc::new(Cors { next, headers: Arc::clone(&headers) })))
}

struct Cors {
    next: BoxedHandler,
    headers: Arc<Headers>,
}

impl ErasedHandler for Cors {
    fn call(&self, req: Request, w: ResponseWriter) -> BoxFuture {
        let h = &self.headers;
        w.set_header(ACCESS_CONTROL_ALLOW_ORIGIN, h.origin.clone());
        w.set_header(ACCESS_CONTROL_ALLOW_METHODS, h.methods.clone());
        w.set_header(ACCESS_CONTROL_ALLOW_HEADERS, h.headers.clone());
        if h.credentials {
            w.set_header(ACCESS_CONTROL_ALLOW_CREDENTIALS, HeaderValue::from_static("true"));
        }
        if let Some(max_age) = &h.max_age {
            w.set_header(ACCESS_CONTROL_MAX_AGE, max_age.clone());
        }

        if Method::from_http(req.method()).is_some_and(Method::is_preflight) {
            w.write_header(StatusCode::OK);
            return Box::pin(async { Ok(()) });
        }
        self.next.call(req, w)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};

    use bytes::Bytes;

    use super::*;
    use crate::handler::Handler;
    use crate::middleware::chain;
    use crate::response::test_support::body_of;
    use crate::response::Recorder;

    async fn ok(_req: Request, w: ResponseWriter) -> Result<(), Error> {
        crate::json::write(&w, StatusCode::OK, &serde_json::json!({ "ok": true }))
    }

    fn request(method: http::Method) -> Request {
        Request::new(http::Request::builder().method(method).uri("/todos").body(Bytes::new()).unwrap())
    }

    #[tokio::test]
    async fn defaults_are_applied() {
        let handler = chain(ok.into_boxed_handler(), &[cors(CorsConfig::default()).unwrap()]);
        let rec = Recorder::new();
        handler.call(request(http::Method::GET), rec.writer()).await.unwrap();

        let res = rec.finish();
        let headers = res.headers();
        assert_eq!(headers[ACCESS_CONTROL_ALLOW_ORIGIN], "*");
        assert_eq!(headers[ACCESS_CONTROL_ALLOW_METHODS], "GET, POST, PUT, DELETE, OPTIONS");
        assert_eq!(headers[ACCESS_CONTROL_ALLOW_HEADERS], "Content-Type, Authorization");
        assert_eq!(headers[ACCESS_CONTROL_MAX_AGE], "86400");
        assert!(headers.get(ACCESS_CONTROL_ALLOW_CREDENTIALS).is_none());
        assert_eq!(body_of(&res), r#"{"ok":true}"#);
    }

    #[tokio::test]
    async fn preflight_short_circuits() {
        let called = Arc::new(AtomicBool::new(false));
        let handler = {
            let called = Arc::clone(&called);
            move |_req: Request, _w: ResponseWriter| {
                called.store(true, Ordering::SeqCst);
                async { Ok::<(), Error>(()) }
            }
        };

        let config = CorsConfig::default()
            .allow_origin("https://example.com")
            .allow_credentials(true)
            .max_age(0);
        let handler = chain(handler.into_boxed_handler(), &[cors(config).unwrap()]);
        let rec = Recorder::new();
        handler.call(request(http::Method::OPTIONS), rec.writer()).await.unwrap();

        let res = rec.finish();
        assert_eq!(res.status(), StatusCode::OK);
        assert_eq!(res.headers()[ACCESS_CONTROL_ALLOW_ORIGIN], "https://example.com");
        assert_eq!(res.headers()[ACCESS_CONTROL_ALLOW_CREDENTIALS], "true");
        assert!(res.headers().get(ACCESS_CONTROL_MAX_AGE).is_none());
        assert!(body_of(&res).is_empty());
        assert!(!called.load(Ordering::SeqCst));
    }

    #[test]
    fn invalid_values_are_rejected_up_front() {
        let config = CorsConfig::default().allow_origin("bad\nvalue");
        assert!(matches!(cors(config), Err(Error::Header(_))));
    }

    #[test]
    fn config_deserializes_with_defaults() {
        let config: CorsConfig = serde_json::from_str(r#"{"allow_origin":"https://app.test"}"#).unwrap();
        assert_eq!(config.allow_origin, "https://app.test");
        assert_eq!(config.max_age, DEFAULT_MAX_AGE);
    }
}
