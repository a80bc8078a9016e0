//! Route groups: a path prefix plus middleware, registering into a router.

use crate::handler::Handler;
use crate::method::Method;
use crate::middleware::Middleware;
use crate::router::{method_shorthands, Router};

/// A prefix and a middleware list in front of a [`Router`].
///
/// Groups hold their prefix and middleware by value. Creating a sub-group
/// copies both, so middleware added to a parent afterwards never reaches
/// children created before:
///
/// ```rust
/// use vibe::{Error, Request, ResponseWriter, Router};
///
/// async fn list_users(_req: Request, _w: ResponseWriter) -> Result<(), Error> { Ok(()) }
///
/// let router = Router::new();
/// let api = router.group("/api");
/// let v1 = api.group("/v1");
/// v1.get("/users", list_users); // GET /api/v1/users
/// ```
#[derive(Clone, Debug)]
pub struct Group {
    router: Router,
    prefix: String,
    middleware: Vec<Middleware>,
}

impl Group {
    pub(crate) fn new(router: Router, prefix: String, middleware: Vec<Middleware>) -> Self {
        Self { router, prefix, middleware }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Adds middleware to this group's own routes registered from now on.
    pub fn use_middleware(&mut self, mw: Middleware) -> &mut Self {
        self.middleware.push(mw);
        self
    }

    pub fn group(&self, prefix: &str) -> Group {
        self.group_with(prefix, [])
    }

    /// A sub-group under `self.prefix + prefix`, running this group's
    /// middleware first and then `middleware`.
    pub fn group_with(&self, prefix: &str, middleware: impl IntoIterator<Item = Middleware>) -> Group {
        let mut layers = self.middleware.clone();
        layers.extend(middleware);
        Group::new(self.router.clone(), format!("{}{prefix}", self.prefix), layers)
    }

    pub fn on(&self, method: Method, pattern: &str, handler: impl Handler) -> &Self {
        self.on_with(method, pattern, [], handler)
    }

    /// Registers `self.prefix + pattern`, wrapped in the router's global
    /// middleware, then this group's, then `middleware`.
    pub fn on_with(
        &self,
        method: Method,
        pattern: &str,
        middleware: impl IntoIterator<Item = Middleware>,
        handler: impl Handler,
    ) -> &Self {
        let mut layers = self.middleware.clone();
        layers.extend(middleware);
        self.router.on_with(method, &format!("{}{pattern}", self.prefix), layers, handler);
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
}
