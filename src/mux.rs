//! Method + pattern multiplexer.
//!
//! One radix tree per method, courtesy of [`matchit`]. Pattern syntax and
//! matching rules are matchit's (`/users/{id}`, `/files/{*path}`); this module
//! only decides what a miss means: wrong method, or no route at all.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use matchit::Router as MatchitRouter;

use crate::handler::BoxedHandler;
use crate::method::Method;

pub(crate) enum Lookup {
    Found(BoxedHandler, HashMap<String, String>),
    /// The path exists, but only under these methods.
    MethodNotAllowed(Vec<Method>),
    NotFound(Option<BoxedHandler>),
}

#[derive(Default)]
struct Tree {
    router: MatchitRouter<BoxedHandler>,
    patterns: HashSet<String>,
}

#[derive(Default)]
pub(crate) struct Mux {
    routes: HashMap<Method, Tree>,
    not_found: Option<BoxedHandler>,
}

impl Mux {
    /// Binds `handler` to `method` + `pattern`. Re-binding the exact same pair
    /// replaces the earlier handler.
    ///
    /// # Panics
    ///
    /// Panics if matchit rejects the pattern or it conflicts with another
    /// pattern of the same method.
    pub(crate) fn insert(&mut self, method: Method, pattern: &str, handler: BoxedHandler) {
        let tree = self.routes.entry(method).or_default();
        if tree.patterns.contains(pattern) {
            tree.router.remove(pattern);
        }
        tree.router
            .insert(pattern, handler)
            .unwrap_or_else(|e| panic!("invalid route `{method} {pattern}`: {e}"));
        tree.patterns.insert(pattern.to_owned());
    }

    pub(crate) fn set_not_found(&mut self, handler: BoxedHandler) {
        self.not_found = Some(handler);
    }

    /// `HEAD` falls back to the `GET` route when no `HEAD` route matches.
    pub(crate) fn lookup(&self, method: Method, path: &str) -> Lookup {
        let found = self.find(method, path).or_else(|| match method {
            Method::Head => self.find(Method::Get, path),
            _ => None,
        });
        match found {
            Some((handler, params)) => Lookup::Found(handler, params),
            None => self.miss(path),
        }
    }

    /// Classifies a path for a method that can never be routed.
    pub(crate) fn miss(&self, path: &str) -> Lookup {
        let mut allowed: Vec<Method> = self.routes.iter()
            .filter(|(_, tree)| tree.router.at(path).is_ok())
            .map(|(method, _)| *method)
            .collect();

        if allowed.is_empty() {
            return Lookup::NotFound(self.not_found.clone());
        }
        if allowed.contains(&Method::Get) && !allowed.contains(&Method::Head) {
            allowed.push(Method::Head);
        }
        allowed.sort();
        Lookup::MethodNotAllowed(allowed)
    }

    fn find(&self, method: Method, path: &str) -> Option<(BoxedHandler, HashMap<String, String>)> {
        let tree = self.routes.get(&method)?;
        let matched = tree.router.at(path).ok()?;
        let handler = Arc::clone(matched.value);
        let params = matched.params.iter()
            .map(|(k, v)| (k.to_owned(), v.to_owned()))
            .collect();
        Some((handler, params))
    }
}
