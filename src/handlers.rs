//! # Handler Registry
//!
//! Route descriptions name their load functions, endpoints and entry generators
//! by slot name (`"/blog/[slug]/+page.server"`, `"api.items"`). The registry maps
//! those names to Rust closures. The route table builder resolves every slot
//! against it once, so a request never performs a string lookup.
//!
//! ```rust
//! use http::Method;
//! use kitrouter::handlers::{EndpointMethods, Handlers};
//! use kitrouter::pipeline::{EndpointReply, LoadData};
//!
//! let mut handlers = Handlers::new();
//! handlers
//!     .load("/+layout.server", |_event| Ok(LoadData::new().with("user", "ada")))
//!     .endpoint(
//!         "/api/health/+server",
//!         EndpointMethods::new().on(Method::GET, |_event| Ok(EndpointReply::text("ok"))),
//!     );
//! assert!(handlers.has_load("/+layout.server"));
//! ```

use crate::pipeline::{EndpointEvent, EndpointReply, LoadData, LoadEvent, LoadSignal};
use http::Method;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

/// A layout or page load, server or universal.
pub type LoadFn = Arc<dyn Fn(&mut LoadEvent<'_>) -> Result<LoadData, LoadSignal> + Send + Sync>;

/// A `+server` handler for one HTTP method.
pub type EndpointFn =
    Arc<dyn Fn(&mut EndpointEvent<'_>) -> Result<EndpointReply, LoadSignal> + Send + Sync>;

/// Produces param sets to prerender for a dynamic route.
pub type EntriesFn = Arc<dyn Fn() -> Vec<BTreeMap<String, String>> + Send + Sync>;

/// Per-method handler table of an endpoint.
#[derive(Clone, Default)]
pub struct EndpointMethods {
    methods: HashMap<Method, EndpointFn>,
    fallback: Option<EndpointFn>,
}

impl EndpointMethods {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn on<F>(mut self, method: Method, handler: F) -> Self
    where
        F: Fn(&mut EndpointEvent<'_>) -> Result<EndpointReply, LoadSignal> + Send + Sync + 'static,
    {
        self.methods.insert(method, Arc::new(handler));
        self
    }

    /// Handler for every method without its own entry.
    #[must_use]
    pub fn fallback<F>(mut self, handler: F) -> Self
    where
        F: Fn(&mut EndpointEvent<'_>) -> Result<EndpointReply, LoadSignal> + Send + Sync + 'static,
    {
        self.fallback = Some(Arc::new(handler));
        self
    }

    /// Exact method first, then `HEAD` -> `GET`, then the fallback.
    #[must_use]
    pub fn handler_for(&self, method: &Method) -> Option<&EndpointFn> {
        self.methods
            .get(method)
            .or_else(|| {
                if *method == Method::HEAD {
                    self.methods.get(&Method::GET)
                } else {
                    None
                }
            })
            .or(self.fallback.as_ref())
    }

    #[must_use]
    pub fn has(&self, method: &Method) -> bool {
        self.methods.contains_key(method)
    }

    /// Methods for the `Allow` header, sorted. `HEAD` is implied by `GET`.
    #[must_use]
    pub fn allowed(&self) -> Vec<String> {
        let mut allowed: Vec<String> = self.methods.keys().map(|m| m.as_str().to_string()).collect();
        if self.methods.contains_key(&Method::GET) && !self.methods.contains_key(&Method::HEAD) {
            allowed.push(Method::HEAD.as_str().to_string());
        }
        allowed.sort_unstable();
        allowed
    }
}

impl fmt::Debug for EndpointMethods {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EndpointMethods")
            .field("methods", &self.allowed())
            .field("fallback", &self.fallback.is_some())
            .finish()
    }
}

/// Named handlers referenced from route descriptions.
#[derive(Clone, Default)]
pub struct Handlers {
    loads: HashMap<String, LoadFn>,
    endpoints: HashMap<String, EndpointMethods>,
    entries: HashMap<String, EntriesFn>,
}

impl Handlers {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a load function under a slot name.
    pub fn load<F>(&mut self, name: &str, f: F) -> &mut Self
    where
        F: Fn(&mut LoadEvent<'_>) -> Result<LoadData, LoadSignal> + Send + Sync + 'static,
    {
        self.loads.insert(name.to_string(), Arc::new(f));
        self
    }

    /// Register an endpoint method table under a slot name.
    pub fn endpoint(&mut self, name: &str, methods: EndpointMethods) -> &mut Self {
        self.endpoints.insert(name.to_string(), methods);
        self
    }

    /// Register a prerender entries generator.
    pub fn entries<F>(&mut self, name: &str, f: F) -> &mut Self
    where
        F: Fn() -> Vec<BTreeMap<String, String>> + Send + Sync + 'static,
    {
        self.entries.insert(name.to_string(), Arc::new(f));
        self
    }

    #[must_use]
    pub fn has_load(&self, name: &str) -> bool {
        self.loads.contains_key(name)
    }

    pub(crate) fn get_load(&self, name: &str) -> Option<LoadFn> {
        self.loads.get(name).cloned()
    }

    pub(crate) fn get_endpoint(&self, name: &str) -> Option<EndpointMethods> {
        self.endpoints.get(name).cloned()
    }

    pub(crate) fn get_entries(&self, name: &str) -> Option<EntriesFn> {
        self.entries.get(name).cloned()
    }
}

impl fmt::Debug for Handlers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut loads: Vec<&String> = self.loads.keys().collect();
        loads.sort();
        let mut endpoints: Vec<&String> = self.endpoints.keys().collect();
        endpoints.sort();
        f.debug_struct("Handlers")
            .field("loads", &loads)
            .field("endpoints", &endpoints)
            .field("entries", &self.entries.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ok(_: &mut EndpointEvent<'_>) -> Result<EndpointReply, LoadSignal> {
        Ok(EndpointReply::text("ok"))
    }

    #[test]
    fn test_head_falls_back_to_get() {
        let methods = EndpointMethods::new().on(Method::GET, ok);
        assert!(methods.handler_for(&Method::HEAD).is_some());
        assert!(methods.handler_for(&Method::POST).is_none());
        assert_eq!(methods.allowed(), vec!["GET", "HEAD"]);
    }

    #[test]
    fn test_fallback_answers_other_methods() {
        let methods = EndpointMethods::new().on(Method::POST, ok).fallback(ok);
        assert!(methods.handler_for(&Method::DELETE).is_some());
        assert_eq!(methods.allowed(), vec!["POST"]);
    }

    #[test]
    fn test_registry_lookup() {
        let mut handlers = Handlers::new();
        handlers.load("/+layout.server", |_| Ok(LoadData::new()));
        handlers.entries("/blog/[slug]/entries", Vec::new);
        assert!(handlers.get_load("/+layout.server").is_some());
        assert!(handlers.get_load("/+layout").is_none());
        assert!(handlers.get_entries("/blog/[slug]/entries").is_some());
        assert!(handlers.get_endpoint("/api/+server").is_none());
    }
}
