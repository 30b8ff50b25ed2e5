//! # Param Matchers
//!
//! Named predicates that validate a dynamic path segment, referenced from route
//! ids as `[id=integer]`. Matchers are resolved once, while the route table is
//! built; a route that names an unknown matcher fails the build instead of
//! failing requests.
//!
//! ```rust
//! use kitrouter::matchers::ParamMatchers;
//!
//! let mut matchers = ParamMatchers::new();
//! matchers.register("even", |s| s.parse::<u64>().map(|n| n % 2 == 0).unwrap_or(false)).unwrap();
//! let even = matchers.resolve("even").unwrap();
//! assert!(even.test("42"));
//! assert!(!even.test("7"));
//! ```

use crate::error::ConfigError;
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

static MATCHER_NAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("valid matcher name regex"));

static UUID: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[0-9a-fA-F]{8}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{12}$")
        .expect("valid uuid regex")
});

static SLUG: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-z0-9]+(?:-[a-z0-9]+)*$").expect("valid slug regex"));

/// A resolved, shareable matcher predicate.
#[derive(Clone)]
pub struct ParamMatcher {
    name: Arc<str>,
    predicate: Arc<dyn Fn(&str) -> bool + Send + Sync>,
}

impl ParamMatcher {
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    #[must_use]
    pub fn test(&self, value: &str) -> bool {
        (self.predicate)(value)
    }
}

impl fmt::Debug for ParamMatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ParamMatcher").field("name", &self.name).finish()
    }
}

/// Registry of named matchers. Consumed by the route table builder.
#[derive(Clone, Default)]
pub struct ParamMatchers {
    matchers: HashMap<String, ParamMatcher>,
}

impl ParamMatchers {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with `integer`, `uuid` and `slug` already registered.
    #[must_use]
    pub fn with_builtins() -> Self {
        let mut m = Self::new();
        m.insert("integer", |s: &str| {
            let digits = s.strip_prefix('-').unwrap_or(s);
            !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit())
        });
        m.insert("uuid", |s: &str| UUID.is_match(s));
        m.insert("slug", |s: &str| SLUG.is_match(s));
        m
    }

    /// Register (or replace) a matcher.
    pub fn register<F>(&mut self, name: &str, predicate: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> bool + Send + Sync + 'static,
    {
        if !MATCHER_NAME.is_match(name) {
            return Err(ConfigError::InvalidMatcherName {
                name: name.to_string(),
            });
        }
        self.insert(name, predicate);
        Ok(())
    }

    fn insert<F>(&mut self, name: &str, predicate: F)
    where
        F: Fn(&str) -> bool + Send + Sync + 'static,
    {
        self.matchers.insert(
            name.to_string(),
            ParamMatcher {
                name: Arc::from(name),
                predicate: Arc::new(predicate),
            },
        );
    }

    /// Look up a matcher by name. `route` is only used for the error report.
    pub fn resolve_for(&self, route: &str, name: &str) -> Result<ParamMatcher, ConfigError> {
        self.matchers
            .get(name)
            .cloned()
            .ok_or_else(|| ConfigError::UnknownMatcher {
                route: route.to_string(),
                matcher: name.to_string(),
            })
    }

    pub fn resolve(&self, name: &str) -> Result<ParamMatcher, ConfigError> {
        self.resolve_for("<registry>", name)
    }

    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.matchers.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

impl fmt::Debug for ParamMatchers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ParamMatchers")
            .field("names", &self.names())
            .finish()
    }
}
