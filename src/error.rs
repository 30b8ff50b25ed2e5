//! Error taxonomy shared by the route table, pipeline, fetch and prerender layers.
//!
//! Build-time problems are [`ConfigError`]s and are always fatal. Everything that
//! can happen while answering a request is recoverable into a response: the
//! pipeline carries an [`HttpError`] (status + message + optional structured
//! data) to the response builder, which picks the nearest error boundary.

use serde_json::{json, Map, Value};
use std::fmt;
use std::io;
use std::path::PathBuf;

/// Which handler slot a route node refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotKind {
    Layout,
    LayoutServer,
    Page,
    PageServer,
    Endpoint,
    Error,
    Template,
    Entries,
}

impl fmt::Display for SlotKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SlotKind::Layout => "layout load",
            SlotKind::LayoutServer => "layout server load",
            SlotKind::Page => "page load",
            SlotKind::PageServer => "page server load",
            SlotKind::Endpoint => "endpoint",
            SlotKind::Error => "error template",
            SlotKind::Template => "template",
            SlotKind::Entries => "entries generator",
        };
        f.write_str(s)
    }
}

/// A route table could not be built. Reported at build time, never per request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// A segment of a route id could not be parsed
    InvalidPattern {
        route: String,
        segment: String,
        reason: String,
    },
    /// `[...rest]` followed by further segments, or more than one rest segment
    RestNotTerminal { route: String },
    /// The same parameter name appears twice in one route
    DuplicateParam { route: String, name: String },
    /// Two routes match exactly the same set of paths
    Conflict { first: String, second: String },
    /// The same route id was declared twice
    DuplicateNode { route: String },
    /// A `[name=matcher]` segment names a matcher that was never registered
    UnknownMatcher { route: String, matcher: String },
    /// Matcher names must be identifiers
    InvalidMatcherName { name: String },
    /// A slot names a handler or template that is not registered
    UnknownSlot {
        route: String,
        kind: SlotKind,
        slot: String,
    },
    /// A node declares nothing at all
    EmptyNode { route: String },
    /// The route description file itself is unreadable or malformed
    InvalidDescription { source: String, message: String },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::InvalidPattern {
                route,
                segment,
                reason,
            } => write!(f, "invalid segment '{segment}' in route '{route}': {reason}"),
            ConfigError::RestNotTerminal { route } => write!(
                f,
                "route '{route}': a rest segment must be the last segment and may appear only once"
            ),
            ConfigError::DuplicateParam { route, name } => {
                write!(f, "route '{route}' declares parameter '{name}' more than once")
            }
            ConfigError::Conflict { first, second } => write!(
                f,
                "the '{first}' and '{second}' routes conflict with each other"
            ),
            ConfigError::DuplicateNode { route } => {
                write!(f, "route '{route}' is declared more than once")
            }
            ConfigError::UnknownMatcher { route, matcher } => write!(
                f,
                "route '{route}' references undefined param matcher '{matcher}'"
            ),
            ConfigError::InvalidMatcherName { name } => write!(
                f,
                "param matcher name '{name}' must match [A-Za-z_][A-Za-z0-9_]*"
            ),
            ConfigError::UnknownSlot { route, kind, slot } => {
                write!(f, "route '{route}' references unregistered {kind} '{slot}'")
            }
            ConfigError::EmptyNode { route } => write!(
                f,
                "route node '{route}' declares no page, endpoint, layout or error boundary"
            ),
            ConfigError::InvalidDescription { source, message } => {
                write!(f, "invalid route description {source}: {message}")
            }
        }
    }
}

impl std::error::Error for ConfigError {}

/// Every configuration problem found while building a route table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigErrors(pub Vec<ConfigError>);

impl ConfigErrors {
    #[must_use]
    pub fn errors(&self) -> &[ConfigError] {
        &self.0
    }
}

impl From<ConfigError> for ConfigErrors {
    fn from(err: ConfigError) -> Self {
        Self(vec![err])
    }
}

impl fmt::Display for ConfigErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "route table build failed with {} error(s):", self.0.len())?;
        for err in &self.0 {
            writeln!(f, "  - {err}")?;
        }
        Ok(())
    }
}

impl std::error::Error for ConfigErrors {}

/// An error carried from a load function or endpoint to the response builder.
#[derive(Debug, Clone, PartialEq)]
pub struct HttpError {
    /// HTTP status to answer with (4xx/5xx)
    pub status: u16,
    /// Human readable message
    pub message: String,
    /// Optional structured data rendered next to the message
    pub extra: Option<Map<String, Value>>,
    /// `false` for failures nobody raised on purpose (panics, `anyhow` errors).
    /// Their message is hidden from clients outside dev mode.
    pub expected: bool,
}

impl HttpError {
    #[must_use]
    pub fn new(status: u16, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            extra: None,
            expected: true,
        }
    }

    #[must_use]
    pub fn with_extra(mut self, extra: Map<String, Value>) -> Self {
        self.extra = Some(extra);
        self
    }

    #[must_use]
    pub fn not_found(path: &str) -> Self {
        Self::new(404, format!("Not found: {path}"))
    }

    #[must_use]
    pub fn method_not_allowed(method: &str) -> Self {
        Self::new(405, format!("{method} method not allowed"))
    }

    /// An unexpected failure. The message is kept for logs and dev diagnostics.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self {
            status: 500,
            message: message.into(),
            extra: None,
            expected: false,
        }
    }

    /// Message safe to show to a client
    #[must_use]
    pub fn public_message(&self, dev: bool) -> &str {
        if self.expected || dev {
            &self.message
        } else {
            "Internal Error"
        }
    }

    /// JSON shape used in data responses and passed to error templates
    #[must_use]
    pub fn to_json(&self, dev: bool) -> Value {
        let mut body = Map::new();
        body.insert("message".into(), json!(self.public_message(dev)));
        if let Some(extra) = &self.extra {
            for (k, v) in extra {
                if k != "message" {
                    body.insert(k.clone(), v.clone());
                }
            }
        }
        Value::Object(body)
    }
}

impl fmt::Display for HttpError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.status, self.message)
    }
}

impl std::error::Error for HttpError {}

/// Data returned from a load function that cannot cross into rendering.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SerializationError {
    /// Route node id of the level that produced the value
    pub node: String,
    /// Key in the returned data
    pub key: String,
    pub reason: String,
}

impl fmt::Display for SerializationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "data returned from load in '{}' is not serializable: key '{}' ({})",
            self.node, self.key, self.reason
        )
    }
}

impl std::error::Error for SerializationError {}

/// Failure of `fetch` issued from a load function or endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    /// Internal fetches nested deeper than `fetch.max_depth`
    DepthExceeded { url: String, depth: usize },
    /// The originating request was aborted
    Aborted { url: String },
    InvalidUrl { url: String, reason: String },
    /// External fetch failed at the transport level
    External { url: String, reason: String },
}

impl fmt::Display for FetchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FetchError::DepthExceeded { url, depth } => write!(
                f,
                "fetch of '{url}' exceeded the maximum internal fetch depth ({depth})"
            ),
            FetchError::Aborted { url } => write!(f, "fetch of '{url}' aborted"),
            FetchError::InvalidUrl { url, reason } => write!(f, "invalid fetch url '{url}': {reason}"),
            FetchError::External { url, reason } => write!(f, "fetch of '{url}' failed: {reason}"),
        }
    }
}

impl std::error::Error for FetchError {}

/// Prerendering failed as a whole.
#[derive(Debug)]
pub enum PrerenderError {
    /// Strict mode and at least one warning was recorded
    Strict { warnings: Vec<String> },
    /// A page answered with a 5xx or an error status while rendering
    Page { path: String, status: u16, message: String },
    /// Writing an output file failed
    Write { path: PathBuf, source: io::Error },
    /// `prerender.origin` is not an absolute URL
    InvalidOrigin { origin: String, reason: String },
    /// No worker coroutine could be started
    Spawn(io::Error),
}

impl fmt::Display for PrerenderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PrerenderError::Strict { warnings } => {
                writeln!(f, "prerendering failed in strict mode:")?;
                for w in warnings {
                    writeln!(f, "  - {w}")?;
                }
                Ok(())
            }
            PrerenderError::Page {
                path,
                status,
                message,
            } => write!(f, "{status} while prerendering {path}: {message}"),
            PrerenderError::Write { path, source } => {
                write!(f, "could not write {}: {source}", path.display())
            }
            PrerenderError::InvalidOrigin { origin, reason } => {
                write!(f, "invalid prerender origin '{origin}': {reason}")
            }
            PrerenderError::Spawn(e) => write!(f, "could not start prerender workers: {e}"),
        }
    }
}

impl std::error::Error for PrerenderError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            PrerenderError::Write { source, .. } | PrerenderError::Spawn(source) => Some(source),
            _ => None,
        }
    }
}
