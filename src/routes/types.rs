use crate::handlers::{EndpointMethods, EntriesFn, LoadFn};
use crate::matchers::ParamMatcher;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use smallvec::SmallVec;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

/// Maximum number of route params before heap allocation.
pub const MAX_INLINE_PARAMS: usize = 8;

/// Route params in pattern order. Names come from the frozen route table.
pub type ParamVec = SmallVec<[(Arc<str>, String); MAX_INLINE_PARAMS]>;

/// One segment of a route pattern.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SegmentSpec {
    /// Must equal the (decoded) request segment exactly
    Literal(String),
    /// Dynamic segment
    Param(ParamSpec),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ParamSpec {
    pub name: String,
    /// Matcher name from `[name=matcher]`
    pub matcher: Option<String>,
    /// `[[name]]`
    pub optional: bool,
    /// `[...name]`
    pub rest: bool,
}

impl SegmentSpec {
    /// Specificity of a single segment. Higher wins.
    ///
    /// literal > matched param > param > optional (matched first) > rest (matched first),
    /// required rest before optional rest.
    #[must_use]
    pub fn rank(&self) -> u8 {
        match self {
            SegmentSpec::Literal(_) => 9,
            SegmentSpec::Param(p) => {
                let matched = u8::from(p.matcher.is_some());
                match (p.rest, p.optional) {
                    (false, false) => 7 + matched,
                    (false, true) => 5 + matched,
                    (true, false) => 3 + matched,
                    (true, true) => 1 + matched,
                }
            }
        }
    }

    #[must_use]
    pub fn param(&self) -> Option<&ParamSpec> {
        match self {
            SegmentSpec::Param(p) => Some(p),
            SegmentSpec::Literal(_) => None,
        }
    }
}

impl fmt::Display for SegmentSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SegmentSpec::Literal(s) => f.write_str(s),
            SegmentSpec::Param(p) => {
                let dots = if p.rest { "..." } else { "" };
                let matcher = p
                    .matcher
                    .as_deref()
                    .map(|m| format!("={m}"))
                    .unwrap_or_default();
                if p.optional {
                    write!(f, "[[{dots}{}{matcher}]]", p.name)
                } else {
                    write!(f, "[{dots}{}{matcher}]", p.name)
                }
            }
        }
    }
}

/// Whether a route is rendered at build time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Prerender {
    /// Never prerendered
    #[default]
    Off,
    /// Prerendered; dynamic serving is not expected
    On,
    /// Prerendered when reachable, but still served dynamically
    Auto,
}

impl Prerender {
    #[must_use]
    pub fn enabled(self) -> bool {
        !matches!(self, Prerender::Off)
    }
}

impl<'de> Deserialize<'de> for Prerender {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Flag(bool),
            Word(String),
        }
        match Raw::deserialize(deserializer)? {
            Raw::Flag(true) => Ok(Prerender::On),
            Raw::Flag(false) => Ok(Prerender::Off),
            Raw::Word(w) => match w.to_ascii_lowercase().as_str() {
                "auto" => Ok(Prerender::Auto),
                "true" | "on" => Ok(Prerender::On),
                "false" | "off" => Ok(Prerender::Off),
                other => Err(serde::de::Error::custom(format!(
                    "prerender must be true, false or \"auto\", got \"{other}\""
                ))),
            },
        }
    }
}

/// Canonical form of a route's URL with respect to a trailing slash.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrailingSlash {
    /// `/about/` is redirected to `/about`
    Never,
    /// `/about` is redirected to `/about/`
    Always,
    /// Both forms are served
    #[default]
    Ignore,
}

/// Options declared on a route node. Unset fields inherit from ancestor nodes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct NodeOptions {
    pub prerender: Option<Prerender>,
    pub ssr: Option<bool>,
    pub csr: Option<bool>,
    pub trailing_slash: Option<TrailingSlash>,
    /// Enumerated param sets to prerender for a dynamic route
    pub entries: Vec<BTreeMap<String, String>>,
    /// Name of an entries generator registered in the handler registry
    pub entries_fn: Option<String>,
    /// Opaque adapter configuration, merged shallowly down the tree
    pub config: Option<Value>,
}

/// Effective options of a route after cascading.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RouteOptions {
    pub prerender: Prerender,
    pub ssr: bool,
    pub csr: bool,
    pub trailing_slash: TrailingSlash,
    pub entries: Vec<BTreeMap<String, String>>,
    pub config: Option<Value>,
}

impl Default for RouteOptions {
    fn default() -> Self {
        Self {
            prerender: Prerender::Off,
            ssr: true,
            csr: true,
            trailing_slash: TrailingSlash::Ignore,
            entries: Vec::new(),
            config: None,
        }
    }
}

impl RouteOptions {
    /// Apply a node's options on top of the inherited ones.
    pub(crate) fn apply(&mut self, node: &NodeOptions) {
        if let Some(p) = node.prerender {
            self.prerender = p;
        }
        if let Some(ssr) = node.ssr {
            self.ssr = ssr;
        }
        if let Some(csr) = node.csr {
            self.csr = csr;
        }
        if let Some(ts) = node.trailing_slash {
            self.trailing_slash = ts;
        }
        if let Some(cfg) = &node.config {
            self.config = Some(match (self.config.take(), cfg) {
                (Some(Value::Object(mut base)), Value::Object(over)) => {
                    for (k, v) in over {
                        base.insert(k.clone(), v.clone());
                    }
                    Value::Object(base)
                }
                (_, over) => over.clone(),
            });
        }
    }
}

/// Slot names for a layout or page level.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LevelSlots {
    /// Template rendered for this level
    pub template: Option<String>,
    /// Universal load, runs after the server load of the same level
    pub load: Option<String>,
    /// Server-only load
    pub server_load: Option<String>,
}

impl LevelSlots {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.template.is_none() && self.load.is_none() && self.server_load.is_none()
    }
}

/// One entry of a route description: a directory-like node of the route tree.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RouteNode {
    /// Route id, e.g. `/blog/(public)/[slug=slug]`
    pub id: String,
    pub layout: Option<LevelSlots>,
    pub page: Option<LevelSlots>,
    /// Endpoint handler table name
    pub endpoint: Option<String>,
    /// Error boundary template name
    pub error: Option<String>,
    pub options: NodeOptions,
}

impl RouteNode {
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn layout(mut self, slots: LevelSlots) -> Self {
        self.layout = Some(slots);
        self
    }

    #[must_use]
    pub fn page(mut self, slots: LevelSlots) -> Self {
        self.page = Some(slots);
        self
    }

    #[must_use]
    pub fn endpoint(mut self, name: impl Into<String>) -> Self {
        self.endpoint = Some(name.into());
        self
    }

    #[must_use]
    pub fn error(mut self, template: impl Into<String>) -> Self {
        self.error = Some(template.into());
        self
    }

    #[must_use]
    pub fn options(mut self, options: NodeOptions) -> Self {
        self.options = options;
        self
    }
}

/// A layout or page level with its resolved load functions.
#[derive(Clone)]
pub struct Level {
    /// Id of the node this level belongs to
    pub node_id: Arc<str>,
    /// Raw segment count of `node_id` (groups included)
    pub depth: usize,
    pub template: Option<String>,
    pub server_load: Option<LoadFn>,
    pub load: Option<LoadFn>,
}

impl Level {
    #[must_use]
    pub fn has_server_load(&self) -> bool {
        self.server_load.is_some()
    }
}

impl fmt::Debug for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Level")
            .field("node_id", &self.node_id)
            .field("depth", &self.depth)
            .field("template", &self.template)
            .field("server_load", &self.server_load.is_some())
            .field("load", &self.load.is_some())
            .finish()
    }
}

/// An `+error` template in scope for a route.
#[derive(Debug, Clone)]
pub struct ErrorBoundary {
    pub node_id: Arc<str>,
    pub depth: usize,
    pub template: String,
}

/// A compiled route. Immutable once the table is built.
pub struct RouteDefinition {
    /// Route id as declared (groups included)
    pub id: Arc<str>,
    /// URL pattern segments (groups removed)
    pub pattern: Vec<SegmentSpec>,
    /// Declaration order, used to break specificity ties
    pub order: usize,
    /// Raw segment count of the route id (groups included)
    pub depth: usize,
    /// Layout levels, outer to inner
    pub layouts: Vec<Level>,
    /// Page level, when the route renders a page
    pub page: Option<Level>,
    /// Endpoint method table, when the route has a `+server`
    pub endpoint: Option<EndpointMethods>,
    /// Error boundaries in scope, outer to inner
    pub errors: Vec<ErrorBoundary>,
    pub options: RouteOptions,
    pub(crate) entries_fn: Option<EntriesFn>,
    pub(crate) matchers: HashMap<String, ParamMatcher>,
    /// Param names in pattern order, shared with every match
    pub(crate) param_names: Vec<Arc<str>>,
}

impl RouteDefinition {
    /// Specificity vector compared lexicographically
    #[must_use]
    pub fn rank(&self) -> Vec<u8> {
        self.pattern.iter().map(SegmentSpec::rank).collect()
    }

    #[must_use]
    pub fn params(&self) -> impl Iterator<Item = &ParamSpec> {
        self.pattern.iter().filter_map(SegmentSpec::param)
    }

    /// True when every dynamic segment may be absent (or there are none)
    #[must_use]
    pub fn has_required_params(&self) -> bool {
        self.params().any(|p| !p.optional)
    }

    #[must_use]
    pub fn is_page(&self) -> bool {
        self.page.is_some()
    }

    #[must_use]
    pub fn is_endpoint(&self) -> bool {
        self.endpoint.is_some()
    }

    /// True when any level of the page chain has a server load.
    #[must_use]
    pub fn has_server_data(&self) -> bool {
        self.layouts.iter().any(Level::has_server_load)
            || self.page.as_ref().is_some_and(Level::has_server_load)
    }

    /// The URL pattern as text, e.g. `/blog/[slug]`
    #[must_use]
    pub fn pattern_string(&self) -> String {
        if self.pattern.is_empty() {
            return "/".to_string();
        }
        let mut out = String::new();
        for seg in &self.pattern {
            out.push('/');
            out.push_str(&seg.to_string());
        }
        out
    }

    /// Matcher names used by this route
    #[must_use]
    pub fn matcher_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.params().filter_map(|p| p.matcher.as_deref()).collect();
        names.sort_unstable();
        names.dedup();
        names
    }

    /// Entries to prerender: enumerated entries plus the generator output.
    #[must_use]
    pub fn prerender_entries(&self) -> Vec<BTreeMap<String, String>> {
        let mut entries = self.options.entries.clone();
        if let Some(generate) = &self.entries_fn {
            entries.extend(generate());
        }
        entries
    }

    /// Substitute params back into the pattern.
    ///
    /// Produces the canonical path: no trailing slash unless the route asks for
    /// one, each param value percent-encoded, rest values encoded per piece.
    pub fn resolve<'a, I>(&self, params: I) -> Result<String, ResolveError>
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let values: HashMap<&str, &str> = params.into_iter().collect();
        let mut out = String::new();
        for seg in &self.pattern {
            match seg {
                SegmentSpec::Literal(lit) => {
                    out.push('/');
                    out.push_str(&urlencoding::encode(lit));
                }
                SegmentSpec::Param(p) => {
                    let value = values.get(p.name.as_str()).copied().unwrap_or("");
                    if value.is_empty() {
                        if p.optional {
                            continue;
                        }
                        return Err(ResolveError::MissingParam {
                            route: self.id.to_string(),
                            name: p.name.clone(),
                        });
                    }
                    if let Some(m) = self.matchers.get(&p.name) {
                        if !m.test(value) {
                            return Err(ResolveError::RejectedByMatcher {
                                route: self.id.to_string(),
                                name: p.name.clone(),
                                value: value.to_string(),
                            });
                        }
                    }
                    if p.rest {
                        for piece in value.split('/') {
                            out.push('/');
                            out.push_str(&urlencoding::encode(piece));
                        }
                    } else {
                        out.push('/');
                        out.push_str(&urlencoding::encode(value));
                    }
                }
            }
        }
        if out.is_empty() {
            out.push('/');
        } else if self.options.trailing_slash == TrailingSlash::Always {
            out.push('/');
        }
        Ok(out)
    }
}

impl fmt::Debug for RouteDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RouteDefinition")
            .field("id", &self.id)
            .field("pattern", &self.pattern_string())
            .field("order", &self.order)
            .field("layouts", &self.layouts)
            .field("page", &self.page)
            .field("endpoint", &self.endpoint.as_ref().map(EndpointMethods::allowed))
            .field("errors", &self.errors)
            .field("options", &self.options)
            .finish()
    }
}

/// Params could not be substituted into a route pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolveError {
    MissingParam { route: String, name: String },
    RejectedByMatcher {
        route: String,
        name: String,
        value: String,
    },
}

impl fmt::Display for ResolveError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResolveError::MissingParam { route, name } => {
                write!(f, "missing parameter '{name}' for route '{route}'")
            }
            ResolveError::RejectedByMatcher { route, name, value } => write!(
                f,
                "value '{value}' for parameter '{name}' of route '{route}' is rejected by its matcher"
            ),
        }
    }
}

impl std::error::Error for ResolveError {}

/// A route selected for a request, with its decoded params.
#[derive(Debug, Clone)]
pub struct MatchedRoute {
    pub route: Arc<RouteDefinition>,
    pub params: ParamVec,
}

impl MatchedRoute {
    /// Last write wins when the same name appears twice.
    #[inline]
    #[must_use]
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params
            .iter()
            .rfind(|(k, _)| k.as_ref() == name)
            .map(|(_, v)| v.as_str())
    }

    #[must_use]
    pub fn params_map(&self) -> BTreeMap<String, String> {
        self.params
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn param(name: &str, matcher: Option<&str>, optional: bool, rest: bool) -> SegmentSpec {
        SegmentSpec::Param(ParamSpec {
            name: name.into(),
            matcher: matcher.map(Into::into),
            optional,
            rest,
        })
    }

    #[test]
    fn test_rank_order() {
        let ranks = [
            SegmentSpec::Literal("a".into()).rank(),
            param("a", Some("m"), false, false).rank(),
            param("a", None, false, false).rank(),
            param("a", Some("m"), true, false).rank(),
            param("a", None, true, false).rank(),
            param("a", Some("m"), false, true).rank(),
            param("a", None, false, true).rank(),
            param("a", None, true, true).rank(),
        ];
        assert!(ranks.windows(2).all(|w| w[0] > w[1]), "{ranks:?}");
    }

    #[test]
    fn test_segment_display() {
        assert_eq!(param("slug", None, false, false).to_string(), "[slug]");
        assert_eq!(param("id", Some("integer"), true, false).to_string(), "[[id=integer]]");
        assert_eq!(param("path", None, false, true).to_string(), "[...path]");
    }

    #[test]
    fn test_prerender_accepts_bool_and_auto() {
        let on: Prerender = serde_json::from_str("true").unwrap();
        let auto: Prerender = serde_json::from_str("\"auto\"").unwrap();
        let off: Prerender = serde_json::from_str("false").unwrap();
        assert_eq!((on, auto, off), (Prerender::On, Prerender::Auto, Prerender::Off));
        assert!(serde_json::from_str::<Prerender>("\"sometimes\"").is_err());
    }

    #[test]
    fn test_options_cascade_and_config_merge() {
        let mut opts = RouteOptions::default();
        opts.apply(&NodeOptions {
            prerender: Some(Prerender::On),
            config: Some(serde_json::json!({"runtime": "edge", "regions": ["fra1"]})),
            ..NodeOptions::default()
        });
        opts.apply(&NodeOptions {
            ssr: Some(false),
            config: Some(serde_json::json!({"runtime": "serverless"})),
            ..NodeOptions::default()
        });
        assert_eq!(opts.prerender, Prerender::On);
        assert!(!opts.ssr);
        assert_eq!(
            opts.config,
            Some(serde_json::json!({"runtime": "serverless", "regions": ["fra1"]}))
        );
    }
}
