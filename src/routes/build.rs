use super::pattern::{parse_route_id, ParsedId};
use super::types::{
    ErrorBoundary, Level, LevelSlots, RouteDefinition, RouteNode, RouteOptions, SegmentSpec,
};
use crate::error::{ConfigError, ConfigErrors, SlotKind};
use crate::handlers::{Handlers, LoadFn};
use crate::matchers::ParamMatchers;
use crate::response::Render;
use crate::router::trie::RouteTrie;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info};

/// Frozen output of [`RouteTableBuilder::build`]: compiled routes plus the
/// segment trie used by the router. Never mutated; hot reload swaps a new one.
#[derive(Debug, Clone, Default)]
pub struct RouteTable {
    routes: Vec<Arc<RouteDefinition>>,
    pub(crate) trie: RouteTrie,
    nodes: Vec<RouteNode>,
}

impl RouteTable {
    /// Routes in declaration order
    #[must_use]
    pub fn routes(&self) -> &[Arc<RouteDefinition>] {
        &self.routes
    }

    /// Routes sorted by descending specificity, ties in declaration order
    #[must_use]
    pub fn routes_by_specificity(&self) -> Vec<Arc<RouteDefinition>> {
        let mut sorted = self.routes.clone();
        sorted.sort_by(|a, b| b.rank().cmp(&a.rank()).then(a.order.cmp(&b.order)));
        sorted
    }

    #[must_use]
    pub fn route(&self, id: &str) -> Option<&Arc<RouteDefinition>> {
        let id = super::pattern::normalize_id(id);
        self.routes.iter().find(|r| *r.id == *id)
    }

    /// The description the table was built from
    #[must_use]
    pub fn nodes(&self) -> &[RouteNode] {
        &self.nodes
    }

    /// Error template of the root node, used for 404/405
    #[must_use]
    pub fn root_error(&self) -> Option<&str> {
        self.nodes
            .iter()
            .find(|n| n.id.trim_matches('/').is_empty())
            .and_then(|n| n.error.as_deref())
    }

    /// Root layout level, used to wrap 404/405 pages
    #[must_use]
    pub fn root_layout_template(&self) -> Option<&str> {
        self.nodes
            .iter()
            .find(|n| n.id.trim_matches('/').is_empty())
            .and_then(|n| n.layout.as_ref())
            .and_then(|l| l.template.as_deref())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.routes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

/// Collects route nodes and compiles them into a [`RouteTable`].
///
/// Every problem is collected; the build fails with all of them at once.
#[derive(Debug, Clone, Default)]
pub struct RouteTableBuilder {
    nodes: Vec<RouteNode>,
    defaults: RouteOptions,
}

struct Slots<'a> {
    route: &'a str,
    handlers: &'a Handlers,
    renderer: &'a dyn Render,
    errors: &'a mut Vec<ConfigError>,
}

impl Slots<'_> {
    fn load(&mut self, name: Option<&String>, kind: SlotKind) -> Option<LoadFn> {
        let name = name?;
        let found = self.handlers.get_load(name);
        if found.is_none() {
            self.unknown(kind, name);
        }
        found
    }

    fn template(&mut self, name: Option<&String>, kind: SlotKind) -> Option<String> {
        let name = name?;
        if !self.renderer.has_template(name) {
            self.unknown(kind, name);
        }
        Some(name.clone())
    }

    fn unknown(&mut self, kind: SlotKind, slot: &str) {
        self.errors.push(ConfigError::UnknownSlot {
            route: self.route.to_string(),
            kind,
            slot: slot.to_string(),
        });
    }

    fn level(
        &mut self,
        parsed: &ParsedId,
        slots: &LevelSlots,
        load: SlotKind,
        server: SlotKind,
    ) -> Level {
        Level {
            node_id: Arc::from(parsed.id.as_str()),
            depth: parsed.depth(),
            template: self.template(slots.template.as_ref(), SlotKind::Template),
            server_load: self.load(slots.server_load.as_ref(), server),
            load: self.load(slots.load.as_ref(), load),
        }
    }
}

impl RouteTableBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn from_nodes(nodes: Vec<RouteNode>) -> Self {
        Self {
            nodes,
            ..Self::default()
        }
    }

    /// Options every route starts from before node options cascade.
    #[must_use]
    pub fn defaults(mut self, options: RouteOptions) -> Self {
        self.defaults = options;
        self
    }

    #[must_use]
    pub fn node(mut self, node: RouteNode) -> Self {
        self.nodes.push(node);
        self
    }

    pub fn push(&mut self, node: RouteNode) -> &mut Self {
        self.nodes.push(node);
        self
    }

    #[must_use]
    pub fn nodes(&self) -> &[RouteNode] {
        &self.nodes
    }

    /// Compile the nodes against the registries.
    pub fn build(
        self,
        matchers: &ParamMatchers,
        handlers: &Handlers,
        renderer: &dyn Render,
    ) -> Result<RouteTable, ConfigErrors> {
        let mut errors = Vec::new();

        let mut parsed: Vec<(ParsedId, &RouteNode)> = Vec::with_capacity(self.nodes.len());
        let mut seen = HashSet::new();
        for node in &self.nodes {
            match parse_route_id(&node.id) {
                Ok(p) => {
                    if !seen.insert(p.id.clone()) {
                        errors.push(ConfigError::DuplicateNode { route: p.id });
                        continue;
                    }
                    let empty = node.page.as_ref().is_none_or(LevelSlots::is_empty)
                        && node.layout.as_ref().is_none_or(LevelSlots::is_empty)
                        && node.endpoint.is_none()
                        && node.error.is_none();
                    if empty {
                        errors.push(ConfigError::EmptyNode { route: p.id });
                        continue;
                    }
                    parsed.push((p, node));
                }
                Err(mut errs) => errors.append(&mut errs),
            }
        }

        let mut routes: Vec<Arc<RouteDefinition>> = Vec::new();
        let mut trie = RouteTrie::default();

        for (parsed_id, node) in &parsed {
            let ancestors: Vec<&(ParsedId, &RouteNode)> = {
                let mut a: Vec<_> = parsed
                    .iter()
                    .filter(|(p, _)| p.is_prefix_of(parsed_id))
                    .collect();
                a.sort_by_key(|(p, _)| p.depth());
                a
            };

            let mut slots = Slots {
                route: &parsed_id.id,
                handlers,
                renderer,
                errors: &mut errors,
            };

            let layouts: Vec<Level> = ancestors
                .iter()
                .filter_map(|(p, n)| n.layout.as_ref().map(|l| (p, l)))
                .map(|(p, l)| slots.level(p, l, SlotKind::Layout, SlotKind::LayoutServer))
                .collect();

            let error_chain: Vec<ErrorBoundary> = ancestors
                .iter()
                .filter_map(|(p, n)| n.error.as_ref().map(|e| (p, e)))
                .filter_map(|(p, e)| {
                    slots
                        .template(Some(e), SlotKind::Error)
                        .map(|template| ErrorBoundary {
                            node_id: Arc::from(p.id.as_str()),
                            depth: p.depth(),
                            template,
                        })
                })
                .collect();

            if node.page.is_none() && node.endpoint.is_none() {
                continue;
            }

            let page = node
                .page
                .as_ref()
                .map(|slots_def| slots.level(parsed_id, slots_def, SlotKind::Page, SlotKind::PageServer));

            let endpoint = node.endpoint.as_ref().and_then(|name| {
                let found = handlers.get_endpoint(name);
                if found.is_none() {
                    slots.unknown(SlotKind::Endpoint, name);
                }
                found
            });

            let entries_fn = node.options.entries_fn.as_ref().and_then(|name| {
                let found = handlers.get_entries(name);
                if found.is_none() {
                    slots.unknown(SlotKind::Entries, name);
                }
                found
            });

            let mut options = self.defaults.clone();
            for (_, ancestor) in &ancestors {
                options.apply(&ancestor.options);
            }
            options.entries = node.options.entries.clone();

            let pattern = parsed_id.pattern();
            let mut route_matchers = HashMap::new();
            for p in pattern.iter().filter_map(SegmentSpec::param) {
                if let Some(m) = &p.matcher {
                    match matchers.resolve_for(&parsed_id.id, m) {
                        Ok(resolved) => {
                            route_matchers.insert(p.name.clone(), resolved);
                        }
                        Err(e) => errors.push(e),
                    }
                }
            }

            let param_names = pattern
                .iter()
                .filter_map(SegmentSpec::param)
                .map(|p| Arc::from(p.name.as_str()))
                .collect();
            let order = routes.len();
            let definition = RouteDefinition {
                id: Arc::from(parsed_id.id.as_str()),
                pattern,
                order,
                depth: parsed_id.depth(),
                layouts,
                page,
                endpoint,
                errors: error_chain,
                options,
                entries_fn,
                matchers: route_matchers,
                param_names,
            };

            if let Err(existing) = trie.insert(&definition.pattern, &definition.matchers, order) {
                errors.push(ConfigError::Conflict {
                    first: routes[existing].id.to_string(),
                    second: definition.id.to_string(),
                });
                continue;
            }

            debug!(
                route_id = %definition.id,
                pattern = %definition.pattern_string(),
                layouts = definition.layouts.len(),
                error_boundaries = definition.errors.len(),
                "Compiled route"
            );
            routes.push(Arc::new(definition));
        }

        if !errors.is_empty() {
            dedup(&mut errors);
            return Err(ConfigErrors(errors));
        }

        info!(routes = routes.len(), nodes = self.nodes.len(), "Route table built");
        Ok(RouteTable {
            routes,
            trie,
            nodes: self.nodes,
        })
    }
}

/// Layout and boundary slots are checked once per route below them.
fn dedup(errors: &mut Vec<ConfigError>) {
    let mut seen = Vec::with_capacity(errors.len());
    errors.retain(|e| {
        if seen.contains(e) {
            false
        } else {
            seen.push(e.clone());
            true
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::LoadData;
    use crate::response::TemplateRenderer;
    use crate::routes::types::NodeOptions;
    use crate::routes::{Prerender, TrailingSlash};

    fn page(template: &str) -> LevelSlots {
        LevelSlots {
            template: Some(template.into()),
            ..LevelSlots::default()
        }
    }

    fn renderer() -> TemplateRenderer {
        let mut r = TemplateRenderer::new();
        for name in ["root", "layout", "blog", "post", "err", "about"] {
            r.add_template(name, "{{ slot }}").unwrap();
        }
        r
    }

    fn build(nodes: Vec<RouteNode>) -> Result<RouteTable, ConfigErrors> {
        let mut handlers = Handlers::new();
        handlers.load("root.server", |_| Ok(LoadData::new()));
        RouteTableBuilder::from_nodes(nodes).build(
            &ParamMatchers::with_builtins(),
            &handlers,
            &renderer(),
        )
    }

    #[test]
    fn test_layout_and_error_chains() {
        let table = build(vec![
            RouteNode::new("/")
                .layout(LevelSlots {
                    template: Some("root".into()),
                    server_load: Some("root.server".into()),
                    load: None,
                })
                .error("err"),
            RouteNode::new("/blog").layout(page("blog")),
            RouteNode::new("/blog/[slug]").page(page("post")).error("err"),
            RouteNode::new("/(marketing)/about").page(page("about")),
            RouteNode::new("/(marketing)").layout(page("layout")),
        ])
        .unwrap();

        let post = table.route("/blog/[slug]").unwrap();
        let ids: Vec<&str> = post.layouts.iter().map(|l| &*l.node_id).collect();
        assert_eq!(ids, vec!["/", "/blog"]);
        assert!(post.layouts[0].server_load.is_some());
        let boundaries: Vec<usize> = post.errors.iter().map(|e| e.depth).collect();
        assert_eq!(boundaries, vec![0, 2]);

        let about = table.route("/(marketing)/about").unwrap();
        let ids: Vec<&str> = about.layouts.iter().map(|l| &*l.node_id).collect();
        assert_eq!(ids, vec!["/", "/(marketing)"]);
        assert_eq!(about.pattern_string(), "/about");
    }

    #[test]
    fn test_conflicting_shapes_fail() {
        let err = build(vec![
            RouteNode::new("/[a]").page(page("post")),
            RouteNode::new("/[b]").page(page("post")),
        ])
        .unwrap_err();
        assert_eq!(
            err.errors(),
            &[ConfigError::Conflict {
                first: "/[a]".into(),
                second: "/[b]".into()
            }]
        );
    }

    #[test]
    fn test_groups_do_not_disambiguate() {
        let err = build(vec![
            RouteNode::new("/(a)/about").page(page("about")),
            RouteNode::new("/(b)/about").page(page("about")),
        ])
        .unwrap_err();
        assert!(matches!(err.errors()[0], ConfigError::Conflict { .. }));
    }

    #[test]
    fn test_collects_every_problem() {
        let err = build(vec![
            RouteNode::new("/p/[id=nope]").page(page("post")),
            RouteNode::new("/q").page(page("missing-template")),
            RouteNode::new("/r").endpoint("missing-endpoint"),
            RouteNode::new("/empty"),
            RouteNode::new("/q").page(page("post")),
        ])
        .unwrap_err();
        let errs = err.errors();
        assert!(errs.iter().any(|e| matches!(e, ConfigError::UnknownMatcher { matcher, .. } if matcher == "nope")));
        assert!(errs.iter().any(|e| matches!(e, ConfigError::UnknownSlot { kind: SlotKind::Template, .. })));
        assert!(errs.iter().any(|e| matches!(e, ConfigError::UnknownSlot { kind: SlotKind::Endpoint, .. })));
        assert!(errs.iter().any(|e| matches!(e, ConfigError::EmptyNode { .. })));
        assert!(errs.iter().any(|e| matches!(e, ConfigError::DuplicateNode { .. })));
    }

    #[test]
    fn test_options_cascade_from_layout_nodes() {
        let table = build(vec![
            RouteNode::new("/docs").layout(page("layout")).options(NodeOptions {
                prerender: Some(Prerender::On),
                trailing_slash: Some(TrailingSlash::Always),
                ..NodeOptions::default()
            }),
            RouteNode::new("/docs/intro").page(page("about")),
            RouteNode::new("/docs/live").page(page("about")).options(NodeOptions {
                prerender: Some(Prerender::Off),
                ..NodeOptions::default()
            }),
        ])
        .unwrap();
        let intro = table.route("/docs/intro").unwrap();
        assert_eq!(intro.options.prerender, Prerender::On);
        assert_eq!(intro.options.trailing_slash, TrailingSlash::Always);
        assert_eq!(table.route("/docs/live").unwrap().options.prerender, Prerender::Off);
    }

    #[test]
    fn test_specificity_listing() {
        let table = build(vec![
            RouteNode::new("/[...rest]").page(page("about")),
            RouteNode::new("/[id=integer]").page(page("about")),
            RouteNode::new("/[slug]").page(page("about")),
            RouteNode::new("/about").page(page("about")),
        ])
        .unwrap();
        let ids: Vec<String> = table
            .routes_by_specificity()
            .iter()
            .map(|r| r.id.to_string())
            .collect();
        assert_eq!(ids, vec!["/about", "/[id=integer]", "/[slug]", "/[...rest]"]);
    }
}
