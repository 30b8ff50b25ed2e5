//! Build manifest consumed by adapters.
//!
//! A frozen, serializable description of every route (id, URL pattern, kind,
//! rendering flags, params, layout chain, adapter config) plus the paths the
//! prerender run produced. Written as `manifest.json` next to the prerendered
//! files.

use crate::prerender::PrerenderReport;
use crate::routes::{Prerender, RouteDefinition, RouteTable, TrailingSlash};
use anyhow::Context;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fs;
use std::path::Path;

pub const MANIFEST_VERSION: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RouteKind {
    Page,
    Endpoint,
    /// `+page` and `+server` on the same route
    PageAndEndpoint,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestParam {
    pub name: String,
    pub matcher: Option<String>,
    pub optional: bool,
    pub rest: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManifestRoute {
    pub id: String,
    pub pattern: String,
    pub kind: RouteKind,
    pub prerender: Prerender,
    pub ssr: bool,
    pub csr: bool,
    pub trailing_slash: TrailingSlash,
    pub params: Vec<ManifestParam>,
    pub matchers: Vec<String>,
    /// Layout node ids, outer to inner
    pub layouts: Vec<String>,
    /// Endpoint methods, sorted
    pub methods: Vec<String>,
    /// Adapter passthrough from the `config` route option
    #[serde(skip_serializing_if = "Option::is_none")]
    pub config: Option<Value>,
    /// At least one path of this route was prerendered
    pub prerendered: bool,
}

impl From<&RouteDefinition> for ManifestRoute {
    fn from(route: &RouteDefinition) -> Self {
        let kind = match (route.is_page(), route.is_endpoint()) {
            (true, true) => RouteKind::PageAndEndpoint,
            (false, true) => RouteKind::Endpoint,
            _ => RouteKind::Page,
        };
        Self {
            id: route.id.to_string(),
            pattern: route.pattern_string(),
            kind,
            prerender: route.options.prerender,
            ssr: route.options.ssr,
            csr: route.options.csr,
            trailing_slash: route.options.trailing_slash,
            params: route
                .params()
                .map(|p| ManifestParam {
                    name: p.name.clone(),
                    matcher: p.matcher.clone(),
                    optional: p.optional,
                    rest: p.rest,
                })
                .collect(),
            matchers: route.matcher_names().into_iter().map(str::to_string).collect(),
            layouts: route.layouts.iter().map(|l| l.node_id.to_string()).collect(),
            methods: route
                .endpoint
                .as_ref()
                .map(|e| e.allowed())
                .unwrap_or_default(),
            config: route.options.config.clone(),
            prerendered: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    pub version: u32,
    pub routes: Vec<ManifestRoute>,
    /// Prerendered paths with a 2xx status, sorted
    pub prerendered: Vec<String>,
}

impl Manifest {
    #[must_use]
    pub fn from_table(table: &RouteTable) -> Self {
        Self {
            version: MANIFEST_VERSION,
            routes: table.routes().iter().map(|r| ManifestRoute::from(r.as_ref())).collect(),
            prerendered: Vec::new(),
        }
    }

    /// Record the outcome of a prerender run.
    #[must_use]
    pub fn with_prerendered(mut self, report: &PrerenderReport) -> Self {
        self.prerendered = report.paths().into_iter().map(str::to_string).collect();
        for page in report.pages.iter().filter(|p| (200..300).contains(&p.status)) {
            let Some(route_id) = &page.route_id else {
                continue;
            };
            if let Some(route) = self.routes.iter_mut().find(|r| r.id == *route_id) {
                route.prerendered = true;
            }
        }
        self
    }

    /// Routes that still need a server at runtime: not prerendered, or
    /// prerendered but also served dynamically (`prerender: auto`).
    pub fn dynamic_routes(&self) -> impl Iterator<Item = &ManifestRoute> {
        self.routes
            .iter()
            .filter(|r| !r.prerendered || r.prerender == Prerender::Auto)
    }

    #[must_use]
    pub fn route(&self, id: &str) -> Option<&ManifestRoute> {
        self.routes.iter().find(|r| r.id == id)
    }

    pub fn write(&self, path: &Path) -> anyhow::Result<()> {
        let json = serde_json::to_string_pretty(self).context("Failed to serialize manifest")?;
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create {}", dir.display()))?;
        }
        fs::write(path, json).with_context(|| format!("Failed to write {}", path.display()))
    }

    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read manifest {}", path.display()))?;
        serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse manifest {}", path.display()))
    }
}
