//! Router core module - hot path for request routing.

use crate::routes::{MatchedRoute, ParamVec, RouteTable};
use std::borrow::Cow;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Split a request path into percent-decoded segments.
///
/// One trailing slash is dropped; `//` yields an empty segment. Returns `None`
/// when a segment is not valid percent-encoded UTF-8, which never matches.
#[must_use]
pub fn split_path(path: &str) -> Option<Vec<String>> {
    let trimmed = path.strip_prefix('/').unwrap_or(path);
    let trimmed = trimmed.strip_suffix('/').unwrap_or(trimmed);
    if trimmed.is_empty() {
        return Some(Vec::new());
    }
    trimmed
        .split('/')
        .map(|s| urlencoding::decode(s).ok().map(Cow::into_owned))
        .collect()
}

/// Matches request paths against a frozen [`RouteTable`].
///
/// Cheap to clone; hot reload swaps the whole router.
#[derive(Debug, Clone)]
pub struct Router {
    table: Arc<RouteTable>,
}

impl Router {
    #[must_use]
    pub fn new(table: RouteTable) -> Self {
        let routes_summary: Vec<String> = table
            .routes()
            .iter()
            .take(10)
            .map(|r| r.pattern_string())
            .collect();
        info!(
            routes_count = table.len(),
            routes_summary = ?routes_summary,
            "Routing table loaded"
        );
        Self {
            table: Arc::new(table),
        }
    }

    #[must_use]
    pub fn table(&self) -> &Arc<RouteTable> {
        &self.table
    }

    /// Find the most specific route for `path` (no query string).
    #[must_use]
    pub fn match_path(&self, path: &str) -> Option<MatchedRoute> {
        let match_start = Instant::now();
        let segments = split_path(path)?;
        let (index, bindings) = self.table.trie.find(&segments)?;
        let route = Arc::clone(&self.table.routes()[index]);

        let mut params = ParamVec::new();
        for (name, value) in route.param_names.iter().zip(bindings) {
            if let Some(value) = value {
                params.push((Arc::clone(name), value));
            }
        }

        let match_duration = match_start.elapsed();
        if match_duration > Duration::from_millis(1) {
            warn!(
                path = %path,
                route_id = %route.id,
                duration_us = match_duration.as_micros(),
                "Slow route matching detected"
            );
        } else {
            debug!(
                path = %path,
                route_id = %route.id,
                path_params = ?params,
                duration_us = match_duration.as_micros(),
                "Route matched"
            );
        }

        Some(MatchedRoute { route, params })
    }

    /// Print the table in specificity order to stdout.
    pub fn dump_routes(&self) {
        println!("[routes] count={}", self.table.len());
        for route in self.table.routes_by_specificity() {
            let kind = match (route.is_page(), route.is_endpoint()) {
                (true, true) => "page+endpoint",
                (true, false) => "page",
                _ => "endpoint",
            };
            println!(
                "[route] {:<32} {:<14} id={} prerender={:?} ssr={}",
                route.pattern_string(),
                kind,
                route.id,
                route.options.prerender,
                route.options.ssr
            );
        }
    }
}
