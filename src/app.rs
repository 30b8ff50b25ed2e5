//! # App Module
//!
//! The frozen composition of route table, handler registry, renderer and
//! configuration. [`App::respond`] is the single entry point for live
//! requests, internal fetches and prerendering.
//!
//! ## Request flow
//!
//! ```text
//! KitRequest
//!   -> strip /__data.json (data request, invalidation mask)
//!   -> Router::match_path            -> 404 via root error boundary
//!   -> trailing slash policy         -> 308
//!   -> page or endpoint?             -> 405 + Allow
//!   -> run_load_pipeline / run_endpoint
//!   -> response builder
//!   -> headers, cookies, x-request-id, HEAD body strip
//! ```
//!
//! ## Hot reload
//!
//! The router (and with it the route table) lives behind an `ArcSwap`.
//! [`App::reload`] builds a new table and swaps it in atomically; requests in
//! flight keep the snapshot they started with.

use crate::config::KitConfig;
use crate::context::{KitRequest, RequestContext, RequestOptions};
use crate::error::ConfigErrors;
use crate::handlers::Handlers;
use crate::matchers::ParamMatchers;
use crate::pipeline::{
    run_endpoint, run_load_pipeline, ExternalFetch, LoadMode, ReqwestFetch, Transport,
    INVALIDATED_PARAM,
};
use crate::response::{
    finalize, method_not_allowed, not_found, prefers_html, prefers_json, respond_endpoint_error,
    respond_outcome, strip_data_suffix, trailing_slash_redirect, AppShell, KitResponse, Render,
    TemplateRenderer,
};
use crate::router::Router;
use crate::routes::{discover, load_description, RouteNode, RouteOptions, RouteTableBuilder};
use crate::runtime_config::RuntimeConfig;
use anyhow::Context;
use arc_swap::ArcSwap;
use http::Method;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};

/// Router and renderer are swapped together on reload.
struct Snapshot {
    router: Arc<Router>,
    renderer: Arc<dyn Render>,
}

struct AppInner {
    current: ArcSwap<Snapshot>,
    handlers: Handlers,
    matchers: ParamMatchers,
    transport: Transport,
    shell: AppShell,
    config: KitConfig,
    runtime: RuntimeConfig,
    external: Arc<dyn ExternalFetch>,
    /// Templates come from a discovered routes directory and reload with it
    discovered_templates: bool,
}

/// Cheap to clone; clones share the same state.
#[derive(Clone)]
pub struct App {
    inner: Arc<AppInner>,
}

impl fmt::Debug for App {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("App")
            .field("routes", &self.router().table().len())
            .field("config", &self.inner.config)
            .finish()
    }
}

/// Assembles an [`App`].
pub struct AppBuilder {
    config: KitConfig,
    runtime: RuntimeConfig,
    matchers: ParamMatchers,
    handlers: Handlers,
    renderer: Option<Arc<dyn Render>>,
    nodes: Vec<RouteNode>,
    transport: Transport,
    external: Option<Arc<dyn ExternalFetch>>,
    shell: AppShell,
    discovered_templates: bool,
}

impl AppBuilder {
    #[must_use]
    pub fn new(config: KitConfig) -> Self {
        Self {
            config,
            runtime: RuntimeConfig::default(),
            matchers: ParamMatchers::with_builtins(),
            handlers: Handlers::new(),
            renderer: None,
            nodes: Vec::new(),
            transport: Transport::new(),
            external: None,
            shell: AppShell::default(),
            discovered_templates: false,
        }
    }

    #[must_use]
    pub fn runtime(mut self, runtime: RuntimeConfig) -> Self {
        self.runtime = runtime;
        self
    }

    #[must_use]
    pub fn matchers(mut self, matchers: ParamMatchers) -> Self {
        self.matchers = matchers;
        self
    }

    #[must_use]
    pub fn handlers(mut self, handlers: Handlers) -> Self {
        self.handlers = handlers;
        self
    }

    #[must_use]
    pub fn renderer<R: Render + 'static>(mut self, renderer: R) -> Self {
        self.renderer = Some(Arc::new(renderer));
        self.discovered_templates = false;
        self
    }

    #[must_use]
    pub fn routes(mut self, nodes: Vec<RouteNode>) -> Self {
        self.nodes = nodes;
        self
    }

    #[must_use]
    pub fn node(mut self, node: RouteNode) -> Self {
        self.nodes.push(node);
        self
    }

    #[must_use]
    pub fn transport(mut self, transport: Transport) -> Self {
        self.transport = transport;
        self
    }

    #[must_use]
    pub fn external_fetch<F: ExternalFetch + 'static>(mut self, fetch: F) -> Self {
        self.external = Some(Arc::new(fetch));
        self
    }

    #[must_use]
    pub fn shell(mut self, shell: AppShell) -> Self {
        self.shell = shell;
        self
    }

    /// Load routes (and, for a directory, templates) from
    /// `routes.description`, and the shell from `app.template`.
    pub fn load_from_config(mut self) -> anyhow::Result<Self> {
        let path = self.config.routes.description.clone();
        if path.is_dir() {
            let discovered = discover(&path)?;
            if self.renderer.is_none() {
                self.renderer = Some(Arc::new(TemplateRenderer::from_discovered(&discovered)?));
                self.discovered_templates = true;
            }
            self.nodes = discovered.nodes;
        } else {
            self.nodes = load_description(&path)?;
        }
        if let Some(template) = &self.config.app.template {
            self.shell = AppShell::from_file(template)?;
        }
        Ok(self)
    }

    pub fn build(self) -> Result<App, ConfigErrors> {
        let renderer: Arc<dyn Render> = match self.renderer {
            Some(r) => r,
            None => Arc::new(TemplateRenderer::new()),
        };
        let router = build_router(
            &self.config,
            self.nodes,
            &self.matchers,
            &self.handlers,
            renderer.as_ref(),
        )?;
        Ok(App {
            inner: Arc::new(AppInner {
                current: ArcSwap::from_pointee(Snapshot {
                    router: Arc::new(router),
                    renderer,
                }),
                handlers: self.handlers,
                matchers: self.matchers,
                transport: self.transport,
                shell: self.shell,
                config: self.config,
                runtime: self.runtime,
                external: self
                    .external
                    .unwrap_or_else(|| Arc::new(ReqwestFetch::new())),
                discovered_templates: self.discovered_templates,
            }),
        })
    }
}

fn build_router(
    config: &KitConfig,
    nodes: Vec<RouteNode>,
    matchers: &ParamMatchers,
    handlers: &Handlers,
    renderer: &dyn Render,
) -> Result<Router, ConfigErrors> {
    let defaults = RouteOptions {
        trailing_slash: config.routes.trailing_slash,
        ..RouteOptions::default()
    };
    let table = RouteTableBuilder::from_nodes(nodes)
        .defaults(defaults)
        .build(matchers, handlers, renderer)?;
    Ok(Router::new(table))
}

impl App {
    #[must_use]
    pub fn builder(config: KitConfig) -> AppBuilder {
        AppBuilder::new(config)
    }

    /// Current router snapshot.
    #[must_use]
    pub fn router(&self) -> Arc<Router> {
        Arc::clone(&self.inner.current.load().router)
    }

    #[must_use]
    pub fn renderer(&self) -> Arc<dyn Render> {
        Arc::clone(&self.inner.current.load().renderer)
    }

    #[must_use]
    pub fn config(&self) -> &KitConfig {
        &self.inner.config
    }

    #[must_use]
    pub fn runtime(&self) -> &RuntimeConfig {
        &self.inner.runtime
    }

    #[must_use]
    pub fn shell(&self) -> &AppShell {
        &self.inner.shell
    }

    #[must_use]
    pub fn transport(&self) -> &Transport {
        &self.inner.transport
    }

    #[must_use]
    pub fn handlers(&self) -> &Handlers {
        &self.inner.handlers
    }

    #[must_use]
    pub fn external_fetch(&self) -> &dyn ExternalFetch {
        self.inner.external.as_ref()
    }

    /// Rebuild the route table from `nodes` and swap it in. On error the
    /// current table keeps serving.
    pub fn reload(&self, nodes: Vec<RouteNode>) -> Result<(), ConfigErrors> {
        let renderer = self.renderer();
        self.swap(nodes, renderer)
    }

    /// Rebuild routes and renderer together.
    pub fn reload_with(&self, nodes: Vec<RouteNode>, renderer: Arc<dyn Render>) -> Result<(), ConfigErrors> {
        self.swap(nodes, renderer)
    }

    /// Re-read `routes.description` (and discovered templates) and swap.
    pub fn reload_from_config(&self) -> anyhow::Result<()> {
        let path = &self.inner.config.routes.description;
        let swapped = if path.is_dir() {
            let discovered = discover(path)?;
            let renderer: Arc<dyn Render> = if self.inner.discovered_templates {
                Arc::new(TemplateRenderer::from_discovered(&discovered)?)
            } else {
                self.renderer()
            };
            self.swap(discovered.nodes, renderer)
        } else {
            let nodes = load_description(path)?;
            self.reload(nodes)
        };
        swapped.with_context(|| format!("Failed to reload routes from {}", path.display()))
    }

    fn swap(&self, nodes: Vec<RouteNode>, renderer: Arc<dyn Render>) -> Result<(), ConfigErrors> {
        let inner = &self.inner;
        let router = build_router(
            &inner.config,
            nodes,
            &inner.matchers,
            &inner.handlers,
            renderer.as_ref(),
        )?;
        inner.current.store(Arc::new(Snapshot {
            router: Arc::new(router),
            renderer,
        }));
        info!("Route table swapped");
        Ok(())
    }

    /// Answer a request from outside the app.
    #[must_use]
    pub fn respond(&self, request: KitRequest) -> KitResponse {
        self.respond_with(request, RequestOptions::default())
    }

    /// Answer a request with explicit nesting, cancellation and mode.
    #[must_use]
    pub fn respond_with(&self, request: KitRequest, options: RequestOptions) -> KitResponse {
        let started = Instant::now();
        let mut ctx = RequestContext::new(request, options);
        let path = ctx.request.url.path().to_string();

        let response = self.dispatch(&mut ctx);
        let response = finalize(&mut ctx, response);

        let duration_ms = started.elapsed().as_millis();
        if ctx.depth == 0 {
            info!(
                request_id = %ctx.id,
                method = %ctx.request.method,
                path = %path,
                status = response.status,
                duration_ms,
                "Request complete"
            );
        } else {
            debug!(
                request_id = %ctx.id,
                parent_id = ?ctx.parent.map(|p| p.to_string()),
                depth = ctx.depth,
                method = %ctx.request.method,
                path = %path,
                status = response.status,
                duration_ms,
                "Internal request complete"
            );
        }
        response
    }

    fn dispatch(&self, ctx: &mut RequestContext) -> KitResponse {
        let mut mode = LoadMode::Html;
        if let Some(page_path) = strip_data_suffix(ctx.request.url.path()).map(str::to_string) {
            let mut mask = None;
            let mut rest = Vec::new();
            for (k, v) in ctx.request.url.query_pairs() {
                if k == INVALIDATED_PARAM {
                    mask = Some(v.into_owned());
                } else {
                    rest.push((k.into_owned(), v.into_owned()));
                }
            }
            ctx.request.url.set_path(&page_path);
            if rest.is_empty() {
                ctx.request.url.set_query(None);
            } else {
                ctx.request.url.query_pairs_mut().clear().extend_pairs(rest);
            }
            ctx.is_data_request = true;
            mode = LoadMode::data_with_mask(mask.as_deref());
        }

        let router = self.router();
        let table = router.table();
        let accept = ctx.request.header("accept").map(str::to_string);
        let wants_html = !ctx.is_data_request && !prefers_json(accept.as_deref());

        let Some(matched) = router.match_path(ctx.request.url.path()) else {
            debug!(request_id = %ctx.id, path = %ctx.request.url.path(), "No route matched");
            return not_found(self, ctx, table, wants_html);
        };
        let route = Arc::clone(&matched.route);

        if !ctx.is_data_request {
            if let Some(redirect) = trailing_slash_redirect(&route, &ctx.request.url) {
                return redirect;
            }
        }

        let method = ctx.request.method.clone();
        let is_read = method == Method::GET || method == Method::HEAD;
        let page_methods = [Method::GET.to_string(), Method::HEAD.to_string()];

        if ctx.is_data_request {
            if !route.is_page() {
                return not_found(self, ctx, table, false);
            }
            if !is_read {
                return method_not_allowed(self, ctx, table, &page_methods, false);
            }
        } else {
            let serve_page = route.is_page()
                && is_read
                && (!route.is_endpoint() || prefers_html(accept.as_deref()));
            if !serve_page {
                let Some(endpoint) = &route.endpoint else {
                    return method_not_allowed(self, ctx, table, &page_methods, wants_html);
                };
                return match endpoint.handler_for(&method) {
                    Some(handler) => match run_endpoint(self, ctx, &matched, handler) {
                        Ok(response) => response,
                        Err(signal) => respond_endpoint_error(self, ctx, table, signal),
                    },
                    None => {
                        let mut allowed = endpoint.allowed();
                        if route.is_page() {
                            allowed.extend(page_methods);
                            allowed.sort_unstable();
                            allowed.dedup();
                        }
                        let html = prefers_html(accept.as_deref());
                        method_not_allowed(self, ctx, table, &allowed, html)
                    }
                };
            }
            if !route.is_endpoint() && prefers_json(accept.as_deref()) {
                ctx.is_data_request = true;
                mode = LoadMode::data_with_mask(None);
            }
        }

        let outcome = run_load_pipeline(self, ctx, &matched, &mode);
        respond_outcome(self, ctx, &matched, outcome)
    }
}
