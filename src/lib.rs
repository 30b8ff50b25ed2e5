//! # kitrouter
//!
//! **kitrouter** is a coroutine-powered routing, data-loading and prerendering
//! engine for full-stack web applications: it turns a URL and an HTTP verb into
//! a matched route, runs the route's layout and page loads in order, merges
//! their data and renders an HTML document, a JSON payload, a redirect or an
//! error page. The same pipeline runs at build time to prerender static files.
//!
//! ## Architecture
//!
//! - **[`matchers`]** - Named predicates validating dynamic segments
//! - **[`routes`]** - Route descriptions, pattern parsing and the route table builder
//! - **[`router`]** - URL to most specific route, with decoded params
//! - **[`pipeline`]** - Layout and page loads, data merging, internal `fetch`
//! - **[`response`]** - HTML, JSON, redirect and error responses; the `Render` trait
//! - **[`app`]** - The frozen composition exposing [`App::respond`]
//! - **[`prerender`]** - Build-time crawl over a coroutine worker pool
//! - **[`manifest`] / [`adapter`]** - Build output consumed by hosting adapters
//! - **[`server`]** - `may_minihttp` front-end for live requests
//! - **[`hot_reload`]** - Route table rebuilds on description changes
//! - **[`cli`]** - `routes`, `prerender`, `build` and `serve`
//!
//! ### Request Flow
//!
//! ```text
//! HTTP request -> server::KitService -> App::respond
//!     -> Router::match_path -> run_load_pipeline -> response builder
//!     -> KitResponse -> HTTP response
//! ```
//!
//! A load may `fetch` a relative URL: that re-enters [`App::respond_with`] one
//! level deeper, bounded by `fetch.max_depth`.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use kitrouter::prelude::*;
//!
//! let mut handlers = Handlers::new();
//! handlers.load("post.server", |event| {
//!     let slug = event.param("slug").unwrap_or_default().to_string();
//!     let mut data = LoadData::new();
//!     data.insert("title", slug);
//!     Ok(data)
//! });
//!
//! let mut renderer = TemplateRenderer::new();
//! renderer.add_template("post", "<h1>{{ data.title }}</h1>")?;
//!
//! let app = App::builder(KitConfig::default())
//!     .handlers(handlers)
//!     .renderer(renderer)
//!     .node(RouteNode::new("/blog/[slug]").page(LevelSlots {
//!         template: Some("post".into()),
//!         server_load: Some("post.server".into()),
//!         load: None,
//!     }))
//!     .build()?;
//!
//! let response = app.respond(KitRequest::get("/blog/hello")?);
//! assert_eq!(response.status, 200);
//! ```
//!
//! ## Runtime
//!
//! Requests run on `may` coroutines. Coroutine stack size is read from
//! `KIT_STACK_SIZE` (see [`runtime_config`]); logging is configured from
//! `KIT_LOG_*` (see [`logging`]).

pub mod adapter;
pub mod app;
pub mod cli;
pub mod config;
pub mod context;
pub mod error;
pub mod handlers;
pub mod hot_reload;
pub mod ids;
pub mod logging;
pub mod manifest;
pub mod matchers;
pub mod pipeline;
pub mod prerender;
pub mod response;
pub mod router;
pub mod routes;
pub mod runtime_config;
pub mod server;

pub use app::{App, AppBuilder};
pub use config::KitConfig;
pub use context::{Cookie, KitRequest, RequestContext, RequestOptions};
pub use error::{ConfigError, ConfigErrors, FetchError, HttpError, PrerenderError, SerializationError};
pub use response::KitResponse;

/// Everything an app needs to declare routes and handlers.
pub mod prelude {
    pub use crate::app::{App, AppBuilder};
    pub use crate::config::KitConfig;
    pub use crate::context::{AbortSignal, Cookie, KitRequest, RequestOptions, SameSite};
    pub use crate::error::{FetchError, HttpError};
    pub use crate::handlers::{EndpointMethods, Handlers};
    pub use crate::matchers::ParamMatchers;
    pub use crate::pipeline::{
        EndpointEvent, EndpointReply, FetchRequest, LoadData, LoadEvent, LoadSignal,
    };
    pub use crate::response::{KitResponse, TemplateRenderer};
    pub use crate::routes::{LevelSlots, NodeOptions, Prerender, RouteNode, TrailingSlash};
}
