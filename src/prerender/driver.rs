use super::crawl::extract_links;
use super::output::{data_file, data_path, html_file, raw_file, OutputWriter};
use super::pool::RenderPool;
use super::{PrerenderReport, PrerenderedPage};
use crate::app::App;
use crate::context::{KitRequest, PrerenderLog, RequestMode, RequestOptions};
use crate::error::PrerenderError;
use crate::response::{escape_html, KitResponse};
use crate::router::Router;
use crate::routes::{Prerender, RouteDefinition, RouteTable, TrailingSlash};
use dashmap::DashSet;
use http::Method;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};
use url::Url;

#[derive(Debug, Clone)]
struct Job {
    path: String,
    /// Page that linked to or fetched this path
    referrer: Option<String>,
    /// Reached through `fetch` during another page's load
    via_fetch: bool,
}

/// What one worker produced for one path.
#[derive(Debug, Default)]
struct Visit {
    page: Option<PrerenderedPage>,
    discovered: Vec<Job>,
    warnings: Vec<String>,
    error: Option<PrerenderError>,
}

struct Crawl {
    app: App,
    origin: Url,
    out_dir: PathBuf,
    crawl: bool,
    writer: OutputWriter,
    visited: DashSet<String>,
    reached: DashSet<String>,
}

/// Render every reachable prerenderable path into `prerender.out_dir`.
pub fn prerender(app: &App) -> Result<PrerenderReport, PrerenderError> {
    let started = Instant::now();
    let config = &app.config().prerender;
    let origin = Url::parse(&config.origin).map_err(|e| PrerenderError::InvalidOrigin {
        origin: config.origin.clone(),
        reason: e.to_string(),
    })?;
    std::fs::create_dir_all(&config.out_dir).map_err(|source| PrerenderError::Write {
        path: config.out_dir.clone(),
        source,
    })?;

    let router = app.router();
    let (entries, mut warnings) = seed_entries(router.table(), &config.entries);

    let state = Arc::new(Crawl {
        app: app.clone(),
        origin,
        out_dir: config.out_dir.clone(),
        crawl: config.crawl,
        writer: OutputWriter::new(),
        visited: DashSet::new(),
        reached: DashSet::new(),
    });
    let workers = app
        .runtime()
        .prerender_workers
        .unwrap_or(config.concurrency)
        .max(1);
    let worker_state = Arc::clone(&state);
    let mut pool = RenderPool::start(workers, app.runtime().stack_size, move |job: Job| {
        visit(&worker_state, &job)
    })
    .map_err(PrerenderError::Spawn)?;

    info!(
        entries = entries.len(),
        workers = pool.workers(),
        out_dir = %config.out_dir.display(),
        "Prerendering"
    );

    let mut pending = 0usize;
    let enqueue = |job: Job, pending: &mut usize| {
        let path = canonical_path(&router, &job.path);
        if state.visited.insert(path.clone()) && pool.submit(Job { path, ..job }) {
            *pending += 1;
        }
    };
    for path in entries {
        enqueue(
            Job {
                path,
                referrer: None,
                via_fetch: false,
            },
            &mut pending,
        );
    }

    let mut pages = Vec::new();
    let mut first_error: Option<PrerenderError> = None;
    while pending > 0 {
        let Some((job, result)) = pool.next_result() else {
            break;
        };
        pending -= 1;
        let visit = match result {
            Ok(visit) => visit,
            Err(message) => {
                first_error.get_or_insert(PrerenderError::Page {
                    path: job.path,
                    status: 500,
                    message,
                });
                continue;
            }
        };
        warnings.extend(visit.warnings);
        pages.extend(visit.page);
        if let Some(err) = visit.error {
            first_error.get_or_insert(err);
        }
        if first_error.is_none() {
            for next in visit.discovered {
                enqueue(next, &mut pending);
            }
        }
    }
    pool.shutdown();

    if let Some(err) = first_error {
        return Err(err);
    }

    let unreached: Vec<String> = router
        .table()
        .routes()
        .iter()
        .filter(|r| r.options.prerender == Prerender::On && !state.reached.contains(r.id.as_ref()))
        .map(|r| r.id.to_string())
        .collect();
    for id in &unreached {
        warnings.push(format!(
            "route {id} is marked for prerendering but was not reached; add it to prerender.entries or link to it"
        ));
    }

    if config.strict && !warnings.is_empty() {
        return Err(PrerenderError::Strict { warnings });
    }
    for warning in &warnings {
        warn!(warning = %warning, "Prerender warning");
    }

    pages.sort_by(|a: &PrerenderedPage, b| a.path.cmp(&b.path));
    let report = PrerenderReport {
        out_dir: config.out_dir.clone(),
        pages,
        warnings,
        unreached,
        files_written: state.writer.count(),
    };
    info!(
        pages = report.pages.len(),
        files = report.files_written,
        warnings = report.warnings.len(),
        duration_ms = started.elapsed().as_millis(),
        "Prerender complete"
    );
    Ok(report)
}

/// Initial paths: `*` expands to every prerenderable route without required
/// params; every prerenderable route adds its enumerated entries.
fn seed_entries(table: &RouteTable, configured: &[String]) -> (Vec<String>, Vec<String>) {
    let mut paths = Vec::new();
    let mut warnings = Vec::new();
    let prerenderable = || {
        table
            .routes()
            .iter()
            .filter(|r| r.options.prerender.enabled())
    };

    for entry in configured {
        if entry == "*" {
            for route in prerenderable().filter(|r| !r.has_required_params()) {
                match route.resolve(std::iter::empty()) {
                    Ok(path) => paths.push(path),
                    Err(e) => warnings.push(e.to_string()),
                }
            }
        } else if entry.starts_with('/') {
            paths.push(entry.clone());
        } else {
            warnings.push(format!("prerender entry '{entry}' must start with '/' or be '*'"));
        }
    }

    for route in prerenderable() {
        for params in route.prerender_entries() {
            match route.resolve(params.iter().map(|(k, v)| (k.as_str(), v.as_str()))) {
                Ok(path) => paths.push(path),
                Err(e) => warnings.push(e.to_string()),
            }
        }
    }
    (paths, warnings)
}

/// The path a route serves without redirecting, so both slash forms of a
/// link map to one visit.
fn canonical_path(router: &Router, path: &str) -> String {
    if path == "/" {
        return path.to_string();
    }
    let policy = router
        .match_path(path)
        .map_or(TrailingSlash::Ignore, |m| m.route.options.trailing_slash);
    let trimmed = path.trim_end_matches('/');
    match policy {
        TrailingSlash::Always => format!("{trimmed}/"),
        TrailingSlash::Never | TrailingSlash::Ignore if trimmed.is_empty() => "/".to_string(),
        TrailingSlash::Never | TrailingSlash::Ignore => trimmed.to_string(),
    }
}

fn synthetic_get(
    state: &Crawl,
    path: &str,
    log: &Arc<PrerenderLog>,
) -> Result<(Url, KitResponse), url::ParseError> {
    let request = KitRequest::parse(Method::GET, path, &state.origin)?
        .with_header("accept", "text/html");
    let url = request.url.clone();
    let options = RequestOptions {
        mode: RequestMode::Prerender(Arc::clone(log)),
        ..RequestOptions::default()
    };
    Ok((url, state.app.respond_with(request, options)))
}

fn linked_from(job: &Job) -> String {
    job.referrer
        .as_deref()
        .map(|r| format!(" (linked from {r})"))
        .unwrap_or_default()
}

fn visit(state: &Crawl, job: &Job) -> Visit {
    let mut out = Visit::default();
    let log = Arc::new(PrerenderLog::new());
    let (url, response) = match synthetic_get(state, &job.path, &log) {
        Ok(pair) => pair,
        Err(e) => {
            out.warnings
                .push(format!("invalid path {}{}: {e}", job.path, linked_from(job)));
            return out;
        }
    };

    for (fetched, status) in log.drain() {
        if status == 404 {
            out.warnings
                .push(format!("404 fetching {fetched} while rendering {}", job.path));
        } else {
            out.discovered.push(Job {
                path: fetched,
                referrer: Some(job.path.clone()),
                via_fetch: true,
            });
        }
    }

    let router = state.app.router();
    let matched = router.match_path(url.path());
    let route = matched.as_ref().map(|m| Arc::clone(&m.route));
    if let Some(route) = &route {
        state.reached.insert(route.id.to_string());
    }

    match response.status {
        200..=299 => write_success(state, job, &url, route.as_deref(), &response, &mut out),
        300..=399 => write_redirect(state, job, &url, route.as_deref(), &response, &mut out),
        404 => out
            .warnings
            .push(format!("404 {}{}", job.path, linked_from(job))),
        status => {
            let mut message = response.text_body();
            message.truncate(200);
            out.error = Some(PrerenderError::Page {
                path: job.path.clone(),
                status,
                message,
            });
        }
    }
    out
}

fn record(out: &mut Visit, job: &Job, route: Option<&RouteDefinition>, status: u16, files: Vec<PathBuf>) {
    out.page = Some(PrerenderedPage {
        path: job.path.clone(),
        route_id: route.map(|r| r.id.to_string()),
        status,
        files,
    });
}

fn write_success(
    state: &Crawl,
    job: &Job,
    url: &Url,
    route: Option<&RouteDefinition>,
    response: &KitResponse,
    out: &mut Visit,
) {
    let is_html = response
        .content_type()
        .is_some_and(|ct| ct.starts_with("text/html"));
    let prerenderable = route.is_some_and(|r| r.options.prerender.enabled());
    let page_route = route.filter(|r| r.is_page() && is_html);

    // Endpoints fetched while rendering a page are saved with it.
    if !prerenderable && !(job.via_fetch && page_route.is_none()) {
        debug!(path = %job.path, "Route is not prerenderable, skipping");
        return;
    }

    let mut files = Vec::new();
    let trailing_slash = route.map_or(TrailingSlash::Ignore, |r| r.options.trailing_slash);
    let target = if page_route.is_some() {
        html_file(&state.out_dir, &job.path, trailing_slash)
    } else {
        raw_file(&state.out_dir, &job.path)
    };
    let Some(file) = target else {
        out.warnings.push(format!("cannot map {} to an output file", job.path));
        return;
    };
    if let Err(e) = write(state, &file, &response.body, &mut files) {
        out.error = Some(e);
        return;
    }

    if let Some(route) = page_route {
        if route.has_server_data() {
            if let Err(e) = write_data(state, job, &mut files) {
                out.error = Some(e);
                return;
            }
        }
        if state.crawl {
            let html = response.text_body();
            out.discovered
                .extend(extract_links(&html, url).into_iter().map(|path| Job {
                    path,
                    referrer: Some(job.path.clone()),
                    via_fetch: false,
                }));
        }
    }
    record(out, job, route, response.status, files);
}

fn write_data(state: &Crawl, job: &Job, files: &mut Vec<PathBuf>) -> Result<(), PrerenderError> {
    let log = Arc::new(PrerenderLog::new());
    let path = data_path(&job.path);
    let (_, response) = synthetic_get(state, &path, &log).map_err(|e| PrerenderError::Page {
        path: path.clone(),
        status: 400,
        message: e.to_string(),
    })?;
    if !response.ok() {
        return Err(PrerenderError::Page {
            path,
            status: response.status,
            message: response.text_body(),
        });
    }
    match data_file(&state.out_dir, &job.path) {
        Some(file) => write(state, &file, &response.body, files),
        None => Ok(()),
    }
}

fn write_redirect(
    state: &Crawl,
    job: &Job,
    url: &Url,
    route: Option<&RouteDefinition>,
    response: &KitResponse,
    out: &mut Visit,
) {
    let Some(location) = response.header("location") else {
        out.warnings
            .push(format!("{} redirect from {} has no location", response.status, job.path));
        return;
    };
    let Ok(target) = url.join(location) else {
        out.warnings
            .push(format!("invalid redirect location '{location}' from {}", job.path));
        return;
    };
    if target.origin() == url.origin() {
        out.discovered.push(Job {
            path: target.path().to_string(),
            referrer: Some(job.path.clone()),
            via_fetch: false,
        });
    }

    let trailing_slash = route.map_or(TrailingSlash::Ignore, |r| r.options.trailing_slash);
    let Some(file) = html_file(&state.out_dir, &job.path, trailing_slash) else {
        return;
    };
    let escaped = escape_html(location);
    let body = format!(
        "<!doctype html>\n<meta http-equiv=\"refresh\" content=\"0;url={escaped}\">\n<a href=\"{escaped}\">{escaped}</a>\n"
    );
    let mut files = Vec::new();
    if let Err(e) = write(state, &file, body.as_bytes(), &mut files) {
        out.error = Some(e);
        return;
    }
    debug!(path = %job.path, location = %location, "Wrote redirect page");
    record(out, job, route, response.status, files);
}

fn write(state: &Crawl, file: &std::path::Path, body: &[u8], files: &mut Vec<PathBuf>) -> Result<(), PrerenderError> {
    if state.writer.write_once(file, body)? {
        files.push(file.to_path_buf());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::KitConfig;
    use crate::response::TemplateRenderer;
    use crate::routes::{LevelSlots, NodeOptions, RouteNode};

    fn app(nodes: Vec<RouteNode>) -> App {
        let mut renderer = TemplateRenderer::new();
        renderer.add_template("page", "<p>page</p>").unwrap();
        App::builder(KitConfig::default())
            .renderer(renderer)
            .routes(nodes)
            .build()
            .unwrap()
    }

    fn on() -> NodeOptions {
        NodeOptions {
            prerender: Some(Prerender::On),
            ..NodeOptions::default()
        }
    }

    fn page() -> LevelSlots {
        LevelSlots {
            template: Some("page".to_string()),
            ..LevelSlots::default()
        }
    }

    #[test]
    fn test_star_skips_routes_with_required_params() {
        let app = app(vec![
            RouteNode::new("/").page(page()).options(on()),
            RouteNode::new("/blog/[slug]").page(page()).options(on()),
            RouteNode::new("/docs/[[lang]]").page(page()).options(on()),
            RouteNode::new("/private").page(page()),
        ]);
        let router = app.router();
        let (paths, warnings) = seed_entries(router.table(), &["*".to_string()]);
        assert_eq!(paths, ["/", "/docs"]);
        assert!(warnings.is_empty());
    }

    #[test]
    fn test_canonical_path_follows_trailing_slash_policy() {
        let always = NodeOptions {
            trailing_slash: Some(TrailingSlash::Always),
            ..NodeOptions::default()
        };
        let app = app(vec![
            RouteNode::new("/about").page(page()),
            RouteNode::new("/docs").page(page()).options(always),
        ]);
        let router = app.router();
        assert_eq!(canonical_path(&router, "/about/"), "/about");
        assert_eq!(canonical_path(&router, "/docs"), "/docs/");
        assert_eq!(canonical_path(&router, "/"), "/");
    }
}
