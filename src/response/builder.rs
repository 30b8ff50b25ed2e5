use super::negotiate::prefers_html;
use super::render::{fallback_error_body, ErrorRender, PageContext, PageRender, RenderLevel};
use super::KitResponse;
use crate::app::App;
use crate::context::RequestContext;
use crate::error::HttpError;
use crate::pipeline::{EncodedLevel, ErrorOrigin, LevelKind, LoadOutcome, LoadSignal, PageData};
use crate::routes::{ErrorBoundary, MatchedRoute, RouteDefinition, RouteTable, TrailingSlash};
use http::Method;
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use tracing::{error, warn};
use url::Url;

fn page_context(
    ctx: &RequestContext,
    matched: Option<&MatchedRoute>,
    status: u16,
    error: Option<Value>,
) -> PageContext {
    PageContext {
        route_id: matched.map(|m| m.route.id.to_string()),
        url: ctx.request.url.to_string(),
        params: matched
            .map(|m| {
                m.params
                    .iter()
                    .map(|(k, v)| (k.to_string(), v.clone()))
                    .collect::<BTreeMap<_, _>>()
            })
            .unwrap_or_default(),
        status,
        error,
    }
}

fn log_error(ctx: &RequestContext, err: &HttpError) {
    if err.status >= 500 {
        error!(
            request_id = %ctx.id,
            path = %ctx.request.url.path(),
            status = err.status,
            error = %err.message,
            "Request failed"
        );
    } else {
        warn!(
            request_id = %ctx.id,
            path = %ctx.request.url.path(),
            status = err.status,
            error = %err.message,
            "Request error"
        );
    }
}

/// `{"type":"error", ...}` body of a failed data request.
fn data_error(app: &App, err: &HttpError) -> KitResponse {
    KitResponse::json(
        err.status,
        &json!({
            "type": "error",
            "status": err.status,
            "error": err.to_json(app.config().app.dev),
        }),
    )
}

fn node_json(level: &EncodedLevel) -> Value {
    match level.kind {
        LevelKind::Data => json!({
            "type": "data",
            "data": level.own,
            "uses": level.uses,
        }),
        LevelKind::Skip => json!({"type": "skip"}),
        LevelKind::Null => Value::Null,
    }
}

fn data_response(page: &PageData) -> KitResponse {
    let nodes: Vec<Value> = page.levels.iter().map(node_json).collect();
    KitResponse::json(
        200,
        &json!({
            "type": "data",
            "nodes": nodes,
            "data": page.data,
        }),
    )
}

fn hydration_payload(matched: &MatchedRoute, page: &PageData, status: u16) -> Value {
    let nodes: Vec<Value> = page
        .levels
        .iter()
        .map(|l| match &l.server {
            Some(server) => json!({"type": "data", "data": server, "uses": l.uses}),
            None => Value::Null,
        })
        .collect();
    let params: Map<String, Value> = matched
        .params
        .iter()
        .map(|(k, v)| (k.to_string(), Value::String(v.clone())))
        .collect();
    json!({
        "type": "data",
        "route_id": &*matched.route.id,
        "params": params,
        "status": status,
        "nodes": nodes,
        "data": page.data,
    })
}

fn html_document(app: &App, ctx: &RequestContext, matched: &MatchedRoute, page: PageData) -> KitResponse {
    let route = &matched.route;
    let context = page_context(ctx, Some(matched), 200, None);
    let rendered = if route.options.ssr {
        let levels = page
            .levels
            .iter()
            .map(|l| RenderLevel {
                node_id: &l.node_id,
                template: l.template.as_deref(),
                data: &l.merged,
            })
            .collect();
        match app.renderer().render_page(&PageRender {
            levels,
            page: &context,
        }) {
            Ok(r) => r,
            Err(e) => {
                let err = HttpError::internal(format!("render failed: {e:#}"));
                return render_boundary(app, ctx, matched, &err, ErrorOrigin::Leaf, &page.levels);
            }
        }
    } else {
        super::Rendered::default()
    };

    let payload = route
        .options
        .csr
        .then(|| hydration_payload(matched, &page, 200));
    let data_id = &app.config().app.data_id;
    let document = app.shell().render(
        &rendered.head,
        &rendered.body,
        payload.as_ref().map(|p| (data_id.as_str(), p)),
    );
    KitResponse::html(200, document)
}

/// Boundary that handles an error raised at `origin` of `route`.
///
/// A layout error can only be caught above that layout; a leaf error is caught
/// by the nearest boundary at or above the leaf.
fn select_boundary(route: &RouteDefinition, origin: ErrorOrigin) -> Option<&ErrorBoundary> {
    let limit = match origin {
        ErrorOrigin::Layout(index) => match route.layouts.get(index) {
            Some(layout) => layout.depth,
            None => return None,
        },
        ErrorOrigin::Leaf => route.depth + 1,
    };
    route
        .errors
        .iter()
        .filter(|b| b.depth < limit)
        .max_by_key(|b| b.depth)
}

fn error_document(
    app: &App,
    ctx: &RequestContext,
    context: &PageContext,
    layouts: Vec<RenderLevel<'_>>,
    template: Option<&str>,
    data: &Map<String, Value>,
) -> String {
    let rendered = app.renderer().render_error(&ErrorRender {
        layouts,
        template,
        data,
        page: context,
    });
    let (head, body) = match rendered {
        Ok(r) => (r.head, r.body),
        Err(e) => {
            error!(
                request_id = %ctx.id,
                template = ?template,
                error = %format!("{e:#}"),
                "Error page failed to render"
            );
            (String::new(), fallback_error_body(context))
        }
    };
    app.shell().render(&head, &body, None)
}

/// Render `err` through the nearest error boundary of `matched`.
fn render_boundary(
    app: &App,
    ctx: &RequestContext,
    matched: &MatchedRoute,
    err: &HttpError,
    origin: ErrorOrigin,
    levels: &[EncodedLevel],
) -> KitResponse {
    log_error(ctx, err);
    if ctx.is_data_request {
        return data_error(app, err);
    }
    let route = &matched.route;
    let boundary = select_boundary(route, origin);
    let context = page_context(
        ctx,
        Some(matched),
        err.status,
        Some(err.to_json(app.config().app.dev)),
    );

    let layouts: Vec<RenderLevel<'_>> = match boundary {
        Some(b) => levels
            .iter()
            .take(route.layouts.len())
            .filter(|l| l.depth <= b.depth)
            .map(|l| RenderLevel {
                node_id: &l.node_id,
                template: l.template.as_deref(),
                data: &l.merged,
            })
            .collect(),
        None => Vec::new(),
    };
    let empty = Map::new();
    let data = layouts.last().map_or(&empty, |l| l.data);
    let document = error_document(
        app,
        ctx,
        &context,
        layouts,
        boundary.map(|b| b.template.as_str()),
        data,
    );
    KitResponse::html(err.status, document)
}

/// 404/405 and endpoint errors: root error boundary inside the root layout.
fn root_error(app: &App, ctx: &RequestContext, table: &RouteTable, err: &HttpError, html: bool) -> KitResponse {
    log_error(ctx, err);
    if !html {
        if ctx.is_data_request {
            return data_error(app, err);
        }
        return KitResponse::json(err.status, &err.to_json(app.config().app.dev));
    }
    let context = page_context(ctx, None, err.status, Some(err.to_json(app.config().app.dev)));
    let empty = Map::new();
    let mut layouts = Vec::new();
    if let (Some(_), Some(template)) = (table.root_error(), table.root_layout_template()) {
        layouts.push(RenderLevel {
            node_id: "/",
            template: Some(template),
            data: &empty,
        });
    }
    let document = error_document(app, ctx, &context, layouts, table.root_error(), &empty);
    KitResponse::html(err.status, document)
}

/// Turn a pipeline outcome into a response.
pub(crate) fn respond_outcome(
    app: &App,
    ctx: &RequestContext,
    matched: &MatchedRoute,
    outcome: LoadOutcome,
) -> KitResponse {
    match outcome {
        LoadOutcome::Aborted => KitResponse::empty(499),
        LoadOutcome::Redirect { status, location } => KitResponse::redirect(status, &location),
        LoadOutcome::Error {
            error,
            origin,
            levels,
        } => render_boundary(app, ctx, matched, &error, origin, &levels),
        LoadOutcome::Data(page) if ctx.is_data_request => data_response(&page),
        LoadOutcome::Data(page) => html_document(app, ctx, matched, page),
    }
}

pub(crate) fn not_found(app: &App, ctx: &RequestContext, table: &RouteTable, html: bool) -> KitResponse {
    let err = HttpError::not_found(ctx.request.url.path());
    root_error(app, ctx, table, &err, html)
}

pub(crate) fn method_not_allowed(
    app: &App,
    ctx: &RequestContext,
    table: &RouteTable,
    allowed: &[String],
    html: bool,
) -> KitResponse {
    let err = HttpError::method_not_allowed(ctx.request.method.as_str());
    let mut res = root_error(app, ctx, table, &err, html);
    res.set_header("allow", allowed.join(", "));
    res
}

/// Redirect or error returned by an endpoint handler.
pub(crate) fn respond_endpoint_error(
    app: &App,
    ctx: &RequestContext,
    table: &RouteTable,
    signal: LoadSignal,
) -> KitResponse {
    match signal {
        LoadSignal::Redirect { status, location } => KitResponse::redirect(status, &location),
        LoadSignal::Error(err) if err.status == 499 && ctx.signal.is_aborted() => KitResponse::empty(499),
        LoadSignal::Error(err) => {
            let html = prefers_html(ctx.request.header("accept"));
            root_error(app, ctx, table, &err, html)
        }
    }
}

/// 308 to the canonical form of `url` when the route pins its trailing slash.
pub(crate) fn trailing_slash_redirect(route: &RouteDefinition, url: &Url) -> Option<KitResponse> {
    let path = url.path();
    if path == "/" {
        return None;
    }
    let target = match (route.options.trailing_slash, path.ends_with('/')) {
        (TrailingSlash::Never, true) => {
            let trimmed = path.trim_end_matches('/');
            if trimmed.is_empty() { "/".to_string() } else { trimmed.to_string() }
        }
        (TrailingSlash::Always, false) => format!("{path}/"),
        _ => return None,
    };
    let location = match url.query() {
        Some(q) => format!("{target}?{q}"),
        None => target,
    };
    Some(KitResponse::redirect(308, &location))
}

/// Apply everything accumulated on `ctx` to the outgoing response.
pub(crate) fn finalize(ctx: &mut RequestContext, mut response: KitResponse) -> KitResponse {
    if ctx.signal.is_aborted() {
        ctx.discard_response_state();
        return KitResponse::empty(499);
    }
    for (name, value) in ctx.response_headers() {
        if response.header(name).is_none() {
            response.headers.push((name.clone(), value.clone()));
        }
    }
    for cookie in ctx.set_cookies() {
        response.append_header("set-cookie", cookie.to_header_value());
    }
    response.set_header("x-request-id", ctx.id.to_string());
    if ctx.request.method == Method::HEAD {
        response.body.clear();
    }
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routes::{RouteOptions, SegmentSpec};
    use std::sync::Arc;

    fn route(trailing_slash: TrailingSlash) -> RouteDefinition {
        RouteDefinition {
            id: Arc::from("/about"),
            pattern: vec![SegmentSpec::Literal("about".into())],
            order: 0,
            depth: 1,
            layouts: Vec::new(),
            page: None,
            endpoint: None,
            errors: vec![
                ErrorBoundary {
                    node_id: Arc::from("/"),
                    depth: 0,
                    template: "root-error".into(),
                },
                ErrorBoundary {
                    node_id: Arc::from("/about"),
                    depth: 1,
                    template: "about-error".into(),
                },
            ],
            options: RouteOptions {
                trailing_slash,
                ..RouteOptions::default()
            },
            entries_fn: None,
            matchers: Default::default(),
            param_names: Vec::new(),
        }
    }

    #[test]
    fn test_trailing_slash_redirects_keep_query() {
        let url = Url::parse("http://localhost/about/?x=1").unwrap();
        let res = trailing_slash_redirect(&route(TrailingSlash::Never), &url).unwrap();
        assert_eq!(res.status, 308);
        assert_eq!(res.header("location"), Some("/about?x=1"));

        let url = Url::parse("http://localhost/about").unwrap();
        let res = trailing_slash_redirect(&route(TrailingSlash::Always), &url).unwrap();
        assert_eq!(res.header("location"), Some("/about/"));
        assert!(trailing_slash_redirect(&route(TrailingSlash::Ignore), &url).is_none());
    }

    #[test]
    fn test_leaf_error_uses_own_boundary() {
        let r = route(TrailingSlash::Ignore);
        let b = select_boundary(&r, ErrorOrigin::Leaf).unwrap();
        assert_eq!(b.template, "about-error");
    }
}
