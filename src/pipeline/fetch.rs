//! `fetch` for load functions and endpoints.
//!
//! Relative and same-origin URLs are answered by calling back into
//! [`App::respond_with`] with the nesting depth incremented; beyond
//! `fetch.max_depth` the call fails with [`FetchError::DepthExceeded`]. The
//! caller's cookies and configured headers are forwarded. Other origins go
//! through the app's [`ExternalFetch`].

use crate::app::App;
use crate::context::{AbortSignal, HeaderVec, KitRequest, RequestContext, RequestMode, RequestOptions};
use crate::error::FetchError;
use crate::ids::RequestId;
use crate::response::KitResponse;
use http::Method;
use once_cell::sync::OnceCell;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, warn};
use url::Url;

/// A request issued from a load or endpoint.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchRequest {
    pub method: Method,
    /// Absolute URL or a path relative to the current request
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl FetchRequest {
    #[must_use]
    pub fn get(url: impl Into<String>) -> Self {
        Self::new(Method::GET, url)
    }

    #[must_use]
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: Vec::new(),
            body: Vec::new(),
        }
    }

    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    #[must_use]
    pub fn body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }

    /// JSON body with a matching content type.
    pub fn json<T: Serialize>(self, value: &T) -> Result<Self, serde_json::Error> {
        let body = serde_json::to_vec(value)?;
        Ok(self.header("content-type", "application/json").body(body))
    }
}

impl From<&str> for FetchRequest {
    fn from(url: &str) -> Self {
        FetchRequest::get(url)
    }
}

impl From<String> for FetchRequest {
    fn from(url: String) -> Self {
        FetchRequest::get(url)
    }
}

/// Transport for URLs outside the app's origin.
pub trait ExternalFetch: Send + Sync {
    fn fetch(&self, url: &Url, request: &FetchRequest) -> Result<KitResponse, FetchError>;
}

/// Default [`ExternalFetch`]: a lazily built blocking `reqwest` client.
#[derive(Debug, Default)]
pub struct ReqwestFetch {
    client: OnceCell<reqwest::blocking::Client>,
}

impl ReqwestFetch {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl ExternalFetch for ReqwestFetch {
    fn fetch(&self, url: &Url, request: &FetchRequest) -> Result<KitResponse, FetchError> {
        let external = |reason: String| FetchError::External {
            url: url.to_string(),
            reason,
        };
        let client = self
            .client
            .get_or_try_init(|| reqwest::blocking::Client::builder().build())
            .map_err(|e| external(e.to_string()))?;
        let method = reqwest::Method::from_bytes(request.method.as_str().as_bytes())
            .map_err(|e| external(e.to_string()))?;

        let mut builder = client.request(method, url.as_str());
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if !request.body.is_empty() {
            builder = builder.body(request.body.clone());
        }
        let response = builder.send().map_err(|e| external(e.to_string()))?;

        let status = response.status().as_u16();
        let headers: HeaderVec = response
            .headers()
            .iter()
            .filter_map(|(k, v)| {
                v.to_str()
                    .ok()
                    .map(|v| (Arc::from(k.as_str()), v.to_string()))
            })
            .collect();
        let body = response.bytes().map_err(|e| external(e.to_string()))?.to_vec();
        Ok(KitResponse {
            status,
            headers,
            body,
        })
    }
}

/// Owned snapshot of what a fetch needs from its originating request, so it
/// can move into a coroutine.
#[derive(Debug, Clone)]
pub(crate) struct FetchContext {
    base: Url,
    request_id: RequestId,
    depth: usize,
    signal: AbortSignal,
    mode: RequestMode,
    cookie: Option<String>,
    forwarded: Vec<(String, String)>,
}

impl FetchContext {
    pub(crate) fn new(app: &App, ctx: &RequestContext) -> Self {
        let forwarded = app
            .config()
            .fetch
            .forward_headers
            .iter()
            .filter_map(|name| {
                ctx.request
                    .header(name)
                    .map(|v| (name.to_ascii_lowercase(), v.to_string()))
            })
            .collect();
        Self {
            base: ctx.request.url.clone(),
            request_id: ctx.id,
            depth: ctx.depth,
            signal: ctx.signal.clone(),
            mode: ctx.mode.clone(),
            cookie: ctx.cookie_header(),
            forwarded,
        }
    }
}

fn same_origin(a: &Url, b: &Url) -> bool {
    a.scheme() == b.scheme() && a.host_str() == b.host_str() && a.port_or_known_default() == b.port_or_known_default()
}

pub(crate) fn fetch(app: &App, fc: &FetchContext, request: FetchRequest) -> Result<KitResponse, FetchError> {
    if fc.signal.is_aborted() {
        return Err(FetchError::Aborted { url: request.url });
    }
    let url = fc.base.join(&request.url).map_err(|e| FetchError::InvalidUrl {
        url: request.url.clone(),
        reason: e.to_string(),
    })?;

    if !same_origin(&url, &fc.base) {
        debug!(request_id = %fc.request_id, url = %url, "External fetch");
        return app.external_fetch().fetch(&url, &request);
    }

    let max_depth = app.config().fetch.max_depth;
    if fc.depth >= max_depth {
        warn!(
            request_id = %fc.request_id,
            url = %url,
            max_depth,
            "Internal fetch depth exceeded"
        );
        return Err(FetchError::DepthExceeded {
            url: url.to_string(),
            depth: max_depth,
        });
    }

    let mut nested = KitRequest::new(request.method.clone(), url);
    for (name, value) in &fc.forwarded {
        nested = nested.with_header(name, value.clone());
    }
    if let Some(cookie) = &fc.cookie {
        nested = nested.with_header("cookie", cookie.clone());
    }
    for (name, value) in &request.headers {
        nested = nested.with_header(name, value.clone());
    }
    nested.body = request.body;

    let path = nested.url.path().to_string();
    debug!(
        request_id = %fc.request_id,
        path = %path,
        depth = fc.depth + 1,
        "Internal fetch"
    );
    let response = app.respond_with(
        nested,
        RequestOptions {
            depth: fc.depth + 1,
            signal: fc.signal.clone(),
            mode: fc.mode.clone(),
            parent: Some(fc.request_id),
            locals: serde_json::Map::new(),
        },
    );

    if fc.signal.is_aborted() {
        return Err(FetchError::Aborted { url: request.url });
    }
    if let RequestMode::Prerender(log) = &fc.mode {
        log.record_fetch(&path, response.status);
    }
    Ok(response)
}

pub(crate) fn fetch_all(
    app: &App,
    fc: &FetchContext,
    requests: Vec<FetchRequest>,
) -> Vec<Result<KitResponse, FetchError>> {
    let stack_size = app.runtime().stack_size;
    let handles: Vec<_> = requests
        .into_iter()
        .map(|request| {
            let url = request.url.clone();
            let app = app.clone();
            let fc = fc.clone();
            // SAFETY: the closure owns everything it touches and the may runtime
            // is initialized lazily on first spawn.
            #[allow(unsafe_code)]
            let spawned = unsafe {
                may::coroutine::Builder::new()
                    .stack_size(stack_size)
                    .spawn(move || fetch(&app, &fc, request))
            };
            (url, spawned)
        })
        .collect();

    handles
        .into_iter()
        .map(|(url, spawned)| match spawned {
            Ok(handle) => handle.join().unwrap_or_else(|_| {
                Err(FetchError::External {
                    url,
                    reason: "fetch coroutine panicked".to_string(),
                })
            }),
            Err(e) => Err(FetchError::External {
                url,
                reason: e.to_string(),
            }),
        })
        .collect()
}
