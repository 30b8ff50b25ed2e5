use super::core::ParentChain;
use super::data::{LoadData, Uses};
use super::fetch::{self, FetchContext, FetchRequest};
use crate::app::App;
use crate::context::{AbortSignal, Cookie, KitRequest, RequestContext};
use crate::error::{FetchError, HttpError};
use crate::response::KitResponse;
use crate::routes::{MatchedRoute, ParamVec};
use http::Method;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};
use url::Url;

/// Control flow out of a load or endpoint.
#[derive(Debug, Clone, PartialEq)]
pub enum LoadSignal {
    /// Stop and redirect. Status must be 300..=308.
    Redirect { status: u16, location: String },
    /// Stop and render the nearest error boundary.
    Error(HttpError),
}

impl LoadSignal {
    #[must_use]
    pub fn redirect(status: u16, location: impl Into<String>) -> Self {
        LoadSignal::Redirect {
            status,
            location: location.into(),
        }
    }

    #[must_use]
    pub fn error(status: u16, message: impl Into<String>) -> Self {
        LoadSignal::Error(HttpError::new(status, message))
    }
}

impl From<HttpError> for LoadSignal {
    fn from(err: HttpError) -> Self {
        LoadSignal::Error(err)
    }
}

impl From<FetchError> for LoadSignal {
    fn from(err: FetchError) -> Self {
        LoadSignal::Error(HttpError::internal(err.to_string()))
    }
}

impl From<anyhow::Error> for LoadSignal {
    fn from(err: anyhow::Error) -> Self {
        LoadSignal::Error(HttpError::internal(format!("{err:#}")))
    }
}

/// Direct return value of an endpoint handler.
#[derive(Debug, Clone, PartialEq)]
pub enum EndpointReply {
    Response(KitResponse),
    Json(Value),
    Text(String),
}

impl EndpointReply {
    pub fn json<T: Serialize>(value: &T) -> Result<Self, LoadSignal> {
        serde_json::to_value(value)
            .map(EndpointReply::Json)
            .map_err(|e| LoadSignal::Error(HttpError::internal(e.to_string())))
    }

    #[must_use]
    pub fn text(body: impl Into<String>) -> Self {
        EndpointReply::Text(body.into())
    }

    #[must_use]
    pub fn into_response(self) -> KitResponse {
        match self {
            EndpointReply::Response(r) => r,
            EndpointReply::Json(v) => KitResponse::json(200, &v),
            EndpointReply::Text(t) => KitResponse::text(200, t),
        }
    }
}

impl From<KitResponse> for EndpointReply {
    fn from(res: KitResponse) -> Self {
        EndpointReply::Response(res)
    }
}

fn set_headers<I, K, V>(ctx: &mut RequestContext, headers: I) -> Result<(), HttpError>
where
    I: IntoIterator<Item = (K, V)>,
    K: AsRef<str>,
    V: Into<String>,
{
    for (name, value) in headers {
        ctx.set_header(name.as_ref(), value)?;
    }
    Ok(())
}

/// Argument of every load function.
///
/// Reads of the url, params and parent data are tracked into [`Uses`] so the
/// client knows which loads to rerun on navigation.
pub struct LoadEvent<'a> {
    pub(crate) app: &'a App,
    pub(crate) ctx: &'a mut RequestContext,
    pub(crate) matched: &'a MatchedRoute,
    pub(crate) parent: &'a mut ParentChain,
    pub(crate) server_data: Option<&'a LoadData>,
    pub(crate) node_id: &'a str,
    pub(crate) server: bool,
    pub(crate) uses: Uses,
}

impl<'a> LoadEvent<'a> {
    pub fn url(&mut self) -> &Url {
        self.uses.url = true;
        &self.ctx.request.url
    }

    /// A query parameter; only this name is tracked.
    pub fn search_param(&mut self, name: &str) -> Option<String> {
        self.uses.search_params.insert(name.to_string());
        self.ctx
            .request
            .url
            .query_pairs()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.into_owned())
    }

    pub fn param(&mut self, name: &str) -> Option<&str> {
        self.uses.params.insert(name.to_string());
        self.matched.param(name)
    }

    pub fn params(&mut self) -> &ParamVec {
        for (name, _) in &self.matched.params {
            self.uses.params.insert(name.to_string());
        }
        &self.matched.params
    }

    #[must_use]
    pub fn route_id(&self) -> &str {
        &self.matched.route.id
    }

    /// Id of the node whose load is running
    #[must_use]
    pub fn node_id(&self) -> &str {
        self.node_id
    }

    #[must_use]
    pub fn request(&self) -> &KitRequest {
        &self.ctx.request
    }

    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.ctx.request.header(name)
    }

    #[must_use]
    pub fn cookie(&self, name: &str) -> Option<&str> {
        self.ctx.cookie(name)
    }

    pub fn set_cookie(&mut self, cookie: Cookie) {
        self.ctx.set_cookie(cookie);
    }

    #[must_use]
    pub fn locals(&self) -> &Map<String, Value> {
        &self.ctx.locals
    }

    pub fn locals_mut(&mut self) -> &mut Map<String, Value> {
        &mut self.ctx.locals
    }

    /// Response headers; last write wins per name across all levels.
    pub fn set_headers<I, K, V>(&mut self, headers: I) -> Result<(), HttpError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<String>,
    {
        set_headers(self.ctx, headers)
    }

    /// Merged data of every level above this one.
    pub fn parent(&mut self) -> &LoadData {
        self.uses.parent = true;
        self.parent.resolve(self.app, self.ctx, self.matched)
    }

    /// Data returned by the server load of the same level (universal loads only).
    #[must_use]
    pub fn data(&self) -> Option<&LoadData> {
        self.server_data
    }

    /// Mark a dependency that `invalidate(url)` can later target.
    pub fn depends(&mut self, url: impl Into<String>) {
        self.uses.dependencies.insert(url.into());
    }

    /// Fetch a URL. Same-origin URLs are answered by the app itself.
    pub fn fetch(&mut self, request: impl Into<FetchRequest>) -> Result<KitResponse, FetchError> {
        let request = request.into();
        self.uses.dependencies.insert(request.url.clone());
        let fc = FetchContext::new(self.app, self.ctx);
        fetch::fetch(self.app, &fc, request)
    }

    /// Issue several fetches concurrently; returns when all complete.
    pub fn fetch_all(&mut self, requests: Vec<FetchRequest>) -> Vec<Result<KitResponse, FetchError>> {
        for r in &requests {
            self.uses.dependencies.insert(r.url.clone());
        }
        let fc = FetchContext::new(self.app, self.ctx);
        fetch::fetch_all(self.app, &fc, requests)
    }

    #[must_use]
    pub fn is_server(&self) -> bool {
        self.server
    }

    #[must_use]
    pub fn is_data_request(&self) -> bool {
        self.ctx.is_data_request
    }

    #[must_use]
    pub fn is_prerendering(&self) -> bool {
        self.ctx.mode.is_prerender()
    }

    #[must_use]
    pub fn signal(&self) -> &AbortSignal {
        &self.ctx.signal
    }
}

/// Argument of every endpoint handler.
pub struct EndpointEvent<'a> {
    pub(crate) app: &'a App,
    pub(crate) ctx: &'a mut RequestContext,
    pub(crate) matched: &'a MatchedRoute,
}

impl<'a> EndpointEvent<'a> {
    #[must_use]
    pub fn request(&self) -> &KitRequest {
        &self.ctx.request
    }

    #[must_use]
    pub fn method(&self) -> &Method {
        &self.ctx.request.method
    }

    #[must_use]
    pub fn url(&self) -> &Url {
        &self.ctx.request.url
    }

    #[must_use]
    pub fn route_id(&self) -> &str {
        &self.matched.route.id
    }

    #[must_use]
    pub fn param(&self, name: &str) -> Option<&str> {
        self.matched.param(name)
    }

    #[must_use]
    pub fn params(&self) -> &ParamVec {
        &self.matched.params
    }

    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.ctx.request.header(name)
    }

    #[must_use]
    pub fn body(&self) -> &[u8] {
        &self.ctx.request.body
    }

    /// Body parsed as JSON; a malformed body is a 400.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, HttpError> {
        serde_json::from_slice(&self.ctx.request.body)
            .map_err(|e| HttpError::new(400, format!("invalid JSON body: {e}")))
    }

    pub fn text(&self) -> Result<&str, HttpError> {
        std::str::from_utf8(&self.ctx.request.body)
            .map_err(|_| HttpError::new(400, "request body is not valid UTF-8"))
    }

    #[must_use]
    pub fn locals(&self) -> &Map<String, Value> {
        &self.ctx.locals
    }

    pub fn locals_mut(&mut self) -> &mut Map<String, Value> {
        &mut self.ctx.locals
    }

    #[must_use]
    pub fn cookie(&self, name: &str) -> Option<&str> {
        self.ctx.cookie(name)
    }

    pub fn set_cookie(&mut self, cookie: Cookie) {
        self.ctx.set_cookie(cookie);
    }

    pub fn set_headers<I, K, V>(&mut self, headers: I) -> Result<(), HttpError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<String>,
    {
        set_headers(self.ctx, headers)
    }

    pub fn fetch(&mut self, request: impl Into<FetchRequest>) -> Result<KitResponse, FetchError> {
        let fc = FetchContext::new(self.app, self.ctx);
        fetch::fetch(self.app, &fc, request.into())
    }

    pub fn fetch_all(&mut self, requests: Vec<FetchRequest>) -> Vec<Result<KitResponse, FetchError>> {
        let fc = FetchContext::new(self.app, self.ctx);
        fetch::fetch_all(self.app, &fc, requests)
    }

    #[must_use]
    pub fn is_prerendering(&self) -> bool {
        self.ctx.mode.is_prerender()
    }

    #[must_use]
    pub fn signal(&self) -> &AbortSignal {
        &self.ctx.signal
    }
}
