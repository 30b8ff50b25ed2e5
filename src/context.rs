//! Per-request state.
//!
//! A [`RequestContext`] is created by [`App::respond_with`](crate::app::App::respond_with)
//! for every request (internal fetches included), passed by reference through
//! the load pipeline and the response builder, and dropped with the response.
//! Nothing in here is shared between requests except the [`AbortSignal`], which
//! an internal fetch inherits from the request that issued it.

use crate::error::HttpError;
use crate::ids::RequestId;
use http::Method;
use serde_json::{Map, Value};
use smallvec::SmallVec;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use url::Url;

/// Maximum inline headers/cookies before heap allocation
pub const MAX_INLINE_HEADERS: usize = 16;

/// Header (or cookie) pairs. Names are lower-cased on insert.
pub type HeaderVec = SmallVec<[(Arc<str>, String); MAX_INLINE_HEADERS]>;

/// Origin used when a request is built from a bare path.
pub const DEFAULT_ORIGIN: &str = "http://localhost";

/// An incoming request, independent of the HTTP front-end.
#[derive(Debug, Clone, PartialEq)]
pub struct KitRequest {
    pub method: Method,
    pub url: Url,
    pub headers: HeaderVec,
    pub body: Vec<u8>,
}

impl KitRequest {
    #[must_use]
    pub fn new(method: Method, url: Url) -> Self {
        Self {
            method,
            url,
            headers: HeaderVec::new(),
            body: Vec::new(),
        }
    }

    /// Resolve `target` (absolute URL or path) against `origin`.
    pub fn parse(method: Method, target: &str, origin: &Url) -> Result<Self, url::ParseError> {
        Ok(Self::new(method, origin.join(target)?))
    }

    /// `GET` for a path on [`DEFAULT_ORIGIN`].
    pub fn get(target: &str) -> Result<Self, url::ParseError> {
        let origin = Url::parse(DEFAULT_ORIGIN)?;
        Self::parse(Method::GET, target, &origin)
    }

    #[must_use]
    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers
            .push((Arc::from(name.to_ascii_lowercase()), value.into()));
        self
    }

    #[must_use]
    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }

    /// Get a header by name (case-insensitive per RFC 7230)
    #[inline]
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// The path plus query, as sent on the request line
    #[must_use]
    pub fn target(&self) -> String {
        match self.url.query() {
            Some(q) => format!("{}?{q}", self.url.path()),
            None => self.url.path().to_string(),
        }
    }
}

/// `SameSite` cookie attribute
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SameSite {
    Strict,
    Lax,
    None,
}

impl fmt::Display for SameSite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SameSite::Strict => "Strict",
            SameSite::Lax => "Lax",
            SameSite::None => "None",
        })
    }
}

/// A cookie to send with the response.
///
/// Defaults follow the safe side: `Path=/`, `HttpOnly`, `Secure`, `SameSite=Lax`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cookie {
    pub name: String,
    pub value: String,
    pub path: String,
    pub max_age: Option<i64>,
    pub http_only: bool,
    pub secure: bool,
    pub same_site: Option<SameSite>,
}

impl Cookie {
    #[must_use]
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            path: "/".to_string(),
            max_age: None,
            http_only: true,
            secure: true,
            same_site: Some(SameSite::Lax),
        }
    }

    /// A cookie that deletes `name` on the client.
    #[must_use]
    pub fn removal(name: impl Into<String>) -> Self {
        Self::new(name, "").max_age(0)
    }

    #[must_use]
    pub fn path(mut self, path: impl Into<String>) -> Self {
        self.path = path.into();
        self
    }

    #[must_use]
    pub fn max_age(mut self, seconds: i64) -> Self {
        self.max_age = Some(seconds);
        self
    }

    #[must_use]
    pub fn http_only(mut self, on: bool) -> Self {
        self.http_only = on;
        self
    }

    #[must_use]
    pub fn secure(mut self, on: bool) -> Self {
        self.secure = on;
        self
    }

    #[must_use]
    pub fn same_site(mut self, same_site: Option<SameSite>) -> Self {
        self.same_site = same_site;
        self
    }

    /// Value of the `Set-Cookie` header
    #[must_use]
    pub fn to_header_value(&self) -> String {
        let mut out = format!(
            "{}={}; Path={}",
            self.name,
            urlencoding::encode(&self.value),
            self.path
        );
        if let Some(age) = self.max_age {
            out.push_str(&format!("; Max-Age={age}"));
        }
        if self.http_only {
            out.push_str("; HttpOnly");
        }
        if self.secure {
            out.push_str("; Secure");
        }
        if let Some(same_site) = self.same_site {
            out.push_str(&format!("; SameSite={same_site}"));
        }
        out
    }
}

/// Parse a `Cookie` request header into name/value pairs.
#[must_use]
pub fn parse_cookie_header(header: &str) -> HeaderVec {
    header
        .split(';')
        .filter_map(|pair| {
            let (name, value) = pair.split_once('=')?;
            let name = name.trim();
            if name.is_empty() {
                return None;
            }
            let value = value.trim().trim_matches('"');
            let value = urlencoding::decode(value)
                .map(|v| v.into_owned())
                .unwrap_or_else(|_| value.to_string());
            Some((Arc::from(name), value))
        })
        .collect()
}

/// Cancellation flag shared by a request and the internal fetches it issues.
#[derive(Debug, Clone, Default)]
pub struct AbortSignal(Arc<AtomicBool>);

impl AbortSignal {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn abort(&self) {
        self.0.store(true, Ordering::Release);
    }

    #[must_use]
    pub fn is_aborted(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Side channel filled while prerendering: internal fetches and their outcome.
#[derive(Debug, Default)]
pub struct PrerenderLog {
    fetched: Mutex<Vec<(String, u16)>>,
}

impl PrerenderLog {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_fetch(&self, path: &str, status: u16) {
        self.fetched
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((path.to_string(), status));
    }

    /// Take every recorded fetch.
    #[must_use]
    pub fn drain(&self) -> Vec<(String, u16)> {
        std::mem::take(&mut *self.fetched.lock().unwrap_or_else(PoisonError::into_inner))
    }
}

/// Whether a request is served live or rendered at build time.
#[derive(Debug, Clone, Default)]
pub enum RequestMode {
    #[default]
    Live,
    Prerender(Arc<PrerenderLog>),
}

impl RequestMode {
    #[must_use]
    pub fn is_prerender(&self) -> bool {
        matches!(self, RequestMode::Prerender(_))
    }
}

/// How a request entered the app.
#[derive(Debug, Clone, Default)]
pub struct RequestOptions {
    /// Internal fetch nesting; 0 for requests from the outside
    pub depth: usize,
    pub signal: AbortSignal,
    pub mode: RequestMode,
    /// Request that issued this one through `fetch`
    pub parent: Option<RequestId>,
    pub locals: Map<String, Value>,
}

/// Mutable state of one in-flight request.
#[derive(Debug)]
pub struct RequestContext {
    pub id: RequestId,
    pub parent: Option<RequestId>,
    pub request: KitRequest,
    /// Request-scoped values shared by every load of this request
    pub locals: Map<String, Value>,
    pub signal: AbortSignal,
    pub depth: usize,
    pub mode: RequestMode,
    /// `/__data.json` request
    pub is_data_request: bool,
    request_cookies: HeaderVec,
    response_headers: HeaderVec,
    set_cookies: Vec<Cookie>,
}

impl RequestContext {
    #[must_use]
    pub fn new(request: KitRequest, options: RequestOptions) -> Self {
        let id = RequestId::from_header(request.header("x-request-id"));
        let request_cookies = request
            .header("cookie")
            .map(parse_cookie_header)
            .unwrap_or_default();
        Self {
            id,
            parent: options.parent,
            request,
            locals: options.locals,
            signal: options.signal,
            depth: options.depth,
            mode: options.mode,
            is_data_request: false,
            request_cookies,
            response_headers: HeaderVec::new(),
            set_cookies: Vec::new(),
        }
    }

    /// Record a response header. Last write wins per name.
    ///
    /// `set-cookie` is refused: cookies go through [`set_cookie`](Self::set_cookie).
    pub fn set_header(&mut self, name: &str, value: impl Into<String>) -> Result<(), HttpError> {
        if name.eq_ignore_ascii_case("set-cookie") {
            return Err(HttpError::internal(
                "use set_cookie instead of set_headers to set cookies",
            ));
        }
        let name = name.to_ascii_lowercase();
        self.response_headers.retain(|(k, _)| **k != *name);
        self.response_headers.push((Arc::from(name), value.into()));
        Ok(())
    }

    #[must_use]
    pub fn response_headers(&self) -> &HeaderVec {
        &self.response_headers
    }

    /// Queue a cookie. A later cookie with the same name and path replaces it.
    pub fn set_cookie(&mut self, cookie: Cookie) {
        self.set_cookies
            .retain(|c| !(c.name == cookie.name && c.path == cookie.path));
        self.set_cookies.push(cookie);
    }

    #[must_use]
    pub fn set_cookies(&self) -> &[Cookie] {
        &self.set_cookies
    }

    /// Cookie value as seen by this request, including cookies set during it.
    #[must_use]
    pub fn cookie(&self, name: &str) -> Option<&str> {
        if let Some(set) = self.set_cookies.iter().rev().find(|c| c.name == name) {
            return if set.max_age == Some(0) {
                None
            } else {
                Some(set.value.as_str())
            };
        }
        self.request_cookies
            .iter()
            .find(|(k, _)| k.as_ref() == name)
            .map(|(_, v)| v.as_str())
    }

    /// `Cookie` header forwarded to internal fetches.
    #[must_use]
    pub fn cookie_header(&self) -> Option<String> {
        let mut pairs: Vec<(String, String)> = self
            .request_cookies
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect();
        for c in &self.set_cookies {
            pairs.retain(|(k, _)| *k != c.name);
            if c.max_age != Some(0) {
                pairs.push((c.name.clone(), c.value.clone()));
            }
        }
        if pairs.is_empty() {
            return None;
        }
        Some(
            pairs
                .iter()
                .map(|(k, v)| format!("{k}={}", urlencoding::encode(v)))
                .collect::<Vec<_>>()
                .join("; "),
        )
    }

    /// Drop everything accumulated for the response (aborted requests).
    pub fn discard_response_state(&mut self) {
        self.response_headers.clear();
        self.set_cookies.clear();
    }
}
