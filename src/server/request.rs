use crate::context::{HeaderVec, KitRequest};
use http::Method;
use may_minihttp::Request;
use std::io::{self, Read};
use std::sync::Arc;
use tracing::debug;
use url::Url;

/// Request bodies larger than this are rejected with 413.
pub const MAX_BODY_BYTES: u64 = 8 * 1024 * 1024;

/// Why a raw request could not become a [`KitRequest`].
#[derive(Debug)]
pub enum RequestError {
    Method(String),
    Target(String),
    BodyTooLarge,
    Io(io::Error),
}

impl RequestError {
    #[must_use]
    pub fn status(&self) -> u16 {
        match self {
            RequestError::Method(_) => 405,
            RequestError::Target(_) => 400,
            RequestError::BodyTooLarge => 413,
            RequestError::Io(_) => 400,
        }
    }
}

impl std::fmt::Display for RequestError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RequestError::Method(m) => write!(f, "unsupported method '{m}'"),
            RequestError::Target(t) => write!(f, "invalid request target '{t}'"),
            RequestError::BodyTooLarge => write!(f, "request body exceeds {MAX_BODY_BYTES} bytes"),
            RequestError::Io(e) => write!(f, "failed to read request body: {e}"),
        }
    }
}

impl std::error::Error for RequestError {}

/// Origin of a live request: `http://` plus the `Host` header, or the
/// configured fallback when the header is missing or unusable.
#[must_use]
pub fn request_origin(host: Option<&str>, fallback: &Url) -> Url {
    host.filter(|h| !h.is_empty() && !h.contains('/'))
        .and_then(|h| Url::parse(&format!("http://{h}")).ok())
        .unwrap_or_else(|| fallback.clone())
}

/// Resolve a request-line target against the request origin.
///
/// Only origin-form targets (`/path?query`) are accepted.
pub fn parse_target(method: &str, target: &str, origin: &Url) -> Result<(Method, Url), RequestError> {
    let method =
        Method::from_bytes(method.as_bytes()).map_err(|_| RequestError::Method(method.to_string()))?;
    if !target.starts_with('/') || target.starts_with("//") {
        return Err(RequestError::Target(target.to_string()));
    }
    let url = origin
        .join(target)
        .map_err(|_| RequestError::Target(target.to_string()))?;
    Ok((method, url))
}

/// Convert a `may_minihttp` request into a [`KitRequest`].
pub fn to_kit_request(req: Request, fallback_origin: &Url) -> Result<KitRequest, RequestError> {
    let headers: HeaderVec = req
        .headers()
        .iter()
        .map(|h| {
            (
                Arc::from(h.name.to_ascii_lowercase()),
                String::from_utf8_lossy(h.value).into_owned(),
            )
        })
        .collect();
    let host = headers
        .iter()
        .find(|(k, _)| k.as_ref() == "host")
        .map(|(_, v)| v.as_str());
    let origin = request_origin(host, fallback_origin);
    let (method, url) = parse_target(req.method(), req.path(), &origin)?;

    let mut body = Vec::new();
    let read = req
        .body()
        .take(MAX_BODY_BYTES + 1)
        .read_to_end(&mut body)
        .map_err(RequestError::Io)?;
    if read as u64 > MAX_BODY_BYTES {
        return Err(RequestError::BodyTooLarge);
    }

    debug!(
        method = %method,
        path = %url.path(),
        header_count = headers.len(),
        body_bytes = body.len(),
        "HTTP request parsed"
    );

    Ok(KitRequest {
        method,
        url,
        headers,
        body,
    })
}
