//! # Response Module
//!
//! Turns a pipeline outcome into a [`KitResponse`].
//!
//! ## Overview
//!
//! The builder checks, in order:
//!
//! 1. redirect: 3xx with `Location`, no body
//! 2. error: the nearest error boundary rendered inside the layouts above it,
//!    or a JSON error body for data requests
//! 3. data request: `{"type":"data","nodes":[..],"data":{..}}`
//! 4. HTML: page nested in its layouts, inserted into the [`AppShell`] with the
//!    server data embedded for hydration
//!
//! Accumulated response headers and cookies are applied on every path except
//! an aborted request.
//!
//! ## Rendering
//!
//! Component rendering sits behind the [`Render`] trait. [`TemplateRenderer`]
//! is the minijinja implementation: templates are keyed by slot name and each
//! layout receives its child's markup as `slot`.

mod builder;
pub(crate) mod negotiate;
mod render;
mod shell;

pub(crate) use builder::{
    finalize, method_not_allowed, not_found, respond_endpoint_error, respond_outcome,
    trailing_slash_redirect,
};
pub use negotiate::{prefers_html, prefers_json, strip_data_suffix, DATA_SUFFIX};
pub use render::{
    escape_html, ErrorRender, PageContext, PageRender, Render, RenderLevel, Rendered,
    TemplateRenderer,
};
pub use shell::{AppShell, DEFAULT_SHELL};

use crate::context::HeaderVec;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::Arc;

/// A response produced by the app, independent of the HTTP front-end.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct KitResponse {
    pub status: u16,
    pub headers: HeaderVec,
    pub body: Vec<u8>,
}

impl KitResponse {
    #[must_use]
    pub fn new(status: u16) -> Self {
        Self {
            status,
            headers: HeaderVec::new(),
            body: Vec::new(),
        }
    }

    #[must_use]
    pub fn html(status: u16, body: impl Into<String>) -> Self {
        let mut res = Self::new(status);
        res.set_header("content-type", "text/html; charset=utf-8");
        res.body = body.into().into_bytes();
        res
    }

    #[must_use]
    pub fn json(status: u16, value: &Value) -> Self {
        let mut res = Self::new(status);
        res.set_header("content-type", "application/json");
        res.body = value.to_string().into_bytes();
        res
    }

    #[must_use]
    pub fn text(status: u16, body: impl Into<String>) -> Self {
        let mut res = Self::new(status);
        res.set_header("content-type", "text/plain; charset=utf-8");
        res.body = body.into().into_bytes();
        res
    }

    #[must_use]
    pub fn redirect(status: u16, location: &str) -> Self {
        let mut res = Self::new(status);
        res.set_header("location", location);
        res
    }

    /// No body, no headers
    #[must_use]
    pub fn empty(status: u16) -> Self {
        Self::new(status)
    }

    /// Get a header by name (case-insensitive)
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Every value of a repeatable header such as `set-cookie`
    pub fn header_values<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.headers
            .iter()
            .filter(move |(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Replace any existing value of `name`.
    pub fn set_header(&mut self, name: &str, value: impl Into<String>) {
        let name = name.to_ascii_lowercase();
        self.headers.retain(|(k, _)| **k != *name);
        self.headers.push((Arc::from(name), value.into()));
    }

    /// Add a value without replacing existing ones.
    pub fn append_header(&mut self, name: &str, value: impl Into<String>) {
        self.headers
            .push((Arc::from(name.to_ascii_lowercase()), value.into()));
    }

    #[must_use]
    pub fn content_type(&self) -> Option<&str> {
        self.header("content-type")
    }

    /// Body as UTF-8, lossy
    #[must_use]
    pub fn text_body(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    pub fn json_body<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_slice(&self.body)
    }

    #[must_use]
    pub fn ok(&self) -> bool {
        (200..300).contains(&self.status)
    }

    #[must_use]
    pub fn is_redirect(&self) -> bool {
        (300..400).contains(&self.status)
    }
}
