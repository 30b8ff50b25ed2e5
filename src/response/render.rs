use crate::routes::Discovered;
use anyhow::Context;
use minijinja::{context, AutoEscape, Environment, Value as TemplateValue};
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::fs;

/// Markup produced for one page.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Rendered {
    /// Inserted at `%kit.head%`
    pub head: String,
    /// Inserted at `%kit.body%`
    pub body: String,
}

/// Request facts visible to every template as `page`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PageContext {
    pub route_id: Option<String>,
    pub url: String,
    pub params: BTreeMap<String, String>,
    pub status: u16,
    pub error: Option<Value>,
}

/// One layout or page level handed to the renderer.
#[derive(Debug, Clone, Copy)]
pub struct RenderLevel<'a> {
    pub node_id: &'a str,
    pub template: Option<&'a str>,
    /// Data merged from the root down to this level
    pub data: &'a Map<String, Value>,
}

/// A page to render: layouts outer to inner, then the page itself.
#[derive(Debug, Clone)]
pub struct PageRender<'a> {
    pub levels: Vec<RenderLevel<'a>>,
    pub page: &'a PageContext,
}

/// An error boundary to render inside the layouts above it.
#[derive(Debug, Clone)]
pub struct ErrorRender<'a> {
    pub layouts: Vec<RenderLevel<'a>>,
    /// Boundary template; `None` renders the built-in fallback body
    pub template: Option<&'a str>,
    /// Data of the innermost layout kept around the boundary
    pub data: &'a Map<String, Value>,
    pub page: &'a PageContext,
}

/// Component rendering, as seen by the response builder.
pub trait Render: Send + Sync {
    /// Whether a template slot exists; checked once at build time
    fn has_template(&self, name: &str) -> bool;

    fn render_page(&self, page: &PageRender<'_>) -> anyhow::Result<Rendered>;

    fn render_error(&self, error: &ErrorRender<'_>) -> anyhow::Result<Rendered>;
}

/// Escape text for HTML content and attribute values.
#[must_use]
pub fn escape_html(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

/// Body of the built-in error page.
pub(crate) fn fallback_error_body(page: &PageContext) -> String {
    let message = page
        .error
        .as_ref()
        .and_then(|e| e.get("message"))
        .and_then(Value::as_str)
        .unwrap_or("Internal Error");
    format!(
        "<h1>{}</h1>\n<p>{}</p>",
        page.status,
        escape_html(message)
    )
}

/// [`Render`] backed by minijinja.
///
/// Every template is auto-escaped as HTML. A level template sees `data` (merged
/// data of its level), `page` ([`PageContext`]) and `slot` (the already
/// rendered markup of the inner level). An optional `<name>.head` template
/// contributes to the document head.
pub struct TemplateRenderer {
    env: Environment<'static>,
}

impl Default for TemplateRenderer {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for TemplateRenderer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self.env.templates().map(|(n, _)| n).collect();
        f.debug_struct("TemplateRenderer").field("templates", &names).finish()
    }
}

impl TemplateRenderer {
    #[must_use]
    pub fn new() -> Self {
        let mut env = Environment::new();
        env.set_auto_escape_callback(|_| AutoEscape::Html);
        Self { env }
    }

    pub fn add_template(
        &mut self,
        name: impl Into<String>,
        source: impl Into<String>,
    ) -> Result<(), minijinja::Error> {
        self.env.add_template_owned(name.into(), source.into())
    }

    /// Load every template file found by route discovery.
    pub fn from_discovered(discovered: &Discovered) -> anyhow::Result<Self> {
        let mut renderer = Self::new();
        for (name, path) in &discovered.templates {
            let source = fs::read_to_string(path)
                .with_context(|| format!("Failed to read template {}", path.display()))?;
            renderer
                .add_template(name.clone(), source)
                .with_context(|| format!("Invalid template {}", path.display()))?;
        }
        Ok(renderer)
    }

    fn render_one(
        &self,
        name: &str,
        data: &Map<String, Value>,
        page: &PageContext,
        slot: &str,
    ) -> anyhow::Result<String> {
        let template = self
            .env
            .get_template(name)
            .with_context(|| format!("Unknown template '{name}'"))?;
        let rendered = template
            .render(context! {
                data => data,
                page => page,
                slot => TemplateValue::from_safe_string(slot.to_string()),
            })
            .with_context(|| format!("Failed to render template '{name}'"))?;
        Ok(rendered)
    }

    fn head_for(
        &self,
        name: &str,
        data: &Map<String, Value>,
        page: &PageContext,
    ) -> anyhow::Result<Option<String>> {
        let head = format!("{name}.head");
        if self.env.get_template(&head).is_err() {
            return Ok(None);
        }
        self.render_one(&head, data, page, "").map(Some)
    }

    /// Wrap `inner` in `levels`, innermost first.
    fn wrap(
        &self,
        levels: &[RenderLevel<'_>],
        page: &PageContext,
        mut inner: Rendered,
    ) -> anyhow::Result<Rendered> {
        let mut heads = Vec::new();
        for level in levels.iter().rev() {
            let Some(name) = level.template else {
                continue;
            };
            inner.body = self.render_one(name, level.data, page, &inner.body)?;
            if let Some(head) = self.head_for(name, level.data, page)? {
                heads.push(head);
            }
        }
        heads.reverse();
        if !inner.head.is_empty() {
            heads.push(std::mem::take(&mut inner.head));
        }
        inner.head = heads.join("\n");
        Ok(inner)
    }
}

impl Render for TemplateRenderer {
    fn has_template(&self, name: &str) -> bool {
        self.env.get_template(name).is_ok()
    }

    fn render_page(&self, page: &PageRender<'_>) -> anyhow::Result<Rendered> {
        self.wrap(&page.levels, page.page, Rendered::default())
    }

    fn render_error(&self, error: &ErrorRender<'_>) -> anyhow::Result<Rendered> {
        let inner = match error.template {
            Some(name) => Rendered {
                head: self
                    .head_for(name, error.data, error.page)?
                    .unwrap_or_default(),
                body: self.render_one(name, error.data, error.page, "")?,
            },
            None => Rendered {
                head: String::new(),
                body: fallback_error_body(error.page),
            },
        };
        self.wrap(&error.layouts, error.page, inner)
    }
}
