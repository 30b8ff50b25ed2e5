//! HTML document shell.
//!
//! The shell is the outermost HTML document. Rendered markup and hydration data
//! are substituted into three placeholders:
//!
//! - `%kit.head%` - head markup from the rendered levels
//! - `%kit.body%` - body markup (empty with `ssr: false`)
//! - `%kit.data%` - `<script type="application/json">` with the hydration
//!   payload (omitted with `csr: false`)

use anyhow::Context;
use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use serde_json::Value;
use std::fs;
use std::path::Path;

static PLACEHOLDER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"%kit\.(head|body|data)%").expect("valid placeholder regex"));

/// Shell used when no `app.template` is configured.
pub const DEFAULT_SHELL: &str = r#"<!doctype html>
<html lang="en">
	<head>
		<meta charset="utf-8" />
		<meta name="viewport" content="width=device-width, initial-scale=1" />
		%kit.head%
	</head>
	<body>
		<div id="kit-root">%kit.body%</div>
		%kit.data%
	</body>
</html>
"#;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppShell {
    template: String,
}

impl Default for AppShell {
    fn default() -> Self {
        Self {
            template: DEFAULT_SHELL.to_string(),
        }
    }
}

impl AppShell {
    #[must_use]
    pub fn new(template: impl Into<String>) -> Self {
        Self {
            template: template.into(),
        }
    }

    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let template = fs::read_to_string(path)
            .with_context(|| format!("Failed to read app shell {}", path.display()))?;
        if !template.contains("%kit.body%") {
            anyhow::bail!("app shell {} has no %kit.body% placeholder", path.display());
        }
        Ok(Self::new(template))
    }

    /// Fill the placeholders in one pass over the template; placeholder text
    /// inside the substituted markup is left as is. `data` is embedded in a
    /// JSON script element.
    #[must_use]
    pub fn render(&self, head: &str, body: &str, data: Option<(&str, &Value)>) -> String {
        let script = data
            .map(|(id, payload)| {
                format!(
                    r#"<script type="application/json" id="{id}">{}</script>"#,
                    escape_json_for_script(&payload.to_string())
                )
            })
            .unwrap_or_default();
        PLACEHOLDER
            .replace_all(&self.template, |caps: &Captures<'_>| match &caps[1] {
                "head" => head,
                "body" => body,
                _ => script.as_str(),
            })
            .into_owned()
    }
}

/// Make serialized JSON safe inside a `<script>` element.
#[must_use]
pub fn escape_json_for_script(json: &str) -> String {
    let mut out = String::with_capacity(json.len());
    for c in json.chars() {
        match c {
            '<' => out.push_str("\\u003c"),
            '>' => out.push_str("\\u003e"),
            '&' => out.push_str("\\u0026"),
            '\u{2028}' => out.push_str("\\u2028"),
            '\u{2029}' => out.push_str("\\u2029"),
            _ => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_script_breakout_is_escaped() {
        let shell = AppShell::new("%kit.head%|%kit.body%|%kit.data%");
        let html = shell.render("<title>x</title>", "<p>hi</p>", Some(("kit-data", &json!({"s": "</script><b>"}))));
        assert!(html.starts_with("<title>x</title>|<p>hi</p>|"));
        assert!(!html.contains("</script><b>"));
        assert!(html.contains(r"\u003c/script\u003e"));
        assert!(html.contains(r#"id="kit-data""#));
    }

    #[test]
    fn test_placeholders_in_rendered_markup_stay_literal() {
        let shell = AppShell::new("%kit.head%|%kit.body%|%kit.data%");
        let html = shell.render("<title>%kit.body%</title>", "<p>%kit.data%</p>", Some(("kit-data", &json!({}))));
        assert_eq!(
            html,
            r#"<title>%kit.body%</title>|<p>%kit.data%</p>|<script type="application/json" id="kit-data">{}</script>"#
        );
        assert_eq!(html.matches("<script").count(), 1);
    }

    #[test]
    fn test_no_data_leaves_no_script() {
        let html = AppShell::default().render("", "", None);
        assert!(!html.contains("<script"));
        assert!(!html.contains("%kit."));
    }

    #[test]
    fn test_shell_file_needs_body_placeholder() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("app.html");
        fs::write(&path, "<html></html>").unwrap();
        assert!(AppShell::from_file(&path).is_err());
    }
}
