//! Link discovery in rendered HTML.

use once_cell::sync::Lazy;
use regex::Regex;
use url::Url;

static LINK_ATTR: Lazy<Regex> = Lazy::new(|| {
    #[allow(clippy::expect_used)]
    Regex::new(r#"(?i)\s(?:href|src)\s*=\s*(?:"([^"]*)"|'([^']*)'|([^\s>"']+))"#)
        .expect("link attribute regex is valid")
});

/// Same-origin paths referenced by `href` / `src` attributes of `html`.
///
/// Relative links resolve against `page`. Query strings and fragments are
/// dropped; each path appears once, in document order.
#[must_use]
pub fn extract_links(html: &str, page: &Url) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for caps in LINK_ATTR.captures_iter(html) {
        let Some(raw) = caps.get(1).or_else(|| caps.get(2)).or_else(|| caps.get(3)) else {
            continue;
        };
        let raw = decode_entities(raw.as_str().trim());
        if raw.is_empty() || raw.starts_with('#') {
            continue;
        }
        let Ok(mut url) = page.join(&raw) else {
            continue;
        };
        if url.origin() != page.origin() {
            continue;
        }
        url.set_query(None);
        url.set_fragment(None);
        let path = url.path().to_string();
        if !out.contains(&path) {
            out.push(path);
        }
    }
    out
}

fn decode_entities(raw: &str) -> String {
    if !raw.contains('&') {
        return raw.to_string();
    }
    raw.replace("&amp;", "&")
        .replace("&#x2F;", "/")
        .replace("&#47;", "/")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
}
