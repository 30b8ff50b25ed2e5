use crate::response::KitResponse;
use dashmap::DashMap;
use may_minihttp::Response;
use once_cell::sync::Lazy;

/// `may_minihttp` only accepts `'static` header lines. Lines are interned so
/// repeated values (content types, `allow`, cache headers) are allocated once.
static HEADER_LINES: Lazy<DashMap<String, &'static str>> = Lazy::new(DashMap::new);

/// Headers whose values are unique per response or carry request input.
const PER_RESPONSE: [&str; 3] = ["x-request-id", "set-cookie", "location"];

fn header_line(name: &str, value: &str) -> &'static str {
    let line = format!("{name}: {value}");
    if PER_RESPONSE.contains(&name) {
        return Box::leak(line.into_boxed_str());
    }
    if let Some(interned) = HEADER_LINES.get(&line) {
        return *interned;
    }
    let leaked: &'static str = Box::leak(line.clone().into_boxed_str());
    *HEADER_LINES.entry(line).or_insert(leaked)
}

/// Reason phrase for the status line.
fn status_reason(status: u16) -> &'static str {
    match status {
        499 => "Client Closed Request",
        _ => http::StatusCode::from_u16(status)
            .ok()
            .and_then(|s| s.canonical_reason())
            .unwrap_or("Unknown"),
    }
}

/// Header values may not carry line breaks onto the wire.
fn is_safe(value: &str) -> bool {
    !value.contains(['\r', '\n'])
}

/// Copy a [`KitResponse`] onto the wire response.
pub fn write_response(res: &mut Response, response: KitResponse) {
    res.status_code(usize::from(response.status), status_reason(response.status));
    for (name, value) in &response.headers {
        // may_minihttp writes its own content-length
        if name.as_ref() == "content-length" || !is_safe(name) || !is_safe(value) {
            continue;
        }
        res.header(header_line(name, value));
    }
    res.body_vec(response.body);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_reason() {
        assert_eq!(status_reason(200), "OK");
        assert_eq!(status_reason(308), "Permanent Redirect");
        assert_eq!(status_reason(499), "Client Closed Request");
    }

    #[test]
    fn test_header_lines_are_interned() {
        let a = header_line("content-type", "text/html");
        let b = header_line("content-type", "text/html");
        assert_eq!(a, "content-type: text/html");
        assert!(std::ptr::eq(a, b));
    }

    #[test]
    fn test_request_derived_lines_are_not_interned() {
        let line = header_line("location", "/about?q=unique-value");
        assert_eq!(line, "location: /about?q=unique-value");
        header_line("x-request-id", "01HZX3V6Q4M3Y8Z2B7C9D0E1F2");
        header_line("set-cookie", "session=abc; Path=/");
        assert!(!HEADER_LINES.contains_key("location: /about?q=unique-value"));
        assert!(!HEADER_LINES.contains_key("set-cookie: session=abc; Path=/"));
    }

    #[test]
    fn test_line_breaks_are_unsafe() {
        assert!(is_safe("a=1; Path=/"));
        assert!(!is_safe("a\r\nx-injected: 1"));
    }
}
