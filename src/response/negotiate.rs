//! `Accept` negotiation and `__data.json` addressing.

/// Suffix addressing the data of a page.
pub const DATA_SUFFIX: &str = "/__data.json";

/// One media range of an `Accept` header.
#[derive(Debug, Clone, PartialEq)]
struct MediaRange<'a> {
    ty: &'a str,
    subtype: &'a str,
    q: f32,
}

fn parse_accept(header: &str) -> Vec<MediaRange<'_>> {
    header
        .split(',')
        .filter_map(|part| {
            let mut pieces = part.split(';');
            let media = pieces.next()?.trim();
            let (ty, subtype) = media.split_once('/')?;
            let mut q = 1.0_f32;
            for param in pieces {
                if let Some(v) = param.trim().strip_prefix("q=") {
                    q = v.trim().parse().unwrap_or(0.0);
                }
            }
            Some(MediaRange {
                ty: ty.trim(),
                subtype: subtype.trim(),
                q,
            })
        })
        .collect()
}

/// Quality of the first range naming exactly `ty/subtype` (or `ty/*` when
/// `allow_type_wildcard`).
fn explicit_q(ranges: &[MediaRange<'_>], ty: &str, subtype: &str, allow_type_wildcard: bool) -> Option<f32> {
    ranges
        .iter()
        .filter(|r| {
            r.ty.eq_ignore_ascii_case(ty)
                && (r.subtype.eq_ignore_ascii_case(subtype) || (allow_type_wildcard && r.subtype == "*"))
        })
        .map(|r| r.q)
        .reduce(f32::max)
}

/// Whether a request for a page+endpoint route should get the page.
///
/// Only an explicit `text/html` (or `text/*`) with a quality at least as high
/// as every other range selects the page; `*/*` alone selects the endpoint.
#[must_use]
pub fn prefers_html(accept: Option<&str>) -> bool {
    let Some(accept) = accept else {
        return false;
    };
    let ranges = parse_accept(accept);
    let Some(html) = explicit_q(&ranges, "text", "html", true) else {
        return false;
    };
    html > 0.0 && ranges.iter().all(|r| r.q <= html)
}

/// Whether a page-only route should answer with its data as JSON.
#[must_use]
pub fn prefers_json(accept: Option<&str>) -> bool {
    let Some(accept) = accept else {
        return false;
    };
    let ranges = parse_accept(accept);
    let Some(json) = explicit_q(&ranges, "application", "json", false) else {
        return false;
    };
    let html = explicit_q(&ranges, "text", "html", true).unwrap_or(0.0);
    json > 0.0 && json > html
}

/// `/blog/x/__data.json` -> `/blog/x`, `/__data.json` -> `/`.
#[must_use]
pub fn strip_data_suffix(path: &str) -> Option<&str> {
    let stripped = path.strip_suffix(DATA_SUFFIX)?;
    Some(if stripped.is_empty() { "/" } else { stripped })
}
