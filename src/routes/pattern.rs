//! Route id parsing.
//!
//! A route id is a `/`-separated list of raw segments. Each raw segment is
//! either a group `(name)`, which scopes layouts and error boundaries but never
//! appears in URLs, or a [`SegmentSpec`]. Dynamic segments must fill the whole
//! segment: `post-[id]` is rejected.

use super::types::{ParamSpec, SegmentSpec};
use crate::error::ConfigError;
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashSet;

static PARAM_NAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("valid param name regex"));

/// One raw segment of a route id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RawSegment {
    Group(String),
    Spec(SegmentSpec),
}

/// A parsed route id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedId {
    /// Normalized id: leading slash, no trailing slash, `/` for the root
    pub id: String,
    pub raw: Vec<RawSegment>,
}

impl ParsedId {
    /// URL pattern with groups removed
    #[must_use]
    pub fn pattern(&self) -> Vec<SegmentSpec> {
        self.raw
            .iter()
            .filter_map(|s| match s {
                RawSegment::Spec(spec) => Some(spec.clone()),
                RawSegment::Group(_) => None,
            })
            .collect()
    }

    /// Number of raw segments, groups included
    #[must_use]
    pub fn depth(&self) -> usize {
        self.raw.len()
    }

    /// True when `self` is `other` or one of its ancestors.
    #[must_use]
    pub fn is_prefix_of(&self, other: &ParsedId) -> bool {
        self.raw.len() <= other.raw.len() && self.raw.iter().zip(&other.raw).all(|(a, b)| a == b)
    }
}

/// Normalize a route id to `/a/b` form.
#[must_use]
pub fn normalize_id(id: &str) -> String {
    let trimmed = id.trim().trim_matches('/');
    if trimmed.is_empty() {
        "/".to_string()
    } else {
        format!("/{trimmed}")
    }
}

/// Parse and validate a route id.
pub fn parse_route_id(id: &str) -> Result<ParsedId, Vec<ConfigError>> {
    let normalized = normalize_id(id);
    let mut errors = Vec::new();
    let mut raw = Vec::new();

    for segment in normalized.split('/').skip(1).filter(|s| !s.is_empty()) {
        match parse_segment(&normalized, segment) {
            Ok(seg) => raw.push(seg),
            Err(e) => errors.push(e),
        }
    }

    let specs: Vec<&SegmentSpec> = raw
        .iter()
        .filter_map(|s| match s {
            RawSegment::Spec(spec) => Some(spec),
            RawSegment::Group(_) => None,
        })
        .collect();

    let rest_positions: Vec<usize> = specs
        .iter()
        .enumerate()
        .filter(|(_, s)| s.param().is_some_and(|p| p.rest))
        .map(|(i, _)| i)
        .collect();
    if rest_positions.len() > 1 || rest_positions.first().is_some_and(|&i| i + 1 != specs.len()) {
        errors.push(ConfigError::RestNotTerminal {
            route: normalized.clone(),
        });
    }

    let mut seen = HashSet::new();
    for p in specs.iter().filter_map(|s| s.param()) {
        if !seen.insert(p.name.as_str()) {
            errors.push(ConfigError::DuplicateParam {
                route: normalized.clone(),
                name: p.name.clone(),
            });
        }
    }

    if errors.is_empty() {
        Ok(ParsedId {
            id: normalized,
            raw,
        })
    } else {
        Err(errors)
    }
}

fn invalid(route: &str, segment: &str, reason: &str) -> ConfigError {
    ConfigError::InvalidPattern {
        route: route.to_string(),
        segment: segment.to_string(),
        reason: reason.to_string(),
    }
}

fn parse_segment(route: &str, segment: &str) -> Result<RawSegment, ConfigError> {
    if let Some(inner) = segment.strip_prefix('(').and_then(|s| s.strip_suffix(')')) {
        if inner.is_empty() || inner.contains(['(', ')', '[', ']']) {
            return Err(invalid(route, segment, "group names must be non-empty plain text"));
        }
        return Ok(RawSegment::Group(inner.to_string()));
    }

    let has_brackets = segment.contains(['[', ']']);
    if !has_brackets {
        if segment.contains(['(', ')']) {
            return Err(invalid(route, segment, "unbalanced group parentheses"));
        }
        return Ok(RawSegment::Spec(SegmentSpec::Literal(segment.to_string())));
    }

    let (inner, optional) = if let Some(inner) = segment
        .strip_prefix("[[")
        .and_then(|s| s.strip_suffix("]]"))
    {
        (inner, true)
    } else if let Some(inner) = segment.strip_prefix('[').and_then(|s| s.strip_suffix(']')) {
        (inner, false)
    } else if segment.starts_with('[') && segment.ends_with(']') {
        return Err(invalid(route, segment, "unbalanced brackets"));
    } else {
        return Err(invalid(
            route,
            segment,
            "a dynamic parameter must fill the whole segment",
        ));
    };

    if inner.contains(['[', ']']) {
        return Err(invalid(route, segment, "unbalanced brackets"));
    }

    let (inner, rest) = match inner.strip_prefix("...") {
        Some(name) => (name, true),
        None => (inner, false),
    };

    let (name, matcher) = match inner.split_once('=') {
        Some((name, matcher)) => {
            if !PARAM_NAME.is_match(matcher) {
                return Err(invalid(route, segment, "matcher names must be identifiers"));
            }
            (name, Some(matcher.to_string()))
        }
        None => (inner, None),
    };

    if name.is_empty() {
        return Err(invalid(route, segment, "parameter name is empty"));
    }
    if !PARAM_NAME.is_match(name) {
        return Err(invalid(route, segment, "parameter names must be identifiers"));
    }

    Ok(RawSegment::Spec(SegmentSpec::Param(ParamSpec {
        name: name.to_string(),
        matcher,
        optional,
        rest,
    })))
}
