use serde::{Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// ULID-backed identifier attached to every request flowing through the pipeline.
///
/// Internal fetches get their own id; the parent id is logged alongside so a
/// nested request can be correlated with the request that issued it.
#[derive(Clone, Copy, Eq, PartialEq, Hash, Debug)]
pub struct RequestId(ulid::Ulid);

impl RequestId {
    #[must_use]
    pub fn new() -> Self {
        Self(ulid::Ulid::new())
    }

    /// Reuse a caller-provided `x-request-id` when it is a valid ULID.
    #[must_use]
    pub fn from_header(value: Option<&str>) -> Self {
        value
            .and_then(|raw| raw.trim().parse().ok())
            .unwrap_or_default()
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl FromStr for RequestId {
    type Err = ulid::DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ulid::Ulid::from_string(s).map(Self)
    }
}

impl Serialize for RequestId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_header_is_reused() {
        let id = RequestId::new();
        let parsed = RequestId::from_header(Some(&id.to_string()));
        assert_eq!(parsed, id);
    }

    #[test]
    fn test_invalid_header_generates_fresh_id() {
        let parsed = RequestId::from_header(Some("not-a-ulid"));
        assert_ne!(parsed.to_string(), "not-a-ulid");
        assert_eq!(parsed.to_string().len(), 26);
    }
}
