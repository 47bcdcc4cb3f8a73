//! Validated state paths.
//!
//! Raw dotted strings coming from an untrusted plan are parsed once into
//! segment lists. Reserved prototype-chain names and empty segments are
//! rejected at parse time so later code never sees them.

use std::fmt;

use serde_json::Value;

use crate::error::{Result, TesseraError};

/// Segment names that may never appear in a path.
pub const RESERVED_SEGMENTS: &[&str] = &["__proto__", "prototype", "constructor"];

/// Maximum number of segments accepted in one path.
pub const MAX_PATH_SEGMENTS: usize = 32;

fn parse_segments(raw: &str) -> Result<Vec<String>> {
    let invalid = |reason: &str| TesseraError::InvalidPath {
        path: raw.to_string(),
        reason: reason.to_string(),
    };

    if raw.trim().is_empty() {
        return Err(invalid("path is empty"));
    }

    let segments: Vec<String> = raw.split('.').map(str::to_string).collect();
    if segments.len() > MAX_PATH_SEGMENTS {
        return Err(invalid("too many segments"));
    }
    for segment in &segments {
        if segment.is_empty() {
            return Err(invalid("empty segment"));
        }
        if RESERVED_SEGMENTS.contains(&segment.as_str()) {
            return Err(invalid(&format!("reserved segment '{}'", segment)));
        }
    }
    Ok(segments)
}

/// A path into the state snapshot targeted by a mutation.
///
/// A leading `state.` is accepted and stripped, so `count` and `state.count`
/// address the same slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MutationPath {
    segments: Vec<String>,
}

impl MutationPath {
    /// Parse and validate a raw mutation path.
    pub fn parse(raw: &str) -> Result<Self> {
        let mut segments = parse_segments(raw)?;
        if segments.len() > 1 && segments[0] == "state" {
            segments.remove(0);
        }
        Ok(Self { segments })
    }

    /// The validated segments.
    pub fn segments(&self) -> &[String] {
        &self.segments
    }
}

impl fmt::Display for MutationPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.segments.join("."))
    }
}

/// The scope a `$from` reference or template placeholder reads from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReferenceRoot {
    State,
    Event,
    Context,
    Vars,
}

impl ReferenceRoot {
    /// All recognized prefixes.
    pub const ALL: [ReferenceRoot; 4] = [
        ReferenceRoot::State,
        ReferenceRoot::Event,
        ReferenceRoot::Context,
        ReferenceRoot::Vars,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ReferenceRoot::State => "state",
            ReferenceRoot::Event => "event",
            ReferenceRoot::Context => "context",
            ReferenceRoot::Vars => "vars",
        }
    }

    fn from_prefix(prefix: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|root| root.as_str() == prefix)
    }
}

/// A read-only reference such as `event.payload.id`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReferencePath {
    root: ReferenceRoot,
    segments: Vec<String>,
}

impl ReferencePath {
    /// Parse a reference; the first segment must be a recognized prefix.
    pub fn parse(raw: &str) -> Result<Self> {
        let mut segments = parse_segments(raw)?;
        let prefix = segments.remove(0);
        let root = ReferenceRoot::from_prefix(&prefix).ok_or_else(|| TesseraError::InvalidPath {
            path: raw.to_string(),
            reason: format!(
                "unknown prefix '{}' (expected state, event, context or vars)",
                prefix
            ),
        })?;
        Ok(Self { root, segments })
    }

    pub fn root(&self) -> ReferenceRoot {
        self.root
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }
}

/// Walk `segments` into `value`, treating numeric segments as array indices.
pub fn lookup<'a>(value: &'a Value, segments: &[String]) -> Option<&'a Value> {
    segments.iter().try_fold(value, |current, segment| match current {
        Value::Object(map) => map.get(segment),
        Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_mutation_path_rejects_reserved_segments() {
        for raw in ["__proto__.polluted", "a.constructor.b", "prototype", "x.__proto__"] {
            let err = MutationPath::parse(raw).unwrap_err();
            assert!(matches!(err, TesseraError::InvalidPath { .. }), "{}", raw);
        }
    }

    #[test]
    fn test_mutation_path_rejects_empty_segments() {
        assert!(MutationPath::parse("").is_err());
        assert!(MutationPath::parse("a..b").is_err());
        assert!(MutationPath::parse(".a").is_err());
    }

    #[test]
    fn test_mutation_path_strips_state_prefix() {
        let a = MutationPath::parse("state.count").unwrap();
        let b = MutationPath::parse("count").unwrap();
        assert_eq!(a, b);
        assert_eq!(a.to_string(), "count");
    }

    #[test]
    fn test_reference_prefixes() {
        assert_eq!(
            ReferencePath::parse("event.payload.id").unwrap().root(),
            ReferenceRoot::Event
        );
        assert_eq!(ReferencePath::parse("vars.x").unwrap().root(), ReferenceRoot::Vars);
        assert!(ReferencePath::parse("window.location").is_err());
        assert!(ReferencePath::parse("state.__proto__").is_err());
    }

    #[test]
    fn test_lookup_handles_arrays() {
        let value = json!({ "items": [{ "name": "a" }, { "name": "b" }] });
        let path = vec!["items".to_string(), "1".to_string(), "name".to_string()];
        assert_eq!(lookup(&value, &path), Some(&json!("b")));
        assert_eq!(lookup(&value, &["missing".to_string()]), None);
    }
}
