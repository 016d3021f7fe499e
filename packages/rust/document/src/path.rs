//! `/document/segment/*/segment` path addressing.

use serde::{Deserialize, Serialize};

use enrichflow_shared::{EnrichflowError, Result};

/// Name of the root segment every absolute path starts with.
pub const ROOT_SEGMENT: &str = "document";

/// One step of a [`FieldPath`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Segment {
    /// A named field of a node.
    Field(String),
    /// Every element of the preceding sequence.
    Wildcard,
    /// One concrete element of the preceding sequence.
    ///
    /// Never produced by [`FieldPath::parse`]; only by resolution.
    Index(usize),
}

impl std::fmt::Display for Segment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Field(name) => f.write_str(name),
            Self::Wildcard => f.write_str("*"),
            Self::Index(i) => write!(f, "{i}"),
        }
    }
}

/// A parsed path into a document tree.
///
/// Absolute paths start at `/document`; relative paths (no leading `/`) are
/// resolved against a skill context instance or, for plain document access,
/// against the root. Segments are case-sensitive and a path holds at most one
/// wildcard.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct FieldPath {
    absolute: bool,
    segments: Vec<Segment>,
}

impl FieldPath {
    /// The document root, `/document`.
    pub fn root() -> Self {
        Self {
            absolute: true,
            segments: Vec::new(),
        }
    }

    /// Parse a path string.
    pub fn parse(raw: &str) -> Result<Self> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(EnrichflowError::path(raw, "path is empty"));
        }

        let (absolute, body) = match trimmed.strip_prefix('/') {
            Some(rest) => (true, rest),
            None => (false, trimmed),
        };

        let mut parts = body.split('/');
        if absolute {
            match parts.next() {
                Some(ROOT_SEGMENT) => {}
                _ => {
                    return Err(EnrichflowError::path(
                        raw,
                        format!("absolute paths must start with /{ROOT_SEGMENT}"),
                    ));
                }
            }
        }

        let mut segments = Vec::new();
        for part in parts {
            match part {
                "" => return Err(EnrichflowError::path(raw, "empty path segment")),
                "*" => segments.push(Segment::Wildcard),
                name => segments.push(Segment::Field(name.to_string())),
            }
        }

        if !absolute && segments.is_empty() {
            return Err(EnrichflowError::path(raw, "path is empty"));
        }

        let path = Self { absolute, segments };
        if path.wildcard_count() > 1 {
            return Err(EnrichflowError::path(
                raw,
                "at most one '*' wildcard is supported per path",
            ));
        }
        Ok(path)
    }

    /// Whether the path starts at `/document`.
    pub fn is_absolute(&self) -> bool {
        self.absolute
    }

    /// Whether this is exactly `/document`.
    pub fn is_root(&self) -> bool {
        self.absolute && self.segments.is_empty()
    }

    /// The segments after the root.
    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// Whether the path contains a `*`.
    pub fn has_wildcard(&self) -> bool {
        self.wildcard_count() > 0
    }

    fn wildcard_count(&self) -> usize {
        self.segments
            .iter()
            .filter(|s| matches!(s, Segment::Wildcard))
            .count()
    }

    /// The last segment, if any.
    pub fn last(&self) -> Option<&Segment> {
        self.segments.last()
    }

    /// The path without its last segment.
    pub fn parent(&self) -> Option<Self> {
        if self.segments.is_empty() {
            return None;
        }
        Some(Self {
            absolute: self.absolute,
            segments: self.segments[..self.segments.len() - 1].to_vec(),
        })
    }

    /// Append a named field.
    pub fn child(&self, name: impl Into<String>) -> Self {
        let mut next = self.clone();
        next.segments.push(Segment::Field(name.into()));
        next
    }

    /// Append a concrete element index.
    pub fn index(&self, i: usize) -> Self {
        let mut next = self.clone();
        next.segments.push(Segment::Index(i));
        next
    }

    /// Append a relative path. An absolute `rest` is returned unchanged.
    pub fn join(&self, rest: &FieldPath) -> Self {
        if rest.absolute {
            return rest.clone();
        }
        let mut next = self.clone();
        next.segments.extend(rest.segments.iter().cloned());
        next
    }

    /// The absolute form of this path: relative paths hang off the root.
    pub fn to_absolute(&self) -> Self {
        Self {
            absolute: true,
            segments: self.segments.clone(),
        }
    }

    /// Segment-wise prefix test. `*` only matches `*`.
    ///
    /// Both paths are compared in their absolute form.
    pub fn starts_with(&self, prefix: &FieldPath) -> bool {
        prefix.segments.len() <= self.segments.len()
            && self.segments.iter().zip(&prefix.segments).all(|(a, b)| a == b)
    }

    /// Bind this pattern to a concrete context instance.
    ///
    /// If the path starts with `context` (a pattern such as
    /// `/document/normalized_images/*`), that prefix is replaced by the
    /// concrete `instance` (e.g. `/document/normalized_images/3`). Relative
    /// paths are appended to the instance. Other absolute paths are returned
    /// as-is, so a still-open `*` keeps collecting across all elements.
    pub fn bind(&self, context: &FieldPath, instance: &FieldPath) -> Self {
        if !self.absolute {
            return instance.join(self);
        }
        if self.starts_with(context) {
            let mut segments = instance.segments.clone();
            segments.extend(self.segments[context.segments.len()..].iter().cloned());
            return Self {
                absolute: true,
                segments,
            };
        }
        self.clone()
    }

    /// The element index bound at position `at`, if that segment is concrete.
    pub fn index_at(&self, at: usize) -> Option<usize> {
        match self.segments.get(at) {
            Some(Segment::Index(i)) => Some(*i),
            _ => None,
        }
    }

    /// Position of the `*` segment, if any.
    pub fn wildcard_position(&self) -> Option<usize> {
        self.segments
            .iter()
            .position(|s| matches!(s, Segment::Wildcard))
    }
}

impl std::fmt::Display for FieldPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.absolute {
            write!(f, "/{ROOT_SEGMENT}")?;
            for segment in &self.segments {
                write!(f, "/{segment}")?;
            }
            Ok(())
        } else {
            for (i, segment) in self.segments.iter().enumerate() {
                if i > 0 {
                    f.write_str("/")?;
                }
                write!(f, "{segment}")?;
            }
            Ok(())
        }
    }
}

impl std::str::FromStr for FieldPath {
    type Err = EnrichflowError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl TryFrom<String> for FieldPath {
    type Error = EnrichflowError;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<FieldPath> for String {
    fn from(path: FieldPath) -> Self {
        path.to_string()
    }
}
