//! Response paths
//!
//! A path locates a value inside the response tree: a sequence of response
//! keys (aliases or field names) and list indices, serialized the way the
//! GraphQL error format expects (`["books", 0, "title"]`).

use serde::ser::SerializeSeq;
use serde::{Serialize, Serializer};
use serde_json::Value;
use std::fmt;

/// One step of a [`ResponsePath`]
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PathSegment {
    /// A response key
    Key(String),
    /// A list index
    Index(usize),
}

impl From<&str> for PathSegment {
    fn from(key: &str) -> Self {
        PathSegment::Key(key.to_string())
    }
}

impl From<String> for PathSegment {
    fn from(key: String) -> Self {
        PathSegment::Key(key)
    }
}

impl From<usize> for PathSegment {
    fn from(index: usize) -> Self {
        PathSegment::Index(index)
    }
}

impl fmt::Display for PathSegment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PathSegment::Key(key) => write!(f, "{}", key),
            PathSegment::Index(index) => write!(f, "{}", index),
        }
    }
}

/// Location of a value in the response tree
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct ResponsePath(Vec<PathSegment>);

impl ResponsePath {
    /// The empty path (the response root)
    pub fn root() -> Self {
        Self(Vec::new())
    }

    /// Build a path from a list of segments
    ///
    /// ```rust,ignore
    /// let path = ResponsePath::from_segments(["books".into(), 0.into(), "title".into()]);
    /// ```
    pub fn from_segments(segments: impl IntoIterator<Item = PathSegment>) -> Self {
        Self(segments.into_iter().collect())
    }

    /// Build a path from JSON segments as found in GraphQL error payloads
    ///
    /// Strings become keys and non-negative integers become indices; any
    /// other value makes the path invalid.
    pub fn from_json(segments: &[Value]) -> Option<Self> {
        segments
            .iter()
            .map(|segment| match segment {
                Value::String(key) => Some(PathSegment::Key(key.clone())),
                Value::Number(n) => n.as_u64().map(|i| PathSegment::Index(i as usize)),
                _ => None,
            })
            .collect::<Option<Vec<_>>>()
            .map(Self)
    }

    /// Path of a child key
    pub fn key(&self, key: impl Into<String>) -> Self {
        let mut segments = self.0.clone();
        segments.push(PathSegment::Key(key.into()));
        Self(segments)
    }

    /// Path of a list element
    pub fn index(&self, index: usize) -> Self {
        let mut segments = self.0.clone();
        segments.push(PathSegment::Index(index));
        Self(segments)
    }

    /// Concatenate two paths
    pub fn join(&self, other: &ResponsePath) -> Self {
        let mut segments = self.0.clone();
        segments.extend(other.0.iter().cloned());
        Self(segments)
    }

    pub fn segments(&self) -> &[PathSegment] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Whether `self` is `other` or one of its descendants
    pub fn starts_with(&self, other: &ResponsePath) -> bool {
        self.0.starts_with(&other.0)
    }
}

impl fmt::Display for ResponsePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, segment) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(".")?;
            }
            write!(f, "{}", segment)?;
        }
        Ok(())
    }
}

impl Serialize for ResponsePath {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut seq = serializer.serialize_seq(Some(self.0.len()))?;
        for segment in &self.0 {
            match segment {
                PathSegment::Key(key) => seq.serialize_element(key)?,
                PathSegment::Index(index) => seq.serialize_element(index)?,
            }
        }
        seq.end()
    }
}
