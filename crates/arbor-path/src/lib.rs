//! Path addressing for arbor state trees.
//!
//! Event paths are slash-delimited addresses relative to an instance root,
//! escaped the way RFC 6901 escapes JSON Pointer components (`~` becomes
//! `~0`, `/` becomes `~1`). The root itself is the empty string.
//!
//! # Example
//!
//! ```
//! use arbor_path::Path;
//!
//! let path: Path = "/todos/0/text".parse().unwrap();
//! assert_eq!(path.len(), 3);
//! assert_eq!(path.to_string(), "/todos/0/text");
//!
//! let scope: Path = "/todos".parse().unwrap();
//! assert!(scope.is_prefix_of(&path));
//! ```

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PathError {
    #[error("path `{0}` must be empty or start with `/`")]
    MissingLeadingSlash(String),
    #[error("path `{0}` contains an invalid `~` escape")]
    InvalidEscape(String),
}

/// Unescapes one path segment.
///
/// ```
/// use arbor_path::unescape_segment;
///
/// assert_eq!(unescape_segment("a~0b").unwrap(), "a~b");
/// assert_eq!(unescape_segment("c~1d").unwrap(), "c/d");
/// assert!(unescape_segment("bad~2").is_err());
/// ```
pub fn unescape_segment(segment: &str) -> Result<String, PathError> {
    if !segment.contains('~') {
        return Ok(segment.to_string());
    }
    let mut out = String::with_capacity(segment.len());
    let mut chars = segment.chars();
    while let Some(ch) = chars.next() {
        if ch != '~' {
            out.push(ch);
            continue;
        }
        match chars.next() {
            Some('0') => out.push('~'),
            Some('1') => out.push('/'),
            _ => return Err(PathError::InvalidEscape(segment.to_string())),
        }
    }
    Ok(out)
}

/// Escapes one path segment.
pub fn escape_segment(segment: &str) -> String {
    if !segment.contains('/') && !segment.contains('~') {
        return segment.to_string();
    }
    segment.replace('~', "~0").replace('/', "~1")
}

/// Returns `true` for canonical list indices (`"0"`, `"17"`, not `"01"`).
pub fn is_index(segment: &str) -> bool {
    let bytes = segment.as_bytes();
    if bytes.is_empty() || (bytes.len() > 1 && bytes[0] == b'0') {
        return false;
    }
    bytes.iter().all(u8::is_ascii_digit)
}

/// An owned, unescaped sequence of path segments.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Path {
    segments: Vec<String>,
}

impl Path {
    pub fn root() -> Self {
        Self::default()
    }

    pub fn from_segments<I, S>(segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            segments: segments.into_iter().map(Into::into).collect(),
        }
    }

    /// Parses an escaped, slash-delimited path. The empty string is the root.
    pub fn parse(pointer: &str) -> Result<Self, PathError> {
        if pointer.is_empty() {
            return Ok(Self::root());
        }
        let Some(rest) = pointer.strip_prefix('/') else {
            return Err(PathError::MissingLeadingSlash(pointer.to_string()));
        };
        let segments = rest
            .split('/')
            .map(unescape_segment)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { segments })
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn is_root(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn push(&mut self, segment: impl Into<String>) {
        self.segments.push(segment.into());
    }

    /// Returns a new path with `segment` appended.
    pub fn child(&self, segment: impl Into<String>) -> Self {
        let mut next = self.clone();
        next.push(segment);
        next
    }

    /// `true` when `self` addresses `other` or one of its ancestors.
    pub fn is_prefix_of(&self, other: &Path) -> bool {
        self.len() <= other.len() && self.segments.iter().zip(&other.segments).all(|(a, b)| a == b)
    }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for segment in &self.segments {
            f.write_str("/")?;
            f.write_str(&escape_segment(segment))?;
        }
        Ok(())
    }
}

impl FromStr for Path {
    type Err = PathError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Path::parse(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escape_round_trips_special_characters() {
        for raw in ["plain", "a/b", "t~lde", "~/~/", ""] {
            assert_eq!(unescape_segment(&escape_segment(raw)).unwrap(), raw);
        }
    }

    #[test]
    fn root_formats_as_empty_string() {
        assert_eq!(Path::root().to_string(), "");
        assert_eq!(Path::parse("").unwrap(), Path::root());
    }

    #[test]
    fn relative_pointers_are_rejected() {
        assert_eq!(
            Path::parse("todos/0"),
            Err(PathError::MissingLeadingSlash("todos/0".into()))
        );
    }

    #[test]
    fn prefix_is_segment_wise() {
        let todos = Path::from_segments(["todos"]);
        assert!(todos.is_prefix_of(&Path::from_segments(["todos", "0"])));
        assert!(!todos.is_prefix_of(&Path::from_segments(["todosX"])));
    }
}
