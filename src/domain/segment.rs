use std::{fmt, ops::Deref, path::PathBuf, str::FromStr};

use non_empty_string::NonEmptyString;

/// A single directory name used as a primary key in the store.
///
/// Subject codes and question ids are both segments. A segment is guaranteed
/// to name exactly one directory directly below its parent: it is non-empty,
/// is neither `.` nor `..`, and contains no path separator or NUL byte.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Segment(NonEmptyString);

impl Segment {
    /// Creates a new `Segment`.
    ///
    /// # Errors
    ///
    /// Returns [`PathError::InvalidSegment`] if the string is empty, is `.` or
    /// `..`, or contains `/`, `\` or a NUL byte.
    pub fn new(s: String) -> Result<Self, PathError> {
        if s == "." || s == ".." || s.contains(['/', '\\', '\0']) {
            return Err(PathError::InvalidSegment(s));
        }
        NonEmptyString::new(s)
            .map(Self)
            .map_err(PathError::InvalidSegment)
    }

    /// Returns the string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }

    /// Whether the segment names a hidden entry (leading `.`).
    #[must_use]
    pub fn is_hidden(&self) -> bool {
        self.as_str().starts_with('.')
    }
}

impl TryFrom<String> for Segment {
    type Error = PathError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl TryFrom<&str> for Segment {
    type Error = PathError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::new(value.to_string())
    }
}

impl FromStr for Segment {
    type Err = PathError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s.to_string())
    }
}

impl AsRef<str> for Segment {
    fn as_ref(&self) -> &str {
        self.0.as_str()
    }
}

impl AsRef<std::path::Path> for Segment {
    fn as_ref(&self) -> &std::path::Path {
        std::path::Path::new(self.0.as_str())
    }
}

impl Deref for Segment {
    type Target = str;

    fn deref(&self) -> &Self::Target {
        self.0.as_str()
    }
}

impl fmt::Display for Segment {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Errors raised when a caller-supplied name or path would escape the store
/// root.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum PathError {
    /// A subject code or question id that is not a single plain directory
    /// name.
    #[error("invalid path segment '{0}': must be a non-empty name without '..' or separators")]
    InvalidSegment(String),

    /// A relative path that is absolute or climbs out of the root.
    #[error("path '{}' escapes the question bank root", .0.display())]
    Escapes(PathBuf),
}

#[cfg(test)]
mod tests {
    use test_case::test_case;

    use super::*;

    #[test_case("MATH101"; "plain code")]
    #[test_case("q-0001"; "question id")]
    #[test_case("...dots"; "leading dots but not parent")]
    #[test_case("Příklad 1"; "unicode and spaces")]
    fn accepts_plain_names(name: &str) {
        let segment = Segment::try_from(name).unwrap();
        assert_eq!(segment.as_str(), name);
    }

    #[test_case(""; "empty")]
    #[test_case("."; "current dir")]
    #[test_case(".."; "parent dir")]
    #[test_case("a/b"; "forward slash")]
    #[test_case("a\\b"; "backslash")]
    #[test_case("../etc"; "traversal")]
    #[test_case("nul\0byte"; "nul byte")]
    fn rejects_unsafe_names(name: &str) {
        assert_eq!(
            Segment::try_from(name),
            Err(PathError::InvalidSegment(name.to_string()))
        );
    }

    #[test]
    fn hidden_segments_are_detected() {
        assert!(Segment::try_from(".qbank").unwrap().is_hidden());
        assert!(!Segment::try_from("qbank").unwrap().is_hidden());
    }
}
