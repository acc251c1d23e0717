//! Domain newtypes with validation
//!
//! This module provides strongly-typed wrappers for media item identifiers
//! and backup-relative paths. Each newtype ensures data validity at
//! construction time.

use std::fmt::{self, Display, Formatter};
use std::path::{Component, Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::errors::DomainError;

// ============================================================================
// MediaItemId
// ============================================================================

/// Opaque identifier assigned to a media item by the remote library
///
/// The value is never interpreted; it only has to be non-empty and free of
/// whitespace and control characters so it can be logged and stored as-is.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct MediaItemId(String);

impl MediaItemId {
    /// Create a new MediaItemId
    ///
    /// # Errors
    /// Returns error if the ID is empty or contains whitespace/control characters
    pub fn new(id: impl Into<String>) -> Result<Self, DomainError> {
        let id = id.into();
        if id.is_empty() {
            return Err(DomainError::InvalidId(
                "Media item ID cannot be empty".to_string(),
            ));
        }

        if id.chars().any(|c| c.is_whitespace() || c.is_control()) {
            return Err(DomainError::InvalidId(format!(
                "Media item ID contains invalid characters: {id:?}"
            )));
        }

        Ok(Self(id))
    }

    /// Get the inner string reference
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for MediaItemId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for MediaItemId {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for MediaItemId {
    type Error = DomainError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::new(s)
    }
}

impl From<MediaItemId> for String {
    fn from(id: MediaItemId) -> Self {
        id.0
    }
}

// ============================================================================
// RelativePath
// ============================================================================

/// A path relative to the backup root, e.g. `2021/3/a.jpg`
///
/// Stored with `/` separators regardless of platform so that index contents
/// are portable. Absolute paths, empty paths and any `.`/`..` component are
/// rejected, so joining a `RelativePath` onto the backup root can never
/// escape it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RelativePath(String);

impl RelativePath {
    /// Create a RelativePath from a `/`-separated string
    ///
    /// # Errors
    /// Returns error if the path is empty, absolute, or contains `.`/`..`
    /// or empty segments
    pub fn new(path: impl Into<String>) -> Result<Self, DomainError> {
        let path = path.into();
        if path.is_empty() {
            return Err(DomainError::InvalidPath(
                "Relative path cannot be empty".to_string(),
            ));
        }

        if path.starts_with('/') || path.contains('\\') || Path::new(&path).is_absolute() {
            return Err(DomainError::InvalidPath(format!(
                "Path must be relative: {path}"
            )));
        }

        for segment in path.split('/') {
            if segment.is_empty() || segment == "." || segment == ".." {
                return Err(DomainError::InvalidPath(format!(
                    "Path contains an invalid segment {segment:?}: {path}"
                )));
            }
        }

        Ok(Self(path))
    }

    /// Build a RelativePath from a native relative [`Path`]
    ///
    /// # Errors
    /// Returns error if any component is not a plain name or is not valid UTF-8
    pub fn from_path(path: &Path) -> Result<Self, DomainError> {
        let mut segments = Vec::new();
        for component in path.components() {
            match component {
                Component::Normal(name) => {
                    let name = name.to_str().ok_or_else(|| {
                        DomainError::InvalidPath(format!(
                            "Path is not valid UTF-8: {}",
                            path.display()
                        ))
                    })?;
                    segments.push(name);
                }
                _ => {
                    return Err(DomainError::InvalidPath(format!(
                        "Path must be relative without . or ..: {}",
                        path.display()
                    )))
                }
            }
        }
        Self::new(segments.join("/"))
    }

    /// Get the inner string reference
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Iterate over the `/`-separated segments
    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.0.split('/')
    }

    /// The final segment (the file name)
    #[must_use]
    pub fn file_name(&self) -> &str {
        self.0.rsplit('/').next().unwrap_or(&self.0)
    }

    /// Resolve this path against `root`
    #[must_use]
    pub fn to_path(&self, root: &Path) -> PathBuf {
        let mut full = root.to_path_buf();
        for segment in self.segments() {
            full.push(segment);
        }
        full
    }
}

impl Display for RelativePath {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for RelativePath {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for RelativePath {
    type Error = DomainError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::new(s)
    }
}

impl From<RelativePath> for String {
    fn from(path: RelativePath) -> Self {
        path.0
    }
}
