//! Media item records
//!
//! A [`MediaItemRecord`] is what the backup index remembers about an item it
//! has downloaded: the remote identity, the media type, the calendar date the
//! item was created and where the file was placed relative to the backup root.
//!
//! Records are immutable once constructed. They are created right after a
//! successful download, inserted once, and deleted only when the remote item
//! disappears from the query window.

use std::fmt::{self, Display, Formatter};
use std::hash::{Hash, Hasher};
use std::str::FromStr;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use super::errors::DomainError;
use super::newtypes::{MediaItemId, RelativePath};

// ============================================================================
// MediaType
// ============================================================================

/// Kind of media stored in the remote library
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaType {
    Photo,
    Video,
}

impl MediaType {
    /// Canonical upper-case name, used as the persisted representation
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            MediaType::Photo => "PHOTO",
            MediaType::Video => "VIDEO",
        }
    }

    /// All media types, in a stable order
    pub const ALL: [MediaType; 2] = [MediaType::Photo, MediaType::Video];
}

impl Display for MediaType {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MediaType {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "PHOTO" => Ok(MediaType::Photo),
            "VIDEO" => Ok(MediaType::Video),
            _ => Err(DomainError::InvalidMediaType(s.to_string())),
        }
    }
}

// ============================================================================
// MediaItemRecord
// ============================================================================

/// A downloaded media item as stored in the backup index
///
/// Equality and hashing consider only the [`MediaItemId`]: two records with
/// the same id describe the same remote item.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaItemRecord {
    id: MediaItemId,
    media_type: MediaType,
    creation_date: NaiveDate,
    file_path: RelativePath,
}

impl MediaItemRecord {
    /// Create a new record; every field is required
    #[must_use]
    pub fn new(
        id: MediaItemId,
        media_type: MediaType,
        creation_date: NaiveDate,
        file_path: RelativePath,
    ) -> Self {
        Self {
            id,
            media_type,
            creation_date,
            file_path,
        }
    }

    #[must_use]
    pub fn id(&self) -> &MediaItemId {
        &self.id
    }

    #[must_use]
    pub fn media_type(&self) -> MediaType {
        self.media_type
    }

    #[must_use]
    pub fn creation_date(&self) -> NaiveDate {
        self.creation_date
    }

    /// Location of the file relative to the backup root
    #[must_use]
    pub fn file_path(&self) -> &RelativePath {
        &self.file_path
    }
}

impl PartialEq for MediaItemRecord {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for MediaItemRecord {}

impl Hash for MediaItemRecord {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl Display for MediaItemRecord {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {} {}",
            self.id, self.media_type, self.creation_date, self.file_path
        )
    }
}
