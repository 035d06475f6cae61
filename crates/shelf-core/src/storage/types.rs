//! Core data types for the storage layer.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ShelfError;

/// Metadata for a store file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreMetadata {
    /// Format version (e.g., "1")
    pub format_version: String,

    /// Random identity assigned when the store was created
    pub store_id: Uuid,

    /// When this store was created
    pub created_at: DateTime<Utc>,
}

/// An account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    pub username: String,
    pub is_admin: bool,
    pub created_at: DateTime<Utc>,
}

/// A cataloged movie, owned by exactly one user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Item {
    pub id: i64,
    pub owner_id: i64,
    pub title: String,
    pub format: MediaFormat,
    pub barcode: Option<String>,
    pub condition: MediaCondition,
    pub created_at: DateTime<Utc>,
}

/// Physical or digital media format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MediaFormat {
    #[serde(rename = "Blu-ray")]
    BluRay,
    #[serde(rename = "DVD")]
    Dvd,
    #[serde(rename = "4K UHD")]
    UltraHd,
    #[serde(rename = "Digital")]
    Digital,
    #[serde(rename = "VHS")]
    Vhs,
    #[serde(rename = "Other")]
    Other,
}

impl MediaFormat {
    pub const ALL: [MediaFormat; 6] = [
        MediaFormat::BluRay,
        MediaFormat::Dvd,
        MediaFormat::UltraHd,
        MediaFormat::Digital,
        MediaFormat::Vhs,
        MediaFormat::Other,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            MediaFormat::BluRay => "Blu-ray",
            MediaFormat::Dvd => "DVD",
            MediaFormat::UltraHd => "4K UHD",
            MediaFormat::Digital => "Digital",
            MediaFormat::Vhs => "VHS",
            MediaFormat::Other => "Other",
        }
    }
}

impl fmt::Display for MediaFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MediaFormat {
    type Err = ShelfError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        MediaFormat::ALL
            .into_iter()
            .find(|format| format.as_str() == value)
            .ok_or_else(|| ShelfError::Validation(format!("Unknown format: {}", value)))
    }
}

/// Condition of the physical media.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MediaCondition {
    #[serde(rename = "New (Sealed)")]
    NewSealed,
    #[serde(rename = "Like New")]
    LikeNew,
    #[serde(rename = "Very Good")]
    VeryGood,
    #[serde(rename = "Good")]
    Good,
    #[serde(rename = "Acceptable")]
    Acceptable,
}

impl MediaCondition {
    pub const ALL: [MediaCondition; 5] = [
        MediaCondition::NewSealed,
        MediaCondition::LikeNew,
        MediaCondition::VeryGood,
        MediaCondition::Good,
        MediaCondition::Acceptable,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            MediaCondition::NewSealed => "New (Sealed)",
            MediaCondition::LikeNew => "Like New",
            MediaCondition::VeryGood => "Very Good",
            MediaCondition::Good => "Good",
            MediaCondition::Acceptable => "Acceptable",
        }
    }
}

impl fmt::Display for MediaCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MediaCondition {
    type Err = ShelfError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        MediaCondition::ALL
            .into_iter()
            .find(|condition| condition.as_str() == value)
            .ok_or_else(|| ShelfError::Validation(format!("Unknown condition: {}", value)))
    }
}

/// Builder for creating new items.
#[derive(Debug, Clone)]
pub struct NewItem {
    pub title: String,
    pub format: MediaFormat,
    pub barcode: Option<String>,
    pub condition: MediaCondition,
}

impl NewItem {
    pub fn new(title: impl Into<String>, format: MediaFormat, condition: MediaCondition) -> Self {
        Self {
            title: title.into(),
            format,
            barcode: None,
            condition,
        }
    }

    pub fn with_barcode(mut self, barcode: impl Into<String>) -> Self {
        self.barcode = Some(barcode.into());
        self
    }
}

/// Ordering for item listings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortOrder {
    #[default]
    TitleAsc,
    TitleDesc,
    CreatedDesc,
    CreatedAsc,
}

impl SortOrder {
    /// SQL ORDER BY clause. Ties always fall back to ascending id.
    pub(crate) fn order_by(&self) -> &'static str {
        match self {
            SortOrder::TitleAsc => "title COLLATE NOCASE ASC, id ASC",
            SortOrder::TitleDesc => "title COLLATE NOCASE DESC, id ASC",
            SortOrder::CreatedDesc => "created_at DESC, id ASC",
            SortOrder::CreatedAsc => "created_at ASC, id ASC",
        }
    }
}

impl FromStr for SortOrder {
    type Err = ShelfError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "title_asc" => Ok(SortOrder::TitleAsc),
            "title_desc" => Ok(SortOrder::TitleDesc),
            "created_desc" => Ok(SortOrder::CreatedDesc),
            "created_asc" => Ok(SortOrder::CreatedAsc),
            other => Err(ShelfError::Validation(format!(
                "Unknown sort order: {}",
                other
            ))),
        }
    }
}

/// Filter and ordering for listing a user's items.
#[derive(Debug, Clone, Default)]
pub struct ItemQuery {
    /// Case-insensitive substring match on title
    pub search: Option<String>,

    /// Exact format match
    pub format: Option<MediaFormat>,

    pub sort: SortOrder,
}

impl ItemQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn search(mut self, search: impl Into<String>) -> Self {
        self.search = Some(search.into());
        self
    }

    pub fn format(mut self, format: MediaFormat) -> Self {
        self.format = Some(format);
        self
    }

    pub fn sort(mut self, sort: SortOrder) -> Self {
        self.sort = sort;
        self
    }
}

/// Row counts for a store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreCounts {
    pub users: u64,
    pub items: u64,
}
