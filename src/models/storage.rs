//! Object-storage listing types shared by every storage backend.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One item of a bucket listing.
///
/// Folders are reported as entries without an id, matching the hosted
/// storage API.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct StorageEntry {
    /// Name relative to the listed prefix.
    pub name: String,

    pub id: Option<String>,

    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,

    #[serde(default)]
    pub metadata: Option<StorageMetadata>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct StorageMetadata {
    #[serde(default)]
    pub size: Option<i64>,
    #[serde(default)]
    pub mimetype: Option<String>,
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    Asc,
    Desc,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct SortBy {
    pub column: String,
    pub order: SortOrder,
}

/// Paging and ordering for a bucket listing.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ListOptions {
    pub limit: usize,
    pub offset: usize,
    pub sort_by: SortBy,
}

impl Default for ListOptions {
    fn default() -> Self {
        Self {
            limit: 100,
            offset: 0,
            sort_by: SortBy {
                column: "name".into(),
                order: SortOrder::Asc,
            },
        }
    }
}

/// Options for an object upload.
#[derive(Clone, Debug)]
pub struct UploadOptions {
    pub content_type: Option<String>,
    pub cache_control: String,
    /// Overwrite an existing object with the same path.
    pub upsert: bool,
}

impl Default for UploadOptions {
    fn default() -> Self {
        Self {
            content_type: None,
            cache_control: "max-age=3600".into(),
            upsert: true,
        }
    }
}
