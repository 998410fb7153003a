//! Displayable gallery images and the `gallery_images` metadata table.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use sqlx::FromRow;

/// A single image ready to render in the gallery carousel.
///
/// Recomputed on every resolution; never persisted.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Image {
    /// Storage-provided id, table row id, or synthesized positional index.
    pub id: String,

    /// Public address derived from a storage-relative path.
    pub url: String,

    /// Human-readable label.
    pub alt: String,
}

/// A row of the `gallery_images` table.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug)]
pub struct GalleryImageRow {
    /// Row id. The hosted table may use numeric ids, so it is kept as text.
    #[serde(deserialize_with = "id_as_string")]
    pub id: String,

    /// Path of the object relative to the gallery folder.
    pub storage_path: String,

    /// Optional alt text; a default is used when missing.
    pub alt: Option<String>,

    /// Explicit display position, ascending.
    pub display_order: i64,

    /// Hidden rows are soft-deleted.
    pub is_visible: bool,

    pub created_at: DateTime<Utc>,
}

/// Payload for adding a metadata row.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct NewGalleryImage {
    pub storage_path: String,
    pub alt: String,
    pub display_order: i64,
}

fn id_as_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::String(s) => Ok(s),
        serde_json::Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!(
            "unsupported id value: {other}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numeric_row_ids_become_text() {
        let row: GalleryImageRow = serde_json::from_value(serde_json::json!({
            "id": 42,
            "storage_path": "a.jpg",
            "alt": null,
            "display_order": 0,
            "is_visible": true,
            "created_at": "2025-01-01T00:00:00Z"
        }))
        .unwrap();
        assert_eq!(row.id, "42");
        assert!(row.alt.is_none());
    }
}
