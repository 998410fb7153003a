//! Backend contracts for storage, tables and the change feed.
//!
//! The invitation site talks to a hosted backend-as-a-service. Everything the
//! services need from it sits behind the traits below so a [`Backend`] handle
//! can be constructed once at startup and injected, either as the hosted
//! [`supabase::SupabaseBackend`] or the self-contained [`local::LocalBackend`].

pub mod feed;
pub mod local;
pub mod supabase;

use crate::models::{
    gallery::{GalleryImageRow, NewGalleryImage},
    guestbook::{GuestbookEntry, NewGuestbookEntry},
    storage::{ListOptions, StorageEntry, UploadOptions},
};
use async_trait::async_trait;
use bytes::Bytes;
use percent_encoding::{AsciiSet, CONTROLS, utf8_percent_encode};
use serde::Serialize;
use std::{io, sync::Arc};
use thiserror::Error;
use tokio::sync::broadcast;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("backend request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("backend returned HTTP {status}: {body}")]
    Status { status: u16, body: String },
    #[error("bucket `{name}` invalid: {reason}")]
    InvalidBucketName { name: String, reason: String },
    #[error("invalid object key `{0}`")]
    InvalidObjectKey(String),
    #[error("object `{key}` not found in bucket `{bucket}`")]
    ObjectNotFound { bucket: String, key: String },
    #[error("unexpected backend response: {0}")]
    Decode(String),
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type BackendResult<T> = Result<T, BackendError>;

/// A table whose contents changed.
#[derive(Serialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TableChange {
    Guestbook,
    GalleryImages,
}

impl TableChange {
    pub fn table_name(self) -> &'static str {
        match self {
            TableChange::Guestbook => "guestbook",
            TableChange::GalleryImages => "gallery_images",
        }
    }
}

/// Bucket-based object storage.
#[async_trait]
pub trait ObjectStorage: Send + Sync {
    /// List the direct children of `prefix` in `bucket`.
    async fn list(
        &self,
        bucket: &str,
        prefix: &str,
        options: &ListOptions,
    ) -> BackendResult<Vec<StorageEntry>>;

    /// Public address of an object. Pure: no network call, same input gives
    /// the same output.
    fn public_url(&self, bucket: &str, path: &str) -> String;

    /// Store `body` at `path`, overwriting when `options.upsert` is set.
    async fn upload(
        &self,
        bucket: &str,
        path: &str,
        body: Bytes,
        options: &UploadOptions,
    ) -> BackendResult<()>;
}

/// The `gallery_images` metadata table.
#[async_trait]
pub trait GalleryTable: Send + Sync {
    /// Visible rows ordered by `display_order`, then `created_at`.
    async fn list_visible(&self) -> BackendResult<Vec<GalleryImageRow>>;

    async fn insert(&self, row: &NewGalleryImage) -> BackendResult<GalleryImageRow>;

    /// Mark a row hidden. Returns `false` when no row matched.
    async fn hide(&self, id: &str) -> BackendResult<bool>;
}

/// The `guestbook` table and its delete routine.
#[async_trait]
pub trait GuestbookTable: Send + Sync {
    /// Rows with `is_deleted = false`, newest first.
    async fn list_visible(&self) -> BackendResult<Vec<GuestbookEntry>>;

    async fn insert(&self, entry: &NewGuestbookEntry) -> BackendResult<GuestbookEntry>;

    /// Server-side routine `soft_delete_guestbook_entry(entry_id, entry_password)`.
    ///
    /// Returns `true` only when the password matched and the flag was set.
    async fn soft_delete(&self, id: Uuid, password: &str) -> BackendResult<bool>;

    /// Cheap reachability probe used by the readiness endpoint.
    async fn health_check(&self) -> BackendResult<()>;
}

/// Publish/subscribe signal that a table changed.
pub trait ChangeFeed: Send + Sync {
    fn subscribe(&self) -> broadcast::Receiver<TableChange>;
}

/// Characters escaped inside a single object path segment.
const PATH_SEGMENT: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'`')
    .add(b'{')
    .add(b'}');

/// Percent-encode each `/`-separated segment of an object path.
pub fn encode_object_path(path: &str) -> String {
    path.split('/')
        .map(|segment| utf8_percent_encode(segment, PATH_SEGMENT).to_string())
        .collect::<Vec<_>>()
        .join("/")
}

/// Public-URL convention shared by the hosted storage and the local backend:
/// `{base}/storage/v1/object/public/{bucket}/{path}`.
pub fn public_object_url(base_url: &str, bucket: &str, path: &str) -> String {
    format!(
        "{}/storage/v1/object/public/{}/{}",
        base_url.trim_end_matches('/'),
        bucket,
        encode_object_path(path.trim_start_matches('/'))
    )
}

/// Explicitly constructed handle to every backend capability.
///
/// Built once at startup and cloned into the services that need it.
#[derive(Clone)]
pub struct Backend {
    pub storage: Arc<dyn ObjectStorage>,
    pub gallery: Arc<dyn GalleryTable>,
    pub guestbook: Arc<dyn GuestbookTable>,
    pub changes: Arc<dyn ChangeFeed>,
}

impl Backend {
    /// Build a handle from one value implementing every capability.
    pub fn from_shared<T>(inner: Arc<T>) -> Self
    where
        T: ObjectStorage + GalleryTable + GuestbookTable + ChangeFeed + 'static,
    {
        Self {
            storage: inner.clone(),
            gallery: inner.clone(),
            guestbook: inner.clone(),
            changes: inner,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn public_url_is_stable_and_encoded() {
        let first = public_object_url("https://x.supabase.co/", "wedding-gallery", "our day.jpg");
        let second = public_object_url("https://x.supabase.co/", "wedding-gallery", "our day.jpg");
        assert_eq!(first, second);
        assert_eq!(
            first,
            "https://x.supabase.co/storage/v1/object/public/wedding-gallery/our%20day.jpg"
        );
    }

    #[test]
    fn folder_separators_survive_encoding() {
        assert_eq!(encode_object_path("uploads/a#1.png"), "uploads/a%231.png");
    }
}
