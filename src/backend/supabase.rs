//! Client for the hosted backend-as-a-service: storage API plus PostgREST
//! tables and RPC.

use super::{
    BackendError, BackendResult, ChangeFeed, GalleryTable, GuestbookTable, ObjectStorage,
    TableChange, encode_object_path, feed::ChangeBus, public_object_url,
};
use crate::models::{
    gallery::{GalleryImageRow, NewGalleryImage},
    guestbook::{GuestbookEntry, NewGuestbookEntry},
    storage::{ListOptions, StorageEntry, UploadOptions},
};
use async_trait::async_trait;
use bytes::Bytes;
use reqwest::{Client, RequestBuilder, Response, header::CONTENT_TYPE};
use serde::{Serialize, de::DeserializeOwned};
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, instrument, warn};
use uuid::Uuid;

const GUESTBOOK_COLUMNS: &str = "id,name,message,is_groom,created_at,is_deleted";
const GALLERY_COLUMNS: &str = "id,storage_path,alt,display_order,is_visible,created_at";
const DELETE_ROUTINE: &str = "soft_delete_guestbook_entry";

/// Endpoint and anon key of the hosted project.
#[derive(Clone, Debug)]
pub struct SupabaseConfig {
    pub url: String,
    pub anon_key: String,
}

impl SupabaseConfig {
    pub fn new(url: impl Into<String>, anon_key: impl Into<String>) -> Self {
        Self {
            url: url.into().trim_end_matches('/').to_string(),
            anon_key: anon_key.into(),
        }
    }
}

#[derive(Serialize)]
struct ListRequest<'a> {
    prefix: &'a str,
    #[serde(flatten)]
    options: &'a ListOptions,
}

#[derive(Serialize)]
struct SoftDeleteArgs<'a> {
    entry_id: Uuid,
    entry_password: &'a str,
}

#[derive(Serialize)]
struct HideImage {
    is_visible: bool,
}

pub struct SupabaseBackend {
    config: SupabaseConfig,
    client: Client,
    bus: ChangeBus,
}

impl SupabaseBackend {
    /// Create a client with a 30 second request timeout.
    pub fn new(config: SupabaseConfig, bus: ChangeBus) -> BackendResult<Self> {
        let client = Client::builder().timeout(Duration::from_secs(30)).build()?;
        Ok(Self::with_client(config, client, bus))
    }

    /// Create a client around an existing `reqwest::Client`.
    pub fn with_client(config: SupabaseConfig, client: Client, bus: ChangeBus) -> Self {
        Self {
            config,
            client,
            bus,
        }
    }

    fn storage_url(&self, path: &str) -> String {
        format!("{}/storage/v1/{}", self.config.url, path)
    }

    fn rest_url(&self, path: &str) -> String {
        format!("{}/rest/v1/{}", self.config.url, path)
    }

    fn authed(&self, request: RequestBuilder) -> RequestBuilder {
        request
            .header("apikey", &self.config.anon_key)
            .bearer_auth(&self.config.anon_key)
    }

    /// Turn non-2xx responses into [`BackendError::Status`].
    async fn check(response: Response) -> BackendResult<Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        warn!(%status, "backend request rejected");
        Err(BackendError::Status {
            status: status.as_u16(),
            body,
        })
    }

    async fn send_json<T: DeserializeOwned>(&self, request: RequestBuilder) -> BackendResult<T> {
        let response = Self::check(self.authed(request).send().await?).await?;
        let text = response.text().await?;
        serde_json::from_str(&text).map_err(|err| BackendError::Decode(err.to_string()))
    }

    /// PostgREST returns inserted/updated rows as an array.
    fn first_row<T>(rows: Vec<T>, table: &str) -> BackendResult<T> {
        rows.into_iter()
            .next()
            .ok_or_else(|| BackendError::Decode(format!("no row returned from `{}`", table)))
    }
}

#[async_trait]
impl ObjectStorage for SupabaseBackend {
    #[instrument(skip(self, options))]
    async fn list(
        &self,
        bucket: &str,
        prefix: &str,
        options: &ListOptions,
    ) -> BackendResult<Vec<StorageEntry>> {
        let url = self.storage_url(&format!("object/list/{}", bucket));
        let body = ListRequest { prefix, options };
        let entries: Vec<StorageEntry> = self.send_json(self.client.post(url).json(&body)).await?;
        debug!(count = entries.len(), "listed storage objects");
        Ok(entries)
    }

    fn public_url(&self, bucket: &str, path: &str) -> String {
        public_object_url(&self.config.url, bucket, path)
    }

    #[instrument(skip(self, body, options), fields(size = body.len()))]
    async fn upload(
        &self,
        bucket: &str,
        path: &str,
        body: Bytes,
        options: &UploadOptions,
    ) -> BackendResult<()> {
        let url = self.storage_url(&format!("object/{}/{}", bucket, encode_object_path(path)));
        let content_type = options
            .content_type
            .clone()
            .unwrap_or_else(|| "application/octet-stream".into());
        let request = self
            .client
            .post(url)
            .header("x-upsert", options.upsert.to_string())
            .header("cache-control", &options.cache_control)
            .header(CONTENT_TYPE, content_type)
            .body(body);
        Self::check(self.authed(request).send().await?).await?;
        Ok(())
    }
}

#[async_trait]
impl GalleryTable for SupabaseBackend {
    async fn list_visible(&self) -> BackendResult<Vec<GalleryImageRow>> {
        let request = self.client.get(self.rest_url("gallery_images")).query(&[
            ("select", GALLERY_COLUMNS),
            ("is_visible", "eq.true"),
            ("order", "display_order.asc,created_at.asc"),
        ]);
        self.send_json(request).await
    }

    async fn insert(&self, row: &NewGalleryImage) -> BackendResult<GalleryImageRow> {
        let request = self
            .client
            .post(self.rest_url("gallery_images"))
            .query(&[("select", GALLERY_COLUMNS)])
            .header("Prefer", "return=representation")
            .json(row);
        let rows: Vec<GalleryImageRow> = self.send_json(request).await?;
        let inserted = Self::first_row(rows, "gallery_images")?;
        self.bus.publish(TableChange::GalleryImages);
        Ok(inserted)
    }

    async fn hide(&self, id: &str) -> BackendResult<bool> {
        let request = self
            .client
            .patch(self.rest_url("gallery_images"))
            .query(&[("id", format!("eq.{}", id)), ("select", "id".into())])
            .header("Prefer", "return=representation")
            .json(&HideImage { is_visible: false });
        let rows: Vec<serde_json::Value> = self.send_json(request).await?;
        let hidden = !rows.is_empty();
        if hidden {
            self.bus.publish(TableChange::GalleryImages);
        }
        Ok(hidden)
    }
}

#[async_trait]
impl GuestbookTable for SupabaseBackend {
    async fn list_visible(&self) -> BackendResult<Vec<GuestbookEntry>> {
        let request = self.client.get(self.rest_url("guestbook")).query(&[
            ("select", GUESTBOOK_COLUMNS),
            ("is_deleted", "eq.false"),
            ("order", "created_at.desc,id.desc"),
        ]);
        self.send_json(request).await
    }

    async fn insert(&self, entry: &NewGuestbookEntry) -> BackendResult<GuestbookEntry> {
        let request = self
            .client
            .post(self.rest_url("guestbook"))
            .query(&[("select", GUESTBOOK_COLUMNS)])
            .header("Prefer", "return=representation")
            .json(&[entry]);
        let rows: Vec<GuestbookEntry> = self.send_json(request).await?;
        let inserted = Self::first_row(rows, "guestbook")?;
        self.bus.publish(TableChange::Guestbook);
        Ok(inserted)
    }

    #[instrument(skip(self, password))]
    async fn soft_delete(&self, id: Uuid, password: &str) -> BackendResult<bool> {
        let request = self
            .client
            .post(self.rest_url(&format!("rpc/{}", DELETE_ROUTINE)))
            .json(&SoftDeleteArgs {
                entry_id: id,
                entry_password: password,
            });
        let deleted: bool = self.send_json(request).await?;
        if deleted {
            self.bus.publish(TableChange::Guestbook);
        }
        Ok(deleted)
    }

    async fn health_check(&self) -> BackendResult<()> {
        let request = self
            .client
            .get(self.rest_url("guestbook"))
            .query(&[("select", "id"), ("limit", "1")]);
        let _: Vec<serde_json::Value> = self.send_json(request).await?;
        Ok(())
    }
}

impl ChangeFeed for SupabaseBackend {
    fn subscribe(&self) -> broadcast::Receiver<TableChange> {
        self.bus.subscribe()
    }
}
