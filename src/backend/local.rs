//! LocalBackend: the hosted contracts implemented on SQLite for rows and
//! local disk for object payloads.
//!
//! Objects are sharded beneath `base_path/{bucket}/{shard}/{shard}/{key}`.
//! Writes made here publish on the in-process [`ChangeBus`] so live sessions
//! refresh without polling.

use super::{
    BackendError, BackendResult, ChangeFeed, GalleryTable, GuestbookTable, ObjectStorage,
    TableChange, feed::ChangeBus, public_object_url,
};
use crate::{
    crypto,
    models::{
        gallery::{GalleryImageRow, NewGalleryImage},
        guestbook::{GuestbookEntry, NewGuestbookEntry},
        storage::{ListOptions, SortOrder, StorageEntry, StorageMetadata, UploadOptions},
    },
};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, SqlitePool};
use std::{
    collections::BTreeSet,
    io::{self, ErrorKind},
    path::{Path, PathBuf},
    sync::Arc,
};
use tokio::{
    fs::{self, File},
    io::AsyncWriteExt,
    sync::broadcast,
};
use tracing::{debug, info};
use uuid::Uuid;

const MIGRATION: &str = include_str!("../../migrations/0001_init.sql");
const MAX_OBJECT_KEY_LEN: usize = 1024;
const BUCKET_NAME_MIN_LEN: usize = 3;
const BUCKET_NAME_MAX_LEN: usize = 63;

/// Metadata row of a stored object.
#[derive(Clone, FromRow, Debug)]
pub struct StoredObject {
    pub id: String,
    pub bucket: String,
    pub key: String,
    pub content_type: Option<String>,
    pub size_bytes: i64,
    pub etag: Option<String>,
    pub cache_control: Option<String>,
    pub last_modified: DateTime<Utc>,
}

#[derive(Clone)]
pub struct LocalBackend {
    /// Shared SQLite pool for object metadata, gallery and guestbook rows.
    pub db: Arc<SqlitePool>,

    /// Base directory on disk where object payloads are stored.
    pub base_path: PathBuf,

    /// Origin under which this service serves public objects.
    pub public_base_url: String,

    bus: ChangeBus,
}

impl LocalBackend {
    pub fn new(
        db: Arc<SqlitePool>,
        base_path: impl Into<PathBuf>,
        public_base_url: impl Into<String>,
        bus: ChangeBus,
    ) -> Self {
        Self {
            db,
            base_path: base_path.into(),
            public_base_url: public_base_url.into(),
            bus,
        }
    }

    /// Fresh in-memory database with the schema applied.
    #[cfg(test)]
    pub async fn open_in_memory(base_path: impl Into<PathBuf>) -> BackendResult<Self> {
        let pool = sqlx::sqlite::SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await?;
        let backend = Self::new(
            Arc::new(pool),
            base_path,
            "http://localhost:3000",
            ChangeBus::new(),
        );
        backend.migrate().await?;
        Ok(backend)
    }

    #[cfg(test)]
    pub fn bus(&self) -> ChangeBus {
        self.bus.clone()
    }

    /// Apply the embedded schema. Statements are idempotent.
    pub async fn migrate(&self) -> BackendResult<()> {
        let statements = MIGRATION
            .split(';')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>();

        info!("Running {} migration statements...", statements.len());

        for stmt in statements {
            debug!("Executing migration SQL: {}", stmt);
            sqlx::query(stmt).execute(&*self.db).await?;
        }
        Ok(())
    }

    /// Reject keys that are empty, absolute, traverse upwards or carry
    /// control characters.
    fn ensure_key_safe(&self, key: &str) -> BackendResult<()> {
        let invalid = key.is_empty()
            || key.len() > MAX_OBJECT_KEY_LEN
            || key.starts_with('/')
            || key.contains("..")
            || key
                .bytes()
                .any(|b| b.is_ascii_control() || b == b'\\' || b == b'\0');
        if invalid {
            return Err(BackendError::InvalidObjectKey(key.to_string()));
        }
        Ok(())
    }

    /// Bucket names: 3–63 chars of lowercase letters, digits, dots and
    /// hyphens, starting and ending with a letter or digit.
    fn ensure_bucket_name_safe(&self, name: &str) -> BackendResult<()> {
        let reason = if name.len() < BUCKET_NAME_MIN_LEN || name.len() > BUCKET_NAME_MAX_LEN {
            Some("must be between 3 and 63 characters")
        } else if !name
            .chars()
            .all(|c| matches!(c, 'a'..='z' | '0'..='9' | '.' | '-'))
        {
            Some("allowed characters are lowercase letters, digits, dots, and hyphens")
        } else if name.starts_with(['.', '-']) || name.ends_with(['.', '-']) {
            Some("must start and end with a lowercase letter or digit")
        } else if name.contains("..") {
            Some("cannot contain consecutive dots")
        } else {
            None
        };

        match reason {
            Some(reason) => Err(BackendError::InvalidBucketName {
                name: name.to_string(),
                reason: reason.into(),
            }),
            None => Ok(()),
        }
    }

    fn bucket_root(&self, bucket: &str) -> PathBuf {
        self.base_path.join(bucket)
    }

    /// Two-level shard ids from MD5(bucket/key), keeping directories small.
    fn object_shards(bucket: &str, key: &str) -> (String, String) {
        let digest = md5::compute(format!("{}/{}", bucket, key));
        (format!("{:02x}", digest[0]), format!("{:02x}", digest[1]))
    }

    fn object_path(&self, bucket: &str, key: &str) -> PathBuf {
        let (shard_a, shard_b) = Self::object_shards(bucket, key);
        let mut path = self.bucket_root(bucket);
        path.push(shard_a);
        path.push(shard_b);
        path.push(key);
        path
    }

    /// Open a stored object for streaming out.
    pub async fn open_object(&self, bucket: &str, key: &str) -> BackendResult<(StoredObject, File)> {
        self.ensure_bucket_name_safe(bucket)?;
        self.ensure_key_safe(key)?;
        let not_found = || BackendError::ObjectNotFound {
            bucket: bucket.to_string(),
            key: key.to_string(),
        };

        let object = sqlx::query_as::<_, StoredObject>(
            "SELECT id, bucket, key, content_type, size_bytes, etag, cache_control, last_modified
             FROM storage_objects WHERE bucket = ? AND key = ?",
        )
        .bind(bucket)
        .bind(key)
        .fetch_optional(&*self.db)
        .await?
        .ok_or_else(not_found)?;

        let file = File::open(self.object_path(bucket, key))
            .await
            .map_err(|err| {
                if err.kind() == ErrorKind::NotFound {
                    not_found()
                } else {
                    BackendError::Io(err)
                }
            })?;

        Ok((object, file))
    }

    /// Write `body` to a temp file, fsync, then rename into place.
    async fn write_payload(&self, file_path: &Path, body: &[u8]) -> BackendResult<()> {
        let parent = file_path.parent().map(Path::to_path_buf).ok_or_else(|| {
            BackendError::Io(io::Error::new(
                ErrorKind::Other,
                "object path missing parent directory",
            ))
        })?;
        fs::create_dir_all(&parent).await?;
        let tmp_path = parent.join(format!(".tmp-{}", Uuid::new_v4()));

        let written = async {
            let mut file = File::create(&tmp_path).await?;
            file.write_all(body).await?;
            file.flush().await?;
            file.sync_all().await
        }
        .await;
        if let Err(err) = written {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(BackendError::Io(err));
        }

        if let Err(err) = fs::rename(&tmp_path, file_path).await {
            if err.kind() == ErrorKind::AlreadyExists {
                fs::remove_file(file_path).await?;
                fs::rename(&tmp_path, file_path).await?;
            } else {
                let _ = fs::remove_file(&tmp_path).await;
                return Err(BackendError::Io(err));
            }
        }
        Ok(())
    }
}

#[async_trait]
impl ObjectStorage for LocalBackend {
    async fn list(
        &self,
        bucket: &str,
        prefix: &str,
        options: &ListOptions,
    ) -> BackendResult<Vec<StorageEntry>> {
        self.ensure_bucket_name_safe(bucket)?;
        let mut prefix = prefix.trim_start_matches('/').to_string();
        if !prefix.is_empty() && !prefix.ends_with('/') {
            prefix.push('/');
        }

        let rows = sqlx::query_as::<_, StoredObject>(
            "SELECT id, bucket, key, content_type, size_bytes, etag, cache_control, last_modified
             FROM storage_objects
             WHERE bucket = ? AND substr(key, 1, ?) = ?
             ORDER BY key ASC",
        )
        .bind(bucket)
        .bind(prefix.chars().count() as i64)
        .bind(&prefix)
        .fetch_all(&*self.db)
        .await?;

        let mut folders = BTreeSet::new();
        let mut entries = Vec::new();
        for row in rows {
            let rest = &row.key[prefix.len()..];
            if let Some(pos) = rest.find('/') {
                folders.insert(rest[..pos].to_string());
                continue;
            }
            entries.push(StorageEntry {
                name: rest.to_string(),
                id: Some(row.id),
                updated_at: Some(row.last_modified),
                metadata: Some(StorageMetadata {
                    size: Some(row.size_bytes),
                    mimetype: row.content_type,
                }),
            });
        }
        entries.extend(folders.into_iter().map(|name| StorageEntry {
            name,
            id: None,
            updated_at: None,
            metadata: None,
        }));

        match options.sort_by.column.as_str() {
            "updated_at" | "created_at" | "last_accessed_at" => {
                entries.sort_by(|a, b| a.updated_at.cmp(&b.updated_at))
            }
            _ => entries.sort_by(|a, b| a.name.cmp(&b.name)),
        }
        if options.sort_by.order == SortOrder::Desc {
            entries.reverse();
        }

        Ok(entries
            .into_iter()
            .skip(options.offset)
            .take(options.limit)
            .collect())
    }

    fn public_url(&self, bucket: &str, path: &str) -> String {
        public_object_url(&self.public_base_url, bucket, path)
    }

    async fn upload(
        &self,
        bucket: &str,
        path: &str,
        body: Bytes,
        options: &UploadOptions,
    ) -> BackendResult<()> {
        self.ensure_bucket_name_safe(bucket)?;
        self.ensure_key_safe(path)?;

        if !options.upsert {
            let exists: Option<String> =
                sqlx::query_scalar("SELECT id FROM storage_objects WHERE bucket = ? AND key = ?")
                    .bind(bucket)
                    .bind(path)
                    .fetch_optional(&*self.db)
                    .await?;
            if exists.is_some() {
                return Err(BackendError::Status {
                    status: 409,
                    body: format!("object `{}` already exists", path),
                });
            }
        }

        let file_path = self.object_path(bucket, path);
        self.write_payload(&file_path, &body).await?;

        let etag = format!("{:x}", md5::compute(&body));
        let result = sqlx::query(
            r#"
            INSERT INTO storage_objects (
                id, bucket, key, content_type, size_bytes, etag, cache_control, last_modified
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(bucket, key) DO UPDATE SET
                content_type = excluded.content_type,
                size_bytes = excluded.size_bytes,
                etag = excluded.etag,
                cache_control = excluded.cache_control,
                last_modified = excluded.last_modified
            "#,
        )
        .bind(Uuid::new_v4().to_string())
        .bind(bucket)
        .bind(path)
        .bind(options.content_type.clone())
        .bind(body.len() as i64)
        .bind(&etag)
        .bind(&options.cache_control)
        .bind(Utc::now())
        .execute(&*self.db)
        .await;

        match result {
            Ok(_) => {
                debug!(bucket, key = path, size = body.len(), "stored object");
                Ok(())
            }
            Err(err) => {
                let _ = fs::remove_file(&file_path).await;
                Err(BackendError::Sqlx(err))
            }
        }
    }
}

#[async_trait]
impl GalleryTable for LocalBackend {
    async fn list_visible(&self) -> BackendResult<Vec<GalleryImageRow>> {
        let rows = sqlx::query_as::<_, GalleryImageRow>(
            "SELECT id, storage_path, alt, display_order, is_visible, created_at
             FROM gallery_images
             WHERE is_visible = 1
             ORDER BY display_order ASC, created_at ASC",
        )
        .fetch_all(&*self.db)
        .await?;
        Ok(rows)
    }

    async fn insert(&self, row: &NewGalleryImage) -> BackendResult<GalleryImageRow> {
        let inserted = sqlx::query_as::<_, GalleryImageRow>(
            "INSERT INTO gallery_images (id, storage_path, alt, display_order, is_visible, created_at)
             VALUES (?, ?, ?, ?, 1, ?)
             RETURNING id, storage_path, alt, display_order, is_visible, created_at",
        )
        .bind(Uuid::new_v4().to_string())
        .bind(&row.storage_path)
        .bind(&row.alt)
        .bind(row.display_order)
        .bind(Utc::now())
        .fetch_one(&*self.db)
        .await?;
        self.bus.publish(TableChange::GalleryImages);
        Ok(inserted)
    }

    async fn hide(&self, id: &str) -> BackendResult<bool> {
        let result =
            sqlx::query("UPDATE gallery_images SET is_visible = 0 WHERE id = ? AND is_visible = 1")
                .bind(id)
                .execute(&*self.db)
                .await?;
        let hidden = result.rows_affected() > 0;
        if hidden {
            self.bus.publish(TableChange::GalleryImages);
        }
        Ok(hidden)
    }
}

#[async_trait]
impl GuestbookTable for LocalBackend {
    async fn list_visible(&self) -> BackendResult<Vec<GuestbookEntry>> {
        let rows = sqlx::query_as::<_, GuestbookEntry>(
            "SELECT id, name, message, is_groom, created_at, is_deleted
             FROM guestbook
             WHERE is_deleted = 0
             ORDER BY created_at DESC, id DESC",
        )
        .fetch_all(&*self.db)
        .await?;
        Ok(rows)
    }

    async fn insert(&self, entry: &NewGuestbookEntry) -> BackendResult<GuestbookEntry> {
        let inserted = sqlx::query_as::<_, GuestbookEntry>(
            "INSERT INTO guestbook (id, name, message, is_groom, password_hash, created_at, is_deleted)
             VALUES (?, ?, ?, ?, ?, ?, ?)
             RETURNING id, name, message, is_groom, created_at, is_deleted",
        )
        .bind(Uuid::new_v4())
        .bind(&entry.name)
        .bind(&entry.message)
        .bind(entry.is_groom_side)
        .bind(&entry.password_hash)
        .bind(Utc::now())
        .bind(entry.is_deleted)
        .fetch_one(&*self.db)
        .await?;
        self.bus.publish(TableChange::Guestbook);
        Ok(inserted)
    }

    async fn soft_delete(&self, id: Uuid, password: &str) -> BackendResult<bool> {
        let mut tx = self.db.begin().await?;
        let stored: Option<String> = sqlx::query_scalar(
            "SELECT password_hash FROM guestbook WHERE id = ? AND is_deleted = 0",
        )
        .bind(id)
        .fetch_optional(&mut *tx)
        .await?;

        let matched = stored.is_some_and(|hash| crypto::verify_password(password, &hash));
        if !matched {
            return Ok(false);
        }

        sqlx::query("UPDATE guestbook SET is_deleted = 1 WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        self.bus.publish(TableChange::Guestbook);
        Ok(true)
    }

    async fn health_check(&self) -> BackendResult<()> {
        let value: i64 = sqlx::query_scalar("SELECT 1").fetch_one(&*self.db).await?;
        if value == 1 {
            Ok(())
        } else {
            Err(BackendError::Decode(format!("unexpected result: {}", value)))
        }
    }
}

impl ChangeFeed for LocalBackend {
    fn subscribe(&self) -> broadcast::Receiver<TableChange> {
        self.bus.subscribe()
    }
}
