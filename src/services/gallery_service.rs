//! Produces the ordered image list for the carousel.
//!
//! Sources are tried in order and the first non-empty result wins:
//! 1. the storage bucket listing,
//! 2. the `gallery_images` metadata table.
//!
//! A failing source counts as empty. When every source is empty the caller
//! substitutes [`bundled_fallback`].

use crate::{
    backend::{Backend, BackendError, BackendResult, GalleryTable, ObjectStorage},
    models::{
        gallery::{Image, NewGalleryImage},
        storage::{ListOptions, UploadOptions},
    },
};
use async_trait::async_trait;
use bytes::Bytes;
use image::{DynamicImage, ImageFormat, codecs::jpeg::JpegEncoder};
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

/// File extensions treated as images, compared lowercase.
pub const IMAGE_EXTENSIONS: [&str; 5] = ["jpg", "jpeg", "png", "webp", "gif"];
pub const DEFAULT_ALT: &str = "Wedding photo";
const JPEG_QUALITY: u8 = 80;

#[derive(Debug, Error)]
pub enum GalleryError {
    #[error("invalid file name `{0}`")]
    InvalidFilename(String),
    #[error("upload of `{filename}` failed: {source}")]
    Upload {
        filename: String,
        #[source]
        source: BackendError,
    },
    #[error("image `{0}` not found")]
    NotFound(String),
    #[error(transparent)]
    Backend(#[from] BackendError),
}

/// Where gallery objects live.
#[derive(Clone, Debug)]
pub struct GallerySettings {
    pub bucket: String,
    /// Folder inside the bucket, empty or ending in `/`.
    pub folder: String,
}

impl GallerySettings {
    pub fn new(bucket: impl Into<String>, folder: impl Into<String>) -> Self {
        let mut folder = folder.into().trim_matches('/').to_string();
        if !folder.is_empty() {
            folder.push('/');
        }
        Self {
            bucket: bucket.into(),
            folder,
        }
    }

    fn full_path(&self, path: &str) -> String {
        format!("{}{}", self.folder, path)
    }
}

/// A file handed to the uploader.
#[derive(Clone, Debug)]
pub struct ImageUpload {
    pub filename: String,
    pub content_type: Option<String>,
    pub bytes: Bytes,
}

/// Outcome of one file of a batch.
#[derive(Serialize, Clone, Debug, PartialEq, Eq)]
pub struct UploadReport {
    pub filename: String,
    pub url: Option<String>,
    pub error: Option<String>,
}

/// One step of the resolution chain.
#[async_trait]
pub trait GallerySource: Send + Sync {
    fn name(&self) -> &'static str;

    async fn fetch(&self) -> BackendResult<Vec<Image>>;
}

/// Bucket listing filtered to image files, sorted by name.
pub struct StorageListingSource {
    storage: Arc<dyn ObjectStorage>,
    settings: GallerySettings,
}

impl StorageListingSource {
    pub fn new(storage: Arc<dyn ObjectStorage>, settings: GallerySettings) -> Self {
        Self { storage, settings }
    }
}

#[async_trait]
impl GallerySource for StorageListingSource {
    fn name(&self) -> &'static str {
        "storage"
    }

    async fn fetch(&self) -> BackendResult<Vec<Image>> {
        let files = self
            .storage
            .list(
                &self.settings.bucket,
                &self.settings.folder,
                &ListOptions::default(),
            )
            .await?;
        debug!(count = files.len(), "storage listing returned entries");

        let images = files
            .into_iter()
            .filter(|file| is_image_file(&file.name))
            .enumerate()
            .map(|(index, file)| Image {
                id: file.id.clone().unwrap_or_else(|| index.to_string()),
                url: self
                    .storage
                    .public_url(&self.settings.bucket, &self.settings.full_path(&file.name)),
                alt: alt_from_filename(&file.name),
            })
            .collect();
        Ok(images)
    }
}

/// Visible rows of the `gallery_images` table.
pub struct MetadataTableSource {
    table: Arc<dyn GalleryTable>,
    storage: Arc<dyn ObjectStorage>,
    settings: GallerySettings,
}

impl MetadataTableSource {
    pub fn new(
        table: Arc<dyn GalleryTable>,
        storage: Arc<dyn ObjectStorage>,
        settings: GallerySettings,
    ) -> Self {
        Self {
            table,
            storage,
            settings,
        }
    }
}

#[async_trait]
impl GallerySource for MetadataTableSource {
    fn name(&self) -> &'static str {
        "gallery_images"
    }

    async fn fetch(&self) -> BackendResult<Vec<Image>> {
        let rows = self.table.list_visible().await?;
        Ok(rows
            .into_iter()
            .map(|row| Image {
                url: self.storage.public_url(
                    &self.settings.bucket,
                    &self.settings.full_path(&row.storage_path),
                ),
                alt: row
                    .alt
                    .filter(|alt| !alt.trim().is_empty())
                    .unwrap_or_else(|| DEFAULT_ALT.to_string()),
                id: row.id,
            })
            .collect())
    }
}

#[derive(Clone)]
pub struct GalleryResolver {
    sources: Vec<Arc<dyn GallerySource>>,
    storage: Arc<dyn ObjectStorage>,
    table: Arc<dyn GalleryTable>,
    settings: GallerySettings,
}

impl GalleryResolver {
    /// Default chain: storage listing, then the metadata table.
    pub fn new(backend: &Backend, settings: GallerySettings) -> Self {
        let sources: Vec<Arc<dyn GallerySource>> = vec![
            Arc::new(StorageListingSource::new(
                backend.storage.clone(),
                settings.clone(),
            )),
            Arc::new(MetadataTableSource::new(
                backend.gallery.clone(),
                backend.storage.clone(),
                settings.clone(),
            )),
        ];
        Self::with_sources(backend, settings, sources)
    }

    pub fn with_sources(
        backend: &Backend,
        settings: GallerySettings,
        sources: Vec<Arc<dyn GallerySource>>,
    ) -> Self {
        Self {
            sources,
            storage: backend.storage.clone(),
            table: backend.gallery.clone(),
            settings,
        }
    }

    /// Run the chain and return the first non-empty result, or empty.
    ///
    /// Never fails: source errors are logged and the next source is tried.
    pub async fn resolve_gallery_images(&self) -> Vec<Image> {
        for source in &self.sources {
            match source.fetch().await {
                Ok(images) if !images.is_empty() => {
                    info!(
                        source = source.name(),
                        count = images.len(),
                        "resolved gallery images"
                    );
                    return images;
                }
                Ok(_) => debug!(source = source.name(), "gallery source empty"),
                Err(err) => warn!(source = source.name(), "gallery source failed: {}", err),
            }
        }
        info!("no gallery source produced images");
        Vec::new()
    }

    /// Public URL of a path relative to the gallery folder.
    pub fn public_url(&self, path: &str) -> String {
        self.storage
            .public_url(&self.settings.bucket, &self.settings.full_path(path))
    }

    /// Upload one image and return its public URL.
    ///
    /// With `reencode`, raster images are converted to JPEG first. GIFs and
    /// images with transparent pixels keep their original bytes and name, as
    /// does any image that fails to convert.
    pub async fn upload_image(
        &self,
        upload: ImageUpload,
        reencode: bool,
    ) -> Result<String, GalleryError> {
        let filename = sanitize_filename(&upload.filename)?;
        let is_image = upload
            .content_type
            .as_deref()
            .is_some_and(|ct| ct.starts_with("image/"));

        let (final_name, bytes, content_type) = if reencode && is_image {
            let original = upload.bytes.clone();
            match tokio::task::spawn_blocking(move || reencode_to_jpeg(&original)).await {
                Ok(Ok(Some(encoded))) => {
                    let renamed = replace_extension(&filename, "jpg");
                    info!("re-encoded {} -> {}", filename, renamed);
                    (renamed, Bytes::from(encoded), Some("image/jpeg".to_string()))
                }
                Ok(Ok(None)) => {
                    debug!("keeping {} as uploaded", filename);
                    (filename, upload.bytes, upload.content_type)
                }
                Ok(Err(err)) => {
                    warn!("re-encoding {} failed, uploading original: {}", filename, err);
                    (filename, upload.bytes, upload.content_type)
                }
                Err(err) => {
                    warn!("re-encoding task for {} failed: {}", filename, err);
                    (filename, upload.bytes, upload.content_type)
                }
            }
        } else {
            (filename, upload.bytes, upload.content_type)
        };

        let options = UploadOptions {
            content_type,
            ..UploadOptions::default()
        };
        self.storage
            .upload(
                &self.settings.bucket,
                &self.settings.full_path(&final_name),
                bytes,
                &options,
            )
            .await
            .map_err(|source| GalleryError::Upload {
                filename: final_name.clone(),
                source,
            })?;

        Ok(self.public_url(&final_name))
    }

    /// Upload files one after another, naming each
    /// `{stamp_millis}_{index+1}_{original}`. A failure is reported for that
    /// file only.
    pub async fn upload_batch(
        &self,
        files: Vec<ImageUpload>,
        stamp_millis: i64,
        reencode: bool,
    ) -> Vec<UploadReport> {
        let total = files.len();
        let mut reports = Vec::with_capacity(total);
        for (index, mut file) in files.into_iter().enumerate() {
            let original = file.filename.clone();
            let uploaded = match sanitize_filename(&original) {
                Ok(base) => {
                    file.filename = format!("{}_{}_{}", stamp_millis, index + 1, base);
                    self.upload_image(file, reencode).await
                }
                Err(err) => Err(err),
            };
            let report = match uploaded {
                Ok(url) => UploadReport {
                    filename: original,
                    url: Some(url),
                    error: None,
                },
                Err(err) => {
                    warn!("upload of {} failed: {}", original, err);
                    UploadReport {
                        filename: original,
                        url: None,
                        error: Some(err.to_string()),
                    }
                }
            };
            reports.push(report);
            debug!("uploaded {}/{}", index + 1, total);
        }
        reports
    }

    /// Add a row to the metadata table.
    pub async fn add_image_metadata(
        &self,
        storage_path: &str,
        alt: &str,
        display_order: i64,
    ) -> Result<Image, GalleryError> {
        let row = self
            .table
            .insert(&NewGalleryImage {
                storage_path: storage_path.to_string(),
                alt: alt.to_string(),
                display_order,
            })
            .await?;
        Ok(Image {
            url: self.public_url(&row.storage_path),
            alt: row
                .alt
                .filter(|alt| !alt.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_ALT.to_string()),
            id: row.id,
        })
    }

    /// Soft-delete a metadata row.
    pub async fn hide_image(&self, id: &str) -> Result<(), GalleryError> {
        if self.table.hide(id).await? {
            Ok(())
        } else {
            Err(GalleryError::NotFound(id.to_string()))
        }
    }
}

/// `true` when the last extension is one of [`IMAGE_EXTENSIONS`].
pub fn is_image_file(name: &str) -> bool {
    name.rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .is_some_and(|ext| IMAGE_EXTENSIONS.contains(&ext.as_str()))
}

/// Filename without its last extension, `-` and `_` replaced by spaces.
pub fn alt_from_filename(name: &str) -> String {
    let stem = match name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() && !ext.contains('/') => stem,
        _ => name,
    };
    stem.replace(['-', '_'], " ")
}

fn replace_extension(name: &str, ext: &str) -> String {
    match name.rsplit_once('.') {
        Some((stem, _)) if !stem.is_empty() => format!("{}.{}", stem, ext),
        _ => format!("{}.{}", name, ext),
    }
}

/// Keep only the final path component; reject empty names.
fn sanitize_filename(name: &str) -> Result<String, GalleryError> {
    let base = name.rsplit(['/', '\\']).next().unwrap_or("").trim();
    if base.is_empty() || base == "." || base == ".." {
        return Err(GalleryError::InvalidFilename(name.to_string()));
    }
    Ok(base.to_string())
}

/// Decode any supported raster format and encode as lossy JPEG.
///
/// `None` when JPEG would lose something: animation (GIF) or transparency.
fn reencode_to_jpeg(bytes: &[u8]) -> Result<Option<Vec<u8>>, image::ImageError> {
    if image::guess_format(bytes)? == ImageFormat::Gif {
        return Ok(None);
    }
    let decoded = image::load_from_memory(bytes)?;
    if has_transparency(&decoded) {
        return Ok(None);
    }
    let rgb = DynamicImage::ImageRgb8(decoded.to_rgb8());
    let mut out = Vec::new();
    let encoder = JpegEncoder::new_with_quality(&mut out, JPEG_QUALITY);
    rgb.write_with_encoder(encoder)?;
    Ok(Some(out))
}

/// An alpha channel that is fully opaque everywhere does not count.
fn has_transparency(image: &DynamicImage) -> bool {
    image.color().has_alpha() && image.to_rgba8().pixels().any(|p| p[3] < u8::MAX)
}

/// Built-in gallery used when no backend source has images.
pub fn bundled_fallback() -> Vec<Image> {
    (1..=4)
        .map(|n| Image {
            id: n.to_string(),
            url: format!("/images/gallery/photo{}.jpg", n),
            alt: format!("{} {}", DEFAULT_ALT, n),
        })
        .collect()
}
