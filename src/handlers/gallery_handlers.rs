//! Gallery endpoints: the resolved carousel list and the admin uploader.

use crate::{
    crypto,
    errors::AppError,
    models::gallery::Image,
    services::gallery_service::{ImageUpload, UploadReport, bundled_fallback},
    state::AppState,
};
use axum::{
    Json,
    extract::{Multipart, Path, Query, State},
    http::{HeaderMap, StatusCode, header},
    response::IntoResponse,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};

#[derive(Serialize, Debug)]
pub struct GalleryResponse {
    pub images: Vec<Image>,
    /// `backend` or `bundled`.
    pub source: &'static str,
}

#[derive(Deserialize, Debug, Default)]
pub struct UploadQuery {
    pub reencode: Option<bool>,
}

#[derive(Serialize, Debug)]
pub struct UploadResponse {
    pub uploaded: usize,
    pub failed: usize,
    pub results: Vec<UploadReport>,
}

#[derive(Deserialize, Debug)]
pub struct AddMetadataRequest {
    pub storage_path: String,
    #[serde(default)]
    pub alt: Option<String>,
    #[serde(default)]
    pub display_order: i64,
}

/// `GET /api/gallery`
pub async fn get_gallery(State(state): State<AppState>) -> Json<GalleryResponse> {
    let images = state.gallery.resolve_gallery_images().await;
    if images.is_empty() {
        return Json(GalleryResponse {
            images: bundled_fallback(),
            source: "bundled",
        });
    }
    Json(GalleryResponse {
        images,
        source: "backend",
    })
}

/// `POST /api/admin/gallery` with one or more multipart file fields.
pub async fn upload_images(
    State(state): State<AppState>,
    Query(query): Query<UploadQuery>,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> Result<Json<UploadResponse>, AppError> {
    require_admin(&state, &headers)?;

    let mut files = Vec::new();
    while let Some(field) = multipart.next_field().await.map_err(|e| {
        tracing::warn!("malformed multipart upload: {}", e);
        AppError::bad_request("The upload could not be read.")
    })? {
        let Some(filename) = field.file_name().map(str::to_string) else {
            continue;
        };
        let content_type = field.content_type().map(str::to_string);
        let bytes = field.bytes().await.map_err(|e| {
            tracing::warn!("reading upload {} failed: {}", filename, e);
            AppError::bad_request(format!("{} could not be read.", filename))
        })?;
        files.push(ImageUpload {
            filename,
            content_type,
            bytes,
        });
    }
    if files.is_empty() {
        return Err(AppError::bad_request("Choose at least one image to upload."));
    }

    let reencode = query.reencode.unwrap_or(state.config.reencode_uploads);
    let results = state
        .gallery
        .upload_batch(files, Utc::now().timestamp_millis(), reencode)
        .await;
    let failed = results.iter().filter(|r| r.error.is_some()).count();
    tracing::info!(
        uploaded = results.len() - failed,
        failed,
        "gallery batch upload finished"
    );

    Ok(Json(UploadResponse {
        uploaded: results.len() - failed,
        failed,
        results,
    }))
}

/// `POST /api/admin/gallery/metadata`
pub async fn add_metadata(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<AddMetadataRequest>,
) -> Result<impl IntoResponse, AppError> {
    require_admin(&state, &headers)?;
    let path = req.storage_path.trim();
    if path.is_empty() {
        return Err(AppError::bad_request("storage_path is required."));
    }
    let image = state
        .gallery
        .add_image_metadata(path, req.alt.as_deref().unwrap_or(""), req.display_order)
        .await?;
    Ok((StatusCode::CREATED, Json(image)))
}

/// `DELETE /api/admin/gallery/metadata/{id}` hides the row.
pub async fn hide_metadata(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<StatusCode, AppError> {
    require_admin(&state, &headers)?;
    state.gallery.hide_image(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Admin routes are open when no token is configured.
fn require_admin(state: &AppState, headers: &HeaderMap) -> Result<(), AppError> {
    let Some(expected) = state.config.admin_token.as_deref() else {
        return Ok(());
    };
    let presented = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim);
    match presented {
        Some(token) if crypto::secrets_match(token, expected) => Ok(()),
        Some(_) => Err(AppError::forbidden("This admin token is not valid.")),
        None => Err(AppError::unauthorized("Admin token required.")),
    }
}
