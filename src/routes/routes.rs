//! Defines routes for the invitation page API.
//!
//! ## Structure
//! - **Probes**: `GET /healthz`, `GET /readyz`
//! - **Page data**
//!   - `GET  /api/config`: optional SDK keys and feature flags
//!   - `GET  /api/gallery`: resolved carousel images
//!   - `GET  /api/navigation/{provider}`: map deep link or web URL
//!   - `GET  /api/countdown`, `GET /api/calendar.ics`
//! - **Guestbook**
//!   - `GET  /api/guestbook`, `POST /api/guestbook`
//!   - `POST /api/guestbook/{id}/delete`
//!   - `GET  /api/guestbook/events`: server-sent change signals
//! - **Admin** (bearer token when configured)
//!   - `POST   /api/admin/gallery`: multipart upload
//!   - `POST   /api/admin/gallery/metadata`
//!   - `DELETE /api/admin/gallery/metadata/{id}`
//! - **Local objects**: `GET /storage/v1/object/public/{bucket}/{*key}`

use crate::{
    handlers::{
        event_handlers::{get_calendar, get_config, get_countdown, get_navigation},
        gallery_handlers::{add_metadata, get_gallery, hide_metadata, upload_images},
        guestbook_handlers::{change_events, delete_entry, list_entries, submit_entry},
        health_handlers::{healthz, readyz},
        storage_handlers::get_public_object,
    },
    state::AppState,
};
use axum::{
    Router,
    extract::DefaultBodyLimit,
    routing::{delete, get, post},
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

const MAX_UPLOAD_BYTES: usize = 50 * 1024 * 1024;

/// Build the router. State is attached by the caller.
pub fn routes() -> Router<AppState> {
    Router::new()
        // health endpoints (mounted at root)
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/api/config", get(get_config))
        .route("/api/gallery", get(get_gallery))
        .route("/api/navigation/{provider}", get(get_navigation))
        .route("/api/countdown", get(get_countdown))
        .route("/api/calendar.ics", get(get_calendar))
        .route("/api/guestbook", get(list_entries).post(submit_entry))
        .route("/api/guestbook/events", get(change_events))
        .route("/api/guestbook/{id}/delete", post(delete_entry))
        .route(
            "/api/admin/gallery",
            post(upload_images).layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES)),
        )
        .route("/api/admin/gallery/metadata", post(add_metadata))
        .route("/api/admin/gallery/metadata/{id}", delete(hide_metadata))
        .route(
            "/storage/v1/object/public/{bucket}/{*key}",
            get(get_public_object),
        )
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}
