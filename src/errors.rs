use crate::{
    backend::BackendError,
    services::{gallery_service::GalleryError, guestbook_service::GuestbookError},
};
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use std::fmt;

const UNAVAILABLE: &str = "The service is temporarily unavailable. Please try again in a moment.";

/// A lightweight wrapper for general errors that keeps the message local.
///
/// `message` is shown to visitors as-is; technical detail goes to the log.
#[derive(Debug)]
pub struct AppError {
    pub status: StatusCode,
    pub message: String,
}

impl AppError {
    /// Create a new AppError with a specific status and message.
    pub fn new(status: StatusCode, msg: impl Into<String>) -> Self {
        Self {
            status,
            message: msg.into(),
        }
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, msg)
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, msg)
    }

    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, msg)
    }

    pub fn unauthorized(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, msg)
    }

    pub fn forbidden(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::FORBIDDEN, msg)
    }

    /// The hosted backend failed or could not be reached.
    pub fn unavailable() -> Self {
        Self::new(StatusCode::BAD_GATEWAY, UNAVAILABLE)
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for AppError {}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "error": self.message,
            "status": self.status.as_u16()
        }));

        (self.status, body).into_response()
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        tracing::error!("internal error: {:#}", err);
        AppError::internal("Something went wrong. Please try again later.")
    }
}

impl From<BackendError> for AppError {
    fn from(err: BackendError) -> Self {
        match &err {
            BackendError::ObjectNotFound { .. } => AppError::not_found("File not found."),
            BackendError::InvalidObjectKey(_) | BackendError::InvalidBucketName { .. } => {
                AppError::bad_request("Invalid file path.")
            }
            BackendError::Io(_) | BackendError::Sqlx(_) => {
                tracing::error!("local backend error: {}", err);
                AppError::internal("Something went wrong. Please try again later.")
            }
            _ => {
                tracing::error!("backend error: {}", err);
                AppError::unavailable()
            }
        }
    }
}

impl From<GuestbookError> for AppError {
    fn from(err: GuestbookError) -> Self {
        match err {
            GuestbookError::Validation(v) => AppError::bad_request(v.user_message()),
            GuestbookError::Backend(e) => {
                tracing::error!("guestbook backend error: {}", e);
                AppError::new(
                    StatusCode::BAD_GATEWAY,
                    "The guestbook is temporarily unavailable. Please try again later.",
                )
            }
        }
    }
}

impl From<GalleryError> for AppError {
    fn from(err: GalleryError) -> Self {
        match err {
            GalleryError::InvalidFilename(name) => {
                AppError::bad_request(format!("`{}` is not a valid file name.", name))
            }
            GalleryError::NotFound(id) => AppError::not_found(format!("Image {} not found.", id)),
            GalleryError::Upload { filename, source } => {
                tracing::error!("upload of {} failed: {}", filename, source);
                AppError::new(
                    StatusCode::BAD_GATEWAY,
                    format!("Uploading {} failed. Please try again.", filename),
                )
            }
            GalleryError::Backend(e) => AppError::from(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::guestbook_service::ValidationError;

    #[test]
    fn validation_maps_to_bad_request_with_prompt() {
        let err = AppError::from(GuestbookError::Validation(ValidationError::MissingName));
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
        assert_eq!(err.message, "Please enter your name.");
    }

    #[test]
    fn transport_failures_hide_details() {
        let err = AppError::from(GuestbookError::Backend(BackendError::Status {
            status: 500,
            body: "relation \"guestbook\" does not exist".into(),
        }));
        assert_eq!(err.status, StatusCode::BAD_GATEWAY);
        assert!(!err.message.contains("relation"));
    }

    #[test]
    fn gallery_errors_map_by_kind() {
        assert_eq!(
            AppError::from(GalleryError::NotFound("7".into())).status,
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            AppError::from(GalleryError::InvalidFilename("..".into())).status,
            StatusCode::BAD_REQUEST
        );
    }
}
