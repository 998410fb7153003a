//! Validated guestbook writes, password-gated soft deletes and
//! newest-first reads over the `guestbook` table.

use crate::{
    backend::{Backend, BackendError, ChangeFeed, GuestbookTable, TableChange},
    crypto,
    models::guestbook::{GuestbookEntry, GuestbookForm, NewGuestbookEntry},
};
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::{info, instrument};
use uuid::Uuid;

pub const MAX_NAME_LEN: usize = 50;
pub const MAX_MESSAGE_LEN: usize = 500;
pub const MAX_PASSWORD_LEN: usize = 72;

/// Rejections caught before any network call.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("name is required")]
    MissingName,
    #[error("message is required")]
    MissingMessage,
    #[error("password is required")]
    MissingPassword,
    #[error("{field} exceeds {max} characters")]
    TooLong { field: &'static str, max: usize },
    #[error("{0} contains invalid characters")]
    InvalidCharacters(&'static str),
}

impl ValidationError {
    /// Inline prompt shown next to the form.
    pub fn user_message(&self) -> String {
        match self {
            ValidationError::MissingName => "Please enter your name.".into(),
            ValidationError::MissingMessage => "Please write a message.".into(),
            ValidationError::MissingPassword => "Please enter a password.".into(),
            ValidationError::TooLong { field, max } => {
                format!("Your {} can be at most {} characters.", field, max)
            }
            ValidationError::InvalidCharacters(field) => {
                format!("Your {} contains characters we can't accept.", field)
            }
        }
    }
}

#[derive(Debug, Error)]
pub enum GuestbookError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Backend(#[from] BackendError),
}

/// Successful answers of a delete request. Transport and server failures are
/// reported as [`GuestbookError::Backend`].
#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DeleteOutcome {
    Deleted,
    PasswordMismatch,
}

/// Reject NUL and control characters (newline and tab allowed when
/// `multiline`), and enforce a character limit.
fn validate_text(
    value: &str,
    field: &'static str,
    max: usize,
    multiline: bool,
) -> Result<(), ValidationError> {
    let allowed = |c: char| multiline && matches!(c, '\n' | '\r' | '\t');
    if value.chars().any(|c| c.is_control() && !allowed(c)) {
        return Err(ValidationError::InvalidCharacters(field));
    }
    if value.chars().count() > max {
        return Err(ValidationError::TooLong { field, max });
    }
    Ok(())
}

/// Validate a form and return the trimmed `(name, message)`.
pub fn validate_form(form: &GuestbookForm) -> Result<(String, String), ValidationError> {
    let name = form.name.trim();
    let message = form.message.trim();
    if name.is_empty() {
        return Err(ValidationError::MissingName);
    }
    if message.is_empty() {
        return Err(ValidationError::MissingMessage);
    }
    if form.password.is_empty() {
        return Err(ValidationError::MissingPassword);
    }
    validate_text(name, "name", MAX_NAME_LEN, false)?;
    validate_text(message, "message", MAX_MESSAGE_LEN, true)?;
    validate_text(&form.password, "password", MAX_PASSWORD_LEN, false)?;
    Ok((name.to_string(), message.to_string()))
}

#[derive(Clone)]
pub struct GuestbookStore {
    table: Arc<dyn GuestbookTable>,
    changes: Arc<dyn ChangeFeed>,
}

impl GuestbookStore {
    pub fn new(backend: &Backend) -> Self {
        Self {
            table: backend.guestbook.clone(),
            changes: backend.changes.clone(),
        }
    }

    /// Visible entries, newest first.
    pub async fn list_visible_entries(&self) -> Result<Vec<GuestbookEntry>, BackendError> {
        let mut entries = self.table.list_visible().await?;
        entries.retain(|entry| !entry.is_deleted);
        entries.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| b.id.cmp(&a.id))
        });
        Ok(entries)
    }

    /// Validate locally, hash the password and insert.
    ///
    /// The raw password never leaves this function on the write path.
    #[instrument(skip(self, form), fields(is_groom_side = form.is_groom_side))]
    pub async fn submit_entry(&self, form: &GuestbookForm) -> Result<GuestbookEntry, GuestbookError> {
        let (name, message) = validate_form(form)?;
        let entry = NewGuestbookEntry {
            name,
            message,
            is_groom_side: form.is_groom_side,
            password_hash: crypto::hash_password(&form.password),
            is_deleted: false,
        };
        let inserted = self.table.insert(&entry).await?;
        info!(id = %inserted.id, "guestbook entry created");
        Ok(inserted)
    }

    /// Ask the backend routine to verify `password` and soft-delete.
    ///
    /// The comparison happens server-side; the raw password is sent over the
    /// channel for that purpose.
    #[instrument(skip(self, password))]
    pub async fn delete_entry(
        &self,
        id: Uuid,
        password: &str,
    ) -> Result<DeleteOutcome, GuestbookError> {
        if password.is_empty() {
            return Err(ValidationError::MissingPassword.into());
        }
        if self.table.soft_delete(id, password).await? {
            info!(%id, "guestbook entry deleted");
            Ok(DeleteOutcome::Deleted)
        } else {
            info!(%id, "guestbook delete rejected");
            Ok(DeleteOutcome::PasswordMismatch)
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TableChange> {
        self.changes.subscribe()
    }

    pub async fn health_check(&self) -> Result<(), BackendError> {
        self.table.health_check().await
    }
}
