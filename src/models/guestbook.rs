//! Guestbook entries and the visitor's draft form.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// A guestbook entry as readers see it.
///
/// The stored password hash is deliberately absent: it is written once on
/// insert and only ever compared by the backend's delete routine.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug, PartialEq, Eq)]
pub struct GuestbookEntry {
    pub id: Uuid,

    /// Author label.
    pub name: String,

    pub message: String,

    /// `true` for the groom's guests, `false` for the bride's.
    #[serde(rename = "is_groom")]
    #[sqlx(rename = "is_groom")]
    pub is_groom_side: bool,

    /// Server-assigned; entries are listed newest first.
    pub created_at: DateTime<Utc>,

    /// Soft-delete flag. Visible entries always carry `false`.
    pub is_deleted: bool,
}

/// Row payload sent to the backend on submit.
#[derive(Serialize, Clone, Debug)]
pub struct NewGuestbookEntry {
    pub name: String,
    pub message: String,
    #[serde(rename = "is_groom")]
    pub is_groom_side: bool,
    pub password_hash: String,
    pub is_deleted: bool,
}

/// The draft a visitor fills in before submitting.
#[derive(Deserialize, Clone, Debug, Default)]
pub struct GuestbookForm {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub message: String,
    #[serde(default, rename = "is_groom")]
    pub is_groom_side: bool,
    #[serde(default)]
    pub password: String,
}

impl GuestbookForm {
    pub fn new(
        name: impl Into<String>,
        message: impl Into<String>,
        is_groom_side: bool,
        password: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            message: message.into(),
            is_groom_side,
            password: password.into(),
        }
    }

    /// Reset the text fields after a successful submit. The side selection is kept.
    pub fn clear(&mut self) {
        self.name.clear();
        self.message.clear();
        self.password.clear();
    }
}
