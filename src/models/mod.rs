//! Core data models for the invitation backend.
//!
//! Gallery and guestbook records are independent aggregates scoped to the one
//! wedding event. They map to table rows via `sqlx::FromRow` for the local
//! backend and deserialize from the hosted REST API via `serde`.

pub mod gallery;
pub mod guestbook;
pub mod storage;
