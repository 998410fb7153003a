//! Guestbook endpoints. Reads go to the table, with the server-wide live
//! session as the fallback view.

use crate::{
    backend::TableChange,
    errors::AppError,
    models::guestbook::{GuestbookEntry, GuestbookForm},
    services::{guestbook_service::DeleteOutcome, guestbook_session::GuestbookSnapshot},
    state::AppState,
};
use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
    response::{
        IntoResponse,
        sse::{Event, KeepAlive, Sse},
    },
};
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use tokio_stream::wrappers::{BroadcastStream, errors::BroadcastStreamRecvError};
use uuid::Uuid;

#[derive(Deserialize, Debug)]
pub struct DeleteRequest {
    #[serde(default)]
    pub password: String,
}

#[derive(Serialize, Debug)]
pub struct DeleteResponse {
    pub result: DeleteOutcome,
}

/// `GET /api/guestbook`
///
/// Reads the table at request time so a fetch made after a `change` event
/// sees that change. The live view answers only while the backend is down.
pub async fn list_entries(State(state): State<AppState>) -> Json<GuestbookSnapshot> {
    match state.guestbook.list_visible_entries().await {
        Ok(entries) => Json(GuestbookSnapshot {
            entries,
            loading: false,
        }),
        Err(err) => {
            tracing::warn!("guestbook fetch failed, serving live view: {}", err);
            Json(state.session.snapshot().await)
        }
    }
}

/// `POST /api/guestbook`
pub async fn submit_entry(
    State(state): State<AppState>,
    Json(mut form): Json<GuestbookForm>,
) -> Result<(StatusCode, Json<GuestbookEntry>), AppError> {
    let entry = state.session.submit(&mut form).await?;
    tracing::info!(id = %entry.id, "guestbook entry created");
    Ok((StatusCode::CREATED, Json(entry)))
}

/// `POST /api/guestbook/{id}/delete` with `{"password": "..."}`.
pub async fn delete_entry(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<DeleteRequest>,
) -> Result<Json<DeleteResponse>, AppError> {
    match state.session.delete(id, &req.password).await? {
        DeleteOutcome::Deleted => Ok(Json(DeleteResponse {
            result: DeleteOutcome::Deleted,
        })),
        DeleteOutcome::PasswordMismatch => Err(AppError::forbidden(
            "The password does not match. Please check it and try again.",
        )),
    }
}

/// `GET /api/guestbook/events`: one `change` event per table change.
/// A lagged subscriber gets a `resync` event instead of the missed ones.
pub async fn change_events(State(state): State<AppState>) -> impl IntoResponse {
    let stream = change_stream(BroadcastStream::new(state.guestbook.subscribe()));
    Sse::new(stream).keep_alive(KeepAlive::default())
}

fn change_stream<S>(changes: S) -> impl Stream<Item = Result<Event, Infallible>>
where
    S: Stream<Item = Result<TableChange, BroadcastStreamRecvError>>,
{
    changes.map(|change| {
        Ok(match change {
            Ok(table) => Event::default().event("change").data(table.table_name()),
            Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                tracing::debug!(skipped, "sse subscriber lagged");
                Event::default().event("resync").data(skipped.to_string())
            }
        })
    })
}
