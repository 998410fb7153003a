//! Event details for the page: SDK keys, map navigation, countdown and
//! calendar export.

use crate::{
    config::PublicConfig,
    errors::AppError,
    services::{
        countdown::Countdown,
        navigation::{MapProvider, NavigationTarget, resolve_target},
    },
    state::AppState,
};
use axum::{
    Json,
    extract::{Path, State},
    http::{HeaderMap, HeaderValue, header},
    response::{IntoResponse, Response},
};
use chrono::{DateTime, FixedOffset, Utc};
use serde::Serialize;

#[derive(Serialize, Debug)]
pub struct CountdownResponse {
    pub starts_at: DateTime<FixedOffset>,
    #[serde(flatten)]
    pub countdown: Countdown,
}

/// `GET /api/config`
pub async fn get_config(State(state): State<AppState>) -> Json<PublicConfig> {
    Json(state.config.public_view())
}

/// `GET /api/navigation/{provider}`
pub async fn get_navigation(
    State(state): State<AppState>,
    Path(provider): Path<String>,
    headers: HeaderMap,
) -> Result<Json<NavigationTarget>, AppError> {
    let provider: MapProvider = provider
        .parse()
        .map_err(|_| AppError::not_found(format!("No navigation for `{}`.", provider)))?;
    let user_agent = headers
        .get(header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    let target = resolve_target(
        state.detector.as_ref(),
        user_agent,
        provider,
        &state.config.ceremony.destination(),
    );
    tracing::debug!(%provider, ?target, "resolved navigation target");
    Ok(Json(target))
}

/// `GET /api/countdown`
pub async fn get_countdown(State(state): State<AppState>) -> Json<CountdownResponse> {
    let ceremony = &state.config.ceremony;
    Json(CountdownResponse {
        starts_at: ceremony.starts_at,
        countdown: ceremony.countdown(Utc::now()),
    })
}

/// `GET /api/calendar.ics`
pub async fn get_calendar(State(state): State<AppState>) -> Response {
    let body = state.config.ceremony.ics();
    let mut response = body.into_response();
    let headers = response.headers_mut();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("text/calendar; charset=utf-8"),
    );
    headers.insert(
        header::CONTENT_DISPOSITION,
        HeaderValue::from_static("attachment; filename=\"wedding.ics\""),
    );
    response
}
