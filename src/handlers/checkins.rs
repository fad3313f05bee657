use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    error::Result,
    handlers::response::json,
    models::{
        actor::Actor,
        checkin::{CapabilityGrants, CheckInAttempt, LocationReading, Proximity, SessionForm},
    },
    services::checkin as checkin_service,
    state::AppState,
};

/// The request payload for scanning a QR token.
#[derive(Deserialize)]
pub struct ScanRequest {
    pub payload: String,
}

#[derive(Serialize)]
struct ScanResponse {
    attempt: CheckInAttempt,
    proximity: Proximity,
}

/// Begins a check-in attempt.
#[axum::debug_handler]
pub async fn begin(
    State(state): State<AppState>,
    Extension(teacher): Extension<Actor>,
    Json(grants): Json<CapabilityGrants>,
) -> Result<Response> {
    let attempt = checkin_service::begin_check_in(&state, &teacher, grants, Utc::now()).await?;
    json(StatusCode::CREATED, &attempt)
}

/// Captures the device location.
#[axum::debug_handler]
pub async fn capture_location(
    State(state): State<AppState>,
    Extension(teacher): Extension<Actor>,
    Path(attempt_id): Path<Uuid>,
    Json(reading): Json<LocationReading>,
) -> Result<Response> {
    let attempt =
        checkin_service::capture_location(&state, attempt_id, &teacher, reading, Utc::now())
            .await?;
    json(StatusCode::OK, &attempt)
}

/// Scans the parent's QR token and checks proximity.
#[axum::debug_handler]
pub async fn scan(
    State(state): State<AppState>,
    Extension(teacher): Extension<Actor>,
    Path(attempt_id): Path<Uuid>,
    Json(req): Json<ScanRequest>,
) -> Result<Response> {
    let (attempt, proximity) =
        checkin_service::scan_token(&state, attempt_id, &teacher, &req.payload, Utc::now())
            .await?;
    json(StatusCode::OK, &ScanResponse { attempt, proximity })
}

/// Fills in the session form.
#[axum::debug_handler]
pub async fn fill_form(
    State(state): State<AppState>,
    Extension(teacher): Extension<Actor>,
    Path(attempt_id): Path<Uuid>,
    Json(form): Json<SessionForm>,
) -> Result<Response> {
    let attempt =
        checkin_service::fill_form(&state, attempt_id, &teacher, form, Utc::now()).await?;
    json(StatusCode::OK, &attempt)
}

/// Submits the attempt as a pending session.
#[axum::debug_handler]
pub async fn submit(
    State(state): State<AppState>,
    Extension(teacher): Extension<Actor>,
    Path(attempt_id): Path<Uuid>,
) -> Result<Response> {
    let session = checkin_service::submit(&state, attempt_id, &teacher, Utc::now()).await?;
    json(StatusCode::CREATED, &session)
}

/// Reads an attempt.
#[axum::debug_handler]
pub async fn get_attempt(
    State(state): State<AppState>,
    Extension(teacher): Extension<Actor>,
    Path(attempt_id): Path<Uuid>,
) -> Result<Response> {
    let attempt = checkin_service::get_attempt(&state, attempt_id, &teacher).await?;
    json(StatusCode::OK, &attempt)
}

/// Cancels an attempt.
#[axum::debug_handler]
pub async fn cancel(
    State(state): State<AppState>,
    Extension(teacher): Extension<Actor>,
    Path(attempt_id): Path<Uuid>,
) -> Result<Response> {
    checkin_service::cancel(&state, attempt_id, &teacher).await?;
    Ok(StatusCode::NO_CONTENT.into_response())
}
