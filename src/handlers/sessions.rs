use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::Response,
};
use chrono::Utc;
use serde::Deserialize;
use uuid::Uuid;

use crate::{
    error::{AppError, Result},
    handlers::response::json,
    models::{actor::Actor, session::SessionStatus},
    repositories::session::SessionFilter,
    services::review as review_service,
    state::AppState,
};

/// The request payload for rejecting a session.
#[derive(Deserialize, Default)]
#[serde(default)]
pub struct RejectRequest {
    pub reason: Option<String>,
}

/// Lists sessions in review order.
#[axum::debug_handler]
pub async fn review_queue(
    State(state): State<AppState>,
    Query(filter): Query<SessionFilter>,
) -> Result<Response> {
    let sessions = review_service::review_queue(&state, filter).await?;
    json(StatusCode::OK, &sessions)
}

/// Lists pending sessions, flagged first.
#[axum::debug_handler]
pub async fn list_pending(
    State(state): State<AppState>,
    Query(filter): Query<SessionFilter>,
) -> Result<Response> {
    let sessions = review_service::list_pending(&state, filter).await?;
    json(StatusCode::OK, &sessions)
}

/// Lists sessions in one status.
#[axum::debug_handler]
pub async fn list_by_status(
    State(state): State<AppState>,
    Path(status): Path<String>,
) -> Result<Response> {
    let status = SessionStatus::parse(&status)
        .ok_or_else(|| AppError::field("status", "must be pending, validated or rejected"))?;
    let sessions = review_service::list_by_status(&state, status).await?;
    json(StatusCode::OK, &sessions)
}

/// Reads one session.
#[axum::debug_handler]
pub async fn get_session(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
) -> Result<Response> {
    let session = review_service::get_session(&state, session_id).await?;
    json(StatusCode::OK, &session)
}

/// Validates a pending session.
#[axum::debug_handler]
pub async fn validate(
    State(state): State<AppState>,
    Extension(reviewer): Extension<Actor>,
    Path(session_id): Path<Uuid>,
) -> Result<Response> {
    let session =
        review_service::validate_session(&state, session_id, &reviewer, Utc::now()).await?;
    json(StatusCode::OK, &session)
}

/// Rejects a pending session.
#[axum::debug_handler]
pub async fn reject(
    State(state): State<AppState>,
    Extension(reviewer): Extension<Actor>,
    Path(session_id): Path<Uuid>,
    Json(req): Json<RejectRequest>,
) -> Result<Response> {
    let session =
        review_service::reject_session(&state, session_id, &reviewer, req.reason, Utc::now())
            .await?;
    json(StatusCode::OK, &session)
}
