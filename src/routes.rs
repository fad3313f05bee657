use axum::{
    Router,
    middleware::from_fn,
    routing::{get, post, put},
};

use crate::{
    handlers::{checkins, sessions, tokens},
    middleware_layer::actor::{require_parent, require_reviewer, require_teacher},
    state::AppState,
};

/// Builds the API router. Transport layers (tracing, CORS, rate limiting) are added by the binary.
pub fn router(state: AppState) -> Router {
    let parent_routes = Router::new()
        .route("/api/tokens", post(tokens::issue_token))
        .route_layer(from_fn(require_parent))
        .with_state(state.clone());

    let teacher_routes = Router::new()
        .route("/api/checkins", post(checkins::begin))
        .route(
            "/api/checkins/{attempt_id}",
            get(checkins::get_attempt).delete(checkins::cancel),
        )
        .route(
            "/api/checkins/{attempt_id}/location",
            post(checkins::capture_location),
        )
        .route("/api/checkins/{attempt_id}/scan", post(checkins::scan))
        .route("/api/checkins/{attempt_id}/form", put(checkins::fill_form))
        .route("/api/checkins/{attempt_id}/submit", post(checkins::submit))
        .route_layer(from_fn(require_teacher))
        .with_state(state.clone());

    let reviewer_routes = Router::new()
        .route("/api/sessions", get(sessions::review_queue))
        .route("/api/sessions/pending", get(sessions::list_pending))
        .route(
            "/api/sessions/status/{status}",
            get(sessions::list_by_status),
        )
        .route("/api/sessions/{session_id}", get(sessions::get_session))
        .route(
            "/api/sessions/{session_id}/validate",
            post(sessions::validate),
        )
        .route("/api/sessions/{session_id}/reject", post(sessions::reject))
        .route_layer(from_fn(require_reviewer))
        .with_state(state);

    Router::new()
        .merge(parent_routes)
        .merge(teacher_routes)
        .merge(reviewer_routes)
}
