use axum::{Extension, Json, extract::State, http::StatusCode, response::Response};
use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::{
    crypto::token::TokenIssuer,
    error::Result,
    handlers::response::json,
    models::{
        actor::Actor,
        session::Coordinate,
        token::{Child, QrToken},
    },
    state::AppState,
};

/// The request payload for issuing a QR token.
#[derive(Deserialize)]
pub struct IssueTokenRequest {
    pub family_code: String,
    pub children: Vec<Child>,
    pub home_location: Coordinate,
}

#[derive(Serialize)]
struct IssueTokenResponse {
    token: QrToken,
    /// What gets printed into the QR code.
    payload: String,
}

/// Issues a QR token for the calling parent.
#[axum::debug_handler]
pub async fn issue_token(
    State(state): State<AppState>,
    Extension(parent): Extension<Actor>,
    Json(req): Json<IssueTokenRequest>,
) -> Result<Response> {
    let token = state.issuer.issue(
        &parent.id,
        &parent.name,
        &req.family_code,
        req.children,
        req.home_location,
        Utc::now(),
    )?;
    let payload = TokenIssuer::encode(&token)?;

    tracing::info!("🎟️ QR token {} issued for parent {}", token.token_id, parent.id);
    json(StatusCode::CREATED, &IssueTokenResponse { token, payload })
}
