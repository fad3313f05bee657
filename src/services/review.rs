use std::cmp::Ordering;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::{
    error::{AppError, Result},
    models::{
        actor::Actor,
        session::{Resolution, Session, SessionStatus},
    },
    repositories::session::SessionFilter,
    services::notifications::{self, SessionEvent},
    state::AppState,
};

/// Review order: `pending` first, flagged first within `pending`, then newest first.
pub fn review_order(a: &Session, b: &Session) -> Ordering {
    let rank = |s: &Session| match (s.status, s.flagged) {
        (SessionStatus::Pending, true) => 0,
        (SessionStatus::Pending, false) => 1,
        _ => 2,
    };
    rank(a)
        .cmp(&rank(b))
        .then_with(|| b.created_at.cmp(&a.created_at))
}

pub fn sort_for_review(sessions: &mut [Session]) {
    sessions.sort_by(review_order);
}

/// Approves a pending session.
///
/// # Arguments
///
/// * `state` - The application state.
/// * `session_id` - The session to approve.
/// * `reviewer` - The reviewer approving it.
/// * `now` - The current time.
///
/// # Returns
///
/// The validated session, or `InvalidTransition` if it was already resolved.
pub async fn validate_session(
    state: &AppState,
    session_id: Uuid,
    reviewer: &Actor,
    now: DateTime<Utc>,
) -> Result<Session> {
    let resolution = Resolution::validated(&reviewer.id, &reviewer.name, now);
    let session = state.sessions.transition(session_id, &resolution).await?;

    tracing::info!("✅ Session {} validated by {}", session.id, reviewer.id);
    notifications::dispatch(state.notifier.clone(), SessionEvent::validated(&session));
    Ok(session)
}

/// Rejects a pending session with a mandatory reason.
///
/// # Arguments
///
/// * `state` - The application state.
/// * `session_id` - The session to reject.
/// * `reviewer` - The reviewer rejecting it.
/// * `reason` - Why; blank or missing is `MissingReason`. Stored verbatim.
/// * `now` - The current time.
///
/// # Returns
///
/// The rejected session, or `InvalidTransition` if it was already resolved.
pub async fn reject_session(
    state: &AppState,
    session_id: Uuid,
    reviewer: &Actor,
    reason: Option<String>,
    now: DateTime<Utc>,
) -> Result<Session> {
    let resolution = Resolution::rejected(&reviewer.id, &reviewer.name, reason, now)?;
    let session = state.sessions.transition(session_id, &resolution).await?;

    tracing::info!("🛑 Session {} rejected by {}", session.id, reviewer.id);
    notifications::dispatch(state.notifier.clone(), SessionEvent::rejected(&session));
    Ok(session)
}

pub async fn get_session(state: &AppState, session_id: Uuid) -> Result<Session> {
    state
        .sessions
        .get(session_id)
        .await?
        .ok_or(AppError::NotFound)
}

/// Pending sessions matching `filter`, flagged first.
pub async fn list_pending(state: &AppState, filter: SessionFilter) -> Result<Vec<Session>> {
    let filter = SessionFilter {
        status: Some(SessionStatus::Pending),
        ..filter
    };
    let mut sessions = state.sessions.list(&filter).await?;
    sort_for_review(&mut sessions);
    Ok(sessions)
}

/// Sessions in `status`, newest first.
pub async fn list_by_status(state: &AppState, status: SessionStatus) -> Result<Vec<Session>> {
    let filter = SessionFilter {
        status: Some(status),
        ..Default::default()
    };
    let mut sessions = state.sessions.list(&filter).await?;
    sort_for_review(&mut sessions);
    Ok(sessions)
}

/// Every session matching `filter`, in review order.
pub async fn review_queue(state: &AppState, filter: SessionFilter) -> Result<Vec<Session>> {
    let mut sessions = state.sessions.list(&filter).await?;
    sort_for_review(&mut sessions);
    Ok(sessions)
}
