use std::sync::Arc;

use chrono::NaiveDate;
use futures::future::BoxFuture;
use redis::{AsyncCommands, aio::ConnectionManager};
use serde::Serialize;
use uuid::Uuid;

use crate::{
    error::{AppError, Result},
    models::session::Session,
};

/// Session lifecycle events handed to the notification layer.
///
/// Each carries enough denormalized data to render without a lookup.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionEvent {
    SessionSubmitted {
        session_id: Uuid,
        student_name: String,
        parent_id: String,
        parent_name: String,
        teacher_name: String,
        date: NaiveDate,
        duration_minutes: i32,
        subjects: Vec<String>,
    },
    SessionValidated {
        session_id: Uuid,
        teacher_id: String,
        teacher_name: String,
        student_name: String,
        date: NaiveDate,
        subjects: Vec<String>,
        validator_name: String,
    },
    SessionRejected {
        session_id: Uuid,
        teacher_id: String,
        teacher_name: String,
        student_name: String,
        date: NaiveDate,
        subjects: Vec<String>,
        validator_name: String,
        reason: String,
    },
}

impl SessionEvent {
    pub fn submitted(session: &Session) -> Self {
        SessionEvent::SessionSubmitted {
            session_id: session.id,
            student_name: session.student_name.clone(),
            parent_id: session.parent_id.clone(),
            parent_name: session.parent_name.clone(),
            teacher_name: session.teacher_name.clone(),
            date: session.date,
            duration_minutes: session.duration_minutes,
            subjects: session.subjects.clone(),
        }
    }

    pub fn validated(session: &Session) -> Self {
        SessionEvent::SessionValidated {
            session_id: session.id,
            teacher_id: session.teacher_id.clone(),
            teacher_name: session.teacher_name.clone(),
            student_name: session.student_name.clone(),
            date: session.date,
            subjects: session.subjects.clone(),
            validator_name: session.validator_name.clone().unwrap_or_default(),
        }
    }

    pub fn rejected(session: &Session) -> Self {
        SessionEvent::SessionRejected {
            session_id: session.id,
            teacher_id: session.teacher_id.clone(),
            teacher_name: session.teacher_name.clone(),
            student_name: session.student_name.clone(),
            date: session.date,
            subjects: session.subjects.clone(),
            validator_name: session.validator_name.clone().unwrap_or_default(),
            reason: session.rejection_reason.clone().unwrap_or_default(),
        }
    }

    pub fn session_id(&self) -> Uuid {
        match self {
            SessionEvent::SessionSubmitted { session_id, .. }
            | SessionEvent::SessionValidated { session_id, .. }
            | SessionEvent::SessionRejected { session_id, .. } => *session_id,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            SessionEvent::SessionSubmitted { .. } => "session_submitted",
            SessionEvent::SessionValidated { .. } => "session_validated",
            SessionEvent::SessionRejected { .. } => "session_rejected",
        }
    }
}

/// Delivery side of session events.
pub trait Notifier: Send + Sync {
    fn send<'a>(&'a self, event: &'a SessionEvent) -> BoxFuture<'a, Result<()>>;
}

/// Sends an event without waiting for delivery.
///
/// Failures are logged and never reach the caller, so they cannot undo the
/// transition that produced the event.
pub fn dispatch(notifier: Arc<dyn Notifier>, event: SessionEvent) {
    tokio::spawn(async move {
        match notifier.send(&event).await {
            Ok(()) => {
                tracing::debug!("📨 {} sent for session {}", event.kind(), event.session_id());
            }
            Err(e) => {
                tracing::warn!(
                    "❌ {} delivery failed for session {}: {}",
                    event.kind(),
                    event.session_id(),
                    e
                );
            }
        }
    });
}

/// Publishes events as JSON on a Redis channel.
#[derive(Clone)]
pub struct RedisNotifier {
    redis: ConnectionManager,
    channel: String,
}

impl RedisNotifier {
    pub fn new(redis: ConnectionManager, channel: String) -> Self {
        Self { redis, channel }
    }
}

impl Notifier for RedisNotifier {
    fn send<'a>(&'a self, event: &'a SessionEvent) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let payload = sonic_rs::to_string(event)
                .map_err(|e| AppError::Internal(format!("Event serialization failed: {}", e)))?;
            let mut redis = self.redis.clone();
            let _: () = redis.publish(&self.channel, payload).await?;
            Ok(())
        })
    }
}

/// Writes events to the log. Used when no Redis is configured.
#[derive(Clone, Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn send<'a>(&'a self, event: &'a SessionEvent) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let payload = sonic_rs::to_string(event)
                .map_err(|e| AppError::Internal(format!("Event serialization failed: {}", e)))?;
            tracing::info!(target: "notifications", "{}", payload);
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::session::{
        Resolution,
        fixtures::{at, pending_session},
    };

    #[test]
    fn submitted_event_carries_the_fixed_payload() {
        let session = pending_session(at(16));
        let json = sonic_rs::to_string(&SessionEvent::submitted(&session)).unwrap();

        for key in [
            "\"type\":\"session_submitted\"",
            "\"session_id\"",
            "\"student_name\":\"Moussa Diop\"",
            "\"parent_id\":\"parent-1\"",
            "\"teacher_name\":\"Fatou Sow\"",
            "\"date\"",
            "\"duration_minutes\":90",
            "\"subjects\":[\"Mathematics\"]",
        ] {
            assert!(json.contains(key), "missing {key} in {json}");
        }
    }

    #[test]
    fn rejected_event_carries_reason() {
        let mut session = pending_session(at(16));
        let resolution =
            Resolution::rejected("rev-1", "Reviewer", Some("No show".to_string()), at(18))
                .unwrap();
        session.resolve(&resolution).unwrap();

        let event = SessionEvent::rejected(&session);
        assert_eq!(event.kind(), "session_rejected");
        assert_eq!(event.session_id(), session.id);
        assert!(matches!(
            event,
            SessionEvent::SessionRejected { ref reason, .. } if reason == "No show"
        ));
    }

    #[tokio::test]
    async fn log_notifier_accepts_events() {
        let session = pending_session(at(16));
        LogNotifier
            .send(&SessionEvent::validated(&session))
            .await
            .unwrap();
    }
}
