use chrono::NaiveDate;
use deadpool_postgres::Pool;
use futures::future::BoxFuture;
use postgres_types::Json;
use serde::Deserialize;
use tokio_postgres::Row;
use uuid::Uuid;

use crate::{
    error::{AppError, Result},
    models::session::{Anomaly, Resolution, Session, SessionStatus},
};

/// Read filters for review queues. Unset fields match everything.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct SessionFilter {
    pub status: Option<SessionStatus>,
    pub flagged: Option<bool>,
    pub teacher_id: Option<String>,
    pub student_id: Option<String>,
    pub parent_id: Option<String>,
    pub date_from: Option<NaiveDate>,
    pub date_to: Option<NaiveDate>,
}

impl SessionFilter {
    pub fn matches(&self, session: &Session) -> bool {
        self.status.is_none_or(|s| session.status == s)
            && self.flagged.is_none_or(|f| session.flagged == f)
            && self
                .teacher_id
                .as_ref()
                .is_none_or(|id| &session.teacher_id == id)
            && self
                .student_id
                .as_ref()
                .is_none_or(|id| &session.student_id == id)
            && self
                .parent_id
                .as_ref()
                .is_none_or(|id| &session.parent_id == id)
            && self.date_from.is_none_or(|d| session.date >= d)
            && self.date_to.is_none_or(|d| session.date <= d)
    }
}

/// Durable storage for sessions.
///
/// The store only creates, reads and transitions. `transition` must be an
/// atomic compare-and-swap on `status = pending`: of two concurrent calls on
/// the same id, exactly one succeeds and the other gets `InvalidTransition`.
pub trait SessionStore: Send + Sync {
    /// Stores a new session. Idempotent on `id`: returns `false` and leaves the
    /// stored row untouched when the id is already present.
    fn insert<'a>(&'a self, session: &'a Session) -> BoxFuture<'a, Result<bool>>;

    fn get(&self, id: Uuid) -> BoxFuture<'_, Result<Option<Session>>>;

    fn transition<'a>(
        &'a self,
        id: Uuid,
        resolution: &'a Resolution,
    ) -> BoxFuture<'a, Result<Session>>;

    fn list<'a>(&'a self, filter: &'a SessionFilter) -> BoxFuture<'a, Result<Vec<Session>>>;
}

const SESSION_COLUMNS: &str = r#"
    id, teacher_id, teacher_name, student_id, student_name, parent_id, parent_name,
    session_date, start_time, end_time, duration_minutes, subjects, topics,
    session_summary, observations, comments, location, qr_token, distance_from_home,
    status, created_at, validated_at, validator_id, validator_name, rejection_reason,
    anomalies, flagged
"#;

/// A helper function to map a `tokio_postgres::Row` to a `Session`.
fn row_to_session(row: &Row) -> Result<Session> {
    let Json(location) = row.try_get("location")?;
    let Json(qr_token) = row.try_get("qr_token")?;
    let anomaly_names: Vec<String> = row.try_get("anomalies")?;
    let anomalies = anomaly_names
        .iter()
        .map(|name| {
            Anomaly::parse(name)
                .ok_or_else(|| AppError::Internal(format!("Unknown anomaly tag: {}", name)))
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(Session {
        id: row.try_get("id")?,
        teacher_id: row.try_get("teacher_id")?,
        teacher_name: row.try_get("teacher_name")?,
        student_id: row.try_get("student_id")?,
        student_name: row.try_get("student_name")?,
        parent_id: row.try_get("parent_id")?,
        parent_name: row.try_get("parent_name")?,
        date: row.try_get("session_date")?,
        start_time: row.try_get("start_time")?,
        end_time: row.try_get("end_time")?,
        duration_minutes: row.try_get("duration_minutes")?,
        subjects: row.try_get("subjects")?,
        topics: row.try_get("topics")?,
        session_summary: row.try_get("session_summary")?,
        observations: row.try_get("observations")?,
        comments: row.try_get("comments")?,
        location,
        qr_token,
        distance_from_home: row.try_get("distance_from_home")?,
        status: row.try_get("status")?,
        created_at: row.try_get("created_at")?,
        validated_at: row.try_get("validated_at")?,
        validator_id: row.try_get("validator_id")?,
        validator_name: row.try_get("validator_name")?,
        rejection_reason: row.try_get("rejection_reason")?,
        anomalies,
        flagged: row.try_get("flagged")?,
    })
}

/// PostgreSQL-backed session store.
#[derive(Clone)]
pub struct PgSessionStore {
    pool: Pool,
}

impl PgSessionStore {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }
}

impl SessionStore for PgSessionStore {
    fn insert<'a>(&'a self, session: &'a Session) -> BoxFuture<'a, Result<bool>> {
        Box::pin(async move {
            let client = self.pool.get().await?;
            let anomalies: Vec<&str> = session.anomalies.iter().map(Anomaly::as_str).collect();
            let location = Json(&session.location);
            let qr_token = Json(&session.qr_token);

            let inserted = client
                .execute(
                    r#"
                    INSERT INTO tutoring_sessions (
                        id, teacher_id, teacher_name, student_id, student_name, parent_id,
                        parent_name, session_date, start_time, end_time, duration_minutes,
                        subjects, topics, session_summary, observations, comments, location,
                        qr_token, distance_from_home, status, created_at, anomalies, flagged
                    )
                    VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14,
                            $15, $16, $17, $18, $19, $20, $21, $22, $23)
                    ON CONFLICT (id) DO NOTHING
                    "#,
                    &[
                        &session.id,
                        &session.teacher_id,
                        &session.teacher_name,
                        &session.student_id,
                        &session.student_name,
                        &session.parent_id,
                        &session.parent_name,
                        &session.date,
                        &session.start_time,
                        &session.end_time,
                        &session.duration_minutes,
                        &session.subjects,
                        &session.topics,
                        &session.session_summary,
                        &session.observations,
                        &session.comments,
                        &location,
                        &qr_token,
                        &session.distance_from_home,
                        &session.status,
                        &session.created_at,
                        &anomalies,
                        &session.flagged,
                    ],
                )
                .await?;

            if inserted == 0 {
                tracing::debug!("💾 Session {} already stored", session.id);
                return Ok(false);
            }
            tracing::debug!("💾 Session {} inserted", session.id);
            Ok(true)
        })
    }

    fn get(&self, id: Uuid) -> BoxFuture<'_, Result<Option<Session>>> {
        Box::pin(async move {
            let client = self.pool.get().await?;
            let query = format!("SELECT {} FROM tutoring_sessions WHERE id = $1", SESSION_COLUMNS);
            let row = client.query_opt(query.as_str(), &[&id]).await?;
            row.as_ref().map(row_to_session).transpose()
        })
    }

    fn transition<'a>(
        &'a self,
        id: Uuid,
        resolution: &'a Resolution,
    ) -> BoxFuture<'a, Result<Session>> {
        Box::pin(async move {
            let client = self.pool.get().await?;
            let query = format!(
                r#"
                UPDATE tutoring_sessions
                SET status = $2, validated_at = $3, validator_id = $4,
                    validator_name = $5, rejection_reason = $6
                WHERE id = $1 AND status = 'pending'
                RETURNING {}
                "#,
                SESSION_COLUMNS
            );

            let updated = client
                .query_opt(
                    query.as_str(),
                    &[
                        &id,
                        &resolution.status,
                        &resolution.at,
                        &resolution.validator_id,
                        &resolution.validator_name,
                        &resolution.rejection_reason,
                    ],
                )
                .await?;

            if let Some(row) = updated {
                return row_to_session(&row);
            }

            // Lost the race or never existed: report which.
            let current = client
                .query_opt("SELECT status FROM tutoring_sessions WHERE id = $1", &[&id])
                .await?;
            match current {
                Some(row) => Err(AppError::InvalidTransition {
                    session_id: id,
                    current: row.try_get("status")?,
                }),
                None => Err(AppError::NotFound),
            }
        })
    }

    fn list<'a>(&'a self, filter: &'a SessionFilter) -> BoxFuture<'a, Result<Vec<Session>>> {
        Box::pin(async move {
            let client = self.pool.get().await?;
            let query = format!(
                r#"
                SELECT {}
                FROM tutoring_sessions
                WHERE ($1::session_status IS NULL OR status = $1)
                  AND ($2::boolean IS NULL OR flagged = $2)
                  AND ($3::text IS NULL OR teacher_id = $3)
                  AND ($4::text IS NULL OR student_id = $4)
                  AND ($5::text IS NULL OR parent_id = $5)
                  AND ($6::date IS NULL OR session_date >= $6)
                  AND ($7::date IS NULL OR session_date <= $7)
                ORDER BY created_at DESC
                "#,
                SESSION_COLUMNS
            );

            let rows = client
                .query(
                    query.as_str(),
                    &[
                        &filter.status,
                        &filter.flagged,
                        &filter.teacher_id,
                        &filter.student_id,
                        &filter.parent_id,
                        &filter.date_from,
                        &filter.date_to,
                    ],
                )
                .await?;

            rows.iter().map(row_to_session).collect()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::session::fixtures::{at, pending_session};

    #[test]
    fn empty_filter_matches_everything() {
        assert!(SessionFilter::default().matches(&pending_session(at(16))));
    }

    #[test]
    fn filter_fields_combine() {
        let mut session = pending_session(at(16));
        session.flagged = true;

        let filter = SessionFilter {
            status: Some(SessionStatus::Pending),
            flagged: Some(true),
            teacher_id: Some("teacher-1".to_string()),
            date_from: Some(session.date),
            date_to: Some(session.date),
            ..SessionFilter::default()
        };
        assert!(filter.matches(&session));

        let other_teacher = SessionFilter {
            teacher_id: Some("teacher-2".to_string()),
            ..filter.clone()
        };
        assert!(!other_teacher.matches(&session));

        let validated = SessionFilter {
            status: Some(SessionStatus::Validated),
            ..filter
        };
        assert!(!validated.matches(&session));
    }
}
