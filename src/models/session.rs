use std::fmt;

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use postgres_types::{FromSql, ToSql};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{AppError, Result};
use crate::models::token::QrToken;

/// A WGS84 coordinate.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinate {
    pub latitude: f64,
    pub longitude: f64,
}

impl Coordinate {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }

    /// Finite and inside the WGS84 ranges.
    pub fn is_valid(&self) -> bool {
        self.latitude.is_finite()
            && self.longitude.is_finite()
            && (-90.0..=90.0).contains(&self.latitude)
            && (-180.0..=180.0).contains(&self.longitude)
    }
}

/// A device fix captured during check-in.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SessionLocation {
    pub coordinate: Coordinate,
    /// Reported accuracy radius in meters.
    pub accuracy: f64,
    pub captured_at: DateTime<Utc>,
}

/// Review status of a persisted session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSql, FromSql)]
#[serde(rename_all = "snake_case")]
#[postgres(name = "session_status")]
pub enum SessionStatus {
    #[postgres(name = "pending")]
    Pending,
    #[postgres(name = "validated")]
    Validated,
    #[postgres(name = "rejected")]
    Rejected,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Pending => "pending",
            SessionStatus::Validated => "validated",
            SessionStatus::Rejected => "rejected",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(SessionStatus::Pending),
            "validated" => Some(SessionStatus::Validated),
            "rejected" => Some(SessionStatus::Rejected),
            _ => None,
        }
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Anomaly tags attached to a session at creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Anomaly {
    /// Beyond the fraud radius. Never persisted, the attempt is blocked first.
    FraudSuspected,
    /// Inside the fraud radius but beyond the soft warning radius.
    ExcessiveDistance,
    DurationOutOfRange,
    OffHours,
    ExpiredToken,
}

impl Anomaly {
    pub fn as_str(&self) -> &'static str {
        match self {
            Anomaly::FraudSuspected => "fraud_suspected",
            Anomaly::ExcessiveDistance => "excessive_distance",
            Anomaly::DurationOutOfRange => "duration_out_of_range",
            Anomaly::OffHours => "off_hours",
            Anomaly::ExpiredToken => "expired_token",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "fraud_suspected" => Some(Anomaly::FraudSuspected),
            "excessive_distance" => Some(Anomaly::ExcessiveDistance),
            "duration_out_of_range" => Some(Anomaly::DurationOutOfRange),
            "off_hours" => Some(Anomaly::OffHours),
            "expired_token" => Some(Anomaly::ExpiredToken),
            _ => None,
        }
    }

    /// Whether this tag alone puts the session in the priority review queue.
    pub fn flags_session(&self) -> bool {
        matches!(
            self,
            Anomaly::FraudSuspected | Anomaly::ExcessiveDistance | Anomaly::DurationOutOfRange
        )
    }
}

/// A tutoring session recorded by a teacher check-in.
///
/// Everything except the review fields (`status`, `validated_at`,
/// `validator_id`, `validator_name`, `rejection_reason`) is fixed at creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    /// Time-ordered identifier (UUIDv7).
    pub id: Uuid,
    pub teacher_id: String,
    pub teacher_name: String,
    pub student_id: String,
    pub student_name: String,
    pub parent_id: String,
    pub parent_name: String,
    pub date: NaiveDate,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
    /// Derived from `end_time - start_time` at creation.
    pub duration_minutes: i32,
    pub subjects: Vec<String>,
    pub topics: String,
    pub session_summary: String,
    pub observations: String,
    pub comments: String,
    pub location: SessionLocation,
    /// Snapshot of the token scanned for this check-in.
    pub qr_token: QrToken,
    /// Meters between the check-in fix and the registered home.
    pub distance_from_home: f64,
    pub status: SessionStatus,
    pub created_at: DateTime<Utc>,
    pub validated_at: Option<DateTime<Utc>>,
    pub validator_id: Option<String>,
    pub validator_name: Option<String>,
    pub rejection_reason: Option<String>,
    pub anomalies: Vec<Anomaly>,
    pub flagged: bool,
}

/// The outcome a reviewer applies to a pending session.
#[derive(Debug, Clone, PartialEq)]
pub struct Resolution {
    pub status: SessionStatus,
    pub at: DateTime<Utc>,
    pub validator_id: String,
    pub validator_name: String,
    pub rejection_reason: Option<String>,
}

impl Resolution {
    pub fn validated(validator_id: &str, validator_name: &str, at: DateTime<Utc>) -> Self {
        Self {
            status: SessionStatus::Validated,
            at,
            validator_id: validator_id.to_string(),
            validator_name: validator_name.to_string(),
            rejection_reason: None,
        }
    }

    /// Builds a rejection. Blank reasons are refused; the reason is kept verbatim.
    pub fn rejected(
        validator_id: &str,
        validator_name: &str,
        reason: Option<String>,
        at: DateTime<Utc>,
    ) -> Result<Self> {
        let reason = reason
            .filter(|r| !r.trim().is_empty())
            .ok_or(AppError::MissingReason)?;

        Ok(Self {
            status: SessionStatus::Rejected,
            at,
            validator_id: validator_id.to_string(),
            validator_name: validator_name.to_string(),
            rejection_reason: Some(reason),
        })
    }
}

impl Session {
    /// Applies a review outcome, refusing anything but `pending -> validated|rejected`.
    pub fn resolve(&mut self, resolution: &Resolution) -> Result<()> {
        if self.status != SessionStatus::Pending {
            return Err(AppError::InvalidTransition {
                session_id: self.id,
                current: self.status,
            });
        }
        if resolution.status == SessionStatus::Pending {
            return Err(AppError::Internal(
                "pending is not a review outcome".to_string(),
            ));
        }

        self.status = resolution.status;
        self.validated_at = Some(resolution.at);
        self.validator_id = Some(resolution.validator_id.clone());
        self.validator_name = Some(resolution.validator_name.clone());
        self.rejection_reason = resolution.rejection_reason.clone();
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use chrono::{Duration, TimeZone};

    use super::*;
    use crate::models::token::Child;

    pub fn token(now: DateTime<Utc>) -> QrToken {
        QrToken {
            token_id: Uuid::new_v4(),
            parent_id: "parent-1".to_string(),
            parent_name: "Awa Diop".to_string(),
            family_code: "FAM-001".to_string(),
            children: vec![Child {
                id: "student-1".to_string(),
                full_name: "Moussa Diop".to_string(),
                class_name: "CM2".to_string(),
            }],
            home_location: Coordinate::new(14.6928, -17.4467),
            issued_at: now - Duration::hours(1),
            expires_at: now + Duration::hours(23),
            signature: None,
        }
    }

    pub fn pending_session(created_at: DateTime<Utc>) -> Session {
        let token = token(created_at);
        Session {
            id: Uuid::now_v7(),
            teacher_id: "teacher-1".to_string(),
            teacher_name: "Fatou Sow".to_string(),
            student_id: "student-1".to_string(),
            student_name: "Moussa Diop".to_string(),
            parent_id: token.parent_id.clone(),
            parent_name: token.parent_name.clone(),
            date: created_at.date_naive(),
            start_time: NaiveTime::from_hms_opt(14, 0, 0).unwrap(),
            end_time: NaiveTime::from_hms_opt(15, 30, 0).unwrap(),
            duration_minutes: 90,
            subjects: vec!["Mathematics".to_string()],
            topics: "Fractions".to_string(),
            session_summary: "Worked through exercises".to_string(),
            observations: String::new(),
            comments: String::new(),
            location: SessionLocation {
                coordinate: token.home_location,
                accuracy: 5.0,
                captured_at: created_at,
            },
            qr_token: token,
            distance_from_home: 0.0,
            status: SessionStatus::Pending,
            created_at,
            validated_at: None,
            validator_id: None,
            validator_name: None,
            rejection_reason: None,
            anomalies: Vec::new(),
            flagged: false,
        }
    }

    pub fn at(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 10, hour, 0, 0).unwrap()
    }
}
