use chrono::{DateTime, NaiveTime, Utc};
use garde::Validate;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::session::SessionLocation;
use crate::models::token::QrToken;

/// Capabilities the device granted when the attempt began.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CapabilityGrants {
    pub camera: bool,
    pub location: bool,
}

/// Where a check-in attempt is in its linear workflow.
///
/// Grants arrive with the request that opens the attempt, so it starts in
/// `awaiting_scan`, or in `permission_denied` when both were refused.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "stage", rename_all = "snake_case")]
pub enum CheckInStage {
    AwaitingScan,
    AwaitingForm,
    Submitted { session_id: Uuid },
    PermissionDenied,
    FraudBlocked { distance_m: f64 },
}

impl CheckInStage {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            CheckInStage::Submitted { .. }
                | CheckInStage::PermissionDenied
                | CheckInStage::FraudBlocked { .. }
        )
    }

    pub fn name(&self) -> &'static str {
        match self {
            CheckInStage::AwaitingScan => "awaiting_scan",
            CheckInStage::AwaitingForm => "awaiting_form",
            CheckInStage::Submitted { .. } => "submitted",
            CheckInStage::PermissionDenied => "permission_denied",
            CheckInStage::FraudBlocked { .. } => "fraud_blocked",
        }
    }
}

/// Outcome of comparing the check-in fix against the registered home.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProximityDecision {
    Ok,
    /// Inside the fraud radius but beyond the warning radius.
    Warning,
    FraudBlocked,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Proximity {
    pub distance_m: f64,
    pub decision: ProximityDecision,
}

/// A raw location reading reported by the device.
///
/// A provider failure arrives as `error`, or as missing coordinates.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LocationReading {
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub accuracy: Option<f64>,
    pub error: Option<String>,
}

/// The session form filled in by the teacher after a successful scan.
///
/// Any duration the client sends is ignored; it is derived from the times.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct SessionForm {
    #[garde(custom(not_blank))]
    pub student_id: String,
    #[garde(length(min = 1), inner(custom(not_blank)))]
    pub subjects: Vec<String>,
    #[garde(required)]
    pub start_time: Option<NaiveTime>,
    #[garde(required)]
    pub end_time: Option<NaiveTime>,
    #[garde(custom(not_blank))]
    pub topics: String,
    #[garde(custom(not_blank))]
    pub session_summary: String,
    #[garde(skip)]
    pub observations: String,
    #[garde(skip)]
    pub comments: String,
}

fn not_blank<T: AsRef<str> + ?Sized>(value: &T, _ctx: &()) -> garde::Result {
    if value.as_ref().trim().is_empty() {
        return Err(garde::Error::new("must not be empty"));
    }
    Ok(())
}

/// One interactive check-in, owned by the teacher who began it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckInAttempt {
    pub id: Uuid,
    pub teacher_id: String,
    pub teacher_name: String,
    pub grants: CapabilityGrants,
    pub stage: CheckInStage,
    pub location: Option<SessionLocation>,
    pub token: Option<QrToken>,
    pub proximity: Option<Proximity>,
    pub form: Option<SessionForm>,
    /// Id the session will be stored under, fixed when the form is first accepted.
    #[serde(default)]
    pub session_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl CheckInAttempt {
    pub fn new(
        teacher_id: &str,
        teacher_name: &str,
        grants: CapabilityGrants,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            teacher_id: teacher_id.to_string(),
            teacher_name: teacher_name.to_string(),
            grants,
            stage: if grants.camera || grants.location {
                CheckInStage::AwaitingScan
            } else {
                CheckInStage::PermissionDenied
            },
            location: None,
            token: None,
            proximity: None,
            form: None,
            session_id: None,
            created_at: now,
            updated_at: now,
        }
    }
}
