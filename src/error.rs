use std::collections::BTreeMap;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

use crate::models::session::SessionStatus;

/// Field-level validation messages, keyed by field path.
pub type FieldErrors = BTreeMap<String, Vec<String>>;

/// The application's error type.
#[derive(Error, Debug)]
pub enum AppError {
    /// Neither camera nor location access was granted.
    #[error("Camera and location permissions were both denied")]
    PermissionDenied,

    /// The attempt was opened without camera or location access and is closed.
    #[error("Check-in {attempt_id} closed: camera and location permissions were both denied")]
    AttemptDenied { attempt_id: Uuid },

    /// The device location could not be obtained or was unusable.
    #[error("Location unavailable: {0}")]
    LocationUnavailable(String),

    /// The scanned payload is not a well-formed, authentic token.
    #[error("Invalid QR token: {0}")]
    InvalidToken(String),

    /// The scanned token is past its expiry.
    #[error("QR token has expired")]
    ExpiredToken,

    /// The claimed location is beyond the fraud radius. Terminates the attempt.
    #[error(
        "Check-in blocked: {distance_m:.1} m from registered home exceeds {fraud_radius_m:.1} m"
    )]
    FraudBlocked { distance_m: f64, fraud_radius_m: f64 },

    /// Field-level form errors. The attempt stays editable.
    #[error("Validation failed")]
    Validation(FieldErrors),

    /// The session is no longer pending.
    #[error("Session {session_id} is {current}, only pending sessions can be reviewed")]
    InvalidTransition {
        session_id: Uuid,
        current: SessionStatus,
    },

    /// A rejection was attempted without a reason.
    #[error("A rejection reason is required")]
    MissingReason,

    /// A workflow step was called out of order.
    #[error("Out of sequence: {0}")]
    OutOfSequence(String),

    /// The store failed or timed out. Safe to retry.
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// A PostgreSQL error.
    #[error("Database error: {0}")]
    Database(#[from] tokio_postgres::Error),

    /// A connection pool error.
    #[error("Pool error: {0}")]
    Pool(#[from] deadpool_postgres::PoolError),

    /// A Redis error.
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    /// No actor identity on the request.
    #[error("Missing actor identity")]
    Unauthorized,

    /// The actor's role may not perform this action.
    #[error("Forbidden")]
    Forbidden,

    /// A resource not found error.
    #[error("Resource not found")]
    NotFound,

    /// An internal server error.
    #[error("Internal server error: {0}")]
    Internal(String),
}

/// A `Result` type that uses `AppError` as the error type.
pub type Result<T> = std::result::Result<T, AppError>;

impl AppError {
    /// Builds a single-field validation error.
    pub fn field(field: &str, message: impl Into<String>) -> Self {
        let mut fields = FieldErrors::new();
        fields.insert(field.to_string(), vec![message.into()]);
        AppError::Validation(fields)
    }

    /// Whether the failure came from the backing store and can be retried.
    pub fn is_persistence(&self) -> bool {
        matches!(
            self,
            AppError::Persistence(_)
                | AppError::Database(_)
                | AppError::Pool(_)
                | AppError::Redis(_)
        )
    }
}

/// JSON body returned for every error response.
#[derive(Serialize, Default)]
struct ErrorBody<'a> {
    error: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    fields: Option<&'a FieldErrors>,
    #[serde(skip_serializing_if = "Option::is_none")]
    attempt_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    current_status: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    distance_m: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    fraud_radius_m: Option<f64>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    security_event: bool,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    terminate_attempt: bool,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    retryable: bool,
}

impl<'a> ErrorBody<'a> {
    fn new(error: &'static str) -> Self {
        Self {
            error,
            ..Default::default()
        }
    }

    fn message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let message = self.to_string();
        let (status, body) = match &self {
            AppError::PermissionDenied => {
                tracing::info!("Check-in aborted: permissions denied");
                (
                    StatusCode::FORBIDDEN,
                    ErrorBody::new("permission_denied").message(message),
                )
            }

            AppError::AttemptDenied { attempt_id } => (
                StatusCode::FORBIDDEN,
                ErrorBody {
                    attempt_id: Some(*attempt_id),
                    terminate_attempt: true,
                    ..ErrorBody::new("permission_denied").message(message)
                },
            ),

            AppError::LocationUnavailable(msg) => {
                tracing::debug!("Location unavailable: {}", msg);
                (
                    StatusCode::UNPROCESSABLE_ENTITY,
                    ErrorBody::new("location_unavailable").message(message),
                )
            }

            AppError::InvalidToken(msg) => {
                tracing::debug!("Invalid token: {}", msg);
                (
                    StatusCode::BAD_REQUEST,
                    ErrorBody::new("invalid_token").message(message),
                )
            }

            AppError::ExpiredToken => (
                StatusCode::BAD_REQUEST,
                ErrorBody::new("expired_token").message(message),
            ),

            AppError::FraudBlocked {
                distance_m,
                fraud_radius_m,
            } => (
                StatusCode::FORBIDDEN,
                ErrorBody {
                    distance_m: Some(*distance_m),
                    fraud_radius_m: Some(*fraud_radius_m),
                    security_event: true,
                    terminate_attempt: true,
                    ..ErrorBody::new("fraud_blocked").message(message)
                },
            ),

            AppError::Validation(fields) => {
                tracing::debug!("Validation error: {:?}", fields);
                (
                    StatusCode::UNPROCESSABLE_ENTITY,
                    ErrorBody {
                        fields: Some(fields),
                        ..ErrorBody::new("validation_error").message(message)
                    },
                )
            }

            AppError::InvalidTransition {
                session_id,
                current,
            } => {
                tracing::warn!("Rejected review action on {} session {}", current, session_id);
                (
                    StatusCode::CONFLICT,
                    ErrorBody {
                        current_status: Some(current.as_str()),
                        ..ErrorBody::new("invalid_transition").message(message)
                    },
                )
            }

            AppError::MissingReason => (
                StatusCode::UNPROCESSABLE_ENTITY,
                ErrorBody::new("missing_reason").message(message),
            ),

            AppError::OutOfSequence(_) => (
                StatusCode::CONFLICT,
                ErrorBody::new("out_of_sequence").message(message),
            ),

            AppError::Persistence(_)
            | AppError::Database(_)
            | AppError::Pool(_)
            | AppError::Redis(_) => {
                tracing::error!("{}", message);
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    ErrorBody {
                        retryable: true,
                        ..ErrorBody::new("persistence_error")
                            .message("Storage unavailable, please resubmit")
                    },
                )
            }

            AppError::Unauthorized => (StatusCode::UNAUTHORIZED, ErrorBody::new("unauthorized")),

            AppError::Forbidden => {
                tracing::warn!("Authorization failed");
                (StatusCode::FORBIDDEN, ErrorBody::new("forbidden"))
            }

            AppError::NotFound => {
                tracing::debug!("Resource not found");
                (StatusCode::NOT_FOUND, ErrorBody::new("not_found"))
            }

            AppError::Internal(msg) => {
                tracing::error!("Internal error: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, ErrorBody::new("internal_error"))
            }
        };

        let body = sonic_rs::to_string(&body)
            .unwrap_or_else(|_| r#"{"error":"internal_error"}"#.to_string());

        (
            status,
            [(http::header::CONTENT_TYPE, "application/json")],
            body,
        )
            .into_response()
    }
}
