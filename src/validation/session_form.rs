use chrono::{NaiveTime, Timelike};
use garde::Validate;

use crate::config::CheckInPolicy;
use crate::error::{AppError, FieldErrors, Result};
use crate::models::checkin::SessionForm;
use crate::models::token::{Child, QrToken};

/// A form that passed every check, with its derived values.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedForm {
    pub student: Child,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
    pub duration_minutes: i64,
}

fn push(errors: &mut FieldErrors, field: &str, message: impl Into<String>) {
    errors
        .entry(field.to_string())
        .or_default()
        .push(message.into());
}

/// Derives the session length in minutes from wall-clock times.
pub fn duration_minutes(start: NaiveTime, end: NaiveTime) -> i64 {
    (end - start).num_minutes()
}

/// Validates a session form.
///
/// # Arguments
///
/// * `form` - The submitted form.
/// * `token` - The token scanned for this attempt; `student_id` must be one of its children.
/// * `policy` - Duration and hour bounds.
///
/// # Returns
///
/// The student and derived times, or `AppError::Validation` with every failing field.
pub fn validate_session_form(
    form: &SessionForm,
    token: &QrToken,
    policy: &CheckInPolicy,
) -> Result<ValidatedForm> {
    let mut errors = FieldErrors::new();

    if let Err(report) = form.validate() {
        for (path, error) in report.iter() {
            push(&mut errors, &path.to_string(), error.to_string());
        }
    }

    let student = token.child(form.student_id.trim()).cloned();
    if student.is_none() && !form.student_id.trim().is_empty() {
        push(&mut errors, "student_id", "student is not covered by this QR token");
    }

    let mut window = None;
    if let (Some(start), Some(end)) = (form.start_time, form.end_time) {
        if start >= end {
            push(&mut errors, "end_time", "end time must be after start time");
        } else {
            let duration = duration_minutes(start, end);
            if duration < policy.min_duration_minutes || duration > policy.max_duration_minutes {
                push(
                    &mut errors,
                    "duration",
                    format!(
                        "session must last between {} and {} minutes, got {}",
                        policy.min_duration_minutes, policy.max_duration_minutes, duration
                    ),
                );
            }

            let hours = policy.earliest_hour..=policy.latest_hour;
            for (field, time) in [("start_time", start), ("end_time", end)] {
                if !hours.contains(&time.hour()) {
                    push(
                        &mut errors,
                        field,
                        format!(
                            "hour must be between {}h and {}h",
                            policy.earliest_hour, policy.latest_hour
                        ),
                    );
                }
            }
            window = Some((start, end, duration));
        }
    }

    match (errors.is_empty(), student, window) {
        (true, Some(student), Some((start_time, end_time, duration_minutes))) => Ok(ValidatedForm {
            student,
            start_time,
            end_time,
            duration_minutes,
        }),
        _ => {
            if errors.is_empty() {
                return Err(AppError::Internal("form validation left no result".to_string()));
            }
            Err(AppError::Validation(errors))
        }
    }
}
