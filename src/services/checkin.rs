use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::{
    config::CheckInPolicy,
    error::{AppError, Result},
    geo,
    models::{
        actor::Actor,
        checkin::{
            CapabilityGrants, CheckInAttempt, CheckInStage, LocationReading, Proximity,
            ProximityDecision, SessionForm,
        },
        session::{Coordinate, Session, SessionLocation, SessionStatus},
        token::QrToken,
    },
    services::{
        anomaly::{self, SessionCandidate},
        notifications::{self, SessionEvent},
    },
    state::AppState,
    validation::session_form::validate_session_form,
};

/// Classifies a check-in fix against the token's registered home.
pub fn evaluate_proximity(
    policy: &CheckInPolicy,
    token: &QrToken,
    location: &SessionLocation,
) -> Proximity {
    let distance_m = geo::distance_meters(location.coordinate, token.home_location);
    let decision = if distance_m > policy.fraud_radius_m {
        ProximityDecision::FraudBlocked
    } else if distance_m > policy.warning_radius_m {
        ProximityDecision::Warning
    } else {
        ProximityDecision::Ok
    };

    Proximity {
        distance_m,
        decision,
    }
}

/// Loads an attempt owned by `teacher`. Other teachers' attempts read as missing.
async fn load_attempt(
    state: &AppState,
    attempt_id: Uuid,
    teacher: &Actor,
) -> Result<CheckInAttempt> {
    let attempt = state
        .attempts
        .get(attempt_id)
        .await?
        .filter(|a| a.teacher_id == teacher.id)
        .ok_or(AppError::NotFound)?;

    match attempt.stage {
        CheckInStage::FraudBlocked { distance_m } => Err(AppError::FraudBlocked {
            distance_m,
            fraud_radius_m: state.config.policy.fraud_radius_m,
        }),
        CheckInStage::PermissionDenied => Err(AppError::AttemptDenied {
            attempt_id: attempt.id,
        }),
        CheckInStage::Submitted { session_id } => Err(AppError::OutOfSequence(format!(
            "attempt already submitted as session {}",
            session_id
        ))),
        _ => Ok(attempt),
    }
}

fn expect_stage(attempt: &CheckInAttempt, expected: CheckInStage) -> Result<()> {
    if attempt.stage != expected {
        return Err(AppError::OutOfSequence(format!(
            "attempt is {}, expected {}",
            attempt.stage.name(),
            expected.name()
        )));
    }
    Ok(())
}

/// Closes the attempt as fraud and reports it as a security event.
async fn block_for_fraud(
    state: &AppState,
    mut attempt: CheckInAttempt,
    proximity: Proximity,
    now: DateTime<Utc>,
) -> AppError {
    let fraud_radius_m = state.config.policy.fraud_radius_m;
    tracing::warn!(
        target: "security",
        attempt_id = %attempt.id,
        teacher_id = %attempt.teacher_id,
        parent_id = attempt.token.as_ref().map(|t| t.parent_id.as_str()).unwrap_or("-"),
        distance_m = proximity.distance_m,
        fraud_radius_m,
        "🚨 Check-in blocked: claimed location too far from registered home"
    );

    attempt.stage = CheckInStage::FraudBlocked {
        distance_m: proximity.distance_m,
    };
    attempt.proximity = Some(proximity);
    attempt.form = None;
    attempt.updated_at = now;
    if let Err(e) = state.attempts.put(&attempt).await {
        tracing::error!("❌ Failed to record fraud block for attempt {}: {}", attempt.id, e);
    }

    AppError::FraudBlocked {
        distance_m: proximity.distance_m,
        fraud_radius_m,
    }
}

/// Starts a check-in attempt.
///
/// # Arguments
///
/// * `state` - The application state.
/// * `teacher` - The teacher checking in.
/// * `grants` - Camera and location capabilities the device granted.
/// * `now` - The current time.
///
/// # Returns
///
/// The attempt in `awaiting_scan`. When both grants are missing the attempt is
/// stored as `permission_denied` and `AttemptDenied` carries its id.
pub async fn begin_check_in(
    state: &AppState,
    teacher: &Actor,
    grants: CapabilityGrants,
    now: DateTime<Utc>,
) -> Result<CheckInAttempt> {
    let attempt = CheckInAttempt::new(&teacher.id, &teacher.name, grants, now);
    state.attempts.put(&attempt).await?;

    if attempt.stage == CheckInStage::PermissionDenied {
        tracing::info!(
            "🚫 Check-in {} by {} denied: no camera or location access",
            attempt.id,
            teacher.id
        );
        return Err(AppError::AttemptDenied {
            attempt_id: attempt.id,
        });
    }

    tracing::info!("📍 Check-in {} started by teacher {}", attempt.id, teacher.id);
    Ok(attempt)
}

/// Records the device location for an attempt awaiting its scan.
///
/// A failed, partial or out-of-range reading is `LocationUnavailable`; no
/// default position is ever substituted.
pub async fn capture_location(
    state: &AppState,
    attempt_id: Uuid,
    teacher: &Actor,
    reading: LocationReading,
    now: DateTime<Utc>,
) -> Result<CheckInAttempt> {
    let mut attempt = load_attempt(state, attempt_id, teacher).await?;
    expect_stage(&attempt, CheckInStage::AwaitingScan)?;

    if !attempt.grants.location {
        return Err(AppError::LocationUnavailable(
            "location access was not granted".to_string(),
        ));
    }
    if let Some(error) = reading.error {
        return Err(AppError::LocationUnavailable(error));
    }

    let (Some(latitude), Some(longitude)) = (reading.latitude, reading.longitude) else {
        return Err(AppError::LocationUnavailable(
            "no coordinates reported".to_string(),
        ));
    };
    let coordinate = Coordinate::new(latitude, longitude);
    if !coordinate.is_valid() {
        return Err(AppError::LocationUnavailable(
            "coordinates are out of range".to_string(),
        ));
    }

    let Some(accuracy) = reading.accuracy.filter(|a| a.is_finite() && *a >= 0.0) else {
        return Err(AppError::LocationUnavailable(
            "accuracy is missing or invalid".to_string(),
        ));
    };

    attempt.location = Some(SessionLocation {
        coordinate,
        accuracy,
        captured_at: now,
    });
    attempt.updated_at = now;
    state.attempts.put(&attempt).await?;

    tracing::debug!(
        "📍 Location captured for {} (±{:.0} m)",
        attempt.id,
        accuracy
    );
    Ok(attempt)
}

/// Parses the scanned token and runs the proximity check.
///
/// Token errors leave the attempt in `awaiting_scan` so the teacher can rescan.
/// A location beyond the fraud radius closes the attempt for good.
pub async fn scan_token(
    state: &AppState,
    attempt_id: Uuid,
    teacher: &Actor,
    raw: &str,
    now: DateTime<Utc>,
) -> Result<(CheckInAttempt, Proximity)> {
    let mut attempt = load_attempt(state, attempt_id, teacher).await?;
    expect_stage(&attempt, CheckInStage::AwaitingScan)?;

    if !attempt.grants.camera {
        return Err(AppError::PermissionDenied);
    }
    let location = attempt.location.ok_or_else(|| {
        AppError::LocationUnavailable("capture the device location before scanning".to_string())
    })?;

    let token = state.verifier.parse(raw, now)?;
    let proximity = evaluate_proximity(&state.config.policy, &token, &location);
    attempt.token = Some(token);

    if proximity.decision == ProximityDecision::FraudBlocked {
        return Err(block_for_fraud(state, attempt, proximity, now).await);
    }

    attempt.proximity = Some(proximity);
    attempt.stage = CheckInStage::AwaitingForm;
    attempt.updated_at = now;
    state.attempts.put(&attempt).await?;

    tracing::info!(
        "✅ Token scanned for {}: {:.1} m from home ({:?})",
        attempt.id,
        proximity.distance_m,
        proximity.decision
    );
    Ok((attempt, proximity))
}

/// Validates and stores the session form. Errors leave the attempt editable.
pub async fn fill_form(
    state: &AppState,
    attempt_id: Uuid,
    teacher: &Actor,
    form: SessionForm,
    now: DateTime<Utc>,
) -> Result<CheckInAttempt> {
    let mut attempt = load_attempt(state, attempt_id, teacher).await?;
    expect_stage(&attempt, CheckInStage::AwaitingForm)?;

    let token = attempt
        .token
        .as_ref()
        .ok_or_else(|| AppError::OutOfSequence("no token scanned".to_string()))?;
    validate_session_form(&form, token, &state.config.policy)?;

    attempt.form = Some(form);
    attempt.session_id.get_or_insert_with(Uuid::now_v7);
    attempt.updated_at = now;
    state.attempts.put(&attempt).await?;

    tracing::debug!("📝 Form accepted for {}", attempt.id);
    Ok(attempt)
}

/// Persists the attempt as a `pending` session.
///
/// Distance and duration are recomputed from the captured location, token and
/// times. A store failure or timeout leaves the attempt ready to resubmit.
///
/// An attempt yields at most one session: the id is fixed by `fill_form`, the
/// insert is idempotent on it and a per-attempt lock keeps submits serial. A
/// retry after a write whose outcome was lost returns the stored session.
pub async fn submit(
    state: &AppState,
    attempt_id: Uuid,
    teacher: &Actor,
    now: DateTime<Utc>,
) -> Result<Session> {
    let mut attempt = load_attempt(state, attempt_id, teacher).await?;
    expect_stage(&attempt, CheckInStage::AwaitingForm)?;
    let session_id = attempt.session_id.ok_or_else(|| {
        AppError::OutOfSequence("the session form has not been completed".to_string())
    })?;

    if !state.attempts.claim_submit(attempt.id).await? {
        // The holder may have stored the session without closing the attempt yet.
        return match state.sessions.get(session_id).await? {
            Some(session) => {
                tracing::debug!("♻️ Attempt {} already stored as {}", attempt.id, session.id);
                close_attempt(state, &mut attempt, session.id, now).await;
                Ok(session)
            }
            None => Err(AppError::OutOfSequence(
                "attempt is already being submitted".to_string(),
            )),
        };
    }

    let outcome = persist_submission(state, &mut attempt, session_id, now).await;
    if outcome.is_err() {
        let released = state.attempts.release_submit(attempt.id).await;
        if let Err(e) = released {
            tracing::warn!("⚠️ Submit lock on {} not released: {}", attempt.id, e);
        }
    }
    outcome
}

async fn persist_submission(
    state: &AppState,
    attempt: &mut CheckInAttempt,
    session_id: Uuid,
    now: DateTime<Utc>,
) -> Result<Session> {
    let (Some(location), Some(token), Some(form)) =
        (attempt.location, attempt.token.clone(), attempt.form.clone())
    else {
        return Err(AppError::OutOfSequence(
            "the session form has not been completed".to_string(),
        ));
    };

    let policy = &state.config.policy;
    let proximity = evaluate_proximity(policy, &token, &location);
    if proximity.decision == ProximityDecision::FraudBlocked {
        return Err(block_for_fraud(state, attempt.clone(), proximity, now).await);
    }

    let validated = validate_session_form(&form, &token, policy)?;
    let report = anomaly::evaluate(
        policy,
        &SessionCandidate {
            distance_m: proximity.distance_m,
            start_time: validated.start_time,
            end_time: validated.end_time,
            token_expires_at: token.expires_at,
            now,
        },
    );
    let duration_minutes = i32::try_from(validated.duration_minutes)
        .map_err(|_| AppError::Internal("duration out of range".to_string()))?;

    let session = Session {
        id: session_id,
        teacher_id: attempt.teacher_id.clone(),
        teacher_name: attempt.teacher_name.clone(),
        student_id: validated.student.id,
        student_name: validated.student.full_name,
        parent_id: token.parent_id.clone(),
        parent_name: token.parent_name.clone(),
        date: location.captured_at.date_naive(),
        start_time: validated.start_time,
        end_time: validated.end_time,
        duration_minutes,
        subjects: form.subjects.iter().map(|s| s.trim().to_string()).collect(),
        topics: form.topics,
        session_summary: form.session_summary,
        observations: form.observations,
        comments: form.comments,
        location,
        qr_token: token,
        distance_from_home: proximity.distance_m,
        status: SessionStatus::Pending,
        created_at: now,
        validated_at: None,
        validator_id: None,
        validator_name: None,
        rejection_reason: None,
        anomalies: report.anomalies,
        flagged: report.flagged,
    };

    let write = tokio::time::timeout(state.config.persist_timeout, state.sessions.insert(&session));
    let inserted = match write.await {
        Ok(Ok(inserted)) => inserted,
        Ok(Err(e)) => {
            tracing::error!("❌ Failed to persist session for attempt {}: {}", attempt.id, e);
            return Err(if e.is_persistence() {
                e
            } else {
                AppError::Persistence(e.to_string())
            });
        }
        Err(_) => {
            tracing::error!("❌ Persisting session for attempt {} timed out", attempt.id);
            return Err(AppError::Persistence("session write timed out".to_string()));
        }
    };

    // A previous write landed after its caller gave up. Its row wins.
    let session = if inserted {
        session
    } else {
        tracing::info!("♻️ Session {} was already stored for {}", session_id, attempt.id);
        state.sessions.get(session_id).await?.ok_or_else(|| {
            AppError::Persistence(format!("session {} vanished after insert", session_id))
        })?
    };

    close_attempt(state, attempt, session.id, now).await;
    tracing::info!(
        "✅ Session {} submitted by {} (flagged: {}, anomalies: {:?})",
        session.id,
        session.teacher_id,
        session.flagged,
        session.anomalies
    );
    notifications::dispatch(state.notifier.clone(), SessionEvent::submitted(&session));

    Ok(session)
}

async fn close_attempt(
    state: &AppState,
    attempt: &mut CheckInAttempt,
    session_id: Uuid,
    now: DateTime<Utc>,
) {
    attempt.stage = CheckInStage::Submitted { session_id };
    attempt.updated_at = now;
    if let Err(e) = state.attempts.put(attempt).await {
        tracing::warn!(
            "⚠️ Session {} saved but attempt {} not closed: {}",
            session_id,
            attempt.id,
            e
        );
    }
}

/// Abandons an attempt. Nothing is persisted.
pub async fn cancel(state: &AppState, attempt_id: Uuid, teacher: &Actor) -> Result<()> {
    let attempt = state
        .attempts
        .get(attempt_id)
        .await?
        .filter(|a| a.teacher_id == teacher.id)
        .ok_or(AppError::NotFound)?;

    state.attempts.remove(attempt.id).await?;
    if attempt.stage.is_terminal() {
        tracing::debug!("🧹 Closed check-in {} ({}) removed", attempt.id, attempt.stage.name());
    } else {
        tracing::info!("🛑 Check-in {} cancelled at {}", attempt.id, attempt.stage.name());
    }
    Ok(())
}

/// Reads an attempt, including terminal ones, for its owner.
pub async fn get_attempt(
    state: &AppState,
    attempt_id: Uuid,
    teacher: &Actor,
) -> Result<CheckInAttempt> {
    state
        .attempts
        .get(attempt_id)
        .await?
        .filter(|a| a.teacher_id == teacher.id)
        .ok_or(AppError::NotFound)
}
