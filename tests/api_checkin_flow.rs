mod common;

use axum::http::{Method, StatusCode};
use serde_json::{Value, json};

use common::{HOME, OTHER_TEACHER, REVIEWER, TEACHER, TestContext, session_form};
use tutorcheck::{geo, services::notifications::SessionEvent};

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_check_in_ten_meters_from_home() {
        let context = TestContext::new();

        // Step 1: Begin, locate and scan
        let (id, status, scan) = context
            .scanned_attempt(geo::offset_north(HOME, 10.0))
            .await;
        assert_eq!(status, StatusCode::OK, "scan failed: {scan}");
        assert_eq!(scan["proximity"]["decision"], "ok");
        assert_eq!(scan["attempt"]["stage"]["stage"], "awaiting_form");

        // Step 2: Fill the form
        let (status, body) = context
            .request(
                Method::PUT,
                &format!("/api/checkins/{id}/form"),
                Some(&TEACHER),
                Some(session_form("14:00:00", "15:30:00")),
            )
            .await;
        assert_eq!(status, StatusCode::OK, "form failed: {body}");

        // Step 3: Submit
        let (status, session) = context
            .request(
                Method::POST,
                &format!("/api/checkins/{id}/submit"),
                Some(&TEACHER),
                None,
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "submit failed: {session}");
        assert_eq!(session["status"], "pending");
        assert_eq!(session["flagged"], false);
        assert_eq!(session["anomalies"], json!([]));
        assert_eq!(session["duration_minutes"], 90);
        assert_eq!(session["student_name"], "Moussa Diop");
        assert_eq!(session["parent_id"], "parent-1");
        let distance = session["distance_from_home"].as_f64().unwrap();
        assert!((distance - 10.0).abs() < 0.5, "distance {distance}");

        // Step 4: The parent is told
        match context.next_event().await {
            SessionEvent::SessionSubmitted {
                session_id,
                student_name,
                duration_minutes,
                ..
            } => {
                assert_eq!(session_id.to_string(), session["id"].as_str().unwrap());
                assert_eq!(student_name, "Moussa Diop");
                assert_eq!(duration_minutes, 90);
            }
            other => panic!("unexpected event {other:?}"),
        }

        // Step 5: The reviewer sees it in the pending queue
        let (status, pending) = context
            .request(Method::GET, "/api/sessions/pending", Some(&REVIEWER), None)
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(pending.as_array().unwrap().len(), 1);
        assert_eq!(pending[0]["id"], session["id"]);
    }

    #[tokio::test]
    async fn test_five_hundred_km_is_fraud_blocked() {
        let context = TestContext::new();

        let (id, status, body) = context
            .scanned_attempt(geo::offset_north(HOME, 500_000.0))
            .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body["error"], "fraud_blocked");
        assert_eq!(body["security_event"], true);
        assert_eq!(body["terminate_attempt"], true);

        // The attempt is closed for good
        let (status, body) = context
            .request(
                Method::PUT,
                &format!("/api/checkins/{id}/form"),
                Some(&TEACHER),
                Some(session_form("14:00:00", "15:30:00")),
            )
            .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body["error"], "fraud_blocked");

        let (_, attempt) = context
            .request(Method::GET, &format!("/api/checkins/{id}"), Some(&TEACHER), None)
            .await;
        assert_eq!(attempt["stage"]["stage"], "fraud_blocked");

        let (_, sessions) = context
            .request(Method::GET, "/api/sessions", Some(&REVIEWER), None)
            .await;
        assert_eq!(sessions, json!([]));
    }

    #[tokio::test]
    async fn test_soft_band_is_flagged() {
        let context = TestContext::new();

        let (id, status, scan) = context
            .scanned_attempt(geo::offset_north(HOME, 25.0))
            .await;
        assert_eq!(status, StatusCode::OK, "{scan}");
        assert_eq!(scan["proximity"]["decision"], "warning");

        context
            .request(
                Method::PUT,
                &format!("/api/checkins/{id}/form"),
                Some(&TEACHER),
                Some(session_form("14:00:00", "15:30:00")),
            )
            .await;
        let (status, session) = context
            .request(
                Method::POST,
                &format!("/api/checkins/{id}/submit"),
                Some(&TEACHER),
                None,
            )
            .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(session["flagged"], true);
        assert_eq!(session["anomalies"], json!(["excessive_distance"]));
    }

    #[tokio::test]
    async fn test_form_errors_are_field_level() {
        let context = TestContext::new();
        let (id, _, _) = context.scanned_attempt(HOME).await;

        let (status, body) = context
            .request(
                Method::PUT,
                &format!("/api/checkins/{id}/form"),
                Some(&TEACHER),
                Some(session_form("16:00:00", "14:00:00")),
            )
            .await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(body["error"], "validation_error");
        assert!(body["fields"]["end_time"].is_array());

        let (status, body) = context
            .request(
                Method::PUT,
                &format!("/api/checkins/{id}/form"),
                Some(&TEACHER),
                Some(json!({ "student_id": "student-1" })),
            )
            .await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        for field in ["subjects", "start_time", "end_time", "topics", "session_summary"] {
            assert!(body["fields"].get(field).is_some(), "missing {field}: {body}");
        }

        // Still editable
        let (status, _) = context
            .request(
                Method::PUT,
                &format!("/api/checkins/{id}/form"),
                Some(&TEACHER),
                Some(session_form("14:00:00", "16:00:00")),
            )
            .await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_bad_payloads_and_locations() {
        let context = TestContext::new();

        let (status, attempt) = context
            .request(
                Method::POST,
                "/api/checkins",
                Some(&TEACHER),
                Some(json!({ "camera": true, "location": true })),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED);
        let id = attempt["id"].as_str().unwrap().to_string();

        let (status, body) = context
            .request(
                Method::POST,
                &format!("/api/checkins/{id}/location"),
                Some(&TEACHER),
                Some(json!({ "error": "position unavailable" })),
            )
            .await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(body["error"], "location_unavailable");

        context
            .request(
                Method::POST,
                &format!("/api/checkins/{id}/location"),
                Some(&TEACHER),
                Some(json!({
                    "latitude": HOME.latitude,
                    "longitude": HOME.longitude,
                    "accuracy": 4.0
                })),
            )
            .await;

        let (status, body) = context
            .request(
                Method::POST,
                &format!("/api/checkins/{id}/scan"),
                Some(&TEACHER),
                Some(json!({ "payload": "not a token" })),
            )
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "invalid_token");
    }

    #[tokio::test]
    async fn test_permissions_denied() {
        let context = TestContext::new();
        let (status, body) = context
            .request(
                Method::POST,
                "/api/checkins",
                Some(&TEACHER),
                Some(json!({ "camera": false, "location": false })),
            )
            .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body["error"], "permission_denied");
        assert_eq!(body["terminate_attempt"], true);
        let id = body["attempt_id"].as_str().unwrap().to_string();

        let (status, attempt) = context
            .request(Method::GET, &format!("/api/checkins/{id}"), Some(&TEACHER), None)
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(attempt["stage"]["stage"], "permission_denied");

        let (status, body) = context
            .request(
                Method::POST,
                &format!("/api/checkins/{id}/location"),
                Some(&TEACHER),
                Some(json!({ "latitude": HOME.latitude, "longitude": HOME.longitude })),
            )
            .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body["error"], "permission_denied");
    }

    #[tokio::test]
    async fn test_double_submit_creates_one_session() {
        let context = TestContext::new();
        let (id, status, scan) = context.scanned_attempt(HOME).await;
        assert_eq!(status, StatusCode::OK, "scan failed: {scan}");
        let (status, _) = context
            .request(
                Method::PUT,
                &format!("/api/checkins/{id}/form"),
                Some(&TEACHER),
                Some(session_form("14:00:00", "15:30:00")),
            )
            .await;
        assert_eq!(status, StatusCode::OK);

        // Step 1: Two submits race on the same attempt
        let path = format!("/api/checkins/{id}/submit");
        let ((first, a), (second, b)) = tokio::join!(
            context.request(Method::POST, &path, Some(&TEACHER), None),
            context.request(Method::POST, &path, Some(&TEACHER), None),
        );
        let created: Vec<&Value> = [(first, &a), (second, &b)]
            .into_iter()
            .filter(|(status, _)| *status == StatusCode::CREATED)
            .map(|(_, body)| body)
            .collect();
        assert!(!created.is_empty(), "no submit succeeded: {a} {b}");
        for (status, body) in [(first, &a), (second, &b)] {
            assert!(
                status == StatusCode::CREATED || status == StatusCode::CONFLICT,
                "unexpected {status}: {body}"
            );
        }
        assert!(created.iter().all(|s| s["id"] == created[0]["id"]));

        // Step 2: A late retry gets the conflict, not a new row
        let (status, _) = context
            .request(Method::POST, &path, Some(&TEACHER), None)
            .await;
        assert_eq!(status, StatusCode::CONFLICT);

        // Step 3: One row, one notification
        let (_, pending) = context
            .request(Method::GET, "/api/sessions/pending", Some(&REVIEWER), None)
            .await;
        assert_eq!(pending.as_array().unwrap().len(), 1);
        assert_eq!(pending[0]["id"], created[0]["id"]);
        assert!(matches!(
            context.next_event().await,
            SessionEvent::SessionSubmitted { .. }
        ));
        context.assert_no_more_events().await;
    }

    #[tokio::test]
    async fn test_attempts_are_private_and_cancellable() {
        let context = TestContext::new();
        let (id, _, _) = context.scanned_attempt(HOME).await;

        let (status, _) = context
            .request(Method::GET, &format!("/api/checkins/{id}"), Some(&OTHER_TEACHER), None)
            .await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, body) = context
            .request(Method::DELETE, &format!("/api/checkins/{id}"), Some(&TEACHER), None)
            .await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        assert_eq!(body, Value::Null);

        let (status, _) = context
            .request(
                Method::POST,
                &format!("/api/checkins/{id}/submit"),
                Some(&TEACHER),
                None,
            )
            .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_actor_headers_are_enforced() {
        let context = TestContext::new();

        let (status, _) = context
            .request(
                Method::POST,
                "/api/checkins",
                None,
                Some(json!({ "camera": true, "location": true })),
            )
            .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let (status, _) = context
            .request(Method::GET, "/api/sessions", Some(&TEACHER), None)
            .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
    }
}
