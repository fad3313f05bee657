#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use axum::{
    Router,
    body::{Body, to_bytes},
    http::{Method, Request, StatusCode},
};
use futures::future::BoxFuture;
use serde_json::{Value, json};
use tokio::sync::{Mutex, mpsc};
use tower::ServiceExt;

use tutorcheck::{
    config::Config,
    error::Result,
    models::session::Coordinate,
    routes,
    services::notifications::{Notifier, SessionEvent},
    state::AppState,
};

pub const HOME: Coordinate = Coordinate {
    latitude: 14.6928,
    longitude: -17.4467,
};

/// Forwards every event into a channel the test can read.
pub struct ChannelNotifier {
    tx: mpsc::UnboundedSender<SessionEvent>,
}

impl Notifier for ChannelNotifier {
    fn send<'a>(&'a self, event: &'a SessionEvent) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let _ = self.tx.send(event.clone());
            Ok(())
        })
    }
}

pub struct Actor {
    pub id: &'static str,
    pub name: &'static str,
    pub role: &'static str,
}

pub const PARENT: Actor = Actor {
    id: "parent-1",
    name: "Awa Diop",
    role: "parent",
};

pub const TEACHER: Actor = Actor {
    id: "teacher-1",
    name: "Fatou Sow",
    role: "teacher",
};

pub const OTHER_TEACHER: Actor = Actor {
    id: "teacher-2",
    name: "Ibrahima Fall",
    role: "teacher",
};

pub const REVIEWER: Actor = Actor {
    id: "reviewer-1",
    name: "Coordinator",
    role: "reviewer",
};

// Shared test context
pub struct TestContext {
    pub state: AppState,
    pub app: Router,
    events: Mutex<mpsc::UnboundedReceiver<SessionEvent>>,
}

impl TestContext {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let state = AppState::in_memory(Config::in_memory(), Arc::new(ChannelNotifier { tx }))
            .expect("in-memory state");
        Self {
            app: routes::router(state.clone()),
            state,
            events: Mutex::new(rx),
        }
    }

    pub async fn request(
        &self,
        method: Method,
        path: &str,
        actor: Option<&Actor>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(path);
        if let Some(actor) = actor {
            builder = builder
                .header("x-actor-id", actor.id)
                .header("x-actor-name", actor.name)
                .header("x-actor-role", actor.role);
        }
        let request = match body {
            Some(body) => builder
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };

        let response = self.app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, value)
    }

    /// Waits for the next notification.
    pub async fn next_event(&self) -> SessionEvent {
        let mut events = self.events.lock().await;
        tokio::time::timeout(Duration::from_secs(2), events.recv())
            .await
            .expect("event within 2s")
            .expect("notifier channel open")
    }

    /// Asserts nothing else was sent within a short grace period.
    pub async fn assert_no_more_events(&self) {
        let mut events = self.events.lock().await;
        if let Ok(Some(event)) =
            tokio::time::timeout(Duration::from_millis(200), events.recv()).await
        {
            panic!("unexpected extra event {event:?}");
        }
    }

    pub async fn issue_payload(&self) -> String {
        let (status, body) = self
            .request(
                Method::POST,
                "/api/tokens",
                Some(&PARENT),
                Some(json!({
                    "family_code": "FAM-001",
                    "children": [
                        { "id": "student-1", "full_name": "Moussa Diop", "class_name": "CM2" },
                        { "id": "student-2", "full_name": "Aminata Diop", "class_name": "CE1" }
                    ],
                    "home_location": { "latitude": HOME.latitude, "longitude": HOME.longitude }
                })),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "token issue failed: {body}");
        body["payload"].as_str().unwrap().to_string()
    }

    /// Begins an attempt, captures `location` and scans a fresh token.
    pub async fn scanned_attempt(&self, location: Coordinate) -> (String, StatusCode, Value) {
        let payload = self.issue_payload().await;

        let (status, attempt) = self
            .request(
                Method::POST,
                "/api/checkins",
                Some(&TEACHER),
                Some(json!({ "camera": true, "location": true })),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "begin failed: {attempt}");
        let id = attempt["id"].as_str().unwrap().to_string();

        let (status, body) = self
            .request(
                Method::POST,
                &format!("/api/checkins/{id}/location"),
                Some(&TEACHER),
                Some(json!({
                    "latitude": location.latitude,
                    "longitude": location.longitude,
                    "accuracy": 6.0
                })),
            )
            .await;
        assert_eq!(status, StatusCode::OK, "location failed: {body}");

        let (status, body) = self
            .request(
                Method::POST,
                &format!("/api/checkins/{id}/scan"),
                Some(&TEACHER),
                Some(json!({ "payload": payload })),
            )
            .await;
        (id, status, body)
    }
}

pub fn session_form(start: &str, end: &str) -> Value {
    json!({
        "student_id": "student-1",
        "subjects": ["Mathematics", "French"],
        "start_time": start,
        "end_time": end,
        "topics": "Fractions and dictation",
        "session_summary": "Completed the exercise sheet",
        "observations": "Needs practice on division",
        "comments": ""
    })
}
