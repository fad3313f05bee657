use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::future::BoxFuture;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::{
    error::{AppError, Result},
    models::{
        checkin::CheckInAttempt,
        session::{Resolution, Session},
    },
    repositories::{
        attempt::AttemptStore,
        session::{SessionFilter, SessionStore},
    },
};

/// In-process session store. Backs local runs and tests.
#[derive(Clone, Default)]
pub struct MemorySessionStore {
    sessions: Arc<RwLock<HashMap<Uuid, Session>>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SessionStore for MemorySessionStore {
    fn insert<'a>(&'a self, session: &'a Session) -> BoxFuture<'a, Result<bool>> {
        Box::pin(async move {
            match self.sessions.write().await.entry(session.id) {
                Entry::Occupied(_) => Ok(false),
                Entry::Vacant(slot) => {
                    slot.insert(session.clone());
                    Ok(true)
                }
            }
        })
    }

    fn get(&self, id: Uuid) -> BoxFuture<'_, Result<Option<Session>>> {
        Box::pin(async move { Ok(self.sessions.read().await.get(&id).cloned()) })
    }

    fn transition<'a>(
        &'a self,
        id: Uuid,
        resolution: &'a Resolution,
    ) -> BoxFuture<'a, Result<Session>> {
        Box::pin(async move {
            // The write lock makes the status check and the update one step.
            let mut sessions = self.sessions.write().await;
            let session = sessions.get_mut(&id).ok_or(AppError::NotFound)?;
            session.resolve(resolution)?;
            Ok(session.clone())
        })
    }

    fn list<'a>(&'a self, filter: &'a SessionFilter) -> BoxFuture<'a, Result<Vec<Session>>> {
        Box::pin(async move {
            let sessions = self.sessions.read().await;
            let mut matching: Vec<Session> = sessions
                .values()
                .filter(|s| filter.matches(s))
                .cloned()
                .collect();
            matching.sort_by(|a, b| b.created_at.cmp(&a.created_at));
            Ok(matching)
        })
    }
}

/// In-process attempt store with the same expiry semantics as the Redis one.
#[derive(Clone)]
pub struct MemoryAttemptStore {
    attempts: Arc<RwLock<HashMap<Uuid, (CheckInAttempt, chrono::DateTime<Utc>)>>>,
    submit_locks: Arc<RwLock<HashMap<Uuid, chrono::DateTime<Utc>>>>,
    ttl: chrono::Duration,
}

impl MemoryAttemptStore {
    fn expires_at(&self) -> chrono::DateTime<Utc> {
        Utc::now()
            .checked_add_signed(self.ttl)
            .unwrap_or(chrono::DateTime::<Utc>::MAX_UTC)
    }

    pub fn new(ttl: Duration) -> Self {
        Self {
            attempts: Arc::new(RwLock::new(HashMap::new())),
            submit_locks: Arc::new(RwLock::new(HashMap::new())),
            ttl: chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::MAX),
        }
    }
}

impl AttemptStore for MemoryAttemptStore {
    fn put<'a>(&'a self, attempt: &'a CheckInAttempt) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let expires_at = self.expires_at();
            self.attempts
                .write()
                .await
                .insert(attempt.id, (attempt.clone(), expires_at));
            Ok(())
        })
    }

    fn get(&self, id: Uuid) -> BoxFuture<'_, Result<Option<CheckInAttempt>>> {
        Box::pin(async move {
            let attempts = self.attempts.read().await;
            Ok(attempts
                .get(&id)
                .filter(|(_, expires_at)| *expires_at > Utc::now())
                .map(|(attempt, _)| attempt.clone()))
        })
    }

    fn remove(&self, id: Uuid) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            self.attempts.write().await.remove(&id);
            self.submit_locks.write().await.remove(&id);
            Ok(())
        })
    }

    fn claim_submit(&self, id: Uuid) -> BoxFuture<'_, Result<bool>> {
        Box::pin(async move {
            let now = Utc::now();
            let mut locks = self.submit_locks.write().await;
            if locks.get(&id).is_some_and(|expires_at| *expires_at > now) {
                return Ok(false);
            }
            locks.insert(id, self.expires_at());
            Ok(true)
        })
    }

    fn release_submit(&self, id: Uuid) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            self.submit_locks.write().await.remove(&id);
            Ok(())
        })
    }

    fn purge_expired(&self) -> BoxFuture<'_, Result<usize>> {
        Box::pin(async move {
            let now = Utc::now();
            let mut attempts = self.attempts.write().await;
            let before = attempts.len();
            attempts.retain(|_, (_, expires_at)| *expires_at > now);
            self.submit_locks
                .write()
                .await
                .retain(|_, expires_at| *expires_at > now);
            Ok(before - attempts.len())
        })
    }
}
