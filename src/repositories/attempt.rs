use std::time::Duration;

use futures::future::BoxFuture;
use redis::{AsyncCommands, aio::ConnectionManager};
use uuid::Uuid;

use crate::{
    error::{AppError, Result},
    models::checkin::CheckInAttempt,
};

/// Short-lived storage for in-flight check-in attempts.
///
/// Entries expire on their own; an expired attempt reads as absent.
pub trait AttemptStore: Send + Sync {
    fn put<'a>(&'a self, attempt: &'a CheckInAttempt) -> BoxFuture<'a, Result<()>>;

    fn get(&self, id: Uuid) -> BoxFuture<'_, Result<Option<CheckInAttempt>>>;

    fn remove(&self, id: Uuid) -> BoxFuture<'_, Result<()>>;

    /// Takes the submit lock on an attempt. `false` when another submit holds it.
    ///
    /// The lock expires with the attempt, so a crashed submit cannot wedge it.
    fn claim_submit(&self, id: Uuid) -> BoxFuture<'_, Result<bool>>;

    fn release_submit(&self, id: Uuid) -> BoxFuture<'_, Result<()>>;

    /// Drops expired attempts and returns how many went.
    fn purge_expired(&self) -> BoxFuture<'_, Result<usize>>;
}

fn attempt_key(id: Uuid) -> String {
    format!("checkin:{}", id)
}

fn submit_key(id: Uuid) -> String {
    format!("checkin:{}:submit", id)
}

/// Redis-backed attempt store. Each attempt is one JSON value under `checkin:{id}`;
/// the submit lock lives next to it under `checkin:{id}:submit`.
#[derive(Clone)]
pub struct RedisAttemptStore {
    redis: ConnectionManager,
    ttl_secs: u64,
}

impl RedisAttemptStore {
    pub fn new(redis: ConnectionManager, ttl: Duration) -> Self {
        Self {
            redis,
            ttl_secs: ttl.as_secs().max(1),
        }
    }
}

impl AttemptStore for RedisAttemptStore {
    fn put<'a>(&'a self, attempt: &'a CheckInAttempt) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let json = sonic_rs::to_string(attempt)
                .map_err(|e| AppError::Internal(format!("Attempt serialization failed: {}", e)))?;

            let mut redis = self.redis.clone();
            let _: () = redis
                .set_ex(attempt_key(attempt.id), &json, self.ttl_secs)
                .await
                .map_err(|e| {
                    tracing::error!("❌ Redis set_ex failed: {}", e);
                    AppError::Redis(e)
                })?;
            Ok(())
        })
    }

    fn get(&self, id: Uuid) -> BoxFuture<'_, Result<Option<CheckInAttempt>>> {
        Box::pin(async move {
            let mut redis = self.redis.clone();
            let json: Option<String> = redis.get(attempt_key(id)).await?;

            json.map(|json| {
                sonic_rs::from_str(&json).map_err(|e| {
                    tracing::warn!("❌ Invalid attempt JSON for {}: {}", id, e);
                    AppError::Internal(format!("Corrupt check-in attempt: {}", e))
                })
            })
            .transpose()
        })
    }

    fn remove(&self, id: Uuid) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            let mut redis = self.redis.clone();
            let _: () = redis.del(vec![attempt_key(id), submit_key(id)]).await?;
            Ok(())
        })
    }

    fn claim_submit(&self, id: Uuid) -> BoxFuture<'_, Result<bool>> {
        Box::pin(async move {
            let mut redis = self.redis.clone();
            let claimed: Option<String> = redis::cmd("SET")
                .arg(submit_key(id))
                .arg(1)
                .arg("NX")
                .arg("EX")
                .arg(self.ttl_secs)
                .query_async(&mut redis)
                .await
                .map_err(|e| {
                    tracing::error!("❌ Redis SET NX failed: {}", e);
                    AppError::Redis(e)
                })?;
            Ok(claimed.is_some())
        })
    }

    fn release_submit(&self, id: Uuid) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            let mut redis = self.redis.clone();
            let _: () = redis.del(submit_key(id)).await?;
            Ok(())
        })
    }

    fn purge_expired(&self) -> BoxFuture<'_, Result<usize>> {
        // Redis drops the keys itself once their TTL runs out.
        Box::pin(async { Ok(0) })
    }
}
