use std::sync::Arc;

use redis::aio::ConnectionManager;

use crate::config::Config;
use crate::crypto::token::{TokenIssuer, TokenVerifier};
use crate::error::{AppError, Result};
use crate::repositories::{
    attempt::{AttemptStore, RedisAttemptStore},
    memory::{MemoryAttemptStore, MemorySessionStore},
    session::{PgSessionStore, SessionStore},
};
use crate::services::notifications::{LogNotifier, Notifier, RedisNotifier};

/// The application's state.
#[derive(Clone)]
pub struct AppState {
    /// Persisted sessions.
    pub sessions: Arc<dyn SessionStore>,
    /// In-flight check-in attempts.
    pub attempts: Arc<dyn AttemptStore>,
    /// Session event delivery.
    pub notifier: Arc<dyn Notifier>,
    /// Issues parent QR tokens.
    pub issuer: TokenIssuer,
    /// Parses and authenticates scanned QR tokens.
    pub verifier: TokenVerifier,
    /// The application's configuration.
    pub config: Config,
}

impl AppState {
    /// Creates a new `AppState`, connecting to whichever backends are configured.
    ///
    /// # Arguments
    ///
    /// * `config` - The application's configuration.
    ///
    /// # Returns
    ///
    /// A `Result` containing the `AppState`.
    pub async fn new(config: &Config) -> Result<Self> {
        config
            .require_signing_key()
            .map_err(|e| AppError::Internal(e.to_string()))?;
        let sessions: Arc<dyn SessionStore> = match &config.database_url {
            Some(url) => {
                let pool = crate::db::create_pool(url)?;
                crate::db::ensure_schema(&pool).await?;
                tracing::info!("✅ PostgreSQL session store initialized");
                Arc::new(PgSessionStore::new(pool))
            }
            None => {
                tracing::warn!("⚠️ DATABASE_URL not set, sessions are kept in memory");
                Arc::new(MemorySessionStore::new())
            }
        };

        let (attempts, notifier): (Arc<dyn AttemptStore>, Arc<dyn Notifier>) =
            match &config.redis_url {
                Some(url) => {
                    let client = redis::Client::open(url.as_str())?;
                    let redis = ConnectionManager::new(client).await?;
                    tracing::info!("✅ Redis Connection Manager initialized (pooled)");
                    (
                        Arc::new(RedisAttemptStore::new(redis.clone(), config.attempt_ttl)),
                        Arc::new(RedisNotifier::new(redis, config.notify_channel.clone())),
                    )
                }
                None => {
                    tracing::warn!("⚠️ REDIS_URL not set, attempts are kept in memory");
                    (
                        Arc::new(MemoryAttemptStore::new(config.attempt_ttl)),
                        Arc::new(LogNotifier),
                    )
                }
            };

        Self::with_backends(config.clone(), sessions, attempts, notifier)
    }

    /// Builds state over explicit backends.
    pub fn with_backends(
        config: Config,
        sessions: Arc<dyn SessionStore>,
        attempts: Arc<dyn AttemptStore>,
        notifier: Arc<dyn Notifier>,
    ) -> Result<Self> {
        let key = config.token_signing_key.as_ref().map(|k| k.as_slice());
        let issuer = TokenIssuer::new(key, config.policy.token_validity)?;
        let verifier = TokenVerifier::new(key, config.policy.clone())?;
        if key.is_none() {
            tracing::warn!("⚠️ QR_SIGNING_KEY not set, QR tokens are not authenticated");
        }

        Ok(AppState {
            sessions,
            attempts,
            notifier,
            issuer,
            verifier,
            config,
        })
    }

    /// State with in-memory stores and the given notifier.
    pub fn in_memory(config: Config, notifier: Arc<dyn Notifier>) -> Result<Self> {
        if config.database_url.is_some() || config.redis_url.is_some() {
            return Err(AppError::Internal(
                "in-memory state cannot use external backends".to_string(),
            ));
        }
        let attempts = Arc::new(MemoryAttemptStore::new(config.attempt_ttl));
        Self::with_backends(
            config,
            Arc::new(MemorySessionStore::new()),
            attempts,
            notifier,
        )
    }
}
