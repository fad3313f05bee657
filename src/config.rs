use std::env;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};
use zeroize::{Zeroize, Zeroizing};

/// Thresholds that drive proximity checks, form validation and anomaly tags.
#[derive(Clone, Debug, PartialEq)]
pub struct CheckInPolicy {
    /// Hard limit. Beyond it the attempt is blocked as fraud.
    pub fraud_radius_m: f64,
    /// Soft band inside the fraud radius. Beyond it the session is flagged.
    pub warning_radius_m: f64,
    pub min_duration_minutes: i64,
    pub max_duration_minutes: i64,
    /// Earliest allowed start/end hour, inclusive.
    pub earliest_hour: u32,
    /// Latest allowed start/end hour, inclusive.
    pub latest_hour: u32,
    /// Maximum age of a QR token.
    pub token_validity: chrono::Duration,
}

impl Default for CheckInPolicy {
    fn default() -> Self {
        Self {
            fraud_radius_m: 30.0,
            warning_radius_m: 20.0,
            min_duration_minutes: 60,
            max_duration_minutes: 240,
            earliest_hour: 8,
            latest_hour: 20,
            token_validity: chrono::Duration::hours(24),
        }
    }
}

impl CheckInPolicy {
    /// Rejects threshold combinations that would make a band unreachable.
    pub fn validate(&self) -> Result<()> {
        if !(self.fraud_radius_m.is_finite() && self.fraud_radius_m > 0.0) {
            anyhow::bail!("FRAUD_RADIUS_M must be a positive number");
        }
        if !(self.warning_radius_m.is_finite() && self.warning_radius_m >= 0.0) {
            anyhow::bail!("WARNING_RADIUS_M must be a non-negative number");
        }
        if self.warning_radius_m >= self.fraud_radius_m {
            anyhow::bail!(
                "WARNING_RADIUS_M ({}) must be smaller than FRAUD_RADIUS_M ({})",
                self.warning_radius_m,
                self.fraud_radius_m
            );
        }
        if self.min_duration_minutes > self.max_duration_minutes {
            anyhow::bail!("minimum session duration exceeds the maximum");
        }
        if self.earliest_hour > self.latest_hour || self.latest_hour > 23 {
            anyhow::bail!("invalid session hour window");
        }
        if self.token_validity <= chrono::Duration::zero() {
            anyhow::bail!("TOKEN_VALIDITY_HOURS must be positive");
        }
        Ok(())
    }
}

/// The application's configuration.
#[derive(Clone)]
pub struct Config {
    /// PostgreSQL URL. Sessions stay in memory when unset.
    pub database_url: Option<String>,
    /// Redis URL. Attempts stay in memory and events go to the log when unset.
    pub redis_url: Option<String>,
    /// Address the HTTP server binds to.
    pub bind_addr: SocketAddr,
    /// Key for signing and verifying QR tokens. Required once any external
    /// backend is configured.
    pub token_signing_key: Option<Zeroizing<Vec<u8>>>,
    /// How long an unfinished check-in attempt is kept.
    pub attempt_ttl: Duration,
    /// Upper bound on a single session write.
    pub persist_timeout: Duration,
    /// Redis channel session events are published on.
    pub notify_channel: String,
    pub policy: CheckInPolicy,
}

impl Config {
    /// Creates a new `Config` from environment variables.
    ///
    /// # Returns
    ///
    /// A `Result` containing the `Config`.
    pub fn from_env() -> Result<Self> {
        let token_signing_key = match env::var("QR_SIGNING_KEY") {
            Ok(mut key_hex) => {
                let key = hex::decode(&key_hex).context("QR_SIGNING_KEY must be valid hexadecimal");
                key_hex.zeroize();
                let key = key?;
                if key.len() != 32 {
                    anyhow::bail!("QR_SIGNING_KEY must be exactly 32 bytes (64 hex characters)");
                }
                Some(Zeroizing::new(key))
            }
            Err(_) => None,
        };

        let defaults = CheckInPolicy::default();
        let policy = CheckInPolicy {
            fraud_radius_m: parse_or("FRAUD_RADIUS_M", defaults.fraud_radius_m)?,
            warning_radius_m: parse_or("WARNING_RADIUS_M", defaults.warning_radius_m)?,
            token_validity: chrono::Duration::hours(parse_or("TOKEN_VALIDITY_HOURS", 24i64)?),
            ..defaults
        };
        policy.validate()?;

        let config = Self {
            database_url: env::var("DATABASE_URL").ok(),
            redis_url: env::var("REDIS_URL").ok(),
            bind_addr: parse_or("BIND_ADDR", SocketAddr::from(([127, 0, 0, 1], 3000)))?,
            token_signing_key,
            attempt_ttl: Duration::from_secs(parse_or("ATTEMPT_TTL_SECS", 1800u64)?),
            persist_timeout: Duration::from_secs(parse_or("PERSIST_TIMEOUT_SECS", 5u64)?),
            notify_channel: env::var("NOTIFY_CHANNEL")
                .unwrap_or_else(|_| "tutoring:session-events".to_string()),
            policy,
        };
        config.require_signing_key()?;
        Ok(config)
    }

    /// Refuses unsigned QR tokens outside a purely in-memory setup.
    ///
    /// Without a key any well-formed payload verifies, including one carrying
    /// a forged home location.
    pub fn require_signing_key(&self) -> Result<()> {
        let persistent = self.database_url.is_some() || self.redis_url.is_some();
        if persistent && self.token_signing_key.is_none() {
            anyhow::bail!("QR_SIGNING_KEY is required when DATABASE_URL or REDIS_URL is set");
        }
        Ok(())
    }

    /// A configuration with no external backends, used for local runs and tests.
    pub fn in_memory() -> Self {
        Self {
            database_url: None,
            redis_url: None,
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 3000)),
            token_signing_key: None,
            attempt_ttl: Duration::from_secs(1800),
            persist_timeout: Duration::from_secs(5),
            notify_channel: "tutoring:session-events".to_string(),
            policy: CheckInPolicy::default(),
        }
    }
}

fn parse_or<T>(name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("Invalid {}", name)),
        Err(_) => Ok(default),
    }
}
