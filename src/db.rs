use std::time::Duration;

use deadpool_postgres::{Config, ManagerConfig, Pool, PoolConfig, RecyclingMethod, Runtime};
use tokio_postgres::NoTls;

use crate::error::{AppError, Result};

/// Creates a new database connection pool.
///
/// # Arguments
///
/// * `database_url` - The URL of the PostgreSQL database.
///
/// # Returns
///
/// A `Result` containing the `Pool`.
pub fn create_pool(database_url: &str) -> Result<Pool> {
    let mut cfg = Config::new();
    let pg_config: tokio_postgres::Config = database_url.parse()?;

    if let Some(host) = pg_config.get_hosts().first() {
        if let tokio_postgres::config::Host::Tcp(hostname) = host {
            cfg.host = Some(hostname.to_string());
        }
    }

    if let Some(port) = pg_config.get_ports().first() {
        cfg.port = Some(*port);
    }

    if let Some(dbname) = pg_config.get_dbname() {
        cfg.dbname = Some(dbname.to_string());
    }

    if let Some(user) = pg_config.get_user() {
        cfg.user = Some(user.to_string());
    }

    if let Some(password) = pg_config.get_password() {
        cfg.password = Some(String::from_utf8_lossy(password).to_string());
    }

    cfg.manager = Some(ManagerConfig {
        recycling_method: RecyclingMethod::Fast,
    });

    cfg.pool = Some(PoolConfig {
        max_size: 32,
        timeouts: deadpool_postgres::Timeouts {
            wait: Some(Duration::from_secs(5)),
            create: Some(Duration::from_secs(2)),
            recycle: Some(Duration::from_secs(1)),
        },
        ..Default::default()
    });

    cfg.create_pool(Some(Runtime::Tokio1), NoTls)
        .map_err(|e| AppError::Internal(format!("Failed to create pool: {}", e)))
}

/// The session table. `CHECK` constraints mirror the model invariants so that
/// no writer can persist a negative duration or a rejection without a reason.
const SCHEMA: &str = r#"
DO $$ BEGIN
    CREATE TYPE session_status AS ENUM ('pending', 'validated', 'rejected');
EXCEPTION
    WHEN duplicate_object THEN NULL;
END $$;

CREATE TABLE IF NOT EXISTS tutoring_sessions (
    id                 UUID PRIMARY KEY,
    teacher_id         TEXT NOT NULL,
    teacher_name       TEXT NOT NULL,
    student_id         TEXT NOT NULL,
    student_name       TEXT NOT NULL,
    parent_id          TEXT NOT NULL,
    parent_name        TEXT NOT NULL,
    session_date       DATE NOT NULL,
    start_time         TIME NOT NULL,
    end_time           TIME NOT NULL,
    duration_minutes   INTEGER NOT NULL CHECK (duration_minutes >= 0),
    subjects           TEXT[] NOT NULL CHECK (cardinality(subjects) > 0),
    topics             TEXT NOT NULL,
    session_summary    TEXT NOT NULL,
    observations       TEXT NOT NULL DEFAULT '',
    comments           TEXT NOT NULL DEFAULT '',
    location           JSONB NOT NULL,
    qr_token           JSONB NOT NULL,
    distance_from_home DOUBLE PRECISION NOT NULL,
    status             session_status NOT NULL DEFAULT 'pending',
    created_at         TIMESTAMPTZ NOT NULL,
    validated_at       TIMESTAMPTZ,
    validator_id       TEXT,
    validator_name     TEXT,
    rejection_reason   TEXT,
    anomalies          TEXT[] NOT NULL DEFAULT '{}',
    flagged            BOOLEAN NOT NULL DEFAULT false,
    CHECK ((status = 'rejected') = (rejection_reason IS NOT NULL AND btrim(rejection_reason) <> '')),
    CHECK ((status = 'pending') = (validated_at IS NULL))
);

CREATE INDEX IF NOT EXISTS tutoring_sessions_review_idx
    ON tutoring_sessions (status, flagged, created_at DESC);
"#;

/// Creates the session schema if it does not exist yet.
pub async fn ensure_schema(pool: &Pool) -> Result<()> {
    let client = pool.get().await?;
    client.batch_execute(SCHEMA).await?;
    tracing::info!("✅ Session schema ready");
    Ok(())
}
