//! Dependency initialization for the membership auditor.
//!
//! Reads the environment and opens the aggregate store the audit runs
//! against: PostgreSQL when `DATABASE_URL` is set, an empty in-memory store
//! otherwise.
use std::env;
use std::sync::Arc;
use std::time::Duration;

use membership_repository::{AggregateStore, MemoryAggregateStore, PostgresAggregateStore};
use tokio::time::sleep;
use tracing::{info, warn};

use crate::errors::AuditorError;

/// Default pause between two audit passes in watch mode.
const DEFAULT_AUDIT_INTERVAL_SECS: u64 = 60;

/// Default connection retry interval in seconds.
const DEFAULT_RETRY_INTERVAL_SECS: u64 = 15;

/// Whether the auditor runs one pass or keeps auditing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditMode {
    /// Audit every aggregate once and exit.
    Once,
    /// Audit on an interval until interrupted.
    Watch,
}

impl AuditMode {
    /// Parse the audit mode from `AUDIT_MODE`.
    ///
    /// Valid values: "once" or "watch" (case-insensitive). Defaults to "once".
    fn from_env() -> Self {
        match env::var("AUDIT_MODE")
            .unwrap_or_else(|_| "once".to_string())
            .to_lowercase()
            .as_str()
        {
            "once" => Self::Once,
            "watch" => Self::Watch,
            _ => {
                warn!("Invalid AUDIT_MODE, defaulting to 'once'");
                Self::Once
            }
        }
    }
}

/// Connection mode for the database.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionMode {
    /// Fail immediately if connection fails.
    FailFast,
    /// Retry connection on an interval until successful.
    Retry,
}

impl ConnectionMode {
    /// Parse connection mode from `DATABASE_CONNECTION_MODE`.
    ///
    /// Valid values: "fail-fast" or "retry" (case-insensitive). Anything
    /// else is logged and treated as "retry", which keeps the auditor
    /// waiting for the database rather than exiting.
    fn from_env() -> Self {
        match env::var("DATABASE_CONNECTION_MODE")
            .unwrap_or_else(|_| "retry".to_string())
            .to_lowercase()
            .as_str()
        {
            "fail-fast" => Self::FailFast,
            "retry" => Self::Retry,
            other => {
                warn!(value = other, "Invalid DATABASE_CONNECTION_MODE, defaulting to 'retry'");
                Self::Retry
            }
        }
    }
}

/// Container for all initialized dependencies.
pub struct Dependencies {
    pub store: Arc<dyn AggregateStore>,
    pub mode: AuditMode,
    pub interval: Duration,
}

impl Dependencies {
    /// Initialize all dependencies from environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `DATABASE_URL`: PostgreSQL URL; an in-memory store is used when unset
    /// - `AUDIT_MODE`: "once" or "watch" (default: once)
    /// - `AUDIT_INTERVAL_SECS`: Pause between passes in watch mode (default: 60)
    /// - `DATABASE_CONNECTION_MODE`: "fail-fast" or "retry" (default: retry)
    /// - `DATABASE_RETRY_INTERVAL_SECS`: Retry interval in seconds (default: 15)
    ///
    /// # Returns
    ///
    /// * `Ok(Dependencies)` - Initialized dependencies
    /// * `Err(AuditorError)` - If initialization fails (only in fail-fast mode)
    pub async fn new() -> Result<Self, AuditorError> {
        let mode = AuditMode::from_env();
        let interval = Duration::from_secs(secs_from_env(
            "AUDIT_INTERVAL_SECS",
            DEFAULT_AUDIT_INTERVAL_SECS,
        )?);

        let store: Arc<dyn AggregateStore> = match env::var("DATABASE_URL") {
            Ok(database_url) => {
                let connection_mode = ConnectionMode::from_env();
                let retry_interval = Duration::from_secs(secs_from_env(
                    "DATABASE_RETRY_INTERVAL_SECS",
                    DEFAULT_RETRY_INTERVAL_SECS,
                )?);
                info!(
                    audit_mode = ?mode,
                    connection_mode = ?connection_mode,
                    retry_interval_secs = retry_interval.as_secs(),
                    "Initializing PostgreSQL aggregate store"
                );
                Arc::new(Self::connect(&database_url, connection_mode, retry_interval).await?)
            }
            Err(_) => {
                warn!(audit_mode = ?mode, "DATABASE_URL not set, auditing an empty in-memory store");
                Arc::new(MemoryAggregateStore::new())
            }
        };

        Ok(Self {
            store,
            mode,
            interval,
        })
    }

    /// Connect to PostgreSQL with retry logic based on connection mode.
    async fn connect(
        database_url: &str,
        mode: ConnectionMode,
        retry_interval: Duration,
    ) -> Result<PostgresAggregateStore, AuditorError> {
        loop {
            match Self::try_connect(database_url).await {
                Ok(store) => return Ok(store),
                Err(e) => match mode {
                    ConnectionMode::FailFast => {
                        return Err(AuditorError::config(format!(
                            "Failed to connect to database: {}",
                            e
                        )));
                    }
                    ConnectionMode::Retry => {
                        warn!(
                            error = %e,
                            retry_interval_secs = retry_interval.as_secs(),
                            "Failed to connect to database, retrying..."
                        );
                        sleep(retry_interval).await;
                    }
                },
            }
        }
    }

    async fn try_connect(database_url: &str) -> Result<PostgresAggregateStore, AuditorError> {
        let store = PostgresAggregateStore::connect(database_url).await?;
        store.migrate().await?;
        info!("Connected to PostgreSQL");
        Ok(store)
    }
}

fn secs_from_env(name: &str, default: u64) -> Result<u64, AuditorError> {
    match env::var(name) {
        Ok(value) => value
            .parse::<u64>()
            .map_err(|e| AuditorError::config(format!("{name} must be a number of seconds: {e}"))),
        Err(_) => Ok(default),
    }
}
