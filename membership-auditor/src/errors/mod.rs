//! Error types for the Membership Auditor application.
use membership_repository::StoreError;
use thiserror::Error;

/// Errors that can occur while auditing aggregates.
#[derive(Debug, Error)]
pub enum AuditorError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Configuration error: {0}")]
    Config(String),

    /// A one-shot audit found inconsistent aggregates.
    #[error("{0} aggregate(s) violate consistency invariants")]
    ViolationsFound(usize),
}

impl AuditorError {
    /// Create a configuration error.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }
}
