//! Membership Auditor Main Entry Point
//!
//! Checks every stored membership aggregate against its consistency
//! invariants, either once or on an interval until interrupted.

use dotenv::dotenv;
use membership_auditor::{AuditMode, AuditorError, Dependencies, InvariantAuditor};
use std::env;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize tracing/logging.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new("membership_auditor=info,membership_repository=info,membership_engine=info")
    });

    let json = env::var("LOG_FORMAT").is_ok_and(|format| format.eq_ignore_ascii_case("json"));

    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_target(true)
                    .with_thread_ids(true),
            )
            .init();

        info!(
            service_name = "membership-auditor",
            service_version = env!("CARGO_PKG_VERSION"),
            "Tracing initialized with JSON format"
        );
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().with_target(true).pretty())
            .init();

        info!(
            service_name = "membership-auditor",
            service_version = env!("CARGO_PKG_VERSION"),
            "Tracing initialized with console output"
        );
    }
}

#[tokio::main]
async fn main() -> Result<(), AuditorError> {
    dotenv().ok();
    init_tracing();

    info!("Starting membership auditor");

    let deps = match Dependencies::new().await {
        Ok(deps) => {
            info!("Dependencies initialized successfully");
            deps
        }
        Err(e) => {
            error!(error = %e, "Failed to initialize dependencies");
            return Err(e);
        }
    };

    let auditor = InvariantAuditor::new(deps.store);
    match deps.mode {
        AuditMode::Once => {
            let report = auditor.run_once().await?;
            if report.is_clean() {
                info!(checked = report.checked, "All aggregates are consistent");
                Ok(())
            } else {
                Err(AuditorError::ViolationsFound(report.violations.len()))
            }
        }
        AuditMode::Watch => {
            let shutdown = async {
                if let Err(e) = tokio::signal::ctrl_c().await {
                    error!(error = %e, "Failed to listen for shutdown signal");
                }
            };
            let passes = auditor.watch(deps.interval, shutdown).await;
            info!(passes, "Membership auditor stopped");
            Ok(())
        }
    }
}
