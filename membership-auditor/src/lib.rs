//! Membership Auditor Library
//!
//! This library checks every stored membership aggregate against the
//! consistency invariants, once or periodically, and reports violations.

pub mod auditor;
pub mod config;
pub mod errors;

pub use auditor::{AuditReport, InvariantAuditor, Violation};
pub use config::{AuditMode, Dependencies};
pub use errors::AuditorError;
