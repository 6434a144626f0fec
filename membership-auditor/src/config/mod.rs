//! Configuration module for the Membership Auditor.
//! Reads settings from the environment and wires the aggregate store.
mod dependencies;

pub use dependencies::{AuditMode, ConnectionMode, Dependencies};
