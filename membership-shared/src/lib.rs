//! # Membership Shared
//! This crate defines the data structures shared across the membership engine:
//! aggregate records, actor and subject identifiers, operation selectors,
//! receipts returned to callers, and the consistency invariants every
//! committed aggregate must satisfy.
pub mod invariants;
pub mod types;

pub use invariants::{ViolationKind, check_invariants, check_transition};
