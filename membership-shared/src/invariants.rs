//! Consistency invariants of an aggregate record.
//!
//! These checks are run by both mutators before every commit and are used
//! directly by tests. A record that passes [`check_invariants`] has exactly
//! one tally increment per participant and never exceeds its capacity.
use thiserror::Error;

use crate::types::{AggregateRecord, Tally};

/// The invariant an aggregate state or transition breaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error)]
pub enum ViolationKind {
    /// The participant count differs from the sum of the tally, or a poll's
    /// counters are not aligned with its options.
    #[error("participant count does not match tally")]
    CountMismatch,
    /// An actor appears in the participant set more than once.
    #[error("duplicate participant")]
    DuplicateParticipant,
    /// A tally entry is below zero.
    #[error("negative tally entry")]
    NegativeTally,
    /// The participant set is larger than the aggregate's capacity.
    #[error("capacity exceeded")]
    CapacityExceeded,
    /// Participants or tally changed after the aggregate was closed.
    #[error("mutation after close")]
    MutationAfterClose,
}

/// Checks the invariants that must hold for every committed aggregate state.
///
/// Duplicate participants and negative entries cannot be represented by
/// [`AggregateRecord`]; they are caught when a stored row is decoded through
/// [`crate::types::RawAggregate::into_record`].
pub fn check_invariants(record: &AggregateRecord) -> Result<(), ViolationKind> {
    if let Tally::Options { options, counts } = &record.tally {
        if options.len() != counts.len() {
            return Err(ViolationKind::CountMismatch);
        }
    }

    if record.participant_count() != record.tally.total() {
        return Err(ViolationKind::CountMismatch);
    }

    if let Some(capacity) = record.capacity {
        if record.participant_count() > capacity {
            return Err(ViolationKind::CapacityExceeded);
        }
    }

    Ok(())
}

/// Checks a proposed transition from `before` to `after`.
///
/// Besides the state invariants of `after`, a closed aggregate must keep its
/// participants and tally, and cannot be reopened.
pub fn check_transition(
    before: &AggregateRecord,
    after: &AggregateRecord,
) -> Result<(), ViolationKind> {
    if before.closed {
        let changed = before.participants != after.participants || before.tally != after.tally;
        if changed || !after.closed {
            return Err(ViolationKind::MutationAfterClose);
        }
    }
    check_invariants(after)
}
