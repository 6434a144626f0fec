//! The commutative transform shared by the store implementations.
use membership_shared::types::{ActorId, AggregateRecord, Direction, Tally};

use crate::StoreError;

/// Computes the record produced by a commutative transform.
///
/// Returns `Ok(None)` when the actor's membership already matches the
/// direction, in which case nothing is written.
pub(crate) fn transformed(
    record: &AggregateRecord,
    actor_id: &ActorId,
    direction: Direction,
) -> Result<Option<AggregateRecord>, StoreError> {
    if record.closed {
        return Err(StoreError::Closed(record.subject_id.clone()));
    }
    let Tally::Single { count } = record.tally else {
        return Err(StoreError::unsupported_transform(format!(
            "{} is a multi-option aggregate",
            record.subject_id
        )));
    };
    if record.has_participant(actor_id) == direction.joins() {
        return Ok(None);
    }

    let mut next = record.clone();
    match direction {
        Direction::Add => {
            if record.is_full() {
                return Err(StoreError::CapacityReached(record.subject_id.clone()));
            }
            next.participants.insert(actor_id.clone());
            next.tally = Tally::Single { count: count + 1 };
        }
        Direction::Remove => {
            next.participants.remove(actor_id);
            next.tally = Tally::Single {
                count: count.saturating_sub(1),
            };
        }
    }
    Ok(Some(next))
}
