use std::collections::BTreeSet;

use crate::invariants::{ViolationKind, check_invariants};
use crate::types::{ActorId, AggregateRecord, SubjectId, Tally};

/// An aggregate as stored by a backend with signed integer columns and a
/// participant list.
///
/// Converting it into an [`AggregateRecord`] validates what the typed record
/// cannot represent: negative counters and repeated participants. Nothing is
/// clamped or deduplicated silently.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawAggregate {
    pub subject_id: String,
    pub participants: Vec<String>,
    pub counts: Vec<i64>,
    /// `None` for a single-counter aggregate.
    pub options: Option<Vec<String>>,
    pub capacity: Option<i64>,
    pub closed: bool,
}

impl RawAggregate {
    pub fn into_record(self) -> Result<AggregateRecord, ViolationKind> {
        if self.counts.iter().any(|count| *count < 0) {
            return Err(ViolationKind::NegativeTally);
        }

        let mut participants = BTreeSet::new();
        for participant in self.participants {
            if !participants.insert(ActorId::new(participant)) {
                return Err(ViolationKind::DuplicateParticipant);
            }
        }

        let capacity = match self.capacity {
            Some(capacity) if capacity < 0 => return Err(ViolationKind::CapacityExceeded),
            Some(capacity) => Some(capacity as u64),
            None => None,
        };

        let counts: Vec<u64> = self.counts.into_iter().map(|count| count as u64).collect();
        let tally = match self.options {
            Some(options) => Tally::Options { options, counts },
            None => match counts.as_slice() {
                [count] => Tally::Single { count: *count },
                _ => return Err(ViolationKind::CountMismatch),
            },
        };

        let record = AggregateRecord {
            subject_id: SubjectId::new(self.subject_id),
            participants,
            tally,
            capacity,
            closed: self.closed,
        };
        check_invariants(&record)?;
        Ok(record)
    }
}

impl From<&AggregateRecord> for RawAggregate {
    fn from(record: &AggregateRecord) -> Self {
        let options = match &record.tally {
            Tally::Single { .. } => None,
            Tally::Options { options, .. } => Some(options.clone()),
        };
        Self {
            subject_id: record.subject_id.to_string(),
            participants: record.participants.iter().map(ToString::to_string).collect(),
            counts: record.tally.counts().into_iter().map(|c| c as i64).collect(),
            options,
            capacity: record.capacity.map(|c| c as i64),
            closed: record.closed,
        }
    }
}
