use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::types::{ActorId, AggregateView, SubjectId};

/// Counters derived from an aggregate's participant set.
///
/// A simple aggregate (likes, members, registrants) carries one counter. A
/// multi-option poll carries one counter per option, aligned by index with a
/// fixed option list that never changes after creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Tally {
    Single { count: u64 },
    Options { options: Vec<String>, counts: Vec<u64> },
}

impl Tally {
    /// A single counter starting at zero.
    pub fn single() -> Self {
        Tally::Single { count: 0 }
    }

    /// One zeroed counter per option.
    pub fn options<S: Into<String>>(options: impl IntoIterator<Item = S>) -> Self {
        let options: Vec<String> = options.into_iter().map(Into::into).collect();
        let counts = vec![0; options.len()];
        Tally::Options { options, counts }
    }

    /// Sum of all counters.
    pub fn total(&self) -> u64 {
        match self {
            Tally::Single { count } => *count,
            Tally::Options { counts, .. } => counts.iter().sum(),
        }
    }

    /// Counters as a flat sequence; a single counter yields one element.
    pub fn counts(&self) -> Vec<u64> {
        match self {
            Tally::Single { count } => vec![*count],
            Tally::Options { counts, .. } => counts.clone(),
        }
    }

    /// Option labels of a poll. Empty for a single counter.
    pub fn option_labels(&self) -> &[String] {
        match self {
            Tally::Single { .. } => &[],
            Tally::Options { options, .. } => options,
        }
    }
}

/// The durable record tracking one subject's participant set and counters.
///
/// Records are only mutated through the commutative and guarded paths of the
/// engine. Every committed state satisfies [`crate::check_invariants`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregateRecord {
    pub subject_id: SubjectId,
    pub participants: BTreeSet<ActorId>,
    pub tally: Tally,
    pub capacity: Option<u64>,
    pub closed: bool,
}

impl AggregateRecord {
    /// Empty aggregate with a single counter (likes, members, registrants).
    pub fn new_counter(subject_id: SubjectId) -> Self {
        Self {
            subject_id,
            participants: BTreeSet::new(),
            tally: Tally::single(),
            capacity: None,
            closed: false,
        }
    }

    /// Empty multi-option poll over the given option labels.
    pub fn new_poll<S: Into<String>>(
        subject_id: SubjectId,
        options: impl IntoIterator<Item = S>,
    ) -> Self {
        Self {
            subject_id,
            participants: BTreeSet::new(),
            tally: Tally::options(options),
            capacity: None,
            closed: false,
        }
    }

    /// Bounds the participant set, e.g. an event's maximum registrants.
    pub fn with_capacity(mut self, capacity: u64) -> Self {
        self.capacity = Some(capacity);
        self
    }

    pub fn participant_count(&self) -> u64 {
        self.participants.len() as u64
    }

    pub fn has_participant(&self, actor_id: &ActorId) -> bool {
        self.participants.contains(actor_id)
    }

    /// True when a capacity is set and the participant set has reached it.
    pub fn is_full(&self) -> bool {
        self.capacity
            .is_some_and(|capacity| self.participant_count() >= capacity)
    }

    /// The state of this aggregate as seen by one actor.
    pub fn view_for(&self, actor_id: &ActorId) -> AggregateView {
        AggregateView {
            tally: self.tally.counts(),
            participants: self.participant_count(),
            joined: self.has_participant(actor_id),
            closed: self.closed,
        }
    }
}

/// A value paired with the store revision it was read at.
///
/// The version increases with every committed mutation of the record and is
/// the basis of the conditioned commit used by guarded operations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Versioned<T> {
    pub version: u64,
    pub value: T,
}

impl<T> Versioned<T> {
    pub fn new(version: u64, value: T) -> Self {
        Self { version, value }
    }
}
