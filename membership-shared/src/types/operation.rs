use serde::{Deserialize, Serialize};

/// Direction of a commutative membership toggle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    /// Add the actor to the participant set and increment the counter.
    Add,
    /// Remove the actor from the participant set and decrement the counter.
    Remove,
}

impl Direction {
    /// Membership state of the actor once this direction has been applied.
    pub fn joins(&self) -> bool {
        matches!(self, Direction::Add)
    }
}

/// Identifies which tally slot a guarded contribution credits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Selector {
    /// The single counter of a likes/members/registrants aggregate.
    Counter,
    /// Index into the option list of a multi-option poll.
    Choice(usize),
}
