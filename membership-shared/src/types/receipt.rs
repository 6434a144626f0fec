use serde::{Deserialize, Serialize};

use crate::types::ErrorKind;

/// Authoritative result of a commutative toggle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToggleReceipt {
    /// Participant count after the transform was applied.
    pub participants: u64,
    /// Whether the actor is a participant after the transform.
    pub joined: bool,
}

/// Authoritative result of a guarded contribution.
///
/// Business outcomes (`AlreadyParticipated`, `CapacityReached`) and a closed
/// aggregate (`AggregateClosed`) are reported here with
/// `accepted == false` together with the current tally, so the caller can
/// render them as state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContributionReceipt {
    pub tally: Vec<u64>,
    pub participants: u64,
    pub accepted: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<ErrorKind>,
}

/// An aggregate as rendered for one actor.
///
/// This is the unit the optimistic controller predicts, snapshots and
/// reconciles.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregateView {
    pub tally: Vec<u64>,
    pub participants: u64,
    pub joined: bool,
    pub closed: bool,
}

impl AggregateView {
    /// Share of each tally slot in percent, zero everywhere for an empty tally.
    pub fn percentages(&self) -> Vec<f64> {
        let total: u64 = self.tally.iter().sum();
        if total == 0 {
            return vec![0.0; self.tally.len()];
        }
        self.tally
            .iter()
            .map(|count| *count as f64 * 100.0 / total as f64)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_percentages_of_empty_poll() {
        let view = AggregateView {
            tally: vec![0, 0],
            participants: 0,
            joined: false,
            closed: false,
        };
        assert_eq!(view.percentages(), vec![0.0, 0.0]);
    }

    #[test]
    fn test_percentages_split() {
        let view = AggregateView {
            tally: vec![3, 1],
            participants: 4,
            joined: true,
            closed: false,
        };
        assert_eq!(view.percentages(), vec![75.0, 25.0]);
    }

    #[test]
    fn test_receipt_omits_missing_reason() {
        let receipt = ContributionReceipt {
            tally: vec![1, 0],
            participants: 1,
            accepted: true,
            reason: None,
        };
        let json = serde_json::to_string(&receipt).unwrap();
        assert!(!json.contains("reason"));
    }
}
