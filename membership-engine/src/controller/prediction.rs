//! Local predictions rendered before the server answers.
use membership_shared::types::{AggregateView, Direction, Selector};

/// The view after toggling the actor's membership in `direction`.
///
/// Repeating the current membership predicts no change, matching the store
/// transform which only moves the counter when the set changes.
pub fn predict_toggle(view: &AggregateView, direction: Direction) -> AggregateView {
    let mut predicted = view.clone();
    if view.joined == direction.joins() {
        return predicted;
    }
    predicted.joined = direction.joins();
    predicted.participants = match direction {
        Direction::Add => view.participants + 1,
        Direction::Remove => view.participants.saturating_sub(1),
    };
    if let Some(count) = predicted.tally.first_mut() {
        *count = match direction {
            Direction::Add => *count + 1,
            Direction::Remove => count.saturating_sub(1),
        };
    }
    predicted
}

/// The view after the actor's contribution to the selected slot.
///
/// Nothing is predicted when the view already shows the actor as a
/// participant, the aggregate closed or the slot missing; the server decides.
pub fn predict_contribution(view: &AggregateView, selector: Selector) -> AggregateView {
    let mut predicted = view.clone();
    if view.joined || view.closed {
        return predicted;
    }
    let index = match selector {
        Selector::Counter => 0,
        Selector::Choice(index) => index,
    };
    if let Some(count) = predicted.tally.get_mut(index) {
        *count += 1;
        predicted.participants += 1;
        predicted.joined = true;
    }
    predicted
}
