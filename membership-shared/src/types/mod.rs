mod aggregate;
mod error_kind;
mod ids;
mod operation;
mod raw;
mod receipt;

pub use aggregate::{AggregateRecord, Tally, Versioned};
pub use error_kind::ErrorKind;
pub use ids::{ActorId, SubjectId};
pub use operation::{Direction, Selector};
pub use raw::RawAggregate;
pub use receipt::{AggregateView, ContributionReceipt, ToggleReceipt};
