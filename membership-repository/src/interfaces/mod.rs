//! This module defines and re-exports the interfaces of the aggregate store.
mod aggregate_store;

pub use aggregate_store::AggregateStore;
