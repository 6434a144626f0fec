//! PostgreSQL implementation of the aggregate store.
mod aggregate_store;

pub use aggregate_store::PostgresAggregateStore;
