//! # Membership Repository
//! This crate provides the storage collaborator of the membership engine: the
//! [`AggregateStore`] trait with its atomic transform and versioned commit
//! primitives, plus in-memory and PostgreSQL implementations.
pub mod errors;
pub mod interfaces;
pub mod memory;
pub mod postgres;
mod transform;

pub use errors::StoreError;
pub use interfaces::AggregateStore;
pub use memory::MemoryAggregateStore;
pub use postgres::PostgresAggregateStore;
