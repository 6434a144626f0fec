//! Error types for the aggregate store.
mod store;

pub use store::StoreError;
