//! # Membership Engine
//! This crate maintains participant sets and their derived counters under
//! concurrent, at-most-once-per-actor updates.
//!
//! ## Architecture
//!
//! Operations are split by class:
//!
//! 1. **Commutative**: unconditional set-add/remove paired with a ±1 counter
//!    delta (likes, follows, joining an uncapped community). Safe under any
//!    interleaving, applied as a single atomic transform.
//! 2. **Guarded**: writes whose legality depends on the current state
//!    (vote once, register within capacity). Applied as a read-check-write
//!    cycle with a conditioned commit and bounded, jittered retry.
//!
//! The [`controller::OptimisticController`] sits on the client side, renders a
//! prediction immediately and reconciles or rolls back once the
//! [`service::MembershipService`] answers.
//!
//! ## Modules
//!
//! - [`commutative`]: the commutative updater
//! - [`guarded`]: the guarded transactor
//! - [`service`]: the external interface combining both, with deadlines
//! - [`controller`]: the optimistic client-side state machine
//! - [`config`]: engine and retry configuration
//! - [`errors`]: error types for the engine
pub mod commutative;
pub mod config;
pub mod controller;
pub mod errors;
pub mod guarded;
pub mod service;

pub use config::{EngineConfig, RetryConfig};
pub use errors::EngineError;
pub use service::MembershipService;
