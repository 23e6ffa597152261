//! elastic-state — embedded store for Elasticity policies.
//!
//! Backed by [redb](https://docs.rs/redb), holds the declared policies,
//! their controller-owned status, and the scale records of the managed
//! deployments.
//!
//! # Architecture
//!
//! All domain types are JSON-serialized into redb's `&[u8]` value columns
//! and keyed by `{namespace}/{name}`.
//!
//! Every spec write or delete is announced on a broadcast channel
//! ([`PolicyEvent`]); status writes are not, so the controller never
//! re-triggers itself.
//!
//! The `StateStore` is `Clone` + `Send` + `Sync` (backed by `Arc<Database>`)
//! and can be shared across async tasks.

pub mod error;
pub mod events;
pub mod store;
pub mod tables;
pub mod types;

pub use error::{StateError, StateResult, ValidationError};
pub use events::PolicyEvent;
pub use store::StateStore;
pub use types::*;
