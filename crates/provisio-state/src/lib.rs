//! provisio-state: embedded state store for Provisio.
//!
//! Backed by [redb](https://docs.rs/redb), persists infrastructure designs,
//! IaC version history, and deployment records.
//!
//! # Architecture
//!
//! All domain types are JSON-serialized into redb's `&[u8]` value columns.
//! IaC versions use the composite key `{design_id}:{version:010}`, so a
//! prefix scan yields one design's history in version order.
//!
//! Version creation runs "allocate number, demote prior current, insert new
//! current" inside a single write transaction; redb admits one writer at a
//! time, so two creations can never both observe the same prior current.

pub mod error;
pub mod store;
pub mod tables;
pub mod types;

pub use error::{StateError, StateResult};
pub use store::StateStore;
pub use provisio_core::Variables;
pub use types::*;
