//! provisio-core: types shared by every Provisio crate.
//!
//! - **`types`**: tool identifiers, lifecycle statuses, provenance tags
//! - **`error`**: the orchestration error taxonomy (`ProvisioError`)
//! - **`config`**: `provisio.toml` parsing and defaults

pub mod config;
pub mod error;
pub mod types;

pub use config::ProvisioConfig;
pub use error::{ProvisioError, ProvisioResult};
pub use types::*;
