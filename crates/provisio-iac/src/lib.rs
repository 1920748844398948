//! provisio-iac: versioned IaC artifacts.
//!
//! - **`versions`**: [`VersionStore`]: create / current / list / validate / diff
//!   over the redb-backed history, one current version per (design, tool)
//! - **`validate`**: pluggable heuristic validators keyed by tool
//! - **`diff`**: line-level difference between two sources
//! - **`resolver`**: the design lookup the core needs
//! - **`generate`**: [`CodeGenerator`] over a black-box [`TextGenerator`]

pub mod diff;
pub mod generate;
pub mod resolver;
pub mod validate;
pub mod versions;

pub use diff::{CodeDiff, code_diff};
pub use generate::{ArchitectureDoc, CodeGenerator, Component, TextGenerator};
pub use resolver::DesignResolver;
pub use validate::{CodeValidator, ValidationOutcome, ValidatorRegistry};
pub use versions::VersionStore;
