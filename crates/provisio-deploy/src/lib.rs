//! provisio-deploy: deployment lifecycle and orchestration.
//!
//! - **`machine`**: the legal status transitions of a [`Deployment`]
//!   (`pending → deploying → success | failed`, `success → rolled_back | failed`)
//! - **`service`**: transitions applied atomically against the state store
//! - **`orchestrator`**: detached runs: precheck, pipeline, terminal update
//!
//! [`Deployment`]: provisio_state::Deployment

pub mod machine;
pub mod orchestrator;
pub mod service;

pub use machine::Lifecycle;
pub use orchestrator::{DeployRequest, Orchestrator};
pub use service::DeploymentService;
