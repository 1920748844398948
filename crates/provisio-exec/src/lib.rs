//! provisio-exec: runs external provisioning tools.
//!
//! - **`harness`**: spawn a process under a hard deadline, merge its output
//! - **`workspace`**: per-run scratch directories, removed unless retained
//! - **`terraform`**: `variables.tf` / `terraform.tfvars` rendering
//! - **`pipeline`**: the ordered tool steps (init → validate → plan → apply,
//!   destroy for rollback, or a single playbook run)
//!
//! Every external invocation goes through the [`CommandRunner`] trait so the
//! pipeline and the prechecker can be driven by a scripted runner in tests.

pub mod harness;
pub mod pipeline;
pub mod terraform;
pub mod workspace;

pub use harness::{CommandRunner, CommandSpec, ExecutionResult, ExitKind, ProcessRunner};
pub use pipeline::{Pipeline, PipelineReport, RollbackTarget};
pub use workspace::Workspace;
