//! provisio-precheck: advisory reachability checks run before a deployment.
//!
//! Four independent sub-checks run concurrently: the VM manager's view of the
//! named machine, the VM orchestrator's status, an SSH reachability probe
//! derived from the orchestrator's connection config, and TCP probes for the
//! configured service targets. Each degrades on its own; a missing binary is
//! reported as `available = false` with an explanatory tag, never an error.

pub mod checker;
pub mod probe;
pub mod report;

pub use checker::Prechecker;
pub use report::{
    NetworkStatus, OrchestratorStatus, Overall, PrecheckReport, ServiceStatus, SshStatus,
    VmStatus,
};
