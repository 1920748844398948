//! Deployment state machine.
//!
//! ```text
//! pending ──start──▶ deploying ──complete(ok)───▶ success ──rollback(ok)───▶ rolled_back
//!                              └─complete(err)──▶ failed  └─rollback(err)──▶ failed
//! ```
//!
//! Every transition checks the source status first and leaves the record
//! untouched when it is illegal.

use provisio_core::{DeploymentStatus, ProvisioError, ProvisioResult};
use provisio_state::Deployment;

/// Legal transitions on a deployment record.
pub trait Lifecycle {
    /// `pending → deploying`; sets `started_at`.
    fn start(&mut self, now: u64) -> ProvisioResult<()>;

    /// `deploying → success | failed`; sets `completed_at` and appends `log`.
    /// A second call is rejected.
    fn complete(&mut self, success: bool, log: &str, now: u64) -> ProvisioResult<()>;

    /// Whether a rollback may begin (status is `success`).
    fn ensure_rollback_allowed(&self) -> ProvisioResult<()>;

    /// `success → rolled_back | failed`; sets `completed_at` and appends `log`.
    fn finish_rollback(&mut self, success: bool, log: &str, now: u64) -> ProvisioResult<()>;
}

impl Lifecycle for Deployment {
    fn start(&mut self, now: u64) -> ProvisioResult<()> {
        require(self, "start", DeploymentStatus::Pending)?;
        self.status = DeploymentStatus::Deploying;
        self.started_at = Some(now);
        self.updated_at = now;
        Ok(())
    }

    fn complete(&mut self, success: bool, log: &str, now: u64) -> ProvisioResult<()> {
        require(self, "complete", DeploymentStatus::Deploying)?;
        self.status = if success {
            DeploymentStatus::Success
        } else {
            DeploymentStatus::Failed
        };
        append_log(&mut self.log, log);
        self.completed_at = Some(now);
        self.updated_at = now;
        Ok(())
    }

    fn ensure_rollback_allowed(&self) -> ProvisioResult<()> {
        require(self, "rollback", DeploymentStatus::Success)
    }

    fn finish_rollback(&mut self, success: bool, log: &str, now: u64) -> ProvisioResult<()> {
        require(self, "rollback", DeploymentStatus::Success)?;
        self.status = if success {
            DeploymentStatus::RolledBack
        } else {
            DeploymentStatus::Failed
        };
        append_log(&mut self.log, log);
        self.completed_at = Some(now);
        self.updated_at = now;
        Ok(())
    }
}

fn require(d: &Deployment, operation: &'static str, expected: DeploymentStatus) -> ProvisioResult<()> {
    if d.status == expected {
        Ok(())
    } else {
        Err(ProvisioError::invalid_state(d.id.clone(), operation, d.status))
    }
}

/// Append `text` to an existing log, separated by a newline.
pub(crate) fn append_log(log: &mut String, text: &str) {
    if text.is_empty() {
        return;
    }
    if !log.is_empty() && !log.ends_with('\n') {
        log.push('\n');
    }
    log.push_str(text);
}

#[cfg(test)]
mod tests {
    use super::*;
    use provisio_core::{IacTool, Provenance, ValidationStatus, Variables};
    use provisio_state::IacVersion;

    fn deployment() -> Deployment {
        let version = IacVersion {
            id: "v1".into(),
            design_id: "d1".into(),
            tool: IacTool::Terraform,
            version: 1,
            source: String::new(),
            digest: String::new(),
            validation_status: ValidationStatus::Pending,
            validation_errors: Vec::new(),
            is_current: true,
            created_by: Provenance::System,
            created_at: 0,
        };
        Deployment::pending(&version, Variables::new())
    }

    fn assert_invalid(result: ProvisioResult<()>, op: &str, status: DeploymentStatus) {
        match result {
            Err(ProvisioError::InvalidState {
                operation,
                status: s,
                ..
            }) => {
                assert_eq!(operation, op);
                assert_eq!(s, status);
            }
            other => panic!("expected InvalidState, got {other:?}"),
        }
    }

    #[test]
    fn start_from_pending_sets_started_at() {
        let mut d = deployment();
        d.start(100).unwrap();
        assert_eq!(d.status, DeploymentStatus::Deploying);
        assert_eq!(d.started_at, Some(100));
        assert!(d.completed_at.is_none());
    }

    #[test]
    fn start_twice_is_rejected_and_unchanged() {
        let mut d = deployment();
        d.start(100).unwrap();
        let before = d.clone();
        assert_invalid(d.start(200), "start", DeploymentStatus::Deploying);
        assert_eq!(d, before);
    }

    #[test]
    fn complete_sets_terminal_status_and_log() {
        let mut ok = deployment();
        ok.start(1).unwrap();
        ok.complete(true, "== apply ==\ndone\n", 2).unwrap();
        assert_eq!(ok.status, DeploymentStatus::Success);
        assert_eq!(ok.completed_at, Some(2));
        assert_eq!(ok.log, "== apply ==\ndone\n");

        let mut bad = deployment();
        bad.start(1).unwrap();
        bad.complete(false, "boom", 3).unwrap();
        assert_eq!(bad.status, DeploymentStatus::Failed);
    }

    #[test]
    fn complete_requires_deploying() {
        let mut d = deployment();
        assert_invalid(d.complete(true, "", 1), "complete", DeploymentStatus::Pending);

        d.start(1).unwrap();
        d.complete(true, "first", 2).unwrap();
        assert_invalid(d.complete(false, "second", 3), "complete", DeploymentStatus::Success);
        assert_eq!(d.status, DeploymentStatus::Success);
        assert_eq!(d.log, "first");
    }

    #[test]
    fn rollback_only_from_success() {
        let mut d = deployment();
        assert_invalid(d.ensure_rollback_allowed(), "rollback", DeploymentStatus::Pending);
        d.start(1).unwrap();
        assert_invalid(d.ensure_rollback_allowed(), "rollback", DeploymentStatus::Deploying);
        d.complete(false, "", 2).unwrap();
        assert_invalid(d.ensure_rollback_allowed(), "rollback", DeploymentStatus::Failed);

        let mut ok = deployment();
        ok.start(1).unwrap();
        ok.complete(true, "applied", 2).unwrap();
        ok.ensure_rollback_allowed().unwrap();
        ok.finish_rollback(true, "destroyed", 5).unwrap();
        assert_eq!(ok.status, DeploymentStatus::RolledBack);
        assert_eq!(ok.completed_at, Some(5));
        assert_eq!(ok.log, "applied\ndestroyed");
        assert_invalid(ok.ensure_rollback_allowed(), "rollback", DeploymentStatus::RolledBack);
    }

    #[test]
    fn failed_rollback_is_failed_not_success() {
        let mut d = deployment();
        d.start(1).unwrap();
        d.complete(true, "", 2).unwrap();
        d.finish_rollback(false, "destroy failed", 3).unwrap();
        assert_eq!(d.status, DeploymentStatus::Failed);
    }
}
