//! Deployment records and their transitions against the state store.
//!
//! Each transition is a read-check-write inside one redb write transaction,
//! so two callers can never both move the same record out of a status.

use provisio_core::{
    DeploymentStatus, ProvisioError, ProvisioResult, Variables, epoch_secs,
};
use provisio_state::{Deployment, IacVersion, StateStore};
use tracing::{debug, info};

use crate::machine::{Lifecycle, append_log};

/// Field patch for administrative corrections. Bypasses the transition
/// graph, so it is only reachable from inside this crate.
#[derive(Debug, Clone, Default)]
pub(crate) struct DeploymentPatch {
    pub status: Option<DeploymentStatus>,
    pub append_log: Option<String>,
    pub completed_at: Option<u64>,
    pub workspace_path: Option<Option<String>>,
    pub terraform_state: Option<Option<String>>,
}

#[derive(Clone)]
pub struct DeploymentService {
    store: StateStore,
}

impl DeploymentService {
    pub fn new(store: StateStore) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &StateStore {
        &self.store
    }

    /// Persist a new `pending` deployment of `version`.
    pub fn create(&self, version: &IacVersion, variables: Variables) -> ProvisioResult<Deployment> {
        if self.store.get_design(&version.design_id)?.is_none() {
            return Err(ProvisioError::not_found("design", version.design_id.clone()));
        }
        let deployment = Deployment::pending(version, variables);
        self.store.put_deployment(&deployment)?;
        info!(
            deployment = %deployment.id,
            design = %deployment.design_id,
            version = version.version,
            tool = %deployment.tool,
            "deployment created"
        );
        Ok(deployment)
    }

    pub fn get(&self, deployment_id: &str) -> ProvisioResult<Deployment> {
        self.store
            .get_deployment(deployment_id)?
            .ok_or_else(|| ProvisioError::not_found("deployment", deployment_id))
    }

    /// Deployments of a design, oldest first, optionally filtered by status.
    pub fn list(
        &self,
        design_id: &str,
        status: Option<DeploymentStatus>,
    ) -> ProvisioResult<Vec<Deployment>> {
        let mut all = self.store.list_deployments_for_design(design_id)?;
        if let Some(status) = status {
            all.retain(|d| d.status == status);
        }
        Ok(all)
    }

    pub fn start(&self, deployment_id: &str) -> ProvisioResult<Deployment> {
        let d = self
            .store
            .modify_deployment(deployment_id, |d| d.start(epoch_secs()))?;
        info!(deployment = %deployment_id, "deployment started");
        Ok(d)
    }

    pub fn complete(&self, deployment_id: &str, success: bool, log: &str) -> ProvisioResult<Deployment> {
        let d = self
            .store
            .modify_deployment(deployment_id, |d| d.complete(success, log, epoch_secs()))?;
        info!(deployment = %deployment_id, status = %d.status, "deployment completed");
        Ok(d)
    }

    pub fn ensure_rollback_allowed(&self, deployment_id: &str) -> ProvisioResult<Deployment> {
        let d = self.get(deployment_id)?;
        d.ensure_rollback_allowed()?;
        Ok(d)
    }

    pub fn finish_rollback(
        &self,
        deployment_id: &str,
        success: bool,
        log: &str,
    ) -> ProvisioResult<Deployment> {
        let d = self.store.modify_deployment(deployment_id, |d| {
            d.finish_rollback(success, log, epoch_secs())
        })?;
        info!(deployment = %deployment_id, status = %d.status, "rollback completed");
        Ok(d)
    }

    /// Apply `patch` without checking the transition graph.
    pub(crate) fn update(&self, deployment_id: &str, patch: DeploymentPatch) -> ProvisioResult<Deployment> {
        let d = self.store.modify_deployment(deployment_id, |d| {
            if let Some(status) = patch.status {
                d.status = status;
            }
            if let Some(text) = &patch.append_log {
                append_log(&mut d.log, text);
            }
            if let Some(at) = patch.completed_at {
                d.completed_at = Some(at);
            }
            if let Some(path) = patch.workspace_path {
                d.workspace_path = path;
            }
            if let Some(state) = patch.terraform_state {
                d.terraform_state = state;
            }
            d.updated_at = epoch_secs();
            Ok(())
        })?;
        debug!(deployment = %deployment_id, status = %d.status, "deployment patched");
        Ok(d)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use provisio_core::{DesignType, IacTool, Provenance, ValidationStatus};
    use provisio_state::{InfrastructureDesign, NewIacVersion};

    fn setup() -> (DeploymentService, IacVersion) {
        let store = StateStore::open_in_memory().unwrap();
        let design = InfrastructureDesign::new(DesignType::OnPrem, serde_json::json!({}));
        store.put_design(&design).unwrap();
        let version = store
            .create_iac_version(NewIacVersion {
                design_id: design.id,
                tool: IacTool::Terraform,
                source: "resource {}".into(),
                validation_status: ValidationStatus::Pending,
                validation_errors: Vec::new(),
                created_by: Provenance::System,
            })
            .unwrap();
        (DeploymentService::new(store), version)
    }

    #[test]
    fn lifecycle_is_persisted() {
        let (svc, version) = setup();
        let d = svc.create(&version, Variables::new()).unwrap();
        assert_eq!(d.status, DeploymentStatus::Pending);

        svc.start(&d.id).unwrap();
        let done = svc.complete(&d.id, true, "ok").unwrap();
        assert_eq!(done.status, DeploymentStatus::Success);

        let stored = svc.get(&d.id).unwrap();
        assert!(stored.started_at.is_some());
        assert!(stored.completed_at.is_some());
        assert_eq!(stored.log, "ok");
    }

    #[test]
    fn illegal_transition_leaves_store_untouched() {
        let (svc, version) = setup();
        let d = svc.create(&version, Variables::new()).unwrap();
        let err = svc.complete(&d.id, true, "nope").unwrap_err();
        assert!(matches!(err, ProvisioError::InvalidState { .. }));
        assert_eq!(svc.get(&d.id).unwrap(), d);
    }

    #[test]
    fn missing_deployment_is_not_found() {
        let (svc, _) = setup();
        assert!(matches!(svc.start("ghost").unwrap_err(), ProvisioError::NotFound { .. }));
        assert!(matches!(svc.get("ghost").unwrap_err(), ProvisioError::NotFound { .. }));
    }

    #[test]
    fn list_filters_by_status() {
        let (svc, version) = setup();
        let a = svc.create(&version, Variables::new()).unwrap();
        svc.create(&version, Variables::new()).unwrap();
        svc.start(&a.id).unwrap();
        svc.complete(&a.id, false, "x").unwrap();

        assert_eq!(svc.list(&version.design_id, None).unwrap().len(), 2);
        let failed = svc.list(&version.design_id, Some(DeploymentStatus::Failed)).unwrap();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].id, a.id);
    }

    #[test]
    fn patch_updates_only_given_fields() {
        let (svc, version) = setup();
        let d = svc.create(&version, Variables::new()).unwrap();
        let patched = svc
            .update(
                &d.id,
                DeploymentPatch {
                    terraform_state: Some(Some("{}".into())),
                    append_log: Some("note".into()),
                    ..DeploymentPatch::default()
                },
            )
            .unwrap();
        assert_eq!(patched.status, DeploymentStatus::Pending);
        assert_eq!(patched.terraform_state.as_deref(), Some("{}"));
        assert_eq!(patched.log, "note");
        assert!(patched.workspace_path.is_none());
    }
}
