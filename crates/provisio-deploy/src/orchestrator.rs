//! Detached deployment and rollback runs.
//!
//! `deploy` persists a `pending` record and returns it immediately; the
//! provisioning run continues on a spawned task and its outcome is read back
//! by polling the record or awaiting [`Orchestrator::wait`]. Runs against the
//! same design are serialized by a per-design lock.
//!
//! Each run is supervised: if the task body panics, the record is still
//! moved to `failed` with the panic message in its log.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use provisio_core::config::ProvisioConfig;
use provisio_core::{
    DeploymentId, DeploymentStatus, DesignId, IacTool, ProvisioError, ProvisioResult, Variables,
    VersionId, epoch_secs,
};
use provisio_exec::{Pipeline, RollbackTarget};
use provisio_iac::VersionStore;
use provisio_precheck::{PrecheckReport, Prechecker};
use provisio_state::{Deployment, StateStore};
use tokio::sync::RwLock;
use tokio::task::{JoinError, JoinHandle};
use tracing::{error, info, warn};

use crate::machine::append_log;
use crate::service::{DeploymentPatch, DeploymentService};

/// A request to provision one stored IaC version.
#[derive(Debug, Clone)]
pub struct DeployRequest {
    pub design_id: DesignId,
    pub version_id: VersionId,
    pub variables: Variables,
    /// Run the advisory reachability precheck first.
    pub precheck: bool,
}

impl DeployRequest {
    pub fn new(design_id: impl Into<DesignId>, version_id: impl Into<VersionId>) -> Self {
        Self {
            design_id: design_id.into(),
            version_id: version_id.into(),
            variables: Variables::new(),
            precheck: false,
        }
    }

    pub fn variables(mut self, variables: Variables) -> Self {
        self.variables = variables;
        self
    }

    pub fn precheck(mut self, enabled: bool) -> Self {
        self.precheck = enabled;
        self
    }
}

/// Starts deployments and rollbacks and tracks their background tasks.
#[derive(Clone)]
pub struct Orchestrator {
    inner: Arc<Inner>,
}

struct Inner {
    deployments: DeploymentService,
    versions: Arc<VersionStore>,
    pipeline: Arc<Pipeline>,
    prechecker: Option<Arc<Prechecker>>,
    design_locks: Mutex<HashMap<DesignId, Arc<tokio::sync::Mutex<()>>>>,
    /// Background task per deployment: id → handle.
    runs: RwLock<HashMap<DeploymentId, JoinHandle<()>>>,
    rollbacks: Mutex<HashSet<DeploymentId>>,
}

impl Orchestrator {
    pub fn new(
        state: StateStore,
        versions: Arc<VersionStore>,
        pipeline: Arc<Pipeline>,
        prechecker: Option<Arc<Prechecker>>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                deployments: DeploymentService::new(state),
                versions,
                pipeline,
                prechecker,
                design_locks: Mutex::new(HashMap::new()),
                runs: RwLock::new(HashMap::new()),
                rollbacks: Mutex::new(HashSet::new()),
            }),
        }
    }

    /// Wire an orchestrator that runs real processes.
    pub fn from_config(config: &ProvisioConfig, state: StateStore) -> Self {
        let versions = Arc::new(VersionStore::new(state.clone()));
        let pipeline = Arc::new(Pipeline::with_process_runner(config.execution.clone()));
        let prechecker = config
            .precheck
            .enabled
            .then(|| Arc::new(Prechecker::with_process_runner(config.precheck.clone())));
        Self::new(state, versions, pipeline, prechecker)
    }

    pub fn deployments(&self) -> &DeploymentService {
        &self.inner.deployments
    }

    pub fn versions(&self) -> &Arc<VersionStore> {
        &self.inner.versions
    }

    /// Create a `pending` deployment and provision it in the background.
    pub async fn deploy(&self, request: DeployRequest) -> ProvisioResult<Deployment> {
        let version = self.inner.versions.get(&request.version_id)?;
        if version.design_id != request.design_id {
            return Err(ProvisioError::Validation(format!(
                "iac version {} belongs to design {}, not {}",
                version.id, version.design_id, request.design_id
            )));
        }
        let deployment = self.inner.deployments.create(&version, request.variables)?;

        let inner = self.inner.clone();
        let id = deployment.id.clone();
        let precheck = request.precheck;
        let handle = tokio::spawn(async move {
            let run = tokio::spawn({
                let inner = inner.clone();
                let id = id.clone();
                async move { inner.provision(&id, precheck).await }
            });
            if let Err(e) = run.await {
                inner.fail_run(&id, &mut String::new(), abort_reason("deployment run", e));
            }
        });
        self.inner.track(deployment.id.clone(), handle).await;

        Ok(deployment)
    }

    /// Start a rollback of a successful deployment in the background.
    ///
    /// The record stays `success` until the rollback finishes. A second
    /// rollback while one is running is rejected.
    pub async fn rollback(&self, deployment_id: &str) -> ProvisioResult<Deployment> {
        let current = self.inner.deployments.get(deployment_id)?;
        let guard = InFlight::claim(self.inner.clone(), deployment_id).ok_or_else(|| {
            ProvisioError::invalid_state(
                deployment_id,
                "rollback (already in progress)",
                current.status,
            )
        })?;
        // Read again under the claim: a rollback that just finished has
        // released it only after recording its outcome.
        let deployment = self.inner.deployments.ensure_rollback_allowed(deployment_id)?;
        if deployment.tool != IacTool::Terraform {
            return Err(ProvisioError::UnsupportedTool(format!(
                "rollback is not supported for {}",
                deployment.tool
            )));
        }
        let version = self.inner.versions.get(&deployment.iac_version_id)?;

        info!(deployment = %deployment_id, "rollback requested");
        let inner = self.inner.clone();
        let target = RollbackTarget {
            workspace: deployment.workspace_path.as_ref().map(PathBuf::from),
            source: version.source,
            variables: deployment.variables.clone(),
            state: deployment.terraform_state.clone(),
        };
        let record = deployment.clone();
        let handle = tokio::spawn(async move {
            let _guard = guard;
            let id = record.id.clone();
            let run = tokio::spawn({
                let inner = inner.clone();
                async move { inner.roll_back(&record, &target).await }
            });
            if let Err(e) = run.await {
                let reason = abort_reason("rollback", e);
                error!(deployment = %id, %reason, "rollback run failed");
                if let Err(e) = inner.deployments.finish_rollback(&id, false, &reason) {
                    error!(deployment = %id, error = %e, "could not record rollback outcome");
                }
            }
        });
        self.inner.track(deployment_id.to_string(), handle).await;

        Ok(deployment)
    }

    /// Await the background task for a deployment, then return its record.
    pub async fn wait(&self, deployment_id: &str) -> ProvisioResult<Deployment> {
        let handle = self.inner.runs.write().await.remove(deployment_id);
        if let Some(handle) = handle
            && let Err(e) = handle.await
        {
            error!(deployment = %deployment_id, error = %e, "background run panicked");
        }
        self.inner.deployments.get(deployment_id)
    }

    /// Ids of deployments with an unawaited background task.
    pub async fn active_runs(&self) -> Vec<DeploymentId> {
        let runs = self.inner.runs.read().await;
        runs.iter()
            .filter(|(_, h)| !h.is_finished())
            .map(|(id, _)| id.clone())
            .collect()
    }
}

impl Inner {
    fn design_lock(&self, design_id: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.design_locks.lock().unwrap_or_else(|e| e.into_inner());
        // Locks only referenced by the map have no holder or waiter.
        locks.retain(|_, lock| Arc::strong_count(lock) > 1);
        locks.entry(design_id.to_string()).or_default().clone()
    }

    /// Register a background task, dropping handles of finished ones.
    async fn track(&self, id: DeploymentId, handle: JoinHandle<()>) {
        let mut runs = self.runs.write().await;
        runs.retain(|_, h| !h.is_finished());
        runs.insert(id, handle);
    }

    /// Body of a detached deployment run. Never returns an error: every
    /// failure ends the record in `failed`.
    async fn provision(&self, deployment_id: &str, precheck: bool) {
        let mut log = String::new();
        if let Err(e) = self.try_provision(deployment_id, precheck, &mut log).await {
            self.fail_run(deployment_id, &mut log, e);
        }
    }

    async fn try_provision(
        &self,
        deployment_id: &str,
        precheck: bool,
        log: &mut String,
    ) -> ProvisioResult<()> {
        let deployment = self.deployments.get(deployment_id)?;
        let lock = self.design_lock(&deployment.design_id);
        let _guard = lock.lock().await;

        self.deployments.start(deployment_id)?;

        if precheck && let Some(prechecker) = &self.prechecker {
            let report = prechecker.check_all().await;
            if !report.is_ready() {
                warn!(
                    deployment = %deployment_id,
                    hints = ?report.hints(),
                    "environment not ready; continuing with deployment"
                );
            }
            log.push_str(&precheck_section(&report));
        }

        let version = self.versions.get(&deployment.iac_version_id)?;
        if !version.is_current {
            warn!(
                deployment = %deployment_id,
                version = version.version,
                "deploying a version that is no longer current"
            );
        }

        let report = self
            .pipeline
            .execute(deployment.tool, deployment_id, &version.source, &deployment.variables)
            .await?;
        append_log(log, &report.log);

        if report.workspace.is_some() || report.state_snapshot.is_some() {
            self.deployments.update(
                deployment_id,
                DeploymentPatch {
                    workspace_path: Some(
                        report.workspace.as_ref().map(|p| p.display().to_string()),
                    ),
                    terraform_state: Some(report.state_snapshot.clone()),
                    ..DeploymentPatch::default()
                },
            )?;
        }

        if let Some(step) = &report.failed_step {
            warn!(deployment = %deployment_id, %step, timed_out = report.timed_out, "deployment step failed");
        }
        self.deployments.complete(deployment_id, report.success, log)?;
        Ok(())
    }

    fn fail_run(&self, deployment_id: &str, log: &mut String, err: impl fmt::Display) {
        error!(deployment = %deployment_id, error = %err, "deployment run failed");
        append_log(log, &format!("error: {err}"));

        match self.deployments.complete(deployment_id, false, log) {
            Ok(_) => {}
            // Never started: force the terminal status directly.
            Err(ProvisioError::InvalidState {
                status: DeploymentStatus::Pending,
                ..
            }) => {
                let patch = DeploymentPatch {
                    status: Some(DeploymentStatus::Failed),
                    append_log: Some(log.clone()),
                    completed_at: Some(epoch_secs()),
                    ..DeploymentPatch::default()
                };
                if let Err(e) = self.deployments.update(deployment_id, patch) {
                    error!(deployment = %deployment_id, error = %e, "could not record deployment failure");
                }
            }
            Err(e) => {
                error!(deployment = %deployment_id, error = %e, "could not record deployment failure");
            }
        }
    }

    async fn roll_back(&self, deployment: &Deployment, target: &RollbackTarget) {
        let id = deployment.id.as_str();
        let lock = self.design_lock(&deployment.design_id);
        let _guard = lock.lock().await;
        if let Err(e) = self.deployments.ensure_rollback_allowed(id) {
            warn!(deployment = %id, error = %e, "rollback no longer applicable, skipping destroy");
            return;
        }

        let outcome = match self.pipeline.rollback(deployment.tool, id, target).await {
            Ok(report) => {
                if let Some(step) = &report.failed_step {
                    warn!(deployment = %id, %step, "rollback step failed");
                }
                if report.state_snapshot.is_some() {
                    let patch = DeploymentPatch {
                        terraform_state: Some(report.state_snapshot.clone()),
                        ..DeploymentPatch::default()
                    };
                    if let Err(e) = self.deployments.update(id, patch) {
                        warn!(deployment = %id, error = %e, "could not persist post-rollback state");
                    }
                }
                self.deployments.finish_rollback(id, report.success, &report.log)
            }
            Err(e) => {
                warn!(deployment = %id, error = %e, "rollback could not run");
                self.deployments.finish_rollback(id, false, &format!("error: {e}"))
            }
        };
        if let Err(e) = outcome {
            error!(deployment = %id, error = %e, "could not record rollback outcome");
        }
    }
}

/// Marks a deployment as having a rollback in flight until dropped.
struct InFlight {
    inner: Arc<Inner>,
    id: DeploymentId,
}

impl InFlight {
    fn claim(inner: Arc<Inner>, id: &str) -> Option<Self> {
        let claimed = inner
            .rollbacks
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(id.to_string());
        claimed.then(|| Self {
            inner,
            id: id.to_string(),
        })
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.inner
            .rollbacks
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&self.id);
    }
}

/// Log line for a background task that ended without finishing its body.
fn abort_reason(what: &str, err: JoinError) -> String {
    if !err.is_panic() {
        return format!("{what} aborted: task cancelled");
    }
    let payload = err.into_panic();
    let message = payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "non-string panic payload".to_string());
    format!("{what} aborted: panicked: {message}")
}

fn precheck_section(report: &PrecheckReport) -> String {
    let mut out = format!(
        "== precheck ==\noverall: {}\nvm: {}\norchestrator: {}\nssh: {}\nnetwork: {}\n",
        report.overall.status,
        report.vm.status,
        report.orchestrator.status,
        report.ssh.status,
        report.network.status,
    );
    for hint in report.hints() {
        out.push_str(&format!("hint: {hint}\n"));
    }
    out
}
