//! Tool execution pipeline.
//!
//! Materializes IaC source into an isolated [`Workspace`] and runs the
//! tool-specific step sequence through a [`CommandRunner`]. Steps are
//! strictly sequential and the first failing step ends the run; the report
//! carries every log section produced so far, including the failing one.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use provisio_core::config::ExecutionConfig;
use provisio_core::{IacTool, ProvisioError, ProvisioResult, Variables};
use tracing::{info, warn};

use crate::harness::{CommandRunner, CommandSpec, ProcessRunner};
use crate::terraform;
use crate::workspace::Workspace;

const MAIN_TF: &str = "main.tf";
const VARIABLES_TF: &str = "variables.tf";
const TFVARS: &str = "terraform.tfvars";
const TFSTATE: &str = "terraform.tfstate";
const PLAYBOOK: &str = "playbook.yml";
const INVENTORY: &str = "inventory.ini";

/// Variable key whose string value is written out as the Ansible inventory.
pub const INVENTORY_VARIABLE: &str = "inventory";

/// Step name used when the workspace itself could not be prepared.
const SETUP_STEP: &str = "workspace";

const TERRAFORM_APPLY: [(&str, &[&str]); 4] = [
    ("init", &["init", "-input=false", "-no-color"]),
    ("validate", &["validate", "-no-color"]),
    ("plan", &["plan", "-input=false", "-no-color", "-out=tfplan"]),
    (
        "apply",
        &["apply", "-input=false", "-no-color", "-auto-approve", "tfplan"],
    ),
];

const TERRAFORM_INIT: (&str, &[&str]) = ("init", &["init", "-input=false", "-no-color"]);

const TERRAFORM_DESTROY: (&str, &[&str]) = (
    "destroy",
    &["destroy", "-input=false", "-no-color", "-auto-approve"],
);

/// Outcome of one pipeline run.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineReport {
    pub tool: IacTool,
    pub success: bool,
    /// `== step ==` sections, in execution order.
    pub log: String,
    /// The step that ended the run, if any.
    pub failed_step: Option<String>,
    pub timed_out: bool,
    /// Set when the workspace was retained after the run.
    pub workspace: Option<PathBuf>,
    /// `terraform.tfstate` as left by the run.
    pub state_snapshot: Option<String>,
    timeout_secs: u64,
}

impl PipelineReport {
    fn new(tool: IacTool, timeout_secs: u64) -> Self {
        Self {
            tool,
            success: false,
            log: String::new(),
            failed_step: None,
            timed_out: false,
            workspace: None,
            state_snapshot: None,
            timeout_secs,
        }
    }

    fn section(&mut self, step: &str, output: &str) {
        self.log.push_str(&format!("== {step} ==\n"));
        self.log.push_str(output);
        if !output.ends_with('\n') {
            self.log.push('\n');
        }
    }

    fn fail(&mut self, step: &str, timed_out: bool) {
        self.success = false;
        self.failed_step = Some(step.to_string());
        self.timed_out = timed_out;
    }

    fn setup_failed(mut self, err: std::io::Error) -> Self {
        self.section(SETUP_STEP, &format!("failed to prepare workspace: {err}"));
        self.fail(SETUP_STEP, false);
        self
    }

    /// Convert a failed report into the matching execution error.
    pub fn into_result(self) -> ProvisioResult<Self> {
        if self.success {
            return Ok(self);
        }
        let step = self
            .failed_step
            .clone()
            .unwrap_or_else(|| SETUP_STEP.to_string());
        if self.timed_out {
            Err(ProvisioError::ExecutionTimeout {
                step,
                timeout_secs: self.timeout_secs,
                log: self.log,
            })
        } else {
            Err(ProvisioError::ExecutionFailure { step, log: self.log })
        }
    }
}

/// What a Terraform rollback can work from.
#[derive(Debug, Clone, Default)]
pub struct RollbackTarget {
    /// Workspace retained by the provisioning run.
    pub workspace: Option<PathBuf>,
    /// Source of the version that was applied.
    pub source: String,
    pub variables: Variables,
    /// `terraform.tfstate` persisted after the provisioning run.
    pub state: Option<String>,
}

/// Runs Terraform and Ansible step sequences.
pub struct Pipeline {
    config: ExecutionConfig,
    runner: Arc<dyn CommandRunner>,
}

impl Pipeline {
    pub fn new(config: ExecutionConfig, runner: Arc<dyn CommandRunner>) -> Self {
        Self { config, runner }
    }

    /// A pipeline backed by real processes.
    pub fn with_process_runner(config: ExecutionConfig) -> Self {
        Self::new(config, Arc::new(ProcessRunner))
    }

    pub fn config(&self) -> &ExecutionConfig {
        &self.config
    }

    fn step_timeout(&self) -> Duration {
        Duration::from_secs(self.config.step_timeout_secs)
    }

    /// Dispatch a provisioning run by tool.
    pub async fn execute(
        &self,
        tool: IacTool,
        deployment_id: &str,
        source: &str,
        variables: &Variables,
    ) -> ProvisioResult<PipelineReport> {
        match tool {
            IacTool::Terraform => Ok(self.execute_terraform(deployment_id, source, variables).await),
            IacTool::Ansible => {
                let inventory = variables
                    .get(INVENTORY_VARIABLE)
                    .and_then(|v| v.as_str());
                Ok(self.execute_ansible(deployment_id, source, inventory).await)
            }
            IacTool::Kubernetes => Err(ProvisioError::UnsupportedTool(format!(
                "no execution pipeline for {tool}"
            ))),
        }
    }

    /// Dispatch a rollback by tool. Only Terraform can be rolled back.
    pub async fn rollback(
        &self,
        tool: IacTool,
        deployment_id: &str,
        target: &RollbackTarget,
    ) -> ProvisioResult<PipelineReport> {
        match tool {
            IacTool::Terraform => self.rollback_terraform(deployment_id, target).await,
            other => Err(ProvisioError::UnsupportedTool(format!(
                "rollback is not supported for {other}"
            ))),
        }
    }

    /// init → validate → plan → apply in a fresh workspace.
    pub async fn execute_terraform(
        &self,
        deployment_id: &str,
        source: &str,
        variables: &Variables,
    ) -> PipelineReport {
        let report = PipelineReport::new(IacTool::Terraform, self.config.step_timeout_secs);
        let ws = match self.open_workspace(IacTool::Terraform, deployment_id).await {
            Ok(ws) => ws,
            Err(e) => return report.setup_failed(e),
        };
        let mut report = report;
        if let Err(e) = materialize_terraform(&ws, source, variables, None).await {
            report = report.setup_failed(e);
            report.workspace = ws.finish().await;
            return report;
        }

        for (step, args) in TERRAFORM_APPLY {
            if !self.run_terraform_step(&ws, &mut report, step, args).await {
                break;
            }
        }
        report.success = report.failed_step.is_none();
        self.close_terraform(ws, &mut report).await;

        info!(deployment = %deployment_id, success = report.success, "terraform run finished");
        report
    }

    /// `destroy` against the retained workspace, or against a workspace
    /// rebuilt from the applied source and the persisted state.
    pub async fn rollback_terraform(
        &self,
        deployment_id: &str,
        target: &RollbackTarget,
    ) -> ProvisioResult<PipelineReport> {
        let mut report = PipelineReport::new(IacTool::Terraform, self.config.step_timeout_secs);
        let retained = target
            .workspace
            .as_deref()
            .and_then(|path| Workspace::existing(path, self.config.retain_workspaces));

        let ws = match (retained, target.state.as_deref()) {
            (Some(ws), _) => {
                info!(deployment = %deployment_id, workspace = %ws.path().display(), "rolling back in retained workspace");
                ws
            }
            (None, Some(state)) => {
                info!(deployment = %deployment_id, "rolling back from persisted state");
                let ws = match self.open_workspace(IacTool::Terraform, deployment_id).await {
                    Ok(ws) => ws,
                    Err(e) => return Ok(report.setup_failed(e)),
                };
                if let Err(e) =
                    materialize_terraform(&ws, &target.source, &target.variables, Some(state)).await
                {
                    report = report.setup_failed(e);
                    report.workspace = ws.finish().await;
                    return Ok(report);
                }
                let (step, args) = TERRAFORM_INIT;
                if !self.run_terraform_step(&ws, &mut report, step, args).await {
                    self.close_terraform(ws, &mut report).await;
                    return Ok(report);
                }
                ws
            }
            (None, None) => {
                return Err(ProvisioError::WorkspaceMissing(deployment_id.to_string()));
            }
        };

        let (step, args) = TERRAFORM_DESTROY;
        self.run_terraform_step(&ws, &mut report, step, args).await;
        report.success = report.failed_step.is_none();
        self.close_terraform(ws, &mut report).await;

        info!(deployment = %deployment_id, success = report.success, "terraform rollback finished");
        Ok(report)
    }

    /// `ansible-playbook playbook.yml [-i inventory.ini]` in a fresh workspace.
    pub async fn execute_ansible(
        &self,
        deployment_id: &str,
        playbook: &str,
        inventory: Option<&str>,
    ) -> PipelineReport {
        let mut report = PipelineReport::new(IacTool::Ansible, self.config.step_timeout_secs);
        let ws = match self.open_workspace(IacTool::Ansible, deployment_id).await {
            Ok(ws) => ws,
            Err(e) => return report.setup_failed(e),
        };

        let materialized = async {
            ws.write(PLAYBOOK, playbook).await?;
            if let Some(inventory) = inventory {
                ws.write(INVENTORY, inventory).await?;
            }
            Ok::<_, std::io::Error>(())
        }
        .await;
        if let Err(e) = materialized {
            report = report.setup_failed(e);
            report.workspace = ws.finish().await;
            return report;
        }

        let mut spec = CommandSpec::new(&self.config.ansible_bin, self.step_timeout())
            .arg(PLAYBOOK)
            .cwd(ws.path());
        if inventory.is_some() {
            spec = spec.args(["-i", INVENTORY]);
        }
        self.run_step(&mut report, "playbook", &spec).await;
        report.success = report.failed_step.is_none();
        report.workspace = ws.finish().await;

        info!(deployment = %deployment_id, success = report.success, "ansible run finished");
        report
    }

    async fn open_workspace(&self, tool: IacTool, deployment_id: &str) -> std::io::Result<Workspace> {
        Workspace::create(
            &self.config.workspace_root(),
            tool,
            deployment_id,
            self.config.retain_workspaces,
        )
        .await
    }

    async fn run_terraform_step(
        &self,
        ws: &Workspace,
        report: &mut PipelineReport,
        step: &str,
        args: &[&str],
    ) -> bool {
        let spec = CommandSpec::new(&self.config.terraform_bin, self.step_timeout())
            .args(args.iter().copied())
            .cwd(ws.path());
        self.run_step(report, step, &spec).await
    }

    /// Run one step, append its section, and record failure. Returns whether
    /// the step succeeded.
    async fn run_step(&self, report: &mut PipelineReport, step: &str, spec: &CommandSpec) -> bool {
        info!(step, command = %spec, "running step");
        let result = self.runner.run(spec).await;
        report.section(step, &result.output);
        if result.success {
            return true;
        }
        warn!(
            step,
            exit_code = ?result.exit_code,
            timed_out = result.is_timeout(),
            "step failed"
        );
        report.fail(step, result.is_timeout());
        false
    }

    /// Capture `terraform.tfstate`, then clean up or retain the workspace.
    async fn close_terraform(&self, ws: Workspace, report: &mut PipelineReport) {
        match ws.read_optional(TFSTATE).await {
            Ok(state) => report.state_snapshot = state,
            Err(e) => warn!(error = %e, "could not read terraform state"),
        }
        report.workspace = ws.finish().await;
    }
}

async fn materialize_terraform(
    ws: &Workspace,
    source: &str,
    variables: &Variables,
    state: Option<&str>,
) -> std::io::Result<()> {
    terraform::check_names(variables)?;
    ws.write(MAIN_TF, source).await?;
    if !variables.is_empty() {
        ws.write(VARIABLES_TF, &terraform::render_variables_tf(variables))
            .await?;
        ws.write(TFVARS, &terraform::render_tfvars(variables)).await?;
    }
    if let Some(state) = state {
        ws.write(TFSTATE, state).await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::harness::ExecutionResult;
    use crate::harness::testing::ScriptedRunner;
    use serde_json::json;

    const SOURCE: &str = "provider \"null\" {}\nresource \"null_resource\" \"x\" {}\n";

    fn config(root: &std::path::Path, retain: bool) -> ExecutionConfig {
        ExecutionConfig {
            workspace_root: Some(root.to_path_buf()),
            retain_workspaces: retain,
            ..ExecutionConfig::default()
        }
    }

    fn pipeline(root: &std::path::Path, retain: bool, runner: Arc<ScriptedRunner>) -> Pipeline {
        Pipeline::new(config(root, retain), runner)
    }

    #[tokio::test]
    async fn terraform_runs_all_steps_in_order() {
        let root = tempfile::tempdir().unwrap();
        let runner = Arc::new(ScriptedRunner::new().otherwise(ExecutionResult::ok("done")));
        let report = pipeline(root.path(), false, runner.clone())
            .execute_terraform("dep-1", SOURCE, &Variables::new())
            .await;

        assert!(report.success);
        assert!(report.failed_step.is_none());
        assert_eq!(
            runner.lines(),
            vec![
                "terraform init -input=false -no-color",
                "terraform validate -no-color",
                "terraform plan -input=false -no-color -out=tfplan",
                "terraform apply -input=false -no-color -auto-approve tfplan",
            ]
        );
        for step in ["init", "validate", "plan", "apply"] {
            assert!(report.log.contains(&format!("== {step} ==\ndone\n")));
        }
        // Workspace removed, nothing left under the root.
        assert!(report.workspace.is_none());
        assert_eq!(std::fs::read_dir(root.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn init_failure_stops_pipeline() {
        let root = tempfile::tempdir().unwrap();
        let runner = Arc::new(
            ScriptedRunner::new().on("terraform init", ExecutionResult::failed(1, "no provider")),
        );
        let report = pipeline(root.path(), false, runner.clone())
            .execute_terraform("dep-1", SOURCE, &Variables::new())
            .await;

        assert!(!report.success);
        assert_eq!(runner.calls().len(), 1);
        assert_eq!(report.failed_step.as_deref(), Some("init"));
        assert_eq!(report.log, "== init ==\nno provider\n");
    }

    #[tokio::test]
    async fn plan_failure_carries_partial_log() {
        let root = tempfile::tempdir().unwrap();
        let runner = Arc::new(
            ScriptedRunner::new()
                .on("terraform plan", ExecutionResult::failed(1, "Error: bad plan"))
                .otherwise(ExecutionResult::ok("fine")),
        );
        let report = pipeline(root.path(), false, runner.clone())
            .execute_terraform("dep-1", SOURCE, &Variables::new())
            .await;

        assert_eq!(runner.calls().len(), 3);
        match report.into_result().unwrap_err() {
            ProvisioError::ExecutionFailure { step, log } => {
                assert_eq!(step, "plan");
                assert!(log.contains("== init =="));
                assert!(log.contains("== validate =="));
                assert!(log.contains("== plan ==\nError: bad plan"));
                assert!(!log.contains("== apply =="));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn timed_out_step_maps_to_timeout_error() {
        let root = tempfile::tempdir().unwrap();
        let runner = Arc::new(ScriptedRunner::new().on(
            "terraform apply",
            ExecutionResult::timed_out("applying...", Duration::from_secs(1800)),
        ));
        let report = pipeline(root.path(), false, runner)
            .execute_terraform("dep-1", SOURCE, &Variables::new())
            .await;

        assert!(report.timed_out);
        let err = report.into_result().unwrap_err();
        assert!(matches!(
            err,
            ProvisioError::ExecutionTimeout { ref step, timeout_secs: 1800, .. } if step == "apply"
        ));
        assert!(err.log().unwrap().contains("timeout"));
    }

    #[tokio::test]
    async fn variables_are_materialized_and_workspace_retained() {
        let root = tempfile::tempdir().unwrap();
        let runner = Arc::new(ScriptedRunner::new());
        let mut vars = Variables::new();
        vars.insert("region".into(), json!("eu-west-1"));

        let report = pipeline(root.path(), true, runner.clone())
            .execute_terraform("dep-2", SOURCE, &vars)
            .await;

        let ws = report.workspace.expect("retained");
        assert_eq!(std::fs::read_to_string(ws.join(MAIN_TF)).unwrap(), SOURCE);
        assert!(std::fs::read_to_string(ws.join(VARIABLES_TF)).unwrap().contains("variable \"region\""));
        assert_eq!(
            std::fs::read_to_string(ws.join(TFVARS)).unwrap(),
            "region = \"eu-west-1\"\n"
        );
        assert!(runner.calls().iter().all(|c| c.cwd.as_deref() == Some(ws.as_path())));
    }

    #[tokio::test]
    async fn undeclarable_variable_name_fails_before_terraform_runs() {
        let root = tempfile::tempdir().unwrap();
        let runner = Arc::new(ScriptedRunner::new());
        let mut vars = Variables::new();
        vars.insert("bad\" {}".into(), json!("x"));

        let report = pipeline(root.path(), false, runner.clone())
            .execute_terraform("dep-4", SOURCE, &vars)
            .await;

        assert!(!report.success);
        assert_eq!(report.failed_step.as_deref(), Some("workspace"));
        assert!(report.log.contains("not a valid identifier"));
        assert!(runner.calls().is_empty());
    }

    #[tokio::test]
    async fn no_variable_files_without_variables() {
        let root = tempfile::tempdir().unwrap();
        let report = pipeline(root.path(), true, Arc::new(ScriptedRunner::new()))
            .execute_terraform("dep-3", SOURCE, &Variables::new())
            .await;
        let ws = report.workspace.unwrap();
        assert!(!ws.join(VARIABLES_TF).exists());
        assert!(!ws.join(TFVARS).exists());
    }

    #[tokio::test]
    async fn rollback_uses_retained_workspace() {
        let root = tempfile::tempdir().unwrap();
        let retained = root.path().join("terraform-dep-1-kept");
        std::fs::create_dir_all(&retained).unwrap();
        let runner = Arc::new(ScriptedRunner::new());

        let target = RollbackTarget {
            workspace: Some(retained.clone()),
            ..RollbackTarget::default()
        };
        let report = pipeline(root.path(), true, runner.clone())
            .rollback_terraform("dep-1", &target)
            .await
            .unwrap();

        assert!(report.success);
        let calls = runner.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(
            calls[0].to_string(),
            "terraform destroy -input=false -no-color -auto-approve"
        );
        assert_eq!(calls[0].cwd.as_deref(), Some(retained.as_path()));
    }

    #[tokio::test]
    async fn rollback_rehydrates_from_persisted_state() {
        let root = tempfile::tempdir().unwrap();
        let runner = Arc::new(ScriptedRunner::new());
        let target = RollbackTarget {
            workspace: Some(root.path().join("long-gone")),
            source: SOURCE.to_string(),
            variables: Variables::new(),
            state: Some("{\"version\": 4}".to_string()),
        };

        let report = pipeline(root.path(), false, runner.clone())
            .rollback_terraform("dep-1", &target)
            .await
            .unwrap();

        assert!(report.success);
        assert_eq!(
            runner.lines(),
            vec![
                "terraform init -input=false -no-color",
                "terraform destroy -input=false -no-color -auto-approve",
            ]
        );
        assert_eq!(report.state_snapshot.as_deref(), Some("{\"version\": 4}"));
    }

    #[tokio::test]
    async fn rollback_without_workspace_or_state_is_workspace_missing() {
        let root = tempfile::tempdir().unwrap();
        let runner = Arc::new(ScriptedRunner::new());
        let err = pipeline(root.path(), false, runner.clone())
            .rollback_terraform("dep-9", &RollbackTarget::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ProvisioError::WorkspaceMissing(ref id) if id == "dep-9"));
        assert!(runner.calls().is_empty());
    }

    #[tokio::test]
    async fn destroy_failure_is_reported() {
        let root = tempfile::tempdir().unwrap();
        let runner = Arc::new(
            ScriptedRunner::new().on("terraform destroy", ExecutionResult::failed(1, "locked")),
        );
        let target = RollbackTarget {
            source: SOURCE.to_string(),
            state: Some("{}".to_string()),
            ..RollbackTarget::default()
        };
        let report = pipeline(root.path(), false, runner)
            .rollback_terraform("dep-1", &target)
            .await
            .unwrap();
        assert!(!report.success);
        assert_eq!(report.failed_step.as_deref(), Some("destroy"));
    }

    #[tokio::test]
    async fn ansible_passes_inventory_when_present() {
        let root = tempfile::tempdir().unwrap();
        let runner = Arc::new(ScriptedRunner::new().otherwise(ExecutionResult::ok("PLAY RECAP")));
        let p = pipeline(root.path(), false, runner.clone());

        let report = p.execute_ansible("dep-1", "- hosts: all\n", Some("[web]\n10.0.0.1\n")).await;
        assert!(report.success);
        assert_eq!(report.log, "== playbook ==\nPLAY RECAP\n");

        p.execute_ansible("dep-2", "- hosts: all\n", None).await;
        assert_eq!(
            runner.lines(),
            vec![
                "ansible-playbook playbook.yml -i inventory.ini",
                "ansible-playbook playbook.yml",
            ]
        );
    }

    #[tokio::test]
    async fn execute_dispatches_ansible_inventory_from_variables() {
        let root = tempfile::tempdir().unwrap();
        let runner = Arc::new(ScriptedRunner::new());
        let mut vars = Variables::new();
        vars.insert(INVENTORY_VARIABLE.into(), json!("[all]\nlocalhost\n"));

        pipeline(root.path(), false, runner.clone())
            .execute(IacTool::Ansible, "dep-1", "- hosts: all\n", &vars)
            .await
            .unwrap();
        assert_eq!(runner.lines(), vec!["ansible-playbook playbook.yml -i inventory.ini"]);
    }

    #[tokio::test]
    async fn unsupported_tools_fail_immediately() {
        let root = tempfile::tempdir().unwrap();
        let runner = Arc::new(ScriptedRunner::new());
        let p = pipeline(root.path(), false, runner.clone());

        let err = p
            .execute(IacTool::Kubernetes, "dep-1", "apiVersion: v1", &Variables::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ProvisioError::UnsupportedTool(_)));

        let err = p
            .rollback(IacTool::Ansible, "dep-1", &RollbackTarget::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ProvisioError::UnsupportedTool(_)));
        assert!(runner.calls().is_empty());
    }

    #[tokio::test]
    async fn missing_terraform_binary_fails_at_init() {
        let root = tempfile::tempdir().unwrap();
        let config = ExecutionConfig {
            terraform_bin: "provisio-missing-terraform".to_string(),
            ..config(root.path(), false)
        };
        let report = Pipeline::with_process_runner(config)
            .execute_terraform("dep-1", SOURCE, &Variables::new())
            .await;
        assert!(!report.success);
        assert_eq!(report.failed_step.as_deref(), Some("init"));
        assert!(report.log.contains("command not found"));
    }
}
