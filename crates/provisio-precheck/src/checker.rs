//! The prechecker and its sub-checks.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use provisio_core::config::{PrecheckConfig, TargetConfig};
use provisio_exec::{CommandRunner, CommandSpec, ExecutionResult, ExitKind, ProcessRunner};
use tracing::{debug, info, warn};

use crate::probe::{ProbeResult, tcp_probe};
use crate::report::*;

const VM_DETAIL_KEYS: [&str; 3] = ["UUID", "memory", "cpus"];

/// Runs the reachability checks against one configured environment.
pub struct Prechecker {
    config: PrecheckConfig,
    runner: Arc<dyn CommandRunner>,
}

impl Prechecker {
    pub fn new(config: PrecheckConfig, runner: Arc<dyn CommandRunner>) -> Self {
        Self { config, runner }
    }

    pub fn with_process_runner(config: PrecheckConfig) -> Self {
        Self::new(config, Arc::new(ProcessRunner))
    }

    pub fn config(&self) -> &PrecheckConfig {
        &self.config
    }

    fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.config.command_timeout_secs)
    }

    fn orchestrator_command(&self, args: &[&str]) -> CommandSpec {
        let spec = CommandSpec::new(&self.config.orchestrator_bin, self.command_timeout())
            .args(args.iter().copied());
        match &self.config.orchestrator_dir {
            Some(dir) => spec.cwd(dir),
            None => spec,
        }
    }

    /// Run every sub-check concurrently and compute the overall verdict.
    pub async fn check_all(&self) -> PrecheckReport {
        let (vm, orchestrator, ssh, network) = tokio::join!(
            self.check_vm_manager(),
            self.check_orchestrator(),
            self.check_ssh(),
            self.check_network(),
        );
        let report = PrecheckReport::assemble(vm, orchestrator, ssh, network);
        info!(
            overall = %report.overall.status,
            vm = %report.vm.status,
            orchestrator = %report.orchestrator.status,
            ssh = %report.ssh.status,
            network = %report.network.status,
            "precheck finished"
        );
        report
    }

    /// `VBoxManage showvminfo <vm> --machinereadable`.
    pub async fn check_vm_manager(&self) -> VmStatus {
        let vm_name = self.config.vm_name.clone();
        let spec = CommandSpec::new(&self.config.vm_manager_bin, self.command_timeout()).args([
            "showvminfo",
            vm_name.as_str(),
            "--machinereadable",
        ]);
        let result = self.runner.run(&spec).await;

        let unavailable = |status: &str, hint: String| VmStatus {
            available: false,
            status: status.to_string(),
            is_running: false,
            vm_name: vm_name.clone(),
            details: BTreeMap::new(),
            hint: Some(hint),
        };

        if let Some((tag, hint)) =
            tool_failure(&result, &self.config.vm_manager_bin, "VirtualBox", "vbox_not_installed")
        {
            return unavailable(tag, hint);
        }
        if !result.success {
            debug!(vm = %vm_name, output = %result.output.trim(), "vm lookup failed");
            return unavailable(
                "not_found",
                format!("no VM named `{vm_name}` is registered; check `VBoxManage list vms`"),
            );
        }

        let info = parse_machine_readable(&result.output);
        let state = info
            .get("VMState")
            .cloned()
            .unwrap_or_else(|| "unknown".to_string());
        let is_running = state == "running";
        let details = VM_DETAIL_KEYS
            .iter()
            .filter_map(|k| info.get(*k).map(|v| (k.to_string(), v.clone())))
            .collect();
        VmStatus {
            available: true,
            hint: (!is_running).then(|| {
                format!("start the VM with `VBoxManage startvm {vm_name} --type headless`")
            }),
            status: state,
            is_running,
            vm_name,
            details,
        }
    }

    /// `vagrant status --machine-readable`.
    pub async fn check_orchestrator(&self) -> OrchestratorStatus {
        let result = self
            .runner
            .run(&self.orchestrator_command(&["status", "--machine-readable"]))
            .await;

        if let Some((tag, hint)) =
            tool_failure(&result, &self.config.orchestrator_bin, "Vagrant", "vagrant_not_installed")
        {
            return OrchestratorStatus {
                available: false,
                status: tag.to_string(),
                is_running: false,
                hint: Some(hint),
            };
        }
        if !result.success {
            return OrchestratorStatus {
                available: false,
                status: "error".to_string(),
                is_running: false,
                hint: Some(format!(
                    "`{} status` failed: {}",
                    self.config.orchestrator_bin,
                    first_line(&result.output)
                )),
            };
        }

        let is_running = parse_orchestrator_states(&result.output)
            .iter()
            .any(|s| s == "running");
        OrchestratorStatus {
            available: true,
            status: if is_running { "running" } else { "stopped" }.to_string(),
            is_running,
            hint: (!is_running)
                .then(|| format!("bring the machine up with `{} up`", self.config.orchestrator_bin)),
        }
    }

    /// `vagrant ssh-config`, then a TCP probe of the advertised endpoint.
    pub async fn check_ssh(&self) -> SshStatus {
        let result = self.runner.run(&self.orchestrator_command(&["ssh-config"])).await;

        let unavailable = |status: &str, hint: String| SshStatus {
            available: false,
            status: status.to_string(),
            host: None,
            port: None,
            user: None,
            hint: Some(hint),
        };
        if let Some((tag, hint)) =
            tool_failure(&result, &self.config.orchestrator_bin, "Vagrant", "vagrant_not_installed")
        {
            return unavailable(tag, hint);
        }
        if !result.success {
            return unavailable(
                "error",
                "could not read the SSH configuration; is the machine created?".to_string(),
            );
        }

        let ssh = parse_ssh_config(&result.output);
        let host = ssh
            .get("HostName")
            .cloned()
            .unwrap_or_else(|| "localhost".to_string());
        let port = ssh.get("Port").and_then(|p| p.parse().ok()).unwrap_or(22);
        let user = ssh.get("User").cloned().unwrap_or_else(|| "vagrant".to_string());

        let probe = tcp_probe(&host, port, Duration::from_secs(self.config.ssh_timeout_secs)).await;
        SshStatus {
            available: probe.is_connected(),
            status: probe.as_tag().to_string(),
            hint: (!probe.is_connected())
                .then(|| format!("nothing is accepting SSH on {host}:{port}")),
            host: Some(host),
            port: Some(port),
            user: Some(user),
        }
    }

    /// Probe every configured service target concurrently.
    pub async fn check_network(&self) -> NetworkStatus {
        let timeout = Duration::from_secs(self.config.tcp_timeout_secs);
        let mut set = tokio::task::JoinSet::new();
        for (idx, target) in self.config.targets.iter().cloned().enumerate() {
            set.spawn(async move { (idx, probe_target(&target, timeout).await) });
        }
        let mut probed = Vec::with_capacity(self.config.targets.len());
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok(entry) => probed.push(entry),
                Err(e) => warn!(error = %e, "probe task failed"),
            }
        }
        probed.sort_by_key(|(idx, _)| *idx);
        let services = probed.into_iter().map(|(_, s)| s).collect();
        let network = NetworkStatus::from_services(services);
        if !network.required_services_ok {
            warn!(status = %network.status, "required services unreachable");
        }
        network
    }
}

async fn probe_target(target: &TargetConfig, timeout: Duration) -> ServiceStatus {
    let probe = tcp_probe(&target.host, target.port, timeout).await;
    let hint = match probe {
        ProbeResult::Connected => None,
        _ => Some(target.hint.clone().unwrap_or_else(|| {
            format!("nothing is listening on {}:{}", target.host, target.port)
        })),
    };
    ServiceStatus {
        label: target.label.clone(),
        host: target.host.clone(),
        port: target.port,
        required: target.required,
        available: probe.is_connected(),
        status: probe.as_tag().to_string(),
        hint,
    }
}

/// Map a missing binary or timeout to `(tag, hint)`.
fn tool_failure(
    result: &ExecutionResult,
    bin: &str,
    product: &str,
    missing_tag: &'static str,
) -> Option<(&'static str, String)> {
    match result.kind {
        ExitKind::NotFound => Some((
            missing_tag,
            format!("`{bin}` was not found; install {product} and make sure it is on PATH"),
        )),
        ExitKind::TimedOut => Some(("timeout", format!("`{bin}` did not answer in time"))),
        ExitKind::SpawnFailed => Some(("error", first_line(&result.output).to_string())),
        ExitKind::Exited => None,
    }
}

fn first_line(s: &str) -> &str {
    s.lines().find(|l| !l.trim().is_empty()).unwrap_or("").trim()
}

/// Parse `key="value"` lines.
pub(crate) fn parse_machine_readable(output: &str) -> BTreeMap<String, String> {
    output
        .lines()
        .filter_map(|line| line.split_once('='))
        .map(|(k, v)| {
            (
                k.trim().trim_matches('"').to_string(),
                v.trim().trim_matches('"').to_string(),
            )
        })
        .collect()
}

/// Machine states from `vagrant status --machine-readable`
/// (`timestamp,target,state,<state>` lines).
pub(crate) fn parse_orchestrator_states(output: &str) -> Vec<String> {
    output
        .lines()
        .filter_map(|line| {
            let fields: Vec<&str> = line.trim().split(',').collect();
            (fields.len() >= 4 && fields[2] == "state").then(|| fields[3].to_string())
        })
        .collect()
}

/// Parse `Key value` lines from `vagrant ssh-config`.
pub(crate) fn parse_ssh_config(output: &str) -> BTreeMap<String, String> {
    output
        .lines()
        .filter_map(|line| line.trim().split_once(char::is_whitespace))
        .map(|(k, v)| (k.to_string(), v.trim().to_string()))
        .collect()
}
