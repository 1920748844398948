//! Precheck result types.

use std::collections::BTreeMap;

use serde::Serialize;

/// VM manager view of the named machine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VmStatus {
    pub available: bool,
    /// `VMState` value, or `vbox_not_installed` / `not_found` / `timeout` / `error`.
    pub status: String,
    pub is_running: bool,
    pub vm_name: String,
    /// Selected machine properties (`UUID`, `memory`, `cpus`).
    pub details: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
}

/// VM orchestrator status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OrchestratorStatus {
    pub available: bool,
    /// `running`, `stopped`, `vagrant_not_installed`, `timeout` or `error`.
    pub status: String,
    pub is_running: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
}

/// SSH endpoint derived from the orchestrator's connection config.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SshStatus {
    pub available: bool,
    /// `connected`, `disconnected`, `timeout`, `vagrant_not_installed` or `error`.
    pub status: String,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub user: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
}

/// One probed service target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServiceStatus {
    pub label: String,
    pub host: String,
    pub port: u16,
    pub required: bool,
    pub available: bool,
    /// `connected`, `disconnected` or `timeout`.
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
}

/// Aggregate over all service targets.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NetworkStatus {
    /// True only when every target is connected.
    pub available: bool,
    /// `all_connected`, `partial` or `all_disconnected`.
    pub status: String,
    pub connected_count: usize,
    pub total_count: usize,
    pub required_services_ok: bool,
    pub services: Vec<ServiceStatus>,
}

impl NetworkStatus {
    pub fn from_services(services: Vec<ServiceStatus>) -> Self {
        let total_count = services.len();
        let connected_count = services.iter().filter(|s| s.available).count();
        let status = if connected_count == total_count {
            "all_connected"
        } else if connected_count > 0 {
            "partial"
        } else {
            "all_disconnected"
        };
        let required_services_ok = services.iter().filter(|s| s.required).all(|s| s.available);
        Self {
            available: connected_count == total_count,
            status: status.to_string(),
            connected_count,
            total_count,
            required_services_ok,
            services,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Overall {
    pub available: bool,
    /// `ready` or `not_ready`.
    pub status: String,
}

/// Everything `check_all` found.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PrecheckReport {
    pub vm: VmStatus,
    pub orchestrator: OrchestratorStatus,
    pub ssh: SshStatus,
    pub network: NetworkStatus,
    pub overall: Overall,
}

impl PrecheckReport {
    /// Ready iff (VM running or orchestrator running) and SSH reachable.
    /// Service targets are reported but do not affect the verdict.
    pub fn assemble(
        vm: VmStatus,
        orchestrator: OrchestratorStatus,
        ssh: SshStatus,
        network: NetworkStatus,
    ) -> Self {
        let ready = (vm.is_running || orchestrator.is_running) && ssh.available;
        Self {
            vm,
            orchestrator,
            ssh,
            network,
            overall: Overall {
                available: ready,
                status: if ready { "ready" } else { "not_ready" }.to_string(),
            },
        }
    }

    pub fn is_ready(&self) -> bool {
        self.overall.available
    }

    /// Remediation hints from every failing sub-check, in report order.
    pub fn hints(&self) -> Vec<String> {
        let mut hints: Vec<String> = [&self.vm.hint, &self.orchestrator.hint, &self.ssh.hint]
            .into_iter()
            .flatten()
            .cloned()
            .collect();
        hints.extend(
            self.network
                .services
                .iter()
                .filter_map(|s| s.hint.as_ref().map(|h| format!("{}: {h}", s.label))),
        );
        hints
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service(label: &str, required: bool, available: bool) -> ServiceStatus {
        ServiceStatus {
            label: label.to_string(),
            host: "localhost".to_string(),
            port: 1,
            required,
            available,
            status: if available { "connected" } else { "disconnected" }.to_string(),
            hint: (!available).then(|| "start it".to_string()),
        }
    }

    #[test]
    fn network_tags() {
        let all = NetworkStatus::from_services(vec![service("a", true, true), service("b", false, true)]);
        assert_eq!(all.status, "all_connected");
        assert!(all.available);

        let partial =
            NetworkStatus::from_services(vec![service("a", true, true), service("b", false, false)]);
        assert_eq!(partial.status, "partial");
        assert!(!partial.available);
        assert!(partial.required_services_ok);

        let none = NetworkStatus::from_services(vec![service("a", true, false)]);
        assert_eq!(none.status, "all_disconnected");
        assert!(!none.required_services_ok);
    }

    #[test]
    fn empty_target_list_is_all_connected() {
        let net = NetworkStatus::from_services(Vec::new());
        assert_eq!(net.status, "all_connected");
        assert!(net.required_services_ok);
    }
}
