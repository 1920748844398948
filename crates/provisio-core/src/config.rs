//! provisio.toml configuration parser.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ProvisioConfig {
    pub state: StateConfig,
    pub execution: ExecutionConfig,
    pub precheck: PrecheckConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StateConfig {
    /// Directory holding `provisio.redb`.
    pub data_dir: PathBuf,
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./provisio-data"),
        }
    }
}

impl StateConfig {
    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join("provisio.redb")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionConfig {
    pub terraform_bin: String,
    pub ansible_bin: String,
    /// Hard deadline for each external tool invocation.
    pub step_timeout_secs: u64,
    /// Parent directory for per-run workspaces. Defaults to the OS temp dir.
    pub workspace_root: Option<PathBuf>,
    /// Leave workspaces on disk after a run (debug-retain mode).
    pub retain_workspaces: bool,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            terraform_bin: "terraform".to_string(),
            ansible_bin: "ansible-playbook".to_string(),
            step_timeout_secs: 1800,
            workspace_root: None,
            retain_workspaces: false,
        }
    }
}

impl ExecutionConfig {
    pub fn workspace_root(&self) -> PathBuf {
        self.workspace_root
            .clone()
            .unwrap_or_else(std::env::temp_dir)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PrecheckConfig {
    /// Run the advisory reachability check before each deployment.
    pub enabled: bool,
    /// Machine name passed to the VM manager.
    pub vm_name: String,
    pub vm_manager_bin: String,
    pub orchestrator_bin: String,
    /// Directory holding the orchestrator's machine definition (Vagrantfile).
    pub orchestrator_dir: Option<PathBuf>,
    pub command_timeout_secs: u64,
    pub ssh_timeout_secs: u64,
    pub tcp_timeout_secs: u64,
    pub targets: Vec<TargetConfig>,
}

impl Default for PrecheckConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            vm_name: "provisio-dev".to_string(),
            vm_manager_bin: "VBoxManage".to_string(),
            orchestrator_bin: "vagrant".to_string(),
            orchestrator_dir: None,
            command_timeout_secs: 10,
            ssh_timeout_secs: 5,
            tcp_timeout_secs: 2,
            targets: default_targets(),
        }
    }
}

/// A (host, port) pair probed over TCP before deploying.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetConfig {
    pub host: String,
    pub port: u16,
    /// Human-readable service name.
    pub label: String,
    #[serde(default)]
    pub required: bool,
    /// Remediation shown when the service is unreachable.
    #[serde(default)]
    pub hint: Option<String>,
}

fn default_targets() -> Vec<TargetConfig> {
    vec![
        TargetConfig {
            host: "localhost".to_string(),
            port: 8000,
            label: "API server".to_string(),
            required: true,
            hint: Some("start the API server and make sure it listens on port 8000".to_string()),
        },
        TargetConfig {
            host: "localhost".to_string(),
            port: 5432,
            label: "PostgreSQL".to_string(),
            required: false,
            hint: Some(
                "start it with `systemctl start postgresql` or `docker compose up -d postgres`"
                    .to_string(),
            ),
        },
        TargetConfig {
            host: "localhost".to_string(),
            port: 6379,
            label: "Redis".to_string(),
            required: false,
            hint: Some(
                "start it with `systemctl start redis` or `docker compose up -d redis`".to_string(),
            ),
        },
    ]
}

impl ProvisioConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: ProvisioConfig = toml::from_str(&content)?;
        Ok(config)
    }

    /// Read `path` if it exists, otherwise fall back to defaults.
    pub fn load_or_default(path: &Path) -> anyhow::Result<Self> {
        if path.is_file() {
            Self::from_file(path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn to_toml_string(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ProvisioConfig::default();
        assert_eq!(config.execution.step_timeout_secs, 1800);
        assert!(!config.execution.retain_workspaces);
        assert!(config.precheck.enabled);
        assert_eq!(config.precheck.targets.iter().filter(|t| t.required).count(), 1);
        assert!(config.state.db_path().ends_with("provisio.redb"));
    }

    #[test]
    fn test_parse_partial() {
        let toml_str = r#"
[execution]
terraform_bin = "/opt/terraform"
retain_workspaces = true

[precheck]
vm_name = "lab-vm"

[[precheck.targets]]
host = "10.0.0.5"
port = 22
label = "bastion"
required = true
"#;
        let config: ProvisioConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.execution.terraform_bin, "/opt/terraform");
        assert_eq!(config.execution.ansible_bin, "ansible-playbook");
        assert!(config.execution.retain_workspaces);
        assert_eq!(config.precheck.vm_name, "lab-vm");
        assert_eq!(config.precheck.targets.len(), 1);
        assert!(config.precheck.targets[0].hint.is_none());
    }

    #[test]
    fn test_roundtrip_through_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("provisio.toml");
        let config = ProvisioConfig::default();
        std::fs::write(&path, config.to_toml_string().unwrap()).unwrap();

        let loaded = ProvisioConfig::from_file(&path).unwrap();
        assert_eq!(loaded.precheck.targets, config.precheck.targets);
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = ProvisioConfig::load_or_default(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(config.execution.terraform_bin, "terraform");
    }
}
