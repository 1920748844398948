//! Shared types used across Provisio crates.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::error::ProvisioError;

/// Identifier of an infrastructure design.
pub type DesignId = String;

/// Identifier of a single IaC version snapshot.
pub type VersionId = String;

/// Identifier of a deployment attempt.
pub type DeploymentId = String;

/// Terraform / Ansible variable values keyed by name.
pub type Variables = BTreeMap<String, serde_json::Value>;

// ── Tools ──────────────────────────────────────────────────────────

/// Provisioning tool an IaC artifact is written for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IacTool {
    Terraform,
    Ansible,
    Kubernetes,
}

impl IacTool {
    pub const ALL: [IacTool; 3] = [IacTool::Terraform, IacTool::Ansible, IacTool::Kubernetes];

    pub fn as_str(&self) -> &'static str {
        match self {
            IacTool::Terraform => "terraform",
            IacTool::Ansible => "ansible",
            IacTool::Kubernetes => "kubernetes",
        }
    }
}

impl fmt::Display for IacTool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for IacTool {
    type Err = ProvisioError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "terraform" | "tf" => Ok(IacTool::Terraform),
            "ansible" => Ok(IacTool::Ansible),
            "kubernetes" | "k8s" => Ok(IacTool::Kubernetes),
            other => Err(ProvisioError::UnsupportedTool(other.to_string())),
        }
    }
}

// ── IaC versions ───────────────────────────────────────────────────

/// Outcome of the heuristic source check run when a version is stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationStatus {
    /// No heuristic is defined for the tool.
    Pending,
    Valid,
    Invalid,
}

impl ValidationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ValidationStatus::Pending => "pending",
            ValidationStatus::Valid => "valid",
            ValidationStatus::Invalid => "invalid",
        }
    }
}

/// Who produced an IaC version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Provenance {
    /// Generated by the system from a design.
    System,
    /// Produced by modifying an earlier version with a user prompt.
    UserPrompt,
}

impl Provenance {
    pub fn as_str(&self) -> &'static str {
        match self {
            Provenance::System => "system",
            Provenance::UserPrompt => "user_prompt",
        }
    }
}

// ── Designs ────────────────────────────────────────────────────────

/// Administrative status of an infrastructure design.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DesignStatus {
    #[default]
    Draft,
    Approved,
    Deployed,
}

impl DesignStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DesignStatus::Draft => "draft",
            DesignStatus::Approved => "approved",
            DesignStatus::Deployed => "deployed",
        }
    }
}

/// Where a design is meant to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DesignType {
    #[serde(rename = "onprem")]
    OnPrem,
    #[default]
    Cloud,
    Hybrid,
}

impl DesignType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DesignType::OnPrem => "onprem",
            DesignType::Cloud => "cloud",
            DesignType::Hybrid => "hybrid",
        }
    }
}

impl FromStr for DesignType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "onprem" | "on-prem" => Ok(DesignType::OnPrem),
            "cloud" => Ok(DesignType::Cloud),
            "hybrid" => Ok(DesignType::Hybrid),
            other => Err(format!("unknown design type: {other}")),
        }
    }
}

// ── Deployments ────────────────────────────────────────────────────

/// Lifecycle status of a deployment record.
///
/// ```text
/// pending ──start──▶ deploying ──complete──▶ success ──rollback──▶ rolled_back
///                              └─────────▶ failed    └─(failure)─▶ failed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeploymentStatus {
    Pending,
    Deploying,
    Success,
    Failed,
    RolledBack,
}

impl DeploymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeploymentStatus::Pending => "pending",
            DeploymentStatus::Deploying => "deploying",
            DeploymentStatus::Success => "success",
            DeploymentStatus::Failed => "failed",
            DeploymentStatus::RolledBack => "rolled_back",
        }
    }

    /// Whether the orchestrator will never move this status on its own.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            DeploymentStatus::Success | DeploymentStatus::Failed | DeploymentStatus::RolledBack
        )
    }
}

impl fmt::Display for DeploymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DeploymentStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "pending" => Ok(DeploymentStatus::Pending),
            "deploying" => Ok(DeploymentStatus::Deploying),
            "success" => Ok(DeploymentStatus::Success),
            "failed" => Ok(DeploymentStatus::Failed),
            "rolled_back" => Ok(DeploymentStatus::RolledBack),
            other => Err(format!("unknown deployment status: {other}")),
        }
    }
}

/// Current unix time in seconds.
pub fn epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
