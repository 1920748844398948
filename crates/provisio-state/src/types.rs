//! Domain types for the Provisio state store.
//!
//! These types represent the persisted state of infrastructure designs,
//! IaC version snapshots, and deployment attempts. All types are
//! serializable to/from JSON for storage in redb tables.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use provisio_core::{
    DeploymentId, DeploymentStatus, DesignId, DesignStatus, DesignType, IacTool, Provenance,
    ValidationStatus, Variables, VersionId, epoch_secs,
};

// ── Design ─────────────────────────────────────────────────────────

/// A target architecture for which IaC can be generated.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InfrastructureDesign {
    pub id: DesignId,
    /// Requirement this design was derived from, if any.
    pub requirement_id: Option<String>,
    pub design_type: DesignType,
    /// Cloud provider tag ("aws", "gcp", "onprem", ...).
    pub provider: Option<String>,
    /// Components, networking, storage, monitoring.
    pub architecture: serde_json::Value,
    pub status: DesignStatus,
    pub created_at: u64,
    pub updated_at: u64,
}

impl InfrastructureDesign {
    pub fn new(design_type: DesignType, architecture: serde_json::Value) -> Self {
        let now = epoch_secs();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            requirement_id: None,
            design_type,
            provider: None,
            architecture,
            status: DesignStatus::Draft,
            created_at: now,
            updated_at: now,
        }
    }
}

// ── IaC version ────────────────────────────────────────────────────

/// One immutable snapshot of IaC source for a design.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IacVersion {
    pub id: VersionId,
    pub design_id: DesignId,
    pub tool: IacTool,
    /// Strictly increasing per design, starting at 1.
    pub version: u32,
    pub source: String,
    /// SHA-256 of `source`, hex encoded.
    pub digest: String,
    pub validation_status: ValidationStatus,
    pub validation_errors: Vec<String>,
    pub is_current: bool,
    pub created_by: Provenance,
    pub created_at: u64,
}

impl IacVersion {
    /// Build the composite key for the versions table.
    pub fn table_key(&self) -> String {
        version_key(&self.design_id, self.version)
    }
}

/// Input for a new IaC version; number and current flag are assigned by the store.
#[derive(Debug, Clone)]
pub struct NewIacVersion {
    pub design_id: DesignId,
    pub tool: IacTool,
    pub source: String,
    pub validation_status: ValidationStatus,
    pub validation_errors: Vec<String>,
    pub created_by: Provenance,
}

impl NewIacVersion {
    pub(crate) fn into_version(self, version: u32) -> IacVersion {
        let digest = source_digest(&self.source);
        IacVersion {
            id: uuid::Uuid::new_v4().to_string(),
            design_id: self.design_id,
            tool: self.tool,
            version,
            source: self.source,
            digest,
            validation_status: self.validation_status,
            validation_errors: self.validation_errors,
            is_current: true,
            created_by: self.created_by,
            created_at: epoch_secs(),
        }
    }
}

pub(crate) fn version_key(design_id: &str, version: u32) -> String {
    format!("{design_id}:{version:010}")
}

/// Hex SHA-256 of an IaC source text.
pub fn source_digest(source: &str) -> String {
    hex::encode(Sha256::digest(source.as_bytes()))
}

// ── Deployment ─────────────────────────────────────────────────────

/// One execution attempt of a specific IaC version.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Deployment {
    pub id: DeploymentId,
    pub design_id: DesignId,
    pub iac_version_id: VersionId,
    /// Tool of the referenced version, recorded for rollback.
    pub tool: IacTool,
    pub status: DeploymentStatus,
    /// Append-only log across pipeline steps and transitions.
    pub log: String,
    /// Variables materialized alongside the source.
    #[serde(default)]
    pub variables: Variables,
    /// Set only on entering `deploying`.
    pub started_at: Option<u64>,
    /// Set only on entering a terminal status.
    pub completed_at: Option<u64>,
    pub created_at: u64,
    pub updated_at: u64,
    /// Workspace left on disk by the last run, if retained.
    #[serde(default)]
    pub workspace_path: Option<String>,
    /// `terraform.tfstate` captured after the last Terraform run.
    #[serde(default)]
    pub terraform_state: Option<String>,
}

impl Deployment {
    /// A fresh `pending` deployment of `version`.
    pub fn pending(version: &IacVersion, variables: Variables) -> Self {
        let now = epoch_secs();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            design_id: version.design_id.clone(),
            iac_version_id: version.id.clone(),
            tool: version.tool,
            status: DeploymentStatus::Pending,
            log: String::new(),
            variables,
            started_at: None,
            completed_at: None,
            created_at: now,
            updated_at: now,
            workspace_path: None,
            terraform_state: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_key_sorts_numerically() {
        assert!(version_key("d", 9) < version_key("d", 10));
        assert!(version_key("d", 99) < version_key("d", 100));
    }

    #[test]
    fn digest_is_stable() {
        assert_eq!(source_digest("a"), source_digest("a"));
        assert_ne!(source_digest("a"), source_digest("b"));
        assert_eq!(source_digest("").len(), 64);
    }
}
