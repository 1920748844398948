//! IaC version store.
//!
//! Wraps the redb history with heuristic validation and a per-(design, tool)
//! async lock around creation. The demote/promote step itself is a single
//! redb write transaction.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use provisio_core::{DesignId, IacTool, Provenance, ProvisioError, ProvisioResult};
use provisio_state::{IacVersion, NewIacVersion, StateStore};
use tracing::{info, warn};

use crate::diff::{CodeDiff, code_diff};
use crate::validate::{ValidationOutcome, ValidatorRegistry};

type CreationLocks = HashMap<(DesignId, IacTool), Arc<tokio::sync::Mutex<()>>>;

pub struct VersionStore {
    state: StateStore,
    validators: ValidatorRegistry,
    locks: Mutex<CreationLocks>,
}

impl VersionStore {
    pub fn new(state: StateStore) -> Self {
        Self::with_validators(state, ValidatorRegistry::default())
    }

    pub fn with_validators(state: StateStore, validators: ValidatorRegistry) -> Self {
        Self {
            state,
            validators,
            locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn state(&self) -> &StateStore {
        &self.state
    }

    fn creation_lock(&self, design_id: &str, tool: IacTool) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        locks
            .entry((design_id.to_string(), tool))
            .or_default()
            .clone()
    }

    /// Store `source` as the new current version for (design, tool).
    ///
    /// Fails with `NotFound` if the design does not exist.
    pub async fn create(
        &self,
        design_id: &str,
        tool: IacTool,
        source: &str,
        created_by: Provenance,
    ) -> ProvisioResult<IacVersion> {
        let lock = self.creation_lock(design_id, tool);
        let _guard = lock.lock().await;

        let outcome = self.validators.validate(source, tool);
        if !outcome.errors.is_empty() {
            warn!(design = %design_id, %tool, errors = ?outcome.errors, "heuristic validation failed");
        }
        let version = self.state.create_iac_version(NewIacVersion {
            design_id: design_id.to_string(),
            tool,
            source: source.to_string(),
            validation_status: outcome.status,
            validation_errors: outcome.errors,
            created_by,
        })?;

        info!(
            design = %design_id,
            %tool,
            version = version.version,
            validation = version.validation_status.as_str(),
            created_by = created_by.as_str(),
            "iac version created"
        );
        Ok(version)
    }

    pub fn get(&self, version_id: &str) -> ProvisioResult<IacVersion> {
        self.state
            .get_iac_version(version_id)?
            .ok_or_else(|| ProvisioError::not_found("iac version", version_id))
    }

    /// The unique current version for (design, tool), if any.
    pub fn current(&self, design_id: &str, tool: IacTool) -> ProvisioResult<Option<IacVersion>> {
        Ok(self.state.current_iac_version(design_id, tool)?)
    }

    /// Full history of a design, newest first.
    pub fn list(&self, design_id: &str) -> ProvisioResult<Vec<IacVersion>> {
        Ok(self.state.list_iac_versions(design_id)?)
    }

    pub fn validate(&self, source: &str, tool: IacTool) -> ValidationOutcome {
        self.validators.validate(source, tool)
    }

    /// Line diff from version `from_id` to version `to_id`.
    pub fn diff(&self, from_id: &str, to_id: &str) -> ProvisioResult<CodeDiff> {
        let from = self.get(from_id)?;
        let to = self.get(to_id)?;
        if from.digest == to.digest {
            return Ok(code_diff("", ""));
        }
        Ok(code_diff(&from.source, &to.source))
    }
}
