//! StateStore: redb-backed state persistence for Provisio.
//!
//! Provides typed operations over designs, IaC versions, and deployments.
//! All values are JSON-serialized into redb's `&[u8]` value columns. The
//! store supports both on-disk and in-memory backends (the latter for
//! testing).

use std::path::Path;
use std::sync::Arc;

use redb::{Database, ReadableDatabase, ReadableTable};
use tracing::debug;

use provisio_core::{IacTool, ProvisioError, ValidationStatus};

use crate::error::{StateError, StateResult};
use crate::tables::*;
use crate::types::*;

/// Convert any `Display` error into a `StateError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StateError::$variant(e.to_string())
    };
}

/// Thread-safe state store backed by redb.
#[derive(Clone)]
pub struct StateStore {
    db: Arc<Database>,
}

impl StateStore {
    /// Open (or create) a persistent state store at the given path.
    pub fn open(path: &Path) -> StateResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!(?path, "state store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory state store (for testing).
    pub fn open_in_memory() -> StateResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!("in-memory state store opened");
        Ok(store)
    }

    /// Create all tables if they don't exist yet.
    fn ensure_tables(&self) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        txn.open_table(DESIGNS).map_err(map_err!(Table))?;
        txn.open_table(IAC_VERSIONS).map_err(map_err!(Table))?;
        txn.open_table(IAC_VERSION_IDS).map_err(map_err!(Table))?;
        txn.open_table(DEPLOYMENTS).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    // ── Designs ────────────────────────────────────────────────────

    /// Insert or update a design.
    pub fn put_design(&self, design: &InfrastructureDesign) -> StateResult<()> {
        let value = serde_json::to_vec(design).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(DESIGNS).map_err(map_err!(Table))?;
            table
                .insert(design.id.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(design = %design.id, "design stored");
        Ok(())
    }

    /// Get a design by ID.
    pub fn get_design(&self, design_id: &str) -> StateResult<Option<InfrastructureDesign>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(DESIGNS).map_err(map_err!(Table))?;
        match table.get(design_id).map_err(map_err!(Read))? {
            Some(guard) => {
                let design: InfrastructureDesign =
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                Ok(Some(design))
            }
            None => Ok(None),
        }
    }

    /// List all designs.
    pub fn list_designs(&self) -> StateResult<Vec<InfrastructureDesign>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(DESIGNS).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (_, value) = entry.map_err(map_err!(Read))?;
            let design: InfrastructureDesign =
                serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
            results.push(design);
        }
        Ok(results)
    }

    /// Delete a design together with its IaC versions and deployments.
    /// Returns true if the design existed.
    pub fn delete_design(&self, design_id: &str) -> StateResult<bool> {
        let prefix = format!("{design_id}:");
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let existed;
        {
            let mut designs = txn.open_table(DESIGNS).map_err(map_err!(Table))?;
            existed = designs.remove(design_id).map_err(map_err!(Write))?.is_some();

            let mut versions = txn.open_table(IAC_VERSIONS).map_err(map_err!(Table))?;
            let mut doomed: Vec<(String, String)> = Vec::new();
            for entry in versions.iter().map_err(map_err!(Read))? {
                let (key, value) = entry.map_err(map_err!(Read))?;
                if key.value().starts_with(&prefix) {
                    let version: IacVersion =
                        serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
                    doomed.push((key.value().to_string(), version.id));
                }
            }
            let mut ids = txn.open_table(IAC_VERSION_IDS).map_err(map_err!(Table))?;
            for (key, id) in &doomed {
                versions.remove(key.as_str()).map_err(map_err!(Write))?;
                ids.remove(id.as_str()).map_err(map_err!(Write))?;
            }

            let mut deployments = txn.open_table(DEPLOYMENTS).map_err(map_err!(Table))?;
            let mut owned: Vec<String> = Vec::new();
            for entry in deployments.iter().map_err(map_err!(Read))? {
                let (key, value) = entry.map_err(map_err!(Read))?;
                let deployment: Deployment =
                    serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
                if deployment.design_id == design_id {
                    owned.push(key.value().to_string());
                }
            }
            for key in &owned {
                deployments.remove(key.as_str()).map_err(map_err!(Write))?;
            }
            debug!(
                design = %design_id,
                versions = doomed.len(),
                deployments = owned.len(),
                "design cascade delete"
            );
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(existed)
    }

    // ── IaC versions ───────────────────────────────────────────────

    /// Store a new IaC version as the current one for its (design, tool).
    ///
    /// In a single write transaction: allocates `max(version for design) + 1`,
    /// clears `is_current` on the prior current version of the same tool,
    /// and inserts the new version with `is_current = true`.
    pub fn create_iac_version(&self, new: NewIacVersion) -> StateResult<IacVersion> {
        let prefix = format!("{}:", new.design_id);
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let created;
        {
            let designs = txn.open_table(DESIGNS).map_err(map_err!(Table))?;
            if designs
                .get(new.design_id.as_str())
                .map_err(map_err!(Read))?
                .is_none()
            {
                return Err(StateError::NotFound {
                    kind: "design",
                    id: new.design_id,
                });
            }

            let mut versions = txn.open_table(IAC_VERSIONS).map_err(map_err!(Table))?;
            let mut max_version = 0u32;
            let mut demoted: Vec<IacVersion> = Vec::new();
            for entry in versions.iter().map_err(map_err!(Read))? {
                let (key, value) = entry.map_err(map_err!(Read))?;
                if !key.value().starts_with(&prefix) {
                    continue;
                }
                let existing: IacVersion =
                    serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
                max_version = max_version.max(existing.version);
                if existing.is_current && existing.tool == new.tool {
                    demoted.push(existing);
                }
            }

            for mut old in demoted {
                old.is_current = false;
                let value = serde_json::to_vec(&old).map_err(map_err!(Serialize))?;
                versions
                    .insert(old.table_key().as_str(), value.as_slice())
                    .map_err(map_err!(Write))?;
                debug!(design = %old.design_id, version = old.version, "demoted prior current version");
            }

            let version = new.into_version(max_version + 1);
            let key = version.table_key();
            let value = serde_json::to_vec(&version).map_err(map_err!(Serialize))?;
            versions
                .insert(key.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;

            let mut ids = txn.open_table(IAC_VERSION_IDS).map_err(map_err!(Table))?;
            ids.insert(version.id.as_str(), key.as_str())
                .map_err(map_err!(Write))?;
            created = version;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(
            design = %created.design_id,
            tool = %created.tool,
            version = created.version,
            "iac version stored"
        );
        Ok(created)
    }

    /// Get an IaC version by its ID.
    pub fn get_iac_version(&self, version_id: &str) -> StateResult<Option<IacVersion>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let ids = txn.open_table(IAC_VERSION_IDS).map_err(map_err!(Table))?;
        let key = match ids.get(version_id).map_err(map_err!(Read))? {
            Some(guard) => guard.value().to_string(),
            None => return Ok(None),
        };
        let versions = txn.open_table(IAC_VERSIONS).map_err(map_err!(Table))?;
        match versions.get(key.as_str()).map_err(map_err!(Read))? {
            Some(guard) => {
                let version: IacVersion =
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                Ok(Some(version))
            }
            None => Ok(None),
        }
    }

    /// All versions of a design, newest first.
    pub fn list_iac_versions(&self, design_id: &str) -> StateResult<Vec<IacVersion>> {
        let prefix = format!("{design_id}:");
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(IAC_VERSIONS).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (key, value) = entry.map_err(map_err!(Read))?;
            if key.value().starts_with(&prefix) {
                let version: IacVersion =
                    serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
                results.push(version);
            }
        }
        // Keys are zero-padded, so iteration order is ascending by version.
        results.reverse();
        Ok(results)
    }

    /// The current version for (design, tool), if one exists.
    pub fn current_iac_version(
        &self,
        design_id: &str,
        tool: IacTool,
    ) -> StateResult<Option<IacVersion>> {
        Ok(self
            .list_iac_versions(design_id)?
            .into_iter()
            .find(|v| v.is_current && v.tool == tool))
    }

    /// Overwrite the validation fields of a stored version.
    pub fn set_validation(
        &self,
        version_id: &str,
        status: ValidationStatus,
        errors: Vec<String>,
    ) -> StateResult<IacVersion> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let updated;
        {
            let ids = txn.open_table(IAC_VERSION_IDS).map_err(map_err!(Table))?;
            let key = match ids.get(version_id).map_err(map_err!(Read))? {
                Some(guard) => guard.value().to_string(),
                None => {
                    return Err(StateError::NotFound {
                        kind: "iac version",
                        id: version_id.to_string(),
                    });
                }
            };
            let mut versions = txn.open_table(IAC_VERSIONS).map_err(map_err!(Table))?;
            let mut version: IacVersion = match versions.get(key.as_str()).map_err(map_err!(Read))? {
                Some(guard) => serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?,
                None => {
                    return Err(StateError::NotFound {
                        kind: "iac version",
                        id: version_id.to_string(),
                    });
                }
            };
            version.validation_status = status;
            version.validation_errors = errors;
            let value = serde_json::to_vec(&version).map_err(map_err!(Serialize))?;
            versions
                .insert(key.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
            updated = version;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(updated)
    }

    // ── Deployments ────────────────────────────────────────────────

    /// Insert or replace a deployment record.
    pub fn put_deployment(&self, deployment: &Deployment) -> StateResult<()> {
        let value = serde_json::to_vec(deployment).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(DEPLOYMENTS).map_err(map_err!(Table))?;
            table
                .insert(deployment.id.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(deployment = %deployment.id, status = %deployment.status, "deployment stored");
        Ok(())
    }

    /// Get a deployment by ID.
    pub fn get_deployment(&self, deployment_id: &str) -> StateResult<Option<Deployment>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(DEPLOYMENTS).map_err(map_err!(Table))?;
        match table.get(deployment_id).map_err(map_err!(Read))? {
            Some(guard) => {
                let deployment: Deployment =
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                Ok(Some(deployment))
            }
            None => Ok(None),
        }
    }

    /// All deployments of a design, oldest first.
    pub fn list_deployments_for_design(&self, design_id: &str) -> StateResult<Vec<Deployment>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(DEPLOYMENTS).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (_, value) = entry.map_err(map_err!(Read))?;
            let deployment: Deployment =
                serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
            if deployment.design_id == design_id {
                results.push(deployment);
            }
        }
        results.sort_by_key(|d| d.created_at);
        Ok(results)
    }

    /// Read, mutate, and write back a deployment in one write transaction.
    ///
    /// If `f` returns an error the transaction is aborted and nothing is
    /// written; the error comes back as `StateError::Rejected`.
    pub fn modify_deployment<F>(&self, deployment_id: &str, f: F) -> StateResult<Deployment>
    where
        F: FnOnce(&mut Deployment) -> Result<(), ProvisioError>,
    {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let updated;
        {
            let mut table = txn.open_table(DEPLOYMENTS).map_err(map_err!(Table))?;
            let mut deployment: Deployment =
                match table.get(deployment_id).map_err(map_err!(Read))? {
                    Some(guard) => {
                        serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?
                    }
                    None => {
                        return Err(StateError::NotFound {
                            kind: "deployment",
                            id: deployment_id.to_string(),
                        });
                    }
                };
            f(&mut deployment).map_err(|e| StateError::Rejected(Box::new(e)))?;
            let value = serde_json::to_vec(&deployment).map_err(map_err!(Serialize))?;
            table
                .insert(deployment_id, value.as_slice())
                .map_err(map_err!(Write))?;
            updated = deployment;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(deployment = %deployment_id, status = %updated.status, "deployment modified");
        Ok(updated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use provisio_core::{DeploymentStatus, DesignType, Provenance, Variables};

    fn test_design(store: &StateStore) -> InfrastructureDesign {
        let design = InfrastructureDesign::new(
            DesignType::Cloud,
            serde_json::json!({"components": [{"name": "web", "type": "web_server"}]}),
        );
        store.put_design(&design).unwrap();
        design
    }

    fn new_version(design_id: &str, tool: IacTool, source: &str) -> NewIacVersion {
        NewIacVersion {
            design_id: design_id.to_string(),
            tool,
            source: source.to_string(),
            validation_status: ValidationStatus::Pending,
            validation_errors: Vec::new(),
            created_by: Provenance::System,
        }
    }

    // ── Design CRUD ────────────────────────────────────────────────

    #[test]
    fn design_put_and_get() {
        let store = StateStore::open_in_memory().unwrap();
        let design = test_design(&store);

        let retrieved = store.get_design(&design.id).unwrap();
        assert_eq!(retrieved, Some(design));
    }

    #[test]
    fn design_get_nonexistent_returns_none() {
        let store = StateStore::open_in_memory().unwrap();
        assert!(store.get_design("nope").unwrap().is_none());
    }

    #[test]
    fn design_delete_cascades() {
        let store = StateStore::open_in_memory().unwrap();
        let design = test_design(&store);
        let other = test_design(&store);
        let v1 = store
            .create_iac_version(new_version(&design.id, IacTool::Terraform, "a"))
            .unwrap();
        store
            .create_iac_version(new_version(&other.id, IacTool::Terraform, "b"))
            .unwrap();
        store
            .put_deployment(&Deployment::pending(&v1, Variables::new()))
            .unwrap();

        assert!(store.delete_design(&design.id).unwrap());
        assert!(store.list_iac_versions(&design.id).unwrap().is_empty());
        assert!(store.get_iac_version(&v1.id).unwrap().is_none());
        assert!(store.list_deployments_for_design(&design.id).unwrap().is_empty());
        // Other design untouched.
        assert_eq!(store.list_iac_versions(&other.id).unwrap().len(), 1);
        assert!(!store.delete_design(&design.id).unwrap());
    }

    // ── IaC versions ───────────────────────────────────────────────

    #[test]
    fn version_requires_existing_design() {
        let store = StateStore::open_in_memory().unwrap();
        let err = store
            .create_iac_version(new_version("missing", IacTool::Terraform, "x"))
            .unwrap_err();
        assert!(matches!(err, StateError::NotFound { kind: "design", .. }));
    }

    #[test]
    fn versions_increment_and_flip_current() {
        let store = StateStore::open_in_memory().unwrap();
        let design = test_design(&store);

        let v1 = store
            .create_iac_version(new_version(&design.id, IacTool::Terraform, "one"))
            .unwrap();
        let v2 = store
            .create_iac_version(new_version(&design.id, IacTool::Terraform, "two"))
            .unwrap();

        assert_eq!(v1.version, 1);
        assert_eq!(v2.version, 2);
        assert!(v2.is_current);
        assert!(!store.get_iac_version(&v1.id).unwrap().unwrap().is_current);

        let current = store
            .current_iac_version(&design.id, IacTool::Terraform)
            .unwrap()
            .unwrap();
        assert_eq!(current.id, v2.id);
    }

    #[test]
    fn exactly_one_current_after_many_creations() {
        let store = StateStore::open_in_memory().unwrap();
        let design = test_design(&store);

        for i in 0..12 {
            store
                .create_iac_version(new_version(&design.id, IacTool::Terraform, &format!("v{i}")))
                .unwrap();
        }

        let all = store.list_iac_versions(&design.id).unwrap();
        let current: Vec<_> = all.iter().filter(|v| v.is_current).collect();
        assert_eq!(current.len(), 1);
        assert_eq!(current[0].version, 12);
    }

    #[test]
    fn current_flag_is_scoped_per_tool() {
        let store = StateStore::open_in_memory().unwrap();
        let design = test_design(&store);

        let tf = store
            .create_iac_version(new_version(&design.id, IacTool::Terraform, "tf"))
            .unwrap();
        let ans = store
            .create_iac_version(new_version(&design.id, IacTool::Ansible, "ans"))
            .unwrap();

        // Numbers are allocated per design, the flag per (design, tool).
        assert_eq!(ans.version, 2);
        assert!(store.get_iac_version(&tf.id).unwrap().unwrap().is_current);
        assert_eq!(
            store
                .current_iac_version(&design.id, IacTool::Ansible)
                .unwrap()
                .unwrap()
                .id,
            ans.id
        );
    }

    #[test]
    fn list_is_newest_first_past_nine() {
        let store = StateStore::open_in_memory().unwrap();
        let design = test_design(&store);
        for i in 0..11 {
            store
                .create_iac_version(new_version(&design.id, IacTool::Terraform, &i.to_string()))
                .unwrap();
        }
        let numbers: Vec<u32> = store
            .list_iac_versions(&design.id)
            .unwrap()
            .iter()
            .map(|v| v.version)
            .collect();
        assert_eq!(numbers, (1..=11).rev().collect::<Vec<_>>());
    }

    #[test]
    fn set_validation_updates_fields_only() {
        let store = StateStore::open_in_memory().unwrap();
        let design = test_design(&store);
        let v1 = store
            .create_iac_version(new_version(&design.id, IacTool::Terraform, "src"))
            .unwrap();

        let updated = store
            .set_validation(&v1.id, ValidationStatus::Invalid, vec!["bad".to_string()])
            .unwrap();
        assert_eq!(updated.validation_status, ValidationStatus::Invalid);
        assert_eq!(updated.source, "src");
        assert_eq!(updated.version, 1);
        assert!(updated.is_current);

        let err = store
            .set_validation("nope", ValidationStatus::Valid, Vec::new())
            .unwrap_err();
        assert!(matches!(err, StateError::NotFound { .. }));
    }

    // ── Deployments ────────────────────────────────────────────────

    #[test]
    fn modify_deployment_applies_closure() {
        let store = StateStore::open_in_memory().unwrap();
        let design = test_design(&store);
        let v1 = store
            .create_iac_version(new_version(&design.id, IacTool::Terraform, "src"))
            .unwrap();
        let dep = Deployment::pending(&v1, Variables::new());
        store.put_deployment(&dep).unwrap();

        let updated = store
            .modify_deployment(&dep.id, |d| {
                d.status = DeploymentStatus::Deploying;
                d.started_at = Some(42);
                Ok(())
            })
            .unwrap();
        assert_eq!(updated.status, DeploymentStatus::Deploying);
        assert_eq!(
            store.get_deployment(&dep.id).unwrap().unwrap().started_at,
            Some(42)
        );
    }

    #[test]
    fn modify_deployment_rejection_writes_nothing() {
        let store = StateStore::open_in_memory().unwrap();
        let design = test_design(&store);
        let v1 = store
            .create_iac_version(new_version(&design.id, IacTool::Terraform, "src"))
            .unwrap();
        let dep = Deployment::pending(&v1, Variables::new());
        store.put_deployment(&dep).unwrap();

        let err = store
            .modify_deployment(&dep.id, |d| {
                d.status = DeploymentStatus::Failed;
                Err(ProvisioError::invalid_state(
                    d.id.clone(),
                    "complete",
                    DeploymentStatus::Pending,
                ))
            })
            .unwrap_err();
        assert!(matches!(
            ProvisioError::from(err),
            ProvisioError::InvalidState { .. }
        ));
        assert_eq!(
            store.get_deployment(&dep.id).unwrap().unwrap().status,
            DeploymentStatus::Pending
        );
    }

    #[test]
    fn modify_missing_deployment_is_not_found() {
        let store = StateStore::open_in_memory().unwrap();
        let err = store.modify_deployment("ghost", |_| Ok(())).unwrap_err();
        assert!(matches!(
            ProvisioError::from(err),
            ProvisioError::NotFound { kind: "deployment", .. }
        ));
    }

    // ── Persistence (on-disk) ──────────────────────────────────────

    #[test]
    fn persistence_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("test.redb");

        let design_id = {
            let store = StateStore::open(&db_path).unwrap();
            let design = test_design(&store);
            store
                .create_iac_version(new_version(&design.id, IacTool::Terraform, "persisted"))
                .unwrap();
            design.id
        };

        let store = StateStore::open(&db_path).unwrap();
        let current = store
            .current_iac_version(&design_id, IacTool::Terraform)
            .unwrap()
            .unwrap();
        assert_eq!(current.source, "persisted");
    }
}
