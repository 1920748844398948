//! Design lookup.

use provisio_core::ProvisioResult;
use provisio_state::{InfrastructureDesign, StateStore};

/// Resolves a design id to its record.
pub trait DesignResolver: Send + Sync {
    fn get_design(&self, design_id: &str) -> ProvisioResult<Option<InfrastructureDesign>>;
}

impl DesignResolver for StateStore {
    fn get_design(&self, design_id: &str) -> ProvisioResult<Option<InfrastructureDesign>> {
        Ok(StateStore::get_design(self, design_id)?)
    }
}
