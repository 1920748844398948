//! redb table definitions for the Provisio state store.
//!
//! Each table uses `&str` keys and `&[u8]` values (JSON-serialized domain types).

use redb::TableDefinition;

/// Infrastructure designs keyed by `{design_id}`.
pub const DESIGNS: TableDefinition<&str, &[u8]> = TableDefinition::new("designs");

/// IaC versions keyed by `{design_id}:{version:010}`.
pub const IAC_VERSIONS: TableDefinition<&str, &[u8]> = TableDefinition::new("iac_versions");

/// Version id → composite key in `IAC_VERSIONS`.
pub const IAC_VERSION_IDS: TableDefinition<&str, &str> = TableDefinition::new("iac_version_ids");

/// Deployment records keyed by `{deployment_id}`.
pub const DEPLOYMENTS: TableDefinition<&str, &[u8]> = TableDefinition::new("deployments");
