//! Persisted types for the network catalog.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use netgrid_core::NetworkStatus;

/// The global row for a managed network.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NetworkRecord {
    /// Stable integer id assigned on first catalog insert.
    pub id: u64,
    pub project: String,
    pub name: String,
    #[serde(rename = "type")]
    pub network_type: String,
    pub description: String,
    /// Global status; per-member status lives in the node rows.
    pub status: NetworkStatus,
}

impl NetworkRecord {
    /// Composite key for the networks table.
    pub fn table_key(&self) -> String {
        network_key(&self.project, &self.name)
    }
}

/// Build the networks table key for a project/name pair.
pub fn network_key(project: &str, name: &str) -> String {
    format!("{project}/{name}")
}

/// A per-member local status row.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NetworkNodeRecord {
    pub member: String,
    pub status: NetworkStatus,
}

/// A cluster member as known to the catalog.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MemberRecord {
    pub name: String,
    /// host:port the member's API listens on.
    pub address: String,
    /// Maintained by the daemon's membership wiring; gates NotifyAlive.
    pub alive: bool,
}

/// A project record; config carries feature flags and policy input
/// (`features.networks`, `limits.networks`, `restricted.networks.access`).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProjectRecord {
    pub name: String,
    pub config: HashMap<String, String>,
}

/// A (project, network) pair, used to key startup work lists.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ProjectNetwork {
    pub project: String,
    pub network: String,
}
