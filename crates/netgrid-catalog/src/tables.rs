//! redb table definitions for the network catalog.
//!
//! Each table uses `&str` keys and `&[u8]` values (JSON-serialized types).
//! Composite keys follow the pattern `{project}/{name}`, `{id}:{member}`
//! or `{id}/{member}`; an empty member segment designates the global
//! config fragment.

use redb::TableDefinition;

/// Network records keyed by `{project}/{name}`.
pub const NETWORKS: TableDefinition<&str, &[u8]> = TableDefinition::new("networks");

/// Per-member local status rows keyed by `{network_id}:{member}`.
pub const NETWORK_NODES: TableDefinition<&str, &[u8]> = TableDefinition::new("network_nodes");

/// Config fragments keyed by `{network_id}/{member}` ("" member = global).
pub const NETWORK_CONFIG: TableDefinition<&str, &[u8]> = TableDefinition::new("network_config");

/// Cluster members keyed by `{name}`.
pub const MEMBERS: TableDefinition<&str, &[u8]> = TableDefinition::new("members");

/// Project records keyed by `{name}`.
pub const PROJECTS: TableDefinition<&str, &[u8]> = TableDefinition::new("projects");

/// Node-local warnings keyed by `{node}:{project}:{entity_type}:{entity_id}:{kind}`.
pub const WARNINGS: TableDefinition<&str, &[u8]> = TableDefinition::new("warnings");

/// Monotonic counters keyed by counter name.
pub const COUNTERS: TableDefinition<&str, u64> = TableDefinition::new("counters");

/// Counter name for network id allocation.
pub const NETWORK_ID_COUNTER: &str = "network_id";
