//! netgrid-catalog — redb-backed gateway to the replicated network catalog.
//!
//! Holds the canonical record of every managed network: the global row,
//! per-member local status rows, global and per-member config fragments,
//! cluster membership, projects and node-local warnings. All values are
//! JSON-serialized into redb's `&[u8]` value columns; multi-step
//! operations run inside a single write transaction.

pub mod error;
pub mod node_config;
pub mod store;
pub mod tables;
pub mod types;
pub mod warnings;

pub use error::{CatalogError, CatalogResult};
pub use node_config::{is_node_specific, strip_node_specific};
pub use store::{Catalog, NetworkView};
pub use types::*;
pub use warnings::{WarningKind, WarningRecord};
