//! Node-local warning store.
//!
//! Warnings are keyed by (node, project, entity type, entity id, kind)
//! and carry the latest failure message. Upsert and resolve are both
//! idempotent, so the startup engine can re-raise or clear a warning on
//! every retry tick without churn.

use serde::{Deserialize, Serialize};

use redb::{ReadableDatabase, ReadableTable};

use crate::error::{CatalogError, CatalogResult};
use crate::store::Catalog;
use crate::tables::WARNINGS;

macro_rules! map_err {
    ($variant:ident) => {
        |e| CatalogError::$variant(e.to_string())
    };
}

/// Kinds of warnings the controller raises.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum WarningKind {
    NetworkUnavailable,
}

impl WarningKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            WarningKind::NetworkUnavailable => "network-unavailable",
        }
    }
}

/// Entity types warnings can attach to.
pub const ENTITY_TYPE_NETWORK: &str = "network";

/// A stored warning.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WarningRecord {
    pub node: String,
    pub project: String,
    pub entity_type: String,
    pub entity_id: u64,
    pub kind: WarningKind,
    pub message: String,
    /// Number of times this warning has been raised since last resolve.
    pub count: u64,
}

fn warning_key(node: &str, project: &str, entity_type: &str, entity_id: u64, kind: WarningKind) -> String {
    format!("{node}:{project}:{entity_type}:{entity_id}:{}", kind.as_str())
}

impl Catalog {
    /// Raise or refresh a warning. Repeated upserts bump the counter and
    /// replace the message.
    pub fn upsert_warning(
        &self,
        node: &str,
        project: &str,
        entity_type: &str,
        entity_id: u64,
        kind: WarningKind,
        message: &str,
    ) -> CatalogResult<()> {
        let key = warning_key(node, project, entity_type, entity_id, kind);
        let txn = self.database().begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(WARNINGS).map_err(map_err!(Table))?;
            let count = match table.get(key.as_str()).map_err(map_err!(Read))? {
                Some(guard) => {
                    let existing: WarningRecord = serde_json::from_slice(guard.value())
                        .map_err(map_err!(Deserialize))?;
                    existing.count + 1
                }
                None => 1,
            };
            let warning = WarningRecord {
                node: node.to_string(),
                project: project.to_string(),
                entity_type: entity_type.to_string(),
                entity_id,
                kind,
                message: message.to_string(),
                count,
            };
            let value = serde_json::to_vec(&warning).map_err(map_err!(Serialize))?;
            table
                .insert(key.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    /// Resolve (remove) a warning. A missing warning is not an error.
    pub fn resolve_warning(
        &self,
        node: &str,
        project: &str,
        entity_type: &str,
        entity_id: u64,
        kind: WarningKind,
    ) -> CatalogResult<()> {
        let key = warning_key(node, project, entity_type, entity_id, kind);
        let txn = self.database().begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(WARNINGS).map_err(map_err!(Table))?;
            table.remove(key.as_str()).map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    /// Fetch a single warning, if present.
    pub fn get_warning(
        &self,
        node: &str,
        project: &str,
        entity_type: &str,
        entity_id: u64,
        kind: WarningKind,
    ) -> CatalogResult<Option<WarningRecord>> {
        let key = warning_key(node, project, entity_type, entity_id, kind);
        let txn = self.database().begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(WARNINGS).map_err(map_err!(Table))?;
        match table.get(key.as_str()).map_err(map_err!(Read))? {
            Some(guard) => {
                let warning: WarningRecord =
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                Ok(Some(warning))
            }
            None => Ok(None),
        }
    }

    /// List all warnings raised by a node.
    pub fn list_warnings(&self, node: &str) -> CatalogResult<Vec<WarningRecord>> {
        let prefix = format!("{node}:");
        let txn = self.database().begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(WARNINGS).map_err(map_err!(Table))?;
        let mut warnings = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (key, value) = entry.map_err(map_err!(Read))?;
            if !key.value().starts_with(&prefix) {
                continue;
            }
            let warning: WarningRecord =
                serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
            warnings.push(warning);
        }
        Ok(warnings)
    }
}
