//! Error types for the catalog gateway.

use thiserror::Error;

/// Result type alias for catalog operations.
pub type CatalogResult<T> = Result<T, CatalogError>;

/// Errors that can occur during catalog operations.
#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("failed to open catalog: {0}")]
    Open(String),

    #[error("transaction error: {0}")]
    Transaction(String),

    #[error("table error: {0}")]
    Table(String),

    #[error("read error: {0}")]
    Read(String),

    #[error("write error: {0}")]
    Write(String),

    #[error("serialization error: {0}")]
    Serialize(String),

    #[error("deserialization error: {0}")]
    Deserialize(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("{0}")]
    AlreadyDefined(String),

    #[error("{0}")]
    Conflict(String),
}

impl CatalogError {
    /// Whether this error is a not-found condition.
    pub fn is_not_found(&self) -> bool {
        matches!(self, CatalogError::NotFound(_))
    }

    /// Whether this error reports an already-defined pending row.
    pub fn is_already_defined(&self) -> bool {
        matches!(self, CatalogError::AlreadyDefined(_))
    }
}
