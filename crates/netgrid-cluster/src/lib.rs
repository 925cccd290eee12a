//! netgrid-cluster — peer RPC and notification fan-out.
//!
//! Cluster operations (two-phase create, update, delete) fan sub-requests
//! out to peer members over the same REST surface clients use. Peers
//! recognize these sub-requests by the notification User-Agent and skip
//! their own fan-out. The `MemberClient` trait keeps the transport
//! swappable so tests can run whole clusters in-process.

pub mod client;
pub mod notifier;

use std::sync::Arc;

use thiserror::Error;

use netgrid_catalog::{Catalog, CatalogError, MemberRecord};

pub use client::{HttpClientFactory, HttpMemberClient, MemberClient, MemberClientFactory};
pub use notifier::{Notifier, NotifyScope};

/// Result type alias for cluster operations.
pub type ClusterResult<T> = Result<T, ClusterError>;

/// Errors from peer communication and fan-out.
#[derive(Debug, Error)]
pub enum ClusterError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("peer {member}: {message}")]
    Peer { member: String, message: String },

    #[error(transparent)]
    Catalog(#[from] CatalogError),
}

/// This member's identity and the transport used to reach its peers.
#[derive(Clone)]
pub struct ClusterEnv {
    local_member: String,
    factory: Arc<dyn MemberClientFactory>,
}

impl ClusterEnv {
    pub fn new(local_member: &str, factory: Arc<dyn MemberClientFactory>) -> Self {
        Self {
            local_member: local_member.to_string(),
            factory,
        }
    }

    /// Name of the local cluster member.
    pub fn local_member(&self) -> &str {
        &self.local_member
    }

    /// Client scoped to one member.
    pub fn client_for(&self, member: &MemberRecord) -> Arc<dyn MemberClient> {
        self.factory.client(member)
    }

    /// Build a notifier over the current membership view, excluding the
    /// local member.
    pub fn notifier(&self, catalog: &Catalog, scope: NotifyScope) -> ClusterResult<Notifier> {
        let members = catalog
            .list_members()?
            .into_iter()
            .filter(|m| m.name != self.local_member)
            .filter(|m| match scope {
                NotifyScope::All => true,
                NotifyScope::Alive => m.alive,
            })
            .collect();
        Ok(Notifier::new(members, self.factory.clone()))
    }
}
