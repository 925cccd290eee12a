//! netgrid-driver — the driver contract and built-in network drivers.
//!
//! A driver owns the node-local actuation of one network type. Common
//! behavior (accessors, update persistence and fan-out, rename, usage
//! checks, state reads) lives in [`common::CommonNetwork`]; each driver
//! supplies its capability info, config schema and datapath actions.

pub mod bridge;
pub mod common;
pub mod datapath;
pub mod ovn;
pub mod physical;
pub mod usage;

#[cfg(test)]
pub(crate) mod testutil;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use netgrid_catalog::{Catalog, CatalogError};
use netgrid_cluster::{ClusterEnv, ClusterError};
use netgrid_core::{ClientType, NetworkLease, NetworkPut, NetworkState, NetworkStatus};

pub use common::{CommonNetwork, NetworkData};
pub use datapath::{Datapath, DatapathError, HostDatapath, InterfaceKind, MemoryDatapath};
pub use usage::{MemoryUsage, UsageProvider};

/// Result type alias for driver operations.
pub type DriverResult<T> = Result<T, DriverError>;

/// Errors from driver operations.
#[derive(Debug, Error)]
pub enum DriverError {
    #[error("network not found")]
    NotFound,

    #[error("unknown network type {0:?}")]
    UnknownType(String),

    #[error("invalid network name {0:?}: {1}")]
    InvalidName(String, String),

    #[error("invalid config: {0}")]
    Validation(String),

    #[error(transparent)]
    Catalog(#[from] CatalogError),

    #[error(transparent)]
    Datapath(#[from] DatapathError),

    #[error(transparent)]
    Cluster(#[from] ClusterError),
}

/// Capabilities of a network type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DriverInfo {
    /// Whether this type can be created in non-default projects.
    pub projects: bool,
    /// Whether this type carries per-member config (and therefore
    /// requires per-member define steps when clustered).
    pub node_specific_config: bool,
}

/// Stable integer tags for the driver contract. The overlay restart
/// sweep matches drivers on the tag rather than the type name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum NetworkKind {
    Bridge = 0,
    Ovn = 3,
    Physical = 4,
}

impl NetworkKind {
    pub fn db_type(&self) -> u32 {
        *self as u32
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            NetworkKind::Bridge => "bridge",
            NetworkKind::Ovn => "ovn",
            NetworkKind::Physical => "physical",
        }
    }
}

/// Shared handles every driver needs.
#[derive(Clone)]
pub struct DriverContext {
    pub catalog: Catalog,
    pub datapath: Arc<dyn Datapath>,
    pub usage: Arc<dyn UsageProvider>,
    pub cluster: Arc<ClusterEnv>,
}

/// The driver contract. Accessors and cluster-wide behavior default to
/// the common implementation; actuation is driver-specific.
#[async_trait]
pub trait Network: Send + Sync {
    fn common(&self) -> &CommonNetwork;

    fn info(&self) -> DriverInfo;

    fn kind(&self) -> NetworkKind;

    /// Integer tag of this driver's type.
    fn db_type(&self) -> u32 {
        self.kind().db_type()
    }

    /// Validate a prospective network name.
    fn validate_name(&self, name: &str) -> DriverResult<()> {
        validate_interface_name(name)
    }

    /// Fill driver defaults into a config in place.
    fn fill_config(&self, config: &mut HashMap<String, String>) -> DriverResult<()> {
        let _ = config;
        Ok(())
    }

    /// Validate a (merged) config.
    fn validate(&self, config: &HashMap<String, String>) -> DriverResult<()>;

    /// Define the network on the local datapath.
    async fn create(&self, client_type: ClientType) -> DriverResult<()>;

    /// Bring the network up. Idempotent.
    async fn start(&self) -> DriverResult<()>;

    /// Bring the network down.
    async fn stop(&self) -> DriverResult<()>;

    /// Remove the network from the local datapath.
    async fn delete(&self, client_type: ClientType) -> DriverResult<()>;

    /// Apply a config update: persist, apply locally, fan out to peers
    /// when this member originated a cluster-wide change.
    async fn update(
        &self,
        req: NetworkPut,
        target: Option<&str>,
        client_type: ClientType,
    ) -> DriverResult<()> {
        self.common().update(req, target, client_type).await
    }

    /// Rename the network (non-clustered only, enforced by the handler).
    async fn rename(&self, new_name: &str) -> DriverResult<()> {
        self.validate_name(new_name)?;
        self.common().rename(new_name).await
    }

    fn is_used(&self, only_managed: bool) -> bool {
        self.common().is_used(only_managed)
    }

    fn used_by(&self) -> Vec<String> {
        self.common().used_by()
    }

    async fn leases(&self, project: &str, client_type: ClientType) -> DriverResult<Vec<NetworkLease>> {
        let _ = (project, client_type);
        self.common().local_leases()
    }

    async fn state(&self) -> DriverResult<NetworkState> {
        self.common().interface_state()
    }

    // ── Accessors ──────────────────────────────────────────────────

    fn id(&self) -> u64 {
        self.common().data().id
    }

    fn name(&self) -> &str {
        &self.common().data().name
    }

    fn project(&self) -> &str {
        &self.common().data().project
    }

    fn network_type(&self) -> &str {
        &self.common().data().network_type
    }

    fn description(&self) -> &str {
        &self.common().data().description
    }

    fn config(&self) -> &HashMap<String, String> {
        &self.common().data().config
    }

    fn status(&self) -> NetworkStatus {
        self.common().data().status
    }

    fn local_status(&self) -> NetworkStatus {
        self.common().data().local_status
    }

    fn locations(&self) -> &[String] {
        &self.common().data().locations
    }

    fn is_managed(&self) -> bool {
        true
    }
}

/// Supported driver type names.
pub const TYPE_BRIDGE: &str = "bridge";
pub const TYPE_OVN: &str = "ovn";
pub const TYPE_PHYSICAL: &str = "physical";

/// Instantiate a driver for a type with no backing record (name
/// validation, capability checks and config defaulting before create).
pub fn load_by_type(ctx: DriverContext, network_type: &str) -> DriverResult<Box<dyn Network>> {
    let data = NetworkData::empty(network_type);
    build(ctx, data)
}

/// Load a network's driver from its catalog record, scoped to the local
/// member's config view.
pub fn load_by_name(
    ctx: DriverContext,
    project: &str,
    name: &str,
) -> DriverResult<Box<dyn Network>> {
    let view = ctx
        .catalog
        .get_network_in_any_state(project, name, ctx.cluster.local_member())
        .map_err(|e| match e {
            CatalogError::NotFound(_) => DriverError::NotFound,
            other => DriverError::Catalog(other),
        })?;

    build(ctx, NetworkData::from_view(view))
}

fn build(ctx: DriverContext, data: NetworkData) -> DriverResult<Box<dyn Network>> {
    let network_type = data.network_type.clone();
    let common = CommonNetwork::new(ctx, data);
    match network_type.as_str() {
        TYPE_BRIDGE => Ok(Box::new(bridge::BridgeNetwork::new(common))),
        TYPE_OVN => Ok(Box::new(ovn::OvnNetwork::new(common))),
        TYPE_PHYSICAL => Ok(Box::new(physical::PhysicalNetwork::new(common))),
        other => Err(DriverError::UnknownType(other.to_string())),
    }
}

/// Shared interface-name rules: non-empty, at most 15 characters, no
/// separators or whitespace, and the `veth` prefix is reserved for
/// instance-side devices.
pub fn validate_interface_name(name: &str) -> DriverResult<()> {
    let invalid = |reason: &str| {
        Err(DriverError::InvalidName(
            name.to_string(),
            reason.to_string(),
        ))
    };

    if name.is_empty() {
        return invalid("name is empty");
    }
    if name.len() > 15 {
        return invalid("name exceeds 15 characters");
    }
    if name.contains('/') || name.contains(':') || name.chars().any(char::is_whitespace) {
        return invalid("name contains invalid characters");
    }
    if name.starts_with("veth") {
        return invalid("the veth prefix is reserved");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interface_name_rules() {
        assert!(validate_interface_name("br0").is_ok());
        assert!(validate_interface_name("").is_err());
        assert!(validate_interface_name("a-very-long-interface-name").is_err());
        assert!(validate_interface_name("br 0").is_err());
        assert!(validate_interface_name("br/0").is_err());
        assert!(validate_interface_name("veth1234").is_err());
    }

    #[test]
    fn kind_db_types_are_stable() {
        assert_eq!(NetworkKind::Bridge.db_type(), 0);
        assert_eq!(NetworkKind::Ovn.db_type(), 3);
        assert_eq!(NetworkKind::Physical.db_type(), 4);
    }

    #[test]
    fn driver_db_type_follows_kind() {
        let (ctx, _) = crate::testutil::test_context(&["a"]);
        let driver = load_by_type(ctx, TYPE_OVN).unwrap();
        assert_eq!(driver.db_type(), NetworkKind::Ovn.db_type());
    }
}
