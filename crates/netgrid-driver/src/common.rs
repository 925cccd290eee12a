//! Behavior shared by every driver: accessors over the loaded record,
//! update persistence and peer fan-out, rename, usage checks and
//! datapath state reads.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::debug;

use netgrid_catalog::{strip_node_specific, NetworkView};
use netgrid_cluster::NotifyScope;
use netgrid_core::{ClientType, NetworkLease, NetworkPut, NetworkState, NetworkStatus};

use crate::{DriverContext, DriverResult};

/// The loaded state of one network, scoped to the local member.
#[derive(Debug, Clone)]
pub struct NetworkData {
    pub id: u64,
    pub project: String,
    pub name: String,
    pub network_type: String,
    pub description: String,
    pub status: NetworkStatus,
    pub local_status: NetworkStatus,
    /// Global config merged with the local member's fragment.
    pub config: HashMap<String, String>,
    pub locations: Vec<String>,
}

impl NetworkData {
    /// Placeholder data for type-level operations (validate name, fill
    /// defaults) before any record exists.
    pub fn empty(network_type: &str) -> Self {
        Self {
            id: 0,
            project: String::new(),
            name: String::new(),
            network_type: network_type.to_string(),
            description: String::new(),
            status: NetworkStatus::Unknown,
            local_status: NetworkStatus::Unknown,
            config: HashMap::new(),
            locations: Vec::new(),
        }
    }

    pub fn from_view(view: NetworkView) -> Self {
        Self {
            id: view.record.id,
            project: view.record.project,
            name: view.record.name,
            network_type: view.record.network_type,
            description: view.record.description,
            status: view.record.status,
            local_status: view.local_status,
            config: view.config,
            locations: view.locations,
        }
    }
}

/// Driver-independent core every driver embeds.
pub struct CommonNetwork {
    ctx: DriverContext,
    data: NetworkData,
}

impl CommonNetwork {
    pub fn new(ctx: DriverContext, data: NetworkData) -> Self {
        Self { ctx, data }
    }

    pub fn data(&self) -> &NetworkData {
        &self.data
    }

    pub fn ctx(&self) -> &DriverContext {
        &self.ctx
    }

    /// Whether this daemon runs as part of a multi-member cluster.
    pub fn clustered(&self) -> DriverResult<bool> {
        Ok(self.ctx.catalog.member_count()? > 1)
    }

    /// Persist an update and fan it out to peers when this member
    /// originated a cluster-wide change. Notifier-classified callers
    /// skip persistence: the originating member already wrote the
    /// catalog.
    pub async fn update(
        &self,
        req: NetworkPut,
        target: Option<&str>,
        client_type: ClientType,
    ) -> DriverResult<()> {
        if client_type != ClientType::Notifier {
            let changed =
                self.data.description != req.description || self.data.config != req.config;
            if changed {
                self.ctx.catalog.update_network(
                    &self.data.project,
                    &self.data.name,
                    self.ctx.cluster.local_member(),
                    &req.description,
                    &req.config,
                )?;
                debug!(
                    project = %self.data.project,
                    network = %self.data.name,
                    "network config updated"
                );
            }
        }

        if target.is_none() && client_type == ClientType::Normal && self.clustered()? {
            let notifier = self
                .ctx
                .cluster
                .notifier(&self.ctx.catalog, NotifyScope::All)?;
            let project = self.data.project.clone();
            let name = self.data.name.clone();
            // Peers re-merge their own member-specific keys; this
            // member's must not travel.
            let peer_req = Arc::new(NetworkPut {
                description: req.description.clone(),
                config: strip_node_specific(&req.config),
            });
            notifier
                .notify(move |_member, client| {
                    let project = project.clone();
                    let name = name.clone();
                    let req = peer_req.clone();
                    Box::pin(async move { client.update_network(&project, &name, &req).await })
                })
                .await?;
        }

        Ok(())
    }

    /// Rename the record and the backing interface (if actuated).
    pub async fn rename(&self, new_name: &str) -> DriverResult<()> {
        if self.ctx.datapath.interface_exists(&self.data.name) {
            self.ctx
                .datapath
                .rename_interface(&self.data.name, new_name)?;
        }
        self.ctx
            .catalog
            .rename_network(&self.data.project, &self.data.name, new_name)?;
        debug!(
            project = %self.data.project,
            old = %self.data.name,
            new = %new_name,
            "network renamed"
        );
        Ok(())
    }

    pub fn is_used(&self, only_managed: bool) -> bool {
        !self
            .ctx
            .usage
            .used_by(&self.data.project, &self.data.name, only_managed)
            .is_empty()
    }

    pub fn used_by(&self) -> Vec<String> {
        self.ctx
            .usage
            .used_by(&self.data.project, &self.data.name, false)
    }

    /// Leases handed out by the local member; empty when the interface
    /// hasn't been actuated here yet.
    pub fn local_leases(&self) -> DriverResult<Vec<NetworkLease>> {
        if !self.ctx.datapath.interface_exists(&self.data.name) {
            return Ok(Vec::new());
        }
        Ok(self.ctx.datapath.leases(&self.data.name)?)
    }

    pub fn interface_state(&self) -> DriverResult<NetworkState> {
        Ok(self.ctx.datapath.interface_state(&self.data.name)?)
    }
}
