//! netgrid-api — REST API and cluster protocol core.
//!
//! Provides axum route handlers for the network lifecycle: list,
//! create (single-member and two-phase clustered), get, update, patch,
//! rename, delete, leases and state.
//!
//! # API Routes
//!
//! | Method | Path | Description |
//! |---|---|---|
//! | GET | `/1.0/networks` | List networks (URLs or records) |
//! | POST | `/1.0/networks` | Create a network |
//! | GET | `/1.0/networks/{name}` | Get one network (+ ETag) |
//! | PUT | `/1.0/networks/{name}` | Replace network config |
//! | PATCH | `/1.0/networks/{name}` | Partially update network config |
//! | POST | `/1.0/networks/{name}` | Rename a network |
//! | DELETE | `/1.0/networks/{name}` | Delete a network |
//! | GET | `/1.0/networks/{name}/leases` | DHCP leases |
//! | GET | `/1.0/networks/{name}/state` | Interface state |
//!
//! Query params: `project`, `all-projects`, `target`, `filter`,
//! `recursion`. Cluster sub-requests are recognized by User-Agent.

pub mod auth;
pub mod etag;
pub mod events;
pub mod network;
pub mod networks;
pub mod project;
pub mod response;

#[cfg(test)]
pub(crate) mod testutil;

use std::sync::Arc;

use axum::routing::get;
use axum::Router;
use tokio::sync::Mutex;

use netgrid_catalog::Catalog;
use netgrid_cluster::ClusterEnv;
use netgrid_driver::{Datapath, DriverContext, UsageProvider};

pub use auth::{AllowAll, Authorizer};
pub use events::{EventBus, LifecycleEvent};
pub use response::{ApiError, ApiResult};

/// Shared state behind every handler: the catalog, the node-local
/// actuation seams and the create-serialisation lock.
#[derive(Clone)]
pub struct Controller {
    pub catalog: Catalog,
    pub datapath: Arc<dyn Datapath>,
    pub usage: Arc<dyn UsageProvider>,
    pub cluster: Arc<ClusterEnv>,
    pub authorizer: Arc<dyn Authorizer>,
    pub events: EventBus,
    /// Serialises the entirety of the create handler so concurrent
    /// creates cannot race on pending-row insertion.
    create_lock: Arc<Mutex<()>>,
}

impl Controller {
    pub fn new(
        catalog: Catalog,
        datapath: Arc<dyn Datapath>,
        usage: Arc<dyn UsageProvider>,
        cluster: Arc<ClusterEnv>,
        authorizer: Arc<dyn Authorizer>,
        events: EventBus,
    ) -> Self {
        Self {
            catalog,
            datapath,
            usage,
            cluster,
            authorizer,
            events,
            create_lock: Arc::new(Mutex::new(())),
        }
    }

    /// Handles every driver call site needing the shared seams.
    pub fn driver_ctx(&self) -> DriverContext {
        DriverContext {
            catalog: self.catalog.clone(),
            datapath: self.datapath.clone(),
            usage: self.usage.clone(),
            cluster: self.cluster.clone(),
        }
    }

    /// Name of the local cluster member.
    pub fn local_member(&self) -> &str {
        self.cluster.local_member()
    }

    /// Whether this daemon is part of a multi-member cluster.
    pub fn clustered(&self) -> ApiResult<bool> {
        Ok(self.catalog.member_count()? > 1)
    }

    pub(crate) fn create_lock(&self) -> Arc<Mutex<()>> {
        self.create_lock.clone()
    }
}

/// Build the complete network API router.
pub fn build_router(controller: Controller) -> Router {
    Router::new()
        .route(
            "/1.0/networks",
            get(networks::list_networks).post(networks::create_network),
        )
        .route(
            "/1.0/networks/{name}",
            get(network::get_network)
                .put(network::update_network)
                .patch(network::patch_network)
                .post(network::rename_network)
                .delete(network::delete_network),
        )
        .route("/1.0/networks/{name}/leases", get(network::network_leases))
        .route("/1.0/networks/{name}/state", get(network::network_state))
        .with_state(controller)
}
