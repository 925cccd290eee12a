//! In-process cluster fixtures.
//!
//! A whole cluster runs inside one test: every member shares the
//! replicated catalog but owns its local datapath, and the loopback
//! member client dispatches peer sub-requests straight into the target
//! member's handler logic with the notifier client type.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;

use netgrid_catalog::{Catalog, MemberRecord};
use netgrid_cluster::{
    ClusterEnv, ClusterError, ClusterResult, MemberClient, MemberClientFactory,
};
use netgrid_core::{ClientType, NetworkPut, NetworksPost};
use netgrid_driver::{MemoryDatapath, MemoryUsage};

use crate::auth::AllowAll;
use crate::events::EventBus;
use crate::{network, networks, Controller};

/// Registry mapping member names to their controllers.
#[derive(Default)]
pub(crate) struct LoopbackHub {
    controllers: RwLock<HashMap<String, Controller>>,
}

impl LoopbackHub {
    fn controller(&self, member: &str) -> Option<Controller> {
        self.controllers.read().unwrap().get(member).cloned()
    }
}

struct LoopbackClient {
    hub: Arc<LoopbackHub>,
    member: String,
}

impl LoopbackClient {
    fn target(&self) -> ClusterResult<Controller> {
        self.hub
            .controller(&self.member)
            .ok_or_else(|| ClusterError::Transport(format!("no such member {:?}", self.member)))
    }

    fn peer_error(&self, e: crate::ApiError) -> ClusterError {
        ClusterError::Peer {
            member: self.member.clone(),
            message: e.to_string(),
        }
    }
}

#[async_trait]
impl MemberClient for LoopbackClient {
    async fn create_network(&self, project: &str, req: &NetworksPost) -> ClusterResult<()> {
        let ctrl = self.target()?;
        networks::create_network_inner(
            &ctrl,
            Some(project),
            None,
            ClientType::Notifier,
            "notifier",
            req.clone(),
        )
        .await
        .map(|_| ())
        .map_err(|e| self.peer_error(e))
    }

    async fn update_network(
        &self,
        project: &str,
        name: &str,
        req: &NetworkPut,
    ) -> ClusterResult<()> {
        let ctrl = self.target()?;
        network::update_network_inner(
            &ctrl,
            Some(project),
            None,
            name,
            None,
            false,
            ClientType::Notifier,
            "notifier",
            req.clone(),
        )
        .await
        .map_err(|e| self.peer_error(e))
    }

    async fn delete_network(&self, project: &str, name: &str) -> ClusterResult<()> {
        let ctrl = self.target()?;
        network::delete_network_inner(&ctrl, Some(project), name, ClientType::Notifier, "notifier")
            .await
            .map_err(|e| self.peer_error(e))
    }

    async fn forward(
        &self,
        method: &str,
        path: &str,
        query: &[(String, String)],
        _body: Option<serde_json::Value>,
    ) -> ClusterResult<(u16, serde_json::Value)> {
        let ctrl = self.target()?;
        let project = query
            .iter()
            .find(|(k, _)| k == "project")
            .map(|(_, v)| v.as_str());

        // Only the GET forms are forwarded in tests.
        if method == "GET" {
            if let Some(name) = path
                .strip_prefix("/networks/")
                .filter(|rest| !rest.contains('/'))
            {
                return match network::get_network_inner(&ctrl, project, Some(&self.member), name)
                    .await
                {
                    Ok((net, _etag)) => Ok((200, serde_json::to_value(net).unwrap())),
                    Err(e) => Ok((e.status_code().as_u16(), serde_json::Value::Null)),
                };
            }
        }
        Err(ClusterError::Transport(format!(
            "loopback forward unsupported: {method} {path}"
        )))
    }
}

struct LoopbackFactory {
    hub: Arc<LoopbackHub>,
}

impl MemberClientFactory for LoopbackFactory {
    fn client(&self, member: &MemberRecord) -> Arc<dyn MemberClient> {
        Arc::new(LoopbackClient {
            hub: self.hub.clone(),
            member: member.name.clone(),
        })
    }
}

/// A whole in-process cluster.
pub(crate) struct TestCluster {
    pub catalog: Catalog,
    pub usage: Arc<MemoryUsage>,
    hub: Arc<LoopbackHub>,
    datapaths: HashMap<String, Arc<MemoryDatapath>>,
}

impl TestCluster {
    pub fn new(members: &[&str]) -> Self {
        let catalog = Catalog::open_in_memory().unwrap();
        let usage = Arc::new(MemoryUsage::new());
        let hub = Arc::new(LoopbackHub::default());
        let mut datapaths = HashMap::new();

        for name in members {
            catalog
                .put_member(&MemberRecord {
                    name: name.to_string(),
                    address: "127.0.0.1:0".to_string(),
                    alive: true,
                })
                .unwrap();

            let datapath = Arc::new(MemoryDatapath::new());
            let ctrl = Controller::new(
                catalog.clone(),
                datapath.clone(),
                usage.clone(),
                Arc::new(ClusterEnv::new(
                    name,
                    Arc::new(LoopbackFactory { hub: hub.clone() }),
                )),
                Arc::new(AllowAll),
                EventBus::new(),
            );

            hub.controllers
                .write()
                .unwrap()
                .insert(name.to_string(), ctrl);
            datapaths.insert(name.to_string(), datapath);
        }

        Self {
            catalog,
            usage,
            hub,
            datapaths,
        }
    }

    pub fn controller(&self, member: &str) -> Controller {
        self.hub.controller(member).unwrap()
    }

    pub fn datapath(&self, member: &str) -> Arc<MemoryDatapath> {
        self.datapaths[member].clone()
    }
}

/// One-member standalone fixture.
pub(crate) fn standalone() -> TestCluster {
    TestCluster::new(&["a"])
}
