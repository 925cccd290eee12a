//! Shared test fixtures for driver tests.

use std::sync::Arc;

use async_trait::async_trait;

use netgrid_catalog::{Catalog, MemberRecord};
use netgrid_cluster::{
    ClusterEnv, ClusterResult, MemberClient, MemberClientFactory,
};
use netgrid_core::{NetworkPut, NetworksPost};

use crate::{DriverContext, MemoryDatapath, MemoryUsage};

/// A member client whose operations all succeed and do nothing.
struct NoopClient;

#[async_trait]
impl MemberClient for NoopClient {
    async fn create_network(&self, _project: &str, _req: &NetworksPost) -> ClusterResult<()> {
        Ok(())
    }

    async fn update_network(
        &self,
        _project: &str,
        _name: &str,
        _req: &NetworkPut,
    ) -> ClusterResult<()> {
        Ok(())
    }

    async fn delete_network(&self, _project: &str, _name: &str) -> ClusterResult<()> {
        Ok(())
    }

    async fn forward(
        &self,
        _method: &str,
        _path: &str,
        _query: &[(String, String)],
        _body: Option<serde_json::Value>,
    ) -> ClusterResult<(u16, serde_json::Value)> {
        Ok((200, serde_json::Value::Null))
    }
}

struct NoopFactory;

impl MemberClientFactory for NoopFactory {
    fn client(&self, _member: &MemberRecord) -> Arc<dyn MemberClient> {
        Arc::new(NoopClient)
    }
}

/// Build a driver context over an in-memory catalog with the given
/// members; the first member is the local one.
pub fn test_context(members: &[&str]) -> (DriverContext, Catalog) {
    let catalog = Catalog::open_in_memory().unwrap();
    for name in members {
        catalog
            .put_member(&MemberRecord {
                name: name.to_string(),
                address: "127.0.0.1:0".to_string(),
                alive: true,
            })
            .unwrap();
    }

    let ctx = DriverContext {
        catalog: catalog.clone(),
        datapath: Arc::new(MemoryDatapath::new()),
        usage: Arc::new(MemoryUsage::new()),
        cluster: Arc::new(ClusterEnv::new(members[0], Arc::new(NoopFactory))),
    };
    (ctx, catalog)
}
