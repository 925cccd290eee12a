//! Physical driver — a network backed by an existing host interface.
//!
//! The parent interface is member-specific by nature, so clustered
//! creation always goes through per-member define steps carrying each
//! member's `parent`.

use std::collections::HashMap;

use async_trait::async_trait;

use netgrid_core::ClientType;

use crate::common::CommonNetwork;
use crate::{DatapathError, DriverError, DriverInfo, DriverResult, Network, NetworkKind};

pub struct PhysicalNetwork {
    common: CommonNetwork,
}

impl PhysicalNetwork {
    pub fn new(common: CommonNetwork) -> Self {
        Self { common }
    }

    fn parent(&self) -> DriverResult<String> {
        match self.config().get("parent") {
            Some(parent) if !parent.is_empty() => Ok(parent.clone()),
            _ => Err(DriverError::Validation(
                "physical network requires a parent interface".to_string(),
            )),
        }
    }
}

#[async_trait]
impl Network for PhysicalNetwork {
    fn common(&self) -> &CommonNetwork {
        &self.common
    }

    fn info(&self) -> DriverInfo {
        DriverInfo {
            projects: false,
            node_specific_config: true,
        }
    }

    fn kind(&self) -> NetworkKind {
        NetworkKind::Physical
    }

    fn validate(&self, config: &HashMap<String, String>) -> DriverResult<()> {
        for (key, value) in config {
            match key.as_str() {
                "parent" => {}
                "mtu" | "vlan" => {
                    value.parse::<u32>().map_err(|_| {
                        DriverError::Validation(format!("key {key:?} must be numeric"))
                    })?;
                }
                _ => {
                    return Err(DriverError::Validation(format!(
                        "unknown config key {key:?} for physical network"
                    )));
                }
            }
        }

        if config.get("parent").map(String::is_empty).unwrap_or(true) {
            return Err(DriverError::Validation(
                "physical network requires a parent interface".to_string(),
            ));
        }

        Ok(())
    }

    async fn create(&self, _client_type: ClientType) -> DriverResult<()> {
        // Nothing to program: the parent interface is adopted, not created.
        self.parent()?;
        Ok(())
    }

    async fn start(&self) -> DriverResult<()> {
        let parent = self.parent()?;
        if !self.common.ctx().datapath.interface_exists(&parent) {
            return Err(DriverError::Datapath(DatapathError::NotFound(parent)));
        }
        Ok(())
    }

    async fn stop(&self) -> DriverResult<()> {
        Ok(())
    }

    async fn delete(&self, _client_type: ClientType) -> DriverResult<()> {
        // The parent interface stays on the host.
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::test_context;
    use crate::{load_by_name, load_by_type, InterfaceKind, MemoryDatapath, TYPE_PHYSICAL};
    use std::sync::Arc;

    #[test]
    fn capabilities() {
        let (ctx, _) = test_context(&["a"]);
        let driver = load_by_type(ctx, TYPE_PHYSICAL).unwrap();
        assert!(!driver.info().projects);
        assert!(driver.info().node_specific_config);
        assert_eq!(driver.kind(), NetworkKind::Physical);
    }

    #[test]
    fn validate_requires_parent() {
        let (ctx, _) = test_context(&["a"]);
        let driver = load_by_type(ctx, TYPE_PHYSICAL).unwrap();

        assert!(driver.validate(&HashMap::new()).is_err());
        assert!(driver
            .validate(&HashMap::from([("parent".to_string(), "eth0".to_string())]))
            .is_ok());
        assert!(driver
            .validate(&HashMap::from([
                ("parent".to_string(), "eth0".to_string()),
                ("vlan".to_string(), "ten".to_string()),
            ]))
            .is_err());
    }

    #[tokio::test]
    async fn start_fails_until_parent_appears() {
        let datapath = Arc::new(MemoryDatapath::new());
        let (mut ctx, catalog) = test_context(&["a"]);
        ctx.datapath = datapath.clone();

        catalog
            .create_network(
                "a",
                "default",
                "phys0",
                "",
                "physical",
                &HashMap::from([("parent".to_string(), "eth9".to_string())]),
            )
            .unwrap();

        let driver = load_by_name(ctx.clone(), "default", "phys0").unwrap();
        assert!(driver.start().await.is_err());

        // The NIC shows up; start now succeeds.
        datapath.add_host_interface("eth9", InterfaceKind::Physical);
        let driver = load_by_name(ctx, "default", "phys0").unwrap();
        driver.start().await.unwrap();
    }
}
