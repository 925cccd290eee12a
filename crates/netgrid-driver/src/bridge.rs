//! Bridge driver — a kernel bridge local to each member.
//!
//! Bridges carry mostly global config but support member-specific
//! external interfaces, so clustered creation goes through per-member
//! define steps like any node-specific type.

use std::collections::HashMap;

use async_trait::async_trait;

use netgrid_core::{ClientType, NetworkPut};

use crate::common::CommonNetwork;
use crate::{DriverError, DriverInfo, DriverResult, Network, NetworkKind};

/// Default MTU when the config doesn't override it.
const DEFAULT_MTU: u32 = 1500;

pub struct BridgeNetwork {
    common: CommonNetwork,
}

impl BridgeNetwork {
    pub fn new(common: CommonNetwork) -> Self {
        Self { common }
    }

    fn mtu(config: &HashMap<String, String>) -> DriverResult<u32> {
        match config.get("mtu") {
            Some(value) => value
                .parse()
                .map_err(|_| DriverError::Validation(format!("invalid mtu {value:?}"))),
            None => Ok(DEFAULT_MTU),
        }
    }
}

#[async_trait]
impl Network for BridgeNetwork {
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
        NetworkKind::Bridge
    }

    fn fill_config(&self, config: &mut HashMap<String, String>) -> DriverResult<()> {
        config
            .entry("ipv4.address".to_string())
            .or_insert_with(|| "auto".to_string());
        config
            .entry("ipv6.address".to_string())
            .or_insert_with(|| "auto".to_string());
        Ok(())
    }

    fn validate(&self, config: &HashMap<String, String>) -> DriverResult<()> {
        for (key, value) in config {
            match key.as_str() {
                "ipv4.address" | "ipv6.address" | "dns.domain" | "bridge.external_interfaces" => {}
                "ipv4.nat" | "ipv6.nat" => {
                    if value != "true" && value != "false" {
                        return Err(DriverError::Validation(format!(
                            "key {key:?} must be true or false"
                        )));
                    }
                }
                "mtu" => {
                    Self::mtu(config)?;
                }
                k if k == "security.acls" || k.starts_with("security.acls.") => {}
                _ => {
                    return Err(DriverError::Validation(format!(
                        "unknown config key {key:?} for bridge network"
                    )));
                }
            }
        }
        Ok(())
    }

    async fn create(&self, _client_type: ClientType) -> DriverResult<()> {
        let mtu = Self::mtu(self.config())?;
        self.common.ctx().datapath.ensure_bridge(self.name(), mtu)?;
        Ok(())
    }

    async fn start(&self) -> DriverResult<()> {
        let datapath = &self.common.ctx().datapath;
        let mtu = Self::mtu(self.config())?;
        datapath.ensure_bridge(self.name(), mtu)?;
        datapath.link_up(self.name())?;
        Ok(())
    }

    async fn stop(&self) -> DriverResult<()> {
        let datapath = &self.common.ctx().datapath;
        if datapath.interface_exists(self.name()) {
            datapath.link_down(self.name())?;
        }
        Ok(())
    }

    async fn delete(&self, _client_type: ClientType) -> DriverResult<()> {
        let datapath = &self.common.ctx().datapath;
        if datapath.interface_exists(self.name()) {
            datapath.remove_interface(self.name())?;
        }
        Ok(())
    }

    async fn update(
        &self,
        req: NetworkPut,
        target: Option<&str>,
        client_type: ClientType,
    ) -> DriverResult<()> {
        // Apply datapath-visible changes before persisting.
        let datapath = &self.common.ctx().datapath;
        if datapath.interface_exists(self.name()) {
            datapath.ensure_bridge(self.name(), Self::mtu(&req.config)?)?;
        }
        self.common.update(req, target, client_type).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::test_context;
    use crate::{load_by_name, load_by_type, Datapath, MemoryDatapath, TYPE_BRIDGE};
    use std::sync::Arc;

    #[test]
    fn capabilities() {
        let (ctx, _) = test_context(&["a"]);
        let driver = load_by_type(ctx, TYPE_BRIDGE).unwrap();
        assert!(!driver.info().projects);
        assert!(driver.info().node_specific_config);
        assert_eq!(driver.kind(), NetworkKind::Bridge);
    }

    #[test]
    fn fill_config_defaults_addresses() {
        let (ctx, _) = test_context(&["a"]);
        let driver = load_by_type(ctx, TYPE_BRIDGE).unwrap();

        let mut config = HashMap::new();
        driver.fill_config(&mut config).unwrap();
        assert_eq!(config.get("ipv4.address").map(String::as_str), Some("auto"));
        assert_eq!(config.get("ipv6.address").map(String::as_str), Some("auto"));

        // Existing values survive.
        let mut config = HashMap::from([("ipv4.address".to_string(), "none".to_string())]);
        driver.fill_config(&mut config).unwrap();
        assert_eq!(config.get("ipv4.address").map(String::as_str), Some("none"));
    }

    #[test]
    fn validate_rejects_unknown_keys_and_bad_values() {
        let (ctx, _) = test_context(&["a"]);
        let driver = load_by_type(ctx, TYPE_BRIDGE).unwrap();

        assert!(driver
            .validate(&HashMap::from([("mtu".to_string(), "1500".to_string())]))
            .is_ok());
        assert!(driver
            .validate(&HashMap::from([("mtu".to_string(), "jumbo".to_string())]))
            .is_err());
        assert!(driver
            .validate(&HashMap::from([("ipv4.nat".to_string(), "yes".to_string())]))
            .is_err());
        assert!(driver
            .validate(&HashMap::from([("flux".to_string(), "1".to_string())]))
            .is_err());
        assert!(driver
            .validate(&HashMap::from([(
                "security.acls.default.ingress.action".to_string(),
                "allow".to_string()
            )]))
            .is_ok());
    }

    #[tokio::test]
    async fn create_start_stop_delete_cycle() {
        let datapath = Arc::new(MemoryDatapath::new());
        let (ctx, catalog) = test_context_with_datapath(&["a"], datapath.clone());
        catalog
            .create_network("a", "default", "br0", "", "bridge", &HashMap::new())
            .unwrap();

        let driver = load_by_name(ctx, "default", "br0").unwrap();
        driver.create(ClientType::Normal).await.unwrap();
        assert!(datapath.interface_exists("br0"));

        driver.start().await.unwrap();
        assert!(datapath.is_up("br0"));

        driver.stop().await.unwrap();
        assert!(!datapath.is_up("br0"));

        driver.delete(ClientType::Normal).await.unwrap();
        assert!(!datapath.interface_exists("br0"));
    }

    #[tokio::test]
    async fn update_persists_description() {
        let (ctx, catalog) = test_context(&["a"]);
        catalog
            .create_network("a", "default", "br0", "old", "bridge", &HashMap::new())
            .unwrap();

        let driver = load_by_name(ctx, "default", "br0").unwrap();
        driver
            .update(
                NetworkPut {
                    description: "new".to_string(),
                    config: HashMap::new(),
                },
                None,
                ClientType::Normal,
            )
            .await
            .unwrap();

        let record = catalog.get_record("default", "br0").unwrap().unwrap();
        assert_eq!(record.description, "new");
    }

    fn test_context_with_datapath(
        members: &[&str],
        datapath: Arc<MemoryDatapath>,
    ) -> (crate::DriverContext, netgrid_catalog::Catalog) {
        let (mut ctx, catalog) = test_context(members);
        ctx.datapath = datapath;
        (ctx, catalog)
    }
}
