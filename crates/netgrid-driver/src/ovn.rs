//! OVN driver — overlay networks on a virtual switch.
//!
//! The overlay config is entirely global (every member programs the
//! same logical network), and this is the only type allowed in
//! non-default projects. The uplink is named by the `network` key.

use std::collections::HashMap;

use async_trait::async_trait;

use netgrid_core::ClientType;

use crate::common::CommonNetwork;
use crate::{DatapathError, DriverError, DriverInfo, DriverResult, Network, NetworkKind};

pub struct OvnNetwork {
    common: CommonNetwork,
}

impl OvnNetwork {
    pub fn new(common: CommonNetwork) -> Self {
        Self { common }
    }

    fn uplink(&self) -> DriverResult<String> {
        match self.config().get("network") {
            Some(uplink) if !uplink.is_empty() => Ok(uplink.clone()),
            _ => Err(DriverError::Validation(
                "ovn network requires an uplink network".to_string(),
            )),
        }
    }
}

#[async_trait]
impl Network for OvnNetwork {
    fn common(&self) -> &CommonNetwork {
        &self.common
    }

    fn info(&self) -> DriverInfo {
        DriverInfo {
            projects: true,
            node_specific_config: false,
        }
    }

    fn kind(&self) -> NetworkKind {
        NetworkKind::Ovn
    }

    fn validate(&self, config: &HashMap<String, String>) -> DriverResult<()> {
        for (key, value) in config {
            match key.as_str() {
                "network" | "ipv4.address" | "ipv6.address" => {}
                "mtu" => {
                    value.parse::<u32>().map_err(|_| {
                        DriverError::Validation(format!("invalid mtu {value:?}"))
                    })?;
                }
                k if k == "security.acls" || k.starts_with("security.acls.") => {}
                _ => {
                    return Err(DriverError::Validation(format!(
                        "unknown config key {key:?} for ovn network"
                    )));
                }
            }
        }

        if config.get("network").map(String::is_empty).unwrap_or(true) {
            return Err(DriverError::Validation(
                "ovn network requires an uplink network".to_string(),
            ));
        }

        Ok(())
    }

    async fn create(&self, _client_type: ClientType) -> DriverResult<()> {
        self.common.ctx().datapath.create_overlay(self.name())?;
        Ok(())
    }

    /// Idempotent: re-running start on a live overlay re-ensures it.
    async fn start(&self) -> DriverResult<()> {
        let uplink = self.uplink()?;
        let datapath = &self.common.ctx().datapath;
        if !datapath.interface_exists(&uplink) {
            return Err(DriverError::Datapath(DatapathError::NotFound(uplink)));
        }
        datapath.create_overlay(self.name())?;
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
}
