//! Wire types for the netgrid REST API.
//!
//! These types cross the HTTP boundary between clients, the daemon and
//! peer members during cluster fan-out. All types are JSON-serializable.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Name of the default project.
pub const DEFAULT_PROJECT: &str = "default";

/// API version prefix used in canonical URLs.
pub const API_VERSION: &str = "1.0";

// ── Status ────────────────────────────────────────────────────────

/// Lifecycle status of a managed network, both global and per-member.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum NetworkStatus {
    /// Defined on at least one member but not yet fully actuated.
    Pending,
    /// Actuated on every member it is defined on.
    Created,
    /// A create attempt failed on one or more members after the global
    /// config was inserted. Recoverable by re-running create.
    Errored,
    /// No record of the network (unmanaged interface or absent member row).
    #[default]
    Unknown,
}

impl NetworkStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            NetworkStatus::Pending => "Pending",
            NetworkStatus::Created => "Created",
            NetworkStatus::Errored => "Errored",
            NetworkStatus::Unknown => "Unknown",
        }
    }
}

impl fmt::Display for NetworkStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Client type ───────────────────────────────────────────────────

/// User-Agent value peers send when fanning out a cluster notification.
pub const USER_AGENT_NOTIFIER: &str = "netgrid-cluster-notifier";

/// User-Agent value a joining member sends during cluster bootstrap.
pub const USER_AGENT_JOINER: &str = "netgrid-cluster-joiner";

/// Classification of the caller issuing a request.
///
/// Joiners skip config defaulting, ACL validation and the start step;
/// notifier requests are intra-cluster sub-requests that must not
/// re-trigger fan-out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientType {
    Normal,
    Notifier,
    Joiner,
}

impl ClientType {
    /// Classify a request by its User-Agent header.
    pub fn from_user_agent(user_agent: &str) -> Self {
        if user_agent.starts_with(USER_AGENT_NOTIFIER) {
            ClientType::Notifier
        } else if user_agent.starts_with(USER_AGENT_JOINER) {
            ClientType::Joiner
        } else {
            ClientType::Normal
        }
    }
}

// ── Networks ──────────────────────────────────────────────────────

/// A network as returned by the API.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct Network {
    pub name: String,
    pub description: String,
    #[serde(rename = "type")]
    pub network_type: String,
    /// Whether the configuration is held in the catalog, as opposed to a
    /// bare host interface merely enumerated for visibility.
    pub managed: bool,
    pub status: NetworkStatus,
    pub config: HashMap<String, String>,
    /// URLs of instances and profiles using this network.
    pub used_by: Vec<String>,
    /// Cluster members this network is defined on.
    pub locations: Vec<String>,
    pub project: String,
}

impl Network {
    /// Canonical URL for this network.
    pub fn url(&self) -> String {
        format!("/{}/networks/{}", API_VERSION, self.name)
    }
}

/// Body of `POST /1.0/networks`.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct NetworksPost {
    pub name: String,
    #[serde(rename = "type", default)]
    pub network_type: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub config: HashMap<String, String>,
}

/// Body of `PUT`/`PATCH /1.0/networks/{name}`.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct NetworkPut {
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub config: HashMap<String, String>,
}

/// Body of `POST /1.0/networks/{name}` (rename).
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct NetworkPost {
    pub name: String,
}

// ── Leases & state ────────────────────────────────────────────────

/// A single DHCP lease handed out on a network.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NetworkLease {
    pub hostname: String,
    pub hwaddr: String,
    pub address: String,
    #[serde(rename = "type")]
    pub lease_type: String,
    /// Cluster member that handed out the lease.
    pub location: String,
}

/// An address bound to an interface.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NetworkStateAddress {
    pub family: String,
    pub address: String,
    pub netmask: String,
    pub scope: String,
}

/// Operational state of an interface.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct NetworkState {
    pub addresses: Vec<NetworkStateAddress>,
    pub hwaddr: String,
    pub mtu: u32,
    /// "up" or "down".
    pub state: String,
    #[serde(rename = "type")]
    pub interface_type: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_type_from_user_agent() {
        assert_eq!(
            ClientType::from_user_agent("netgrid-cluster-notifier/0.3"),
            ClientType::Notifier
        );
        assert_eq!(
            ClientType::from_user_agent("netgrid-cluster-joiner"),
            ClientType::Joiner
        );
        assert_eq!(ClientType::from_user_agent("curl/8.5"), ClientType::Normal);
        assert_eq!(ClientType::from_user_agent(""), ClientType::Normal);
    }

    #[test]
    fn status_round_trips_through_json() {
        let json = serde_json::to_string(&NetworkStatus::Errored).unwrap();
        assert_eq!(json, "\"Errored\"");
        let status: NetworkStatus = serde_json::from_str(&json).unwrap();
        assert_eq!(status, NetworkStatus::Errored);
    }

    #[test]
    fn networks_post_defaults_optional_fields() {
        let req: NetworksPost = serde_json::from_str(r#"{"name":"br0"}"#).unwrap();
        assert_eq!(req.name, "br0");
        assert_eq!(req.network_type, "");
        assert!(req.config.is_empty());
    }

    #[test]
    fn network_url() {
        let net = Network {
            name: "br0".to_string(),
            ..Default::default()
        };
        assert_eq!(net.url(), "/1.0/networks/br0");
    }
}
