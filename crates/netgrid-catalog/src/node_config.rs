//! Classification of network config keys into member-specific and global.
//!
//! Member-specific keys legitimately differ per cluster member (the parent
//! interface name, BGP next-hops) and are stored in per-member config
//! fragments; everything else is global and must be identical cluster-wide.
//! The two key sets are disjoint by construction.

use std::collections::HashMap;

/// Config keys whose values may differ per cluster member.
const NODE_SPECIFIC_KEYS: &[&str] = &[
    "bgp.ipv4.nexthop",
    "bgp.ipv6.nexthop",
    "bridge.external_interfaces",
    "parent",
];

/// Whether a config key is member-specific.
pub fn is_node_specific(key: &str) -> bool {
    NODE_SPECIFIC_KEYS.contains(&key)
}

/// Return a copy of the config with member-specific keys removed.
pub fn strip_node_specific(config: &HashMap<String, String>) -> HashMap<String, String> {
    config
        .iter()
        .filter(|(k, _)| !is_node_specific(k))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parent_is_node_specific() {
        assert!(is_node_specific("parent"));
        assert!(is_node_specific("bridge.external_interfaces"));
        assert!(!is_node_specific("ipv4.address"));
        assert!(!is_node_specific("mtu"));
    }

    #[test]
    fn strip_removes_only_node_specific_keys() {
        let config = HashMap::from([
            ("parent".to_string(), "eth0".to_string()),
            ("mtu".to_string(), "9000".to_string()),
        ]);

        let stripped = strip_node_specific(&config);
        assert_eq!(stripped.len(), 1);
        assert_eq!(stripped.get("mtu").map(String::as_str), Some("9000"));
    }

    #[test]
    fn strip_is_idempotent() {
        let config = HashMap::from([
            ("parent".to_string(), "eth0".to_string()),
            ("ipv4.address".to_string(), "10.0.0.1/24".to_string()),
        ]);

        let once = strip_node_specific(&config);
        let twice = strip_node_specific(&once);
        assert_eq!(once, twice);
    }
}
