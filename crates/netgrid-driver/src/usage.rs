//! Usage seam — who references a network.
//!
//! Instances and profiles referencing a network block its deletion and
//! rename. The provider abstracts over the instance subsystem; the
//! in-memory implementation backs tests and standalone wiring.

use std::collections::HashMap;
use std::sync::RwLock;

/// Reports the entities using a network.
pub trait UsageProvider: Send + Sync {
    /// URLs of instances and profiles referencing the network. With
    /// `only_managed`, references through unmanaged host interfaces are
    /// excluded.
    fn used_by(&self, project: &str, network: &str, only_managed: bool) -> Vec<String>;
}

/// In-memory usage registry.
#[derive(Default)]
pub struct MemoryUsage {
    entries: RwLock<HashMap<(String, String), Vec<String>>>,
}

impl MemoryUsage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a user of a network (e.g. `/1.0/instances/c1`).
    pub fn add_user(&self, project: &str, network: &str, url: &str) {
        self.entries
            .write()
            .unwrap()
            .entry((project.to_string(), network.to_string()))
            .or_default()
            .push(url.to_string());
    }

    pub fn remove_users(&self, project: &str, network: &str) {
        self.entries
            .write()
            .unwrap()
            .remove(&(project.to_string(), network.to_string()));
    }
}

impl UsageProvider for MemoryUsage {
    fn used_by(&self, project: &str, network: &str, _only_managed: bool) -> Vec<String> {
        self.entries
            .read()
            .unwrap()
            .get(&(project.to_string(), network.to_string()))
            .cloned()
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn usage_tracks_per_project_network() {
        let usage = MemoryUsage::new();
        usage.add_user("default", "br0", "/1.0/instances/c1");

        assert_eq!(usage.used_by("default", "br0", false).len(), 1);
        assert!(usage.used_by("default", "br1", false).is_empty());
        assert!(usage.used_by("tenant1", "br0", false).is_empty());

        usage.remove_users("default", "br0");
        assert!(usage.used_by("default", "br0", false).is_empty());
    }
}
