//! Authorization seam.
//!
//! The authorizer gates visibility and editability of networks and
//! mirrors lifecycle changes (add/remove/rename) into the auth backend.
//! Mirroring failures are logged by callers, never surfaced: a request
//! must not fail because the auth backend lagged.

use std::collections::HashSet;
use std::sync::RwLock;

/// Permission checks and entity mirroring for networks.
pub trait Authorizer: Send + Sync {
    fn can_view(&self, project: &str, network: &str) -> bool;

    fn can_edit(&self, project: &str, network: &str) -> bool;

    /// Filter for `used_by` URLs referencing other entities.
    fn can_view_url(&self, url: &str) -> bool {
        let _ = url;
        true
    }

    fn add_network(&self, project: &str, network: &str) -> Result<(), String>;

    fn remove_network(&self, project: &str, network: &str) -> Result<(), String>;

    fn rename_network(&self, project: &str, old: &str, new: &str) -> Result<(), String>;
}

/// Authorizer that permits everything (standalone deployments).
pub struct AllowAll;

impl Authorizer for AllowAll {
    fn can_view(&self, _project: &str, _network: &str) -> bool {
        true
    }

    fn can_edit(&self, _project: &str, _network: &str) -> bool {
        true
    }

    fn add_network(&self, _project: &str, _network: &str) -> Result<(), String> {
        Ok(())
    }

    fn remove_network(&self, _project: &str, _network: &str) -> Result<(), String> {
        Ok(())
    }

    fn rename_network(&self, _project: &str, _old: &str, _new: &str) -> Result<(), String> {
        Ok(())
    }
}

/// Authorizer with explicit deny lists, used to exercise the
/// authorization filter in tests.
#[derive(Default)]
pub struct DenyList {
    view_denied: RwLock<HashSet<(String, String)>>,
    edit_denied: RwLock<HashSet<(String, String)>>,
}

impl DenyList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn deny_view(&self, project: &str, network: &str) {
        self.view_denied
            .write()
            .unwrap()
            .insert((project.to_string(), network.to_string()));
    }

    pub fn deny_edit(&self, project: &str, network: &str) {
        self.edit_denied
            .write()
            .unwrap()
            .insert((project.to_string(), network.to_string()));
    }
}

impl Authorizer for DenyList {
    fn can_view(&self, project: &str, network: &str) -> bool {
        !self
            .view_denied
            .read()
            .unwrap()
            .contains(&(project.to_string(), network.to_string()))
    }

    fn can_edit(&self, project: &str, network: &str) -> bool {
        self.can_view(project, network)
            && !self
                .edit_denied
                .read()
                .unwrap()
                .contains(&(project.to_string(), network.to_string()))
    }

    fn add_network(&self, _project: &str, _network: &str) -> Result<(), String> {
        Ok(())
    }

    fn remove_network(&self, _project: &str, _network: &str) -> Result<(), String> {
        Ok(())
    }

    fn rename_network(&self, _project: &str, _old: &str, _new: &str) -> Result<(), String> {
        Ok(())
    }
}
