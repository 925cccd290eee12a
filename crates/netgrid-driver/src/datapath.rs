//! Datapath seam — the node-local actuation surface drivers program.
//!
//! `MemoryDatapath` tracks interfaces in process memory and is used by
//! tests and by deployments where real datapath programming is handled
//! out of band. `HostDatapath` layers the same managed-interface
//! tracking over read-only probes of the host's `/sys` and `/proc`
//! interface trees, so unmanaged host interfaces are visible through it.

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::RwLock;

use thiserror::Error;

use netgrid_core::{NetworkLease, NetworkState};

pub type DatapathResult<T> = Result<T, DatapathError>;

#[derive(Debug, Error)]
pub enum DatapathError {
    #[error("interface {0:?} not found")]
    NotFound(String),

    #[error("{0}")]
    Failed(String),
}

/// What kind of interface a name resolves to on the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterfaceKind {
    Loopback,
    Bridge,
    Vlan,
    Physical,
    Bond,
    Overlay,
    Unknown,
}

impl InterfaceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            InterfaceKind::Loopback => "loopback",
            InterfaceKind::Bridge => "bridge",
            InterfaceKind::Vlan => "vlan",
            InterfaceKind::Physical => "physical",
            InterfaceKind::Bond => "bond",
            InterfaceKind::Overlay => "ovn",
            InterfaceKind::Unknown => "unknown",
        }
    }
}

/// Node-local datapath operations used by the drivers and the handlers'
/// host-interface probes.
pub trait Datapath: Send + Sync {
    /// All interface names visible on this node.
    fn host_interfaces(&self) -> DatapathResult<Vec<String>>;

    fn interface_exists(&self, name: &str) -> bool;

    /// Probe the kind of an interface, `None` if it doesn't exist.
    fn interface_kind(&self, name: &str) -> Option<InterfaceKind>;

    /// Whether the virtual switch knows a bridge of this name (probed
    /// last, after the kernel paths).
    fn vswitch_has_bridge(&self, name: &str) -> bool;

    /// Operational state of an interface.
    fn interface_state(&self, name: &str) -> DatapathResult<NetworkState>;

    fn ensure_bridge(&self, name: &str, mtu: u32) -> DatapathResult<()>;

    fn create_overlay(&self, name: &str) -> DatapathResult<()>;

    fn remove_interface(&self, name: &str) -> DatapathResult<()>;

    fn link_up(&self, name: &str) -> DatapathResult<()>;

    fn link_down(&self, name: &str) -> DatapathResult<()>;

    fn rename_interface(&self, old: &str, new: &str) -> DatapathResult<()>;

    /// DHCP leases handed out on an interface.
    fn leases(&self, name: &str) -> DatapathResult<Vec<NetworkLease>>;
}

// ── In-memory implementation ──────────────────────────────────────

#[derive(Debug, Clone)]
struct MemoryInterface {
    kind: InterfaceKind,
    up: bool,
    mtu: u32,
    leases: Vec<NetworkLease>,
}

/// Datapath tracking interfaces entirely in memory.
#[derive(Default)]
pub struct MemoryDatapath {
    interfaces: RwLock<HashMap<String, MemoryInterface>>,
    /// Interfaces whose mutating operations fail (fault injection).
    failing: RwLock<HashSet<String>>,
}

impl MemoryDatapath {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a pre-existing host interface (e.g. a physical NIC).
    pub fn add_host_interface(&self, name: &str, kind: InterfaceKind) {
        self.interfaces.write().unwrap().insert(
            name.to_string(),
            MemoryInterface {
                kind,
                up: true,
                mtu: 1500,
                leases: Vec::new(),
            },
        );
    }

    /// Remove a seeded interface (e.g. a NIC being unplugged).
    pub fn remove_host_interface(&self, name: &str) {
        self.interfaces.write().unwrap().remove(name);
    }

    /// Make mutating operations on an interface fail.
    pub fn fail_interface(&self, name: &str, fail: bool) {
        let mut failing = self.failing.write().unwrap();
        if fail {
            failing.insert(name.to_string());
        } else {
            failing.remove(name);
        }
    }

    /// Seed a DHCP lease on an interface.
    pub fn add_lease(&self, name: &str, lease: NetworkLease) {
        if let Some(iface) = self.interfaces.write().unwrap().get_mut(name) {
            iface.leases.push(lease);
        }
    }

    pub fn is_up(&self, name: &str) -> bool {
        self.interfaces
            .read()
            .unwrap()
            .get(name)
            .map(|i| i.up)
            .unwrap_or(false)
    }

    fn check_failing(&self, name: &str) -> DatapathResult<()> {
        if self.failing.read().unwrap().contains(name) {
            return Err(DatapathError::Failed(format!(
                "datapath operation on {name:?} failed"
            )));
        }
        Ok(())
    }
}

impl Datapath for MemoryDatapath {
    fn host_interfaces(&self) -> DatapathResult<Vec<String>> {
        let mut names: Vec<String> = self.interfaces.read().unwrap().keys().cloned().collect();
        names.sort();
        Ok(names)
    }

    fn interface_exists(&self, name: &str) -> bool {
        self.interfaces.read().unwrap().contains_key(name)
    }

    fn interface_kind(&self, name: &str) -> Option<InterfaceKind> {
        self.interfaces.read().unwrap().get(name).map(|i| i.kind)
    }

    fn vswitch_has_bridge(&self, name: &str) -> bool {
        self.interface_kind(name) == Some(InterfaceKind::Overlay)
    }

    fn interface_state(&self, name: &str) -> DatapathResult<NetworkState> {
        let interfaces = self.interfaces.read().unwrap();
        let iface = interfaces
            .get(name)
            .ok_or_else(|| DatapathError::NotFound(name.to_string()))?;
        Ok(NetworkState {
            addresses: Vec::new(),
            hwaddr: String::new(),
            mtu: iface.mtu,
            state: if iface.up { "up" } else { "down" }.to_string(),
            interface_type: iface.kind.as_str().to_string(),
        })
    }

    fn ensure_bridge(&self, name: &str, mtu: u32) -> DatapathResult<()> {
        self.check_failing(name)?;
        let mut interfaces = self.interfaces.write().unwrap();
        let entry = interfaces
            .entry(name.to_string())
            .or_insert(MemoryInterface {
                kind: InterfaceKind::Bridge,
                up: false,
                mtu,
                leases: Vec::new(),
            });
        if entry.kind != InterfaceKind::Bridge {
            return Err(DatapathError::Failed(format!(
                "interface {name:?} exists and is not a bridge"
            )));
        }
        entry.mtu = mtu;
        Ok(())
    }

    fn create_overlay(&self, name: &str) -> DatapathResult<()> {
        self.check_failing(name)?;
        let mut interfaces = self.interfaces.write().unwrap();
        let entry = interfaces
            .entry(name.to_string())
            .or_insert(MemoryInterface {
                kind: InterfaceKind::Overlay,
                up: false,
                mtu: 1442,
                leases: Vec::new(),
            });
        if entry.kind != InterfaceKind::Overlay {
            return Err(DatapathError::Failed(format!(
                "interface {name:?} exists and is not an overlay"
            )));
        }
        Ok(())
    }

    fn remove_interface(&self, name: &str) -> DatapathResult<()> {
        self.check_failing(name)?;
        self.interfaces.write().unwrap().remove(name);
        Ok(())
    }

    fn link_up(&self, name: &str) -> DatapathResult<()> {
        self.check_failing(name)?;
        let mut interfaces = self.interfaces.write().unwrap();
        let iface = interfaces
            .get_mut(name)
            .ok_or_else(|| DatapathError::NotFound(name.to_string()))?;
        iface.up = true;
        Ok(())
    }

    fn link_down(&self, name: &str) -> DatapathResult<()> {
        let mut interfaces = self.interfaces.write().unwrap();
        if let Some(iface) = interfaces.get_mut(name) {
            iface.up = false;
        }
        Ok(())
    }

    fn rename_interface(&self, old: &str, new: &str) -> DatapathResult<()> {
        self.check_failing(old)?;
        let mut interfaces = self.interfaces.write().unwrap();
        let iface = interfaces
            .remove(old)
            .ok_or_else(|| DatapathError::NotFound(old.to_string()))?;
        interfaces.insert(new.to_string(), iface);
        Ok(())
    }

    fn leases(&self, name: &str) -> DatapathResult<Vec<NetworkLease>> {
        let interfaces = self.interfaces.read().unwrap();
        let iface = interfaces
            .get(name)
            .ok_or_else(|| DatapathError::NotFound(name.to_string()))?;
        Ok(iface.leases.clone())
    }
}

// ── Host-probing implementation ───────────────────────────────────

/// Datapath layering managed-interface tracking over read-only probes
/// of the host's interface trees.
pub struct HostDatapath {
    managed: MemoryDatapath,
}

impl HostDatapath {
    pub fn new() -> Self {
        Self {
            managed: MemoryDatapath::new(),
        }
    }

    fn probe_kind(name: &str) -> Option<InterfaceKind> {
        if !Path::new(&format!("/sys/class/net/{name}")).exists() {
            return None;
        }
        if name == "lo" {
            return Some(InterfaceKind::Loopback);
        }
        if Path::new(&format!("/sys/class/net/{name}/bridge")).exists() {
            return Some(InterfaceKind::Bridge);
        }
        if Path::new(&format!("/proc/net/vlan/{name}")).exists() {
            return Some(InterfaceKind::Vlan);
        }
        if Path::new(&format!("/sys/class/net/{name}/device")).exists() {
            return Some(InterfaceKind::Physical);
        }
        if Path::new(&format!("/sys/class/net/{name}/bonding")).exists() {
            return Some(InterfaceKind::Bond);
        }
        Some(InterfaceKind::Unknown)
    }

    fn read_sys(name: &str, attr: &str) -> Option<String> {
        std::fs::read_to_string(format!("/sys/class/net/{name}/{attr}"))
            .ok()
            .map(|s| s.trim().to_string())
    }
}

impl Default for HostDatapath {
    fn default() -> Self {
        Self::new()
    }
}

impl Datapath for HostDatapath {
    fn host_interfaces(&self) -> DatapathResult<Vec<String>> {
        let mut names = self.managed.host_interfaces()?;
        if let Ok(entries) = std::fs::read_dir("/sys/class/net") {
            for entry in entries.flatten() {
                let name = entry.file_name().to_string_lossy().to_string();
                if !names.contains(&name) {
                    names.push(name);
                }
            }
        }
        names.sort();
        Ok(names)
    }

    fn interface_exists(&self, name: &str) -> bool {
        self.managed.interface_exists(name) || Self::probe_kind(name).is_some()
    }

    fn interface_kind(&self, name: &str) -> Option<InterfaceKind> {
        self.managed
            .interface_kind(name)
            .or_else(|| Self::probe_kind(name))
    }

    fn vswitch_has_bridge(&self, name: &str) -> bool {
        self.managed.vswitch_has_bridge(name)
    }

    fn interface_state(&self, name: &str) -> DatapathResult<NetworkState> {
        if self.managed.interface_exists(name) {
            return self.managed.interface_state(name);
        }
        let kind =
            Self::probe_kind(name).ok_or_else(|| DatapathError::NotFound(name.to_string()))?;
        Ok(NetworkState {
            addresses: Vec::new(),
            hwaddr: Self::read_sys(name, "address").unwrap_or_default(),
            mtu: Self::read_sys(name, "mtu")
                .and_then(|s| s.parse().ok())
                .unwrap_or(0),
            state: Self::read_sys(name, "operstate").unwrap_or_else(|| "unknown".to_string()),
            interface_type: kind.as_str().to_string(),
        })
    }

    fn ensure_bridge(&self, name: &str, mtu: u32) -> DatapathResult<()> {
        self.managed.ensure_bridge(name, mtu)
    }

    fn create_overlay(&self, name: &str) -> DatapathResult<()> {
        self.managed.create_overlay(name)
    }

    fn remove_interface(&self, name: &str) -> DatapathResult<()> {
        self.managed.remove_interface(name)
    }

    fn link_up(&self, name: &str) -> DatapathResult<()> {
        self.managed.link_up(name)
    }

    fn link_down(&self, name: &str) -> DatapathResult<()> {
        self.managed.link_down(name)
    }

    fn rename_interface(&self, old: &str, new: &str) -> DatapathResult<()> {
        self.managed.rename_interface(old, new)
    }

    fn leases(&self, name: &str) -> DatapathResult<Vec<NetworkLease>> {
        self.managed.leases(name)
    }
}
