//! netgridd — daemon-side lifecycle orchestration.
//!
//! The binary wires the catalog, datapath and API together; this
//! library half holds the startup engine, the shutdown sweep and the
//! overlay restart so they can be exercised by integration tests.

pub mod startup;

pub use startup::{network_shutdown, restart_ovn_networks, InstanceStarter, NetworkStartup};
