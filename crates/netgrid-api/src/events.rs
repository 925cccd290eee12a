//! Lifecycle event bus.
//!
//! Events are fire-and-forget: emission never fails a request, and a
//! bus with no subscribers silently drops them.

use std::collections::HashMap;

use serde::Serialize;
use tokio::sync::broadcast;

pub const NETWORK_CREATED: &str = "network-created";
pub const NETWORK_UPDATED: &str = "network-updated";
pub const NETWORK_RENAMED: &str = "network-renamed";
pub const NETWORK_DELETED: &str = "network-deleted";

/// A lifecycle event tied to the originating requestor.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct LifecycleEvent {
    pub action: String,
    /// Canonical URL of the entity.
    pub source: String,
    pub project: String,
    pub requestor: String,
    #[serde(skip_serializing_if = "HashMap::is_empty")]
    pub context: HashMap<String, String>,
}

impl LifecycleEvent {
    pub fn network(action: &str, project: &str, name: &str, requestor: &str) -> Self {
        Self {
            action: action.to_string(),
            source: format!("/1.0/networks/{name}"),
            project: project.to_string(),
            requestor: requestor.to_string(),
            context: HashMap::new(),
        }
    }

    pub fn with_context(mut self, key: &str, value: &str) -> Self {
        self.context.insert(key.to_string(), value.to_string());
        self
    }
}

/// Broadcast-backed event bus.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<LifecycleEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(256);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LifecycleEvent> {
        self.tx.subscribe()
    }

    /// Emit a lifecycle event. No subscribers is not an error.
    pub fn send_lifecycle(&self, event: LifecycleEvent) {
        let _ = self.tx.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscribers_receive_events() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();

        bus.send_lifecycle(LifecycleEvent::network(
            NETWORK_CREATED,
            "default",
            "br0",
            "unix:root",
        ));

        let event = rx.recv().await.unwrap();
        assert_eq!(event.action, NETWORK_CREATED);
        assert_eq!(event.source, "/1.0/networks/br0");
    }

    #[test]
    fn send_without_subscribers_is_fine() {
        let bus = EventBus::new();
        bus.send_lifecycle(LifecycleEvent::network(
            NETWORK_DELETED,
            "default",
            "br0",
            "unix:root",
        ));
    }

    #[tokio::test]
    async fn rename_event_carries_old_name() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();

        bus.send_lifecycle(
            LifecycleEvent::network(NETWORK_RENAMED, "default", "br1", "unix:root")
                .with_context("old_name", "br0"),
        );

        let event = rx.recv().await.unwrap();
        assert_eq!(event.context.get("old_name").map(String::as_str), Some("br0"));
    }
}
