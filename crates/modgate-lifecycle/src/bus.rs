//! Cluster event bus for tenant-change notifications
//!
//! Subscribers react idempotently: rebuild the enabled-module cache and
//! re-arm timers for the tenant named in the message.

use tokio::sync::broadcast;

const TIMER_CHANNEL_CAPACITY: usize = 256;

/// Typed publish/subscribe pair for `timer` messages
///
/// The payload is a plain tenant id. In a clustered deployment the hosting
/// process bridges this bus onto its cluster transport; within one process
/// it is a broadcast channel.
#[derive(Debug, Clone)]
pub struct EventBus {
    timer_tx: broadcast::Sender<String>,
}

impl EventBus {
    /// New in-process bus
    pub fn new() -> Self {
        let (timer_tx, _) = broadcast::channel(TIMER_CHANNEL_CAPACITY);
        Self { timer_tx }
    }

    /// Announce that a tenant's module set changed
    pub fn publish_timer(&self, tenant_id: &str) {
        // send only fails with no subscribers, which is fine
        let _ = self.timer_tx.send(tenant_id.to_string());
    }

    /// Subscribe to tenant-change messages
    pub fn subscribe_timer(&self) -> broadcast::Receiver<String> {
        self.timer_tx.subscribe()
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
    async fn test_publish_reaches_all_subscribers() {
        let bus = EventBus::new();
        let mut rx1 = bus.subscribe_timer();
        let mut rx2 = bus.subscribe_timer();

        bus.publish_timer("diku");

        assert_eq!(rx1.recv().await.unwrap(), "diku");
        assert_eq!(rx2.recv().await.unwrap(), "diku");
    }

    #[test]
    fn test_publish_without_subscribers_is_silent() {
        let bus = EventBus::new();
        bus.publish_timer("diku");
    }
}
