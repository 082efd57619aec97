//! Event bus for feedloc using tokio::broadcast
//!
//! Lets the CLI and tests observe what the pipeline is doing without
//! reaching into the coordinator.

use tokio::sync::broadcast;

/// Events emitted by the enrichment pipeline
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnrichEvent {
    /// Persisted records were merged into the mirror
    CacheLoaded { records: usize },
    /// A fetch request was sent over the bridge
    LookupRequested(String),
    /// A pending handle resolved
    LocationResolved { handle: String, location: String },
    /// An annotation node was inserted for a handle
    UnitAnnotated(String),
    /// The feed container was found and is being observed
    ContainerAttached,
    /// Persisting the cache failed
    StorageFailed(String),
}

/// Event bus for broadcasting pipeline events
pub struct EventBus {
    sender: broadcast::Sender<EnrichEvent>,
}

impl EventBus {
    /// Create a new event bus with specified channel capacity
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Create with default capacity (256 events)
    pub fn default_capacity() -> Self {
        Self::new(256)
    }

    /// Publish an event to all subscribers
    pub fn publish(&self, event: EnrichEvent) {
        // No subscribers is fine
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EnrichEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::default_capacity()
    }
}

impl Clone for EventBus {
    fn clone(&self) -> Self {
        Self {
            sender: self.sender.clone(),
        }
    }
}
