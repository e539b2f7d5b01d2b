//! External event feed: decoupled completion signalling.
//!
//! Hosts publish completion events (e.g. "build finished") on a feed.
//! Any number of waiters subscribe and filter for the events they care about.

use std::sync::Arc;
use tokio::sync::broadcast;

/// A broadcast-based feed of external events.
///
/// Uses `tokio::sync::broadcast` for multi-consumer pub/sub. Publishing never
/// blocks; slow subscribers lag and skip rather than hold up the feed.
pub struct EventFeed<E> {
    sender: broadcast::Sender<Arc<E>>,
}

impl<E> EventFeed<E> {
    /// Create a new feed with the given capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event to all current subscribers.
    pub fn publish(&self, event: E) {
        // No subscribers is fine: nobody is waiting for this event.
        let _ = self.sender.send(Arc::new(event));
    }

    /// Subscribe to events published from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<E>> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl<E> Clone for EventFeed<E> {
    fn clone(&self) -> Self {
        Self {
            sender: self.sender.clone(),
        }
    }
}

impl<E> Default for EventFeed<E> {
    fn default() -> Self {
        Self::new(256)
    }
}

impl<E> std::fmt::Debug for EventFeed<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventFeed")
            .field("subscribers", &self.sender.receiver_count())
            .finish()
    }
}
