//! Live delivery of finalized entries to dashboard sessions.
//!
//! [`EventHub`] keeps a registry of connected subscribers and pushes every
//! published entry to each of them. Delivery is best-effort: a subscriber
//! whose queue is full misses the event, and a disconnected one is pruned.
//! Nothing is buffered for subscribers that connect later.

use std::collections::HashMap;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::task::{Context, Poll};

use futures::Stream;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::entry::LogEntry;

/// Events queued per subscriber before new ones are dropped.
pub const DEFAULT_SUBSCRIBER_CAPACITY: usize = 256;

type Registry = Mutex<HashMap<u64, mpsc::Sender<Arc<LogEntry>>>>;

/// Registry of live subscribers.
#[derive(Clone)]
pub struct EventHub {
    subscribers: Arc<Registry>,
    next_id: Arc<AtomicU64>,
    capacity: usize,
}

impl std::fmt::Debug for EventHub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventHub")
            .field("subscribers", &self.subscriber_count())
            .field("capacity", &self.capacity)
            .finish()
    }
}

impl Default for EventHub {
    fn default() -> Self {
        Self::new()
    }
}

impl EventHub {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_SUBSCRIBER_CAPACITY)
    }

    /// Creates a hub with a custom per-subscriber queue size.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            subscribers: Arc::new(Mutex::new(HashMap::new())),
            next_id: Arc::new(AtomicU64::new(1)),
            capacity: capacity.max(1),
        }
    }

    /// Registers a new subscriber.
    ///
    /// The subscriber stays registered until the returned [`Subscription`]
    /// is dropped.
    pub fn subscribe(&self) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(self.capacity);
        self.subscribers.lock().insert(id, tx);

        tracing::debug!(subscriber = id, "Live subscriber connected");

        Subscription {
            id,
            rx,
            registry: Arc::downgrade(&self.subscribers),
        }
    }

    /// Delivers an entry to every current subscriber.
    ///
    /// Returns the number of subscribers the entry was queued for. Never
    /// blocks: the registry lock is released before any send.
    pub fn publish(&self, entry: Arc<LogEntry>) -> usize {
        let snapshot: Vec<(u64, mpsc::Sender<Arc<LogEntry>>)> = self
            .subscribers
            .lock()
            .iter()
            .map(|(id, tx)| (*id, tx.clone()))
            .collect();

        let mut delivered = 0;
        let mut closed = Vec::new();

        for (id, tx) in snapshot {
            match tx.try_send(Arc::clone(&entry)) {
                Ok(()) => delivered += 1,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    tracing::warn!(subscriber = id, "Live subscriber lagging, event dropped");
                }
                Err(mpsc::error::TrySendError::Closed(_)) => closed.push(id),
            }
        }

        if !closed.is_empty() {
            let mut subscribers = self.subscribers.lock();
            for id in closed {
                subscribers.remove(&id);
            }
        }

        delivered
    }

    /// Number of currently registered subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().len()
    }
}

/// A live feed of published entries.
pub struct Subscription {
    id: u64,
    rx: mpsc::Receiver<Arc<LogEntry>>,
    registry: Weak<Registry>,
}

impl Subscription {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Waits for the next entry. Returns `None` once the hub is gone.
    pub async fn recv(&mut self) -> Option<Arc<LogEntry>> {
        self.rx.recv().await
    }
}

impl Stream for Subscription {
    type Item = Arc<LogEntry>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(registry) = self.registry.upgrade() {
            registry.lock().remove(&self.id);
            tracing::debug!(subscriber = self.id, "Live subscriber disconnected");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::{Headers, RequestParts};
    use chrono::Utc;
    use futures::StreamExt;
    use std::time::Duration;

    fn entry(url: &str) -> Arc<LogEntry> {
        Arc::new(LogEntry::failed(
            RequestParts {
                timestamp: Utc::now(),
                method: "GET".to_string(),
                url: url.to_string(),
                headers: Headers::new(),
                body: None,
                tags: Vec::new(),
            },
            "refused",
            Duration::from_millis(1),
        ))
    }

    #[test]
    fn publish_without_subscribers() {
        let hub = EventHub::new();
        assert_eq!(hub.publish(entry("http://a/auth")), 0);
    }

    #[tokio::test]
    async fn every_subscriber_receives_entry() {
        let hub = EventHub::new();
        let mut a = hub.subscribe();
        let mut b = hub.subscribe();
        assert_eq!(hub.subscriber_count(), 2);

        assert_eq!(hub.publish(entry("http://a/login")), 2);

        assert_eq!(a.recv().await.unwrap().url, "http://a/login");
        assert_eq!(b.next().await.unwrap().url, "http://a/login");
    }

    #[test]
    fn drop_unregisters() {
        let hub = EventHub::new();
        let sub = hub.subscribe();
        let _other = hub.subscribe();
        drop(sub);
        assert_eq!(hub.subscriber_count(), 1);
    }

    #[tokio::test]
    async fn full_subscriber_does_not_block_others() {
        let hub = EventHub::with_capacity(1);
        let _slow = hub.subscribe();
        let mut fast = hub.subscribe();

        assert_eq!(hub.publish(entry("http://a/1/auth")), 2);
        fast.recv().await.unwrap();

        // slow still holds the first event, so only fast gets the second
        assert_eq!(hub.publish(entry("http://a/2/auth")), 1);
        assert_eq!(fast.recv().await.unwrap().url, "http://a/2/auth");
    }

    #[test]
    fn late_subscriber_gets_no_history() {
        let hub = EventHub::new();
        hub.publish(entry("http://a/auth"));
        let mut sub = hub.subscribe();
        assert!(sub.rx.try_recv().is_err());
    }

    #[test]
    fn subscription_outlives_hub() {
        let hub = EventHub::new();
        let sub = hub.subscribe();
        drop(hub);
        drop(sub);
    }
}
