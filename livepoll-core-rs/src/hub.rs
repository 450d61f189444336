//! Topic-based publish/subscribe hub.
//!
//! The hub knows nothing about polls: a topic is any hashable key and a
//! message is any cloneable value. Each subscriber owns a bounded queue.
//!
//! ```text
//!                    BroadcastHub<K, M>
//!              ┌────────────────────────────┐
//!              │ topics: K → {id → Sender}  │
//!              └─────────────┬──────────────┘
//!          publish(k, m)     │  try_send per subscriber
//!         ┌──────────────────┼──────────────────┐
//!         ▼                  ▼                  ▼
//!    [Subscriber]       [Subscriber]       [Subscriber]
//!    rx.recv()          rx.recv()          (full → detached)
//! ```
//!
//! Fan-out never waits on a subscriber. A queue that is full or whose
//! receiver is gone gets its subscriber detached; the others are unaffected.
//! Publishes to one topic are serialised, so every subscriber of that topic
//! observes messages in the same order.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::{Mutex, RwLock};
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, warn};

pub use tokio::sync::mpsc::error::TryRecvError;

/// Default per-subscriber queue depth
pub const DEFAULT_SUBSCRIBER_BUFFER: usize = 64;

/// Identifier of one subscription, unique within a hub
pub type SubscriberId = u64;

/// Outcome of a single publish
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PublishReport {
    /// Subscribers the message was queued for
    pub delivered: usize,
    /// Subscribers dropped because their queue was full or closed
    pub detached: usize,
}

struct Topic<M> {
    subscribers: Mutex<HashMap<SubscriberId, mpsc::Sender<M>>>,
}

impl<M> Default for Topic<M> {
    fn default() -> Self {
        Self {
            subscribers: Mutex::new(HashMap::new()),
        }
    }
}

struct HubInner<K, M> {
    topics: RwLock<HashMap<K, Topic<M>>>,
    next_id: AtomicU64,
    buffer: usize,
}

impl<K: Eq + Hash + Clone, M> HubInner<K, M> {
    fn remove(&self, topic: &K, id: SubscriberId) -> bool {
        let mut topics = self.topics.write();
        let Some(entry) = topics.get(topic) else {
            return false;
        };

        let (removed, now_empty) = {
            let mut subs = entry.subscribers.lock();
            let removed = subs.remove(&id).is_some();
            (removed, subs.is_empty())
        };
        if now_empty {
            topics.remove(topic);
        }
        removed
    }
}

/// Generic topic → subscribers registry with non-blocking fan-out
pub struct BroadcastHub<K, M> {
    inner: Arc<HubInner<K, M>>,
}

impl<K, M> Clone for BroadcastHub<K, M> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<K: Eq + Hash + Clone, M: Clone> Default for BroadcastHub<K, M> {
    fn default() -> Self {
        Self::new(DEFAULT_SUBSCRIBER_BUFFER)
    }
}

impl<K: Eq + Hash + Clone, M: Clone> BroadcastHub<K, M> {
    /// Create a hub whose subscribers queue at most `buffer` messages each
    pub fn new(buffer: usize) -> Self {
        Self {
            inner: Arc::new(HubInner {
                topics: RwLock::new(HashMap::new()),
                next_id: AtomicU64::new(1),
                buffer: buffer.max(1),
            }),
        }
    }

    /// Register a new subscriber under `topic`
    pub fn subscribe(&self, topic: K) -> Subscriber<K, M> {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(self.inner.buffer);

        self.inner
            .topics
            .write()
            .entry(topic.clone())
            .or_default()
            .subscribers
            .lock()
            .insert(id, tx);

        Subscriber {
            id,
            topic,
            rx,
            hub: Arc::downgrade(&self.inner),
        }
    }

    /// Remove a subscriber. Repeating this, or passing a subscriber whose
    /// topic was already closed, does nothing.
    pub fn unsubscribe(&self, subscriber: &Subscriber<K, M>) {
        self.inner.remove(&subscriber.topic, subscriber.id);
    }

    /// Queue `message` for every subscriber currently registered under `topic`
    pub fn publish(&self, topic: &K, message: M) -> PublishReport {
        let mut report = PublishReport::default();
        let now_empty = {
            let topics = self.inner.topics.read();
            let Some(entry) = topics.get(topic) else {
                return report;
            };

            let mut subs = entry.subscribers.lock();
            subs.retain(|id, tx| match tx.try_send(message.clone()) {
                Ok(()) => {
                    report.delivered += 1;
                    true
                }
                Err(TrySendError::Full(_)) => {
                    warn!("Hub: subscriber {} is backlogged, detaching", id);
                    report.detached += 1;
                    false
                }
                Err(TrySendError::Closed(_)) => {
                    debug!("Hub: subscriber {} went away, detaching", id);
                    report.detached += 1;
                    false
                }
            });
            subs.is_empty()
        };

        if now_empty {
            self.prune(topic);
        }

        report
    }

    /// Disconnect every subscriber of `topic` and forget the topic.
    /// Returns how many subscribers were disconnected.
    pub fn close_topic(&self, topic: &K) -> usize {
        // Dropping the senders ends each receiver's stream
        match self.inner.topics.write().remove(topic) {
            Some(entry) => entry.subscribers.into_inner().len(),
            None => 0,
        }
    }

    pub fn subscriber_count(&self, topic: &K) -> usize {
        self.inner
            .topics
            .read()
            .get(topic)
            .map(|t| t.subscribers.lock().len())
            .unwrap_or(0)
    }

    pub fn topic_count(&self) -> usize {
        self.inner.topics.read().len()
    }

    fn prune(&self, topic: &K) {
        let mut topics = self.inner.topics.write();
        if topics
            .get(topic)
            .is_some_and(|t| t.subscribers.lock().is_empty())
        {
            topics.remove(topic);
        }
    }
}

/// Receiving end of one subscription. Dropping it unsubscribes.
pub struct Subscriber<K: Eq + Hash + Clone, M> {
    id: SubscriberId,
    topic: K,
    rx: mpsc::Receiver<M>,
    hub: Weak<HubInner<K, M>>,
}

impl<K: Eq + Hash + Clone, M> Subscriber<K, M> {
    pub fn id(&self) -> SubscriberId {
        self.id
    }

    pub fn topic(&self) -> &K {
        &self.topic
    }

    /// Next message, or `None` once the subscriber has been detached or its
    /// topic closed and everything already queued has been drained
    pub async fn recv(&mut self) -> Option<M> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Result<M, TryRecvError> {
        self.rx.try_recv()
    }
}

impl<K: Eq + Hash + Clone, M> Drop for Subscriber<K, M> {
    fn drop(&mut self) {
        if let Some(hub) = self.hub.upgrade() {
            hub.remove(&self.topic, self.id);
        }
    }
}

impl<K: Eq + Hash + Clone + std::fmt::Debug, M> std::fmt::Debug for Subscriber<K, M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscriber")
            .field("id", &self.id)
            .field("topic", &self.topic)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    type Hub = BroadcastHub<&'static str, u32>;

    #[test]
    fn test_publish_reaches_only_topic_subscribers() {
        let hub = Hub::new(8);
        let mut a1 = hub.subscribe("a");
        let mut a2 = hub.subscribe("a");
        let mut b = hub.subscribe("b");

        let report = hub.publish(&"a", 7);
        assert_eq!(report, PublishReport { delivered: 2, detached: 0 });

        assert_eq!(a1.try_recv(), Ok(7));
        assert_eq!(a2.try_recv(), Ok(7));
        assert_eq!(b.try_recv(), Err(TryRecvError::Empty));
    }

    #[test]
    fn test_late_subscriber_misses_earlier_messages() {
        let hub = Hub::new(8);
        let mut early = hub.subscribe("t");
        hub.publish(&"t", 1);
        let mut late = hub.subscribe("t");
        hub.publish(&"t", 2);

        assert_eq!(early.try_recv(), Ok(1));
        assert_eq!(early.try_recv(), Ok(2));
        assert_eq!(late.try_recv(), Ok(2));
        assert_eq!(late.try_recv(), Err(TryRecvError::Empty));
    }

    #[test]
    fn test_publish_without_subscribers() {
        let hub = Hub::new(8);
        assert_eq!(hub.publish(&"nobody", 1), PublishReport::default());
        assert_eq!(hub.topic_count(), 0);
    }

    #[test]
    fn test_unsubscribe_is_idempotent() {
        let hub = Hub::new(8);
        let mut sub = hub.subscribe("t");
        let other = hub.subscribe("t");

        hub.unsubscribe(&sub);
        hub.unsubscribe(&sub);
        assert_eq!(hub.subscriber_count(&"t"), 1);

        hub.publish(&"t", 5);
        assert_eq!(sub.try_recv(), Err(TryRecvError::Empty));

        drop(other);
        assert_eq!(hub.subscriber_count(&"t"), 0);
        assert_eq!(hub.topic_count(), 0);
    }

    #[test]
    fn test_drop_unsubscribes_immediately() {
        let hub = Hub::new(8);
        let sub = hub.subscribe("t");
        assert_eq!(hub.subscriber_count(&"t"), 1);

        drop(sub);
        assert_eq!(hub.subscriber_count(&"t"), 0);
        assert_eq!(hub.publish(&"t", 1).delivered, 0);
    }

    #[test]
    fn test_backlogged_subscriber_is_detached() {
        let hub = Hub::new(2);
        let mut slow = hub.subscribe("t");
        let mut fast = hub.subscribe("t");

        for i in 0..2 {
            assert_eq!(hub.publish(&"t", i).delivered, 2);
            assert_eq!(fast.try_recv(), Ok(i));
        }

        // slow never drained; its queue is now full
        let report = hub.publish(&"t", 2);
        assert_eq!(report, PublishReport { delivered: 1, detached: 1 });
        assert_eq!(fast.try_recv(), Ok(2));
        assert_eq!(hub.subscriber_count(&"t"), 1);

        // Already queued messages survive, then the stream ends
        assert_eq!(slow.try_recv(), Ok(0));
        assert_eq!(slow.try_recv(), Ok(1));
        assert_eq!(slow.try_recv(), Err(TryRecvError::Disconnected));

        assert_eq!(hub.publish(&"t", 3).delivered, 1);
    }

    #[test]
    fn test_close_topic_disconnects_everyone() {
        let hub = Hub::new(8);
        let mut s1 = hub.subscribe("t");
        let mut s2 = hub.subscribe("t");
        let mut other = hub.subscribe("u");
        hub.publish(&"t", 9);

        assert_eq!(hub.close_topic(&"t"), 2);
        assert_eq!(hub.close_topic(&"t"), 0);

        assert_eq!(s1.try_recv(), Ok(9));
        assert_eq!(s1.try_recv(), Err(TryRecvError::Disconnected));
        assert_eq!(s2.try_recv(), Ok(9));
        assert_eq!(s2.try_recv(), Err(TryRecvError::Disconnected));

        // Unsubscribing after close is a no-op
        hub.unsubscribe(&s1);
        drop(s2);

        hub.publish(&"u", 1);
        assert_eq!(other.try_recv(), Ok(1));
    }

    #[test]
    fn test_subscriber_outliving_hub() {
        let hub = Hub::new(8);
        let mut sub = hub.subscribe("t");
        drop(hub);

        assert_eq!(sub.try_recv(), Err(TryRecvError::Disconnected));
        assert_eq!(sub.topic(), &"t");
    }

    #[tokio::test]
    async fn test_recv_ends_after_close() {
        let hub = Hub::new(8);
        let mut sub = hub.subscribe("t");

        let publisher = hub.clone();
        let task = tokio::spawn(async move {
            publisher.publish(&"t", 1);
            publisher.publish(&"t", 2);
            publisher.close_topic(&"t");
        });

        assert_eq!(sub.recv().await, Some(1));
        assert_eq!(sub.recv().await, Some(2));
        assert_eq!(sub.recv().await, None);
        task.await.unwrap();
    }

    #[test]
    fn test_concurrent_publishers_keep_one_order() {
        let hub = BroadcastHub::<u8, (usize, usize)>::new(4096);
        let mut subs: Vec<_> = (0..3).map(|_| hub.subscribe(1)).collect();

        let handles: Vec<_> = (0..4)
            .map(|thread| {
                let hub = hub.clone();
                std::thread::spawn(move || {
                    for seq in 0..200 {
                        hub.publish(&1, (thread, seq));
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        let drain = |s: &mut Subscriber<u8, (usize, usize)>| {
            let mut out = Vec::new();
            while let Ok(m) = s.try_recv() {
                out.push(m);
            }
            out
        };
        let first = drain(&mut subs[0]);
        assert_eq!(first.len(), 800);
        for s in subs.iter_mut().skip(1) {
            assert_eq!(drain(s), first);
        }
    }
}
