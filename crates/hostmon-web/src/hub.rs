//! Broadcast hub: per-topic subscriber registry and non-blocking fan-out.
//!
//! Every subscriber owns a bounded queue. `publish` only ever calls
//! `try_send`, so a stalled consumer costs the sampler one failed enqueue and
//! never a wait. A subscriber whose queue stays full for `max_overflows`
//! consecutive publishes is evicted: its queue is closed and its delivery task
//! ends after draining what was already queued.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::Serialize;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, info, warn};
use utoipa::ToSchema;

/// Metric category a stream carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub(crate) enum Topic {
    Cpus,
    Memory,
}

impl Topic {
    pub(crate) fn as_str(self) -> &'static str {
        match self {
            Topic::Cpus => "cpus",
            Topic::Memory => "memory",
        }
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One serialized sample, shared by every subscriber of a topic.
pub(crate) type Frame = Arc<str>;

pub(crate) type SubscriberId = u64;

#[derive(Debug, Clone, Copy)]
pub(crate) struct HubConfig {
    /// Frames buffered per subscriber before publishes start dropping.
    pub(crate) queue_capacity: usize,
    /// Consecutive dropped frames after which a subscriber is evicted.
    pub(crate) max_overflows: u32,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 16,
            max_overflows: 8,
        }
    }
}

struct Slot {
    tx: mpsc::Sender<Frame>,
    overflows: u32,
}

#[derive(Default)]
struct Registry {
    closed: bool,
    topics: HashMap<Topic, HashMap<SubscriberId, Slot>>,
}

/// Result of one [`BroadcastHub::publish`] call.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub(crate) struct PublishReport {
    pub(crate) delivered: usize,
    pub(crate) dropped: usize,
    pub(crate) evicted: usize,
    /// Subscribers found with their receiving side already gone.
    pub(crate) closed: usize,
}

#[derive(Debug, Clone, Copy, Serialize, ToSchema)]
pub(crate) struct HubStats {
    pub(crate) cpus: usize,
    pub(crate) memory: usize,
    /// Frames dropped because a subscriber's queue was full.
    pub(crate) dropped: u64,
    /// Subscribers disconnected for falling behind.
    pub(crate) evicted: u64,
    /// Set once shutdown began; new streams are refused.
    pub(crate) closed: bool,
}

pub(crate) struct BroadcastHub {
    config: HubConfig,
    next_id: AtomicU64,
    registry: Mutex<Registry>,
    dropped: AtomicU64,
    evicted: AtomicU64,
}

impl BroadcastHub {
    pub(crate) fn new(config: HubConfig) -> Self {
        Self {
            config,
            next_id: AtomicU64::new(1),
            registry: Mutex::new(Registry::default()),
            dropped: AtomicU64::new(0),
            evicted: AtomicU64::new(0),
        }
    }

    fn registry(&self) -> MutexGuard<'_, Registry> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Registers a new subscriber. Returns `None` once the hub has been closed.
    pub(crate) fn subscribe(self: &Arc<Self>, topic: Topic) -> Option<Subscription> {
        let (tx, rx) = mpsc::channel(self.config.queue_capacity);
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);

        let active = {
            let mut registry = self.registry();
            if registry.closed {
                return None;
            }
            let subs = registry.topics.entry(topic).or_default();
            subs.insert(id, Slot { tx, overflows: 0 });
            subs.len()
        };
        debug!(%topic, subscriber = id, active, "subscribed");

        Some(Subscription {
            id,
            topic,
            rx,
            hub: self.clone(),
        })
    }

    /// Removes a subscriber. Idempotent: returns `false` if it was already gone
    /// (evicted, closed, or unsubscribed before).
    pub(crate) fn unsubscribe(&self, topic: Topic, id: SubscriberId) -> bool {
        let removed = self
            .registry()
            .topics
            .get_mut(&topic)
            .and_then(|subs| subs.remove(&id))
            .is_some();
        if removed {
            debug!(%topic, subscriber = id, "unsubscribed");
        }
        removed
    }

    /// Enqueues `frame` for every subscriber of `topic` without waiting.
    pub(crate) fn publish(&self, topic: Topic, frame: Frame) -> PublishReport {
        let mut report = PublishReport::default();
        let max_overflows = self.config.max_overflows;

        let mut registry = self.registry();
        let Some(subs) = registry.topics.get_mut(&topic) else {
            return report;
        };

        subs.retain(|&id, slot| match slot.tx.try_send(frame.clone()) {
            Ok(()) => {
                slot.overflows = 0;
                report.delivered += 1;
                true
            }
            Err(TrySendError::Full(_)) => {
                slot.overflows += 1;
                report.dropped += 1;
                if slot.overflows >= max_overflows {
                    warn!(
                        %topic,
                        subscriber = id,
                        overflows = slot.overflows,
                        "evicting slow subscriber"
                    );
                    report.evicted += 1;
                    false
                } else {
                    debug!(
                        %topic,
                        subscriber = id,
                        overflows = slot.overflows,
                        "queue full, frame dropped"
                    );
                    true
                }
            }
            Err(TrySendError::Closed(_)) => {
                report.closed += 1;
                false
            }
        });
        drop(registry);

        self.dropped.fetch_add(report.dropped as u64, Ordering::Relaxed);
        self.evicted.fetch_add(report.evicted as u64, Ordering::Relaxed);
        report
    }

    /// Drops every subscriber queue and refuses new subscriptions.
    ///
    /// Delivery tasks observe the closed queue after draining it and close
    /// their connections. Returns the number of subscribers released.
    pub(crate) fn close_all(&self) -> usize {
        let released: usize = {
            let mut registry = self.registry();
            registry.closed = true;
            registry.topics.drain().map(|(_, subs)| subs.len()).sum()
        };
        if released > 0 {
            info!(released, "closed all subscriber streams");
        }
        released
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.registry().closed
    }

    pub(crate) fn subscriber_count(&self, topic: Topic) -> usize {
        self.registry().topics.get(&topic).map_or(0, HashMap::len)
    }

    pub(crate) fn stats(&self) -> HubStats {
        HubStats {
            cpus: self.subscriber_count(Topic::Cpus),
            memory: self.subscriber_count(Topic::Memory),
            dropped: self.dropped.load(Ordering::Relaxed),
            evicted: self.evicted.load(Ordering::Relaxed),
            closed: self.is_closed(),
        }
    }
}

/// Handle to one registered subscriber.
///
/// Dropping it unregisters the subscriber; every termination path of a stream
/// goes through this drop, so release happens exactly once.
pub(crate) struct Subscription {
    id: SubscriberId,
    topic: Topic,
    rx: mpsc::Receiver<Frame>,
    hub: Arc<BroadcastHub>,
}

impl Subscription {
    pub(crate) fn id(&self) -> SubscriberId {
        self.id
    }

    pub(crate) fn topic(&self) -> Topic {
        self.topic
    }

    /// Next queued frame, or `None` once the hub dropped this subscriber
    /// (eviction or shutdown) and the queue is drained.
    pub(crate) async fn recv(&mut self) -> Option<Frame> {
        self.rx.recv().await
    }

    #[cfg(test)]
    pub(crate) fn try_recv(&mut self) -> Result<Frame, mpsc::error::TryRecvError> {
        self.rx.try_recv()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.hub.unsubscribe(self.topic, self.id);
    }
}
