//! Subscription registry: which connections want which channels.
//!
//! Each registered connection owns an outbox of broadcast rounds. The
//! registry itself only keeps a weak association: dropping the
//! [`Registration`] removes the entry.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, PoisonError, RwLock, Weak};

use tokio::sync::{mpsc, oneshot, Notify};

use ccsync_core::SyncOperation;

use crate::detector::ChangedChannel;

/// Process-unique connection identifier.
pub type ConnectionId = u64;

/// How a connection finished a round.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoundOutcome {
    /// Every operation was acked and sent.
    Delivered(usize),
    /// The connection's own initial resolution already covered this round.
    Skipped,
}

/// Eviction flag shared between the registry and one session.
#[derive(Debug, Default)]
pub struct Eviction {
    evicted: AtomicBool,
    notify: Notify,
}

impl Eviction {
    fn evict(&self) {
        self.evicted.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    pub fn is_evicted(&self) -> bool {
        self.evicted.load(Ordering::SeqCst)
    }

    /// Resolves once the connection has been evicted.
    pub async fn wait(&self) {
        loop {
            let notified = self.notify.notified();
            if self.is_evicted() {
                return;
            }
            notified.await;
        }
    }
}

/// One broadcast round addressed to a single connection.
#[derive(Debug)]
pub struct Round {
    pub generation: u64,
    pub operations: Vec<SyncOperation>,
    done: oneshot::Sender<RoundOutcome>,
}

impl Round {
    /// Report completion to the broadcaster.
    pub fn finish(self, outcome: RoundOutcome) {
        let _ = self.done.send(outcome);
    }
}

struct Subscriber {
    channels: Vec<String>,
    outbox: mpsc::UnboundedSender<Round>,
    backlog: Arc<AtomicUsize>,
    eviction: Arc<Eviction>,
}

#[derive(Default)]
struct Inner {
    subscribers: HashMap<ConnectionId, Subscriber>,
    interest: BTreeMap<String, BTreeSet<ConnectionId>>,
}

/// Registry of live subscriptions.
#[derive(Default)]
pub struct SubscriptionRegistry {
    inner: RwLock<Inner>,
    next_id: AtomicU64,
}

/// A connection's handle on its subscription.
pub struct Registration {
    pub id: ConnectionId,
    pub channels: Vec<String>,
    /// Rounds addressed to this connection, in broadcast order.
    pub rounds: mpsc::UnboundedReceiver<Round>,
    /// Operations queued but not yet delivered.
    pub backlog: Arc<AtomicUsize>,
    /// Set when the registry evicts this connection.
    pub eviction: Arc<Eviction>,
    registry: Weak<SubscriptionRegistry>,
}

impl Drop for Registration {
    fn drop(&mut self) {
        if let Some(registry) = self.registry.upgrade() {
            registry.remove(self.id);
        }
    }
}

/// Rounds handed out by [`SubscriptionRegistry::dispatch`].
#[derive(Debug, Default)]
pub struct Dispatch {
    pub pending: Vec<(ConnectionId, oneshot::Receiver<RoundOutcome>)>,
    pub evicted: Vec<ConnectionId>,
}

impl SubscriptionRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Register a connection for `channels` (already filtered and ordered).
    pub fn register(self: &Arc<Self>, channels: Vec<String>) -> Registration {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let (outbox, rounds) = mpsc::unbounded_channel();
        let backlog = Arc::new(AtomicUsize::new(0));
        let eviction = Arc::new(Eviction::default());

        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        for channel in &channels {
            inner.interest.entry(channel.clone()).or_default().insert(id);
        }
        inner.subscribers.insert(
            id,
            Subscriber {
                channels: channels.clone(),
                outbox,
                backlog: Arc::clone(&backlog),
                eviction: Arc::clone(&eviction),
            },
        );
        drop(inner);

        tracing::debug!(connection = id, ?channels, "subscription registered");
        Registration {
            id,
            channels,
            rounds,
            backlog,
            eviction,
            registry: Arc::downgrade(self),
        }
    }

    /// Remove a connection. Returns whether it was present.
    pub fn remove(&self, id: ConnectionId) -> bool {
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        let Some(subscriber) = inner.subscribers.remove(&id) else {
            return false;
        };
        for channel in &subscriber.channels {
            if let Some(ids) = inner.interest.get_mut(channel) {
                ids.remove(&id);
                if ids.is_empty() {
                    inner.interest.remove(channel);
                }
            }
        }
        tracing::debug!(connection = id, "subscription removed");
        true
    }

    pub fn len(&self) -> usize {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .subscribers
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Connections interested in a channel.
    pub fn interested(&self, channel: &str) -> Vec<ConnectionId> {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .interest
            .get(channel)
            .map(|ids| ids.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Queue one round per interested connection.
    ///
    /// Each connection receives the operations of its changed channels in
    /// its own subscription order. A connection that still has more than
    /// `max_backlog` operations queued from earlier rounds is evicted
    /// instead; the size of the new round alone never evicts.
    pub fn dispatch(&self, generation: u64, changed: &[ChangedChannel], max_backlog: usize) -> Dispatch {
        let by_name: HashMap<&str, &ChangedChannel> =
            changed.iter().map(|c| (c.name.as_str(), c)).collect();
        let mut dispatch = Dispatch::default();

        {
            let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
            let addressed: BTreeSet<ConnectionId> = changed
                .iter()
                .filter_map(|c| inner.interest.get(&c.name))
                .flatten()
                .copied()
                .collect();

            for id in addressed {
                let Some(subscriber) = inner.subscribers.get(&id) else {
                    continue;
                };
                let operations: Vec<SyncOperation> = subscriber
                    .channels
                    .iter()
                    .filter_map(|name| by_name.get(name.as_str()))
                    .flat_map(|c| c.operations.iter().cloned())
                    .collect();
                if operations.is_empty() {
                    continue;
                }

                let queued = subscriber.backlog.load(Ordering::SeqCst);
                if queued > max_backlog {
                    tracing::warn!(
                        connection = id,
                        queued,
                        incoming = operations.len(),
                        max_backlog,
                        "evicting slow consumer"
                    );
                    subscriber.eviction.evict();
                    dispatch.evicted.push(id);
                    continue;
                }

                let count = operations.len();
                let (done, done_rx) = oneshot::channel();
                let round = Round {
                    generation,
                    operations,
                    done,
                };
                subscriber.backlog.fetch_add(count, Ordering::SeqCst);
                if subscriber.outbox.send(round).is_ok() {
                    dispatch.pending.push((id, done_rx));
                } else {
                    subscriber.backlog.fetch_sub(count, Ordering::SeqCst);
                }
            }
        }

        for id in &dispatch.evicted {
            self.remove(*id);
        }
        dispatch
    }
}
