use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;
use std::sync::Arc;
use std::time::Instant;

use futures::channel::oneshot;
use futures::future::FutureExt;
use parking_lot::Mutex;
use sentry::{Hub, SentryFutureExt};
use tokio::runtime::Handle;
use tracing::Instrument;

use crate::config::CacheConfig;
use crate::error::{CacheEntry, CacheError};
use crate::lookup::{ComputationChannel, Lookup, Suspended};
use crate::producer::Producer;

/// The state of a single key.
enum Slot<T> {
    /// A computation is running, lookups subscribe to its channel.
    Pending(ComputationChannel<T>),
    /// The computation has settled. This never changes again.
    Settled(CacheEntry<T>),
}

type SlotMap<K, T> = Arc<Mutex<HashMap<K, Slot<T>>>>;

/// The status of a cache entry, as reported by [`SuspendingCache::peek`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryStatus {
    /// The computation is still running.
    Pending,
    /// The computation settled with a value.
    Resolved,
    /// The computation settled with an error.
    Failed,
}

/// A keyed store of asynchronous computations.
///
/// Looking up a key that was never requested before starts its computation on the runtime the
/// cache was created with, and returns [`Lookup::Pending`] right away. Further lookups of the
/// same key are coalesced onto that computation until it settles. From then on, lookups return
/// the settled value or error synchronously via [`Lookup::Ready`].
///
/// Cloning the cache is cheap, and all clones share the same entries.
pub struct SuspendingCache<P: Producer> {
    name: Arc<str>,
    producer: Arc<P>,
    slots: SlotMap<P::Key, P::Value>,
    runtime: Handle,
}

impl<P: Producer> Clone for SuspendingCache<P> {
    fn clone(&self) -> Self {
        // https://github.com/rust-lang/rust/issues/26925
        Self {
            name: Arc::clone(&self.name),
            producer: Arc::clone(&self.producer),
            slots: Arc::clone(&self.slots),
            runtime: self.runtime.clone(),
        }
    }
}

impl<P: Producer> fmt::Debug for SuspendingCache<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut debug = f.debug_struct("SuspendingCache");
        debug.field("name", &self.name);
        match self.slots.try_lock() {
            Some(slots) => debug
                .field("entries", &slots.len())
                .field("running computations", &count_pending(&*slots))
                .finish(),
            // the counters are unknown while someone else holds the lock
            None => debug.finish_non_exhaustive(),
        }
    }
}

fn count_pending<K, T>(slots: &HashMap<K, Slot<T>>) -> usize {
    slots
        .values()
        .filter(|slot| matches!(slot, Slot::Pending(_)))
        .count()
}

impl<P: Producer> SuspendingCache<P> {
    /// Creates a new, empty cache.
    ///
    /// Computations are spawned onto `runtime`.
    pub fn new(config: CacheConfig, producer: P, runtime: Handle) -> Self {
        Self {
            name: config.name.into(),
            producer: Arc::new(producer),
            slots: Default::default(),
            runtime,
        }
    }

    /// The name of this cache, as used in logs and metrics.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Looks up `key`, starting its computation if it was never requested before.
    ///
    /// This never waits. If the computation for `key` has not settled yet, this returns
    /// [`Lookup::Pending`], and the caller should retry after the attached [`Suspended`] handle
    /// completes. Exactly one computation is started per key, no matter how many lookups happen
    /// while it is running.
    ///
    /// The first lookup of a key always returns [`Lookup::Pending`], even if the runtime has
    /// already shut down and the computation could not be spawned. In that case the key is
    /// settled with [`CacheError::InternalError`] right away, and the returned [`Suspended`]
    /// handle completes immediately.
    ///
    /// # Panics
    ///
    /// Panics if [`Producer::produce`] panics. The key is then settled with
    /// [`CacheError::InternalError`].
    pub fn get(&self, key: &P::Key) -> Lookup<P::Value> {
        self.lookup(key).0
    }

    /// Looks up `key`, and waits for its computation to settle if necessary.
    ///
    /// This is the same as calling [`get`](Self::get), awaiting the [`Suspended`] handle in case
    /// the computation is still running, and looking the key up again.
    pub async fn get_async(&self, key: &P::Key) -> CacheEntry<P::Value> {
        match self.get(key) {
            Lookup::Ready(entry) => entry,
            Lookup::Pending(suspended) => suspended.await,
        }
    }

    /// Starts the computation for `key` without waiting for its result.
    ///
    /// Returns `true` if this call started the computation, and `false` if `key` was requested
    /// before.
    pub fn preload(&self, key: &P::Key) -> bool {
        self.lookup(key).1
    }

    /// Returns the status of `key` without starting a computation.
    ///
    /// Returns `None` if `key` was never requested.
    pub fn peek(&self, key: &P::Key) -> Option<EntryStatus> {
        let slots = self.slots.lock();
        let status = match slots.get(key)? {
            Slot::Pending(_) => EntryStatus::Pending,
            Slot::Settled(Ok(_)) => EntryStatus::Resolved,
            Slot::Settled(Err(_)) => EntryStatus::Failed,
        };
        Some(status)
    }

    /// The number of keys that were requested so far, settled or not.
    pub fn len(&self) -> usize {
        self.slots.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.lock().is_empty()
    }

    /// The number of computations that are currently running.
    pub fn pending_count(&self) -> usize {
        count_pending(&*self.slots.lock())
    }

    /// Looks up `key` and also returns whether this lookup started a new computation.
    fn lookup(&self, key: &P::Key) -> (Lookup<P::Value>, bool) {
        let name = self.name();
        metric!(counter("caches.access") += 1, "cache" => name);

        let (channel, settlement) = {
            let mut slots = self.slots.lock();
            match slots.get(key) {
                Some(Slot::Settled(entry)) => {
                    metric!(counter("caches.memory.hit") += 1, "cache" => name);
                    if let Err(err) = entry {
                        metric!(
                            counter("caches.memory.failed_hit") += 1,
                            "cache" => name,
                            "error" => err.metrics_tag(),
                        );
                    }
                    return (Lookup::Ready(entry.clone()), false);
                }
                Some(Slot::Pending(channel)) => {
                    // A concurrent lookup was deduplicated.
                    metric!(counter("caches.channel.hit") += 1, "cache" => name);
                    tracing::trace!(cache = %name, ?key, "Joining running computation");
                    return (Lookup::Pending(Suspended::new(channel.clone())), false);
                }
                None => {
                    metric!(counter("caches.channel.miss") += 1, "cache" => name);

                    let (sender, receiver) = oneshot::channel();
                    let channel = receiver.shared();
                    slots.insert(key.clone(), Slot::Pending(channel.clone()));
                    metric!(
                        gauge("caches.pending") = count_pending(&*slots) as u64,
                        "cache" => name,
                    );

                    let settlement = Settlement {
                        name: Arc::clone(&self.name),
                        key: key.clone(),
                        slots: Arc::clone(&self.slots),
                        sender: Some(sender),
                    };
                    (channel, settlement)
                }
            }
        };

        // The slot is already claimed, so the producer is free to consult the cache itself.
        self.spawn_computation(settlement);

        (Lookup::Pending(Suspended::new(channel)), true)
    }

    /// Creates the computation for the claimed key and spawns it onto the runtime.
    ///
    /// NOTE: The computation is created eagerly, so that it is counted as started even before
    /// the runtime gets around to polling it.
    fn spawn_computation(&self, settlement: Settlement<P::Key, P::Value>) {
        let name = self.name();
        metric!(counter("caches.computation") += 1, "cache" => name);
        tracing::debug!(cache = %name, key = ?settlement.key, "Starting computation");

        let span = tracing::debug_span!("computation", cache = %name, key = ?settlement.key);
        let computation = self.producer.produce(&settlement.key);

        let task = async move {
            let start = Instant::now();
            let entry = computation.await;
            metric!(
                timer("caches.computation.duration") = start.elapsed(),
                "cache" => &settlement.name,
                "status" => if entry.is_ok() { "ok" } else { "err" },
            );
            settlement.settle(entry);
        }
        .instrument(span)
        .bind_hub(Hub::new_from_top(Hub::current()));

        self.runtime.spawn(task);
    }
}

/// Writes the result of a computation into its slot, and wakes up everyone waiting for it.
///
/// If this is dropped without settling, because the producer panicked or because the runtime
/// dropped the task, the slot is settled with [`CacheError::InternalError`].
struct Settlement<K: Clone + Eq + Hash, T: Clone> {
    name: Arc<str>,
    key: K,
    slots: SlotMap<K, T>,
    sender: Option<oneshot::Sender<CacheEntry<T>>>,
}

impl<K: Clone + Eq + Hash, T: Clone> Settlement<K, T> {
    fn settle(mut self, entry: CacheEntry<T>) {
        self.settle_inner(entry);
    }

    fn settle_inner(&mut self, entry: CacheEntry<T>) {
        let Some(sender) = self.sender.take() else {
            return;
        };

        if let Err(err) = &entry {
            metric!(
                counter("caches.computation.failed") += 1,
                "cache" => &self.name,
                "error" => err.metrics_tag(),
            );
            tracing::debug!(cache = %self.name, error = %err, "Computation failed");
        } else {
            tracing::debug!(cache = %self.name, "Computation resolved");
        }

        // The slot has to be settled before the channel fires, so that waiters which look the
        // key up again are guaranteed to see the result.
        let running = {
            let mut slots = self.slots.lock();
            slots.insert(self.key.clone(), Slot::Settled(entry.clone()));
            count_pending(&*slots)
        };
        metric!(gauge("caches.pending") = running as u64, "cache" => &self.name);

        // Nobody might be waiting anymore, which is fine.
        sender.send(entry).ok();
    }
}

impl<K: Clone + Eq + Hash, T: Clone> Drop for Settlement<K, T> {
    fn drop(&mut self) {
        if self.sender.is_some() {
            tracing::error!(cache = %self.name, "Computation was dropped before settling");
            self.settle_inner(Err(CacheError::InternalError));
        }
    }
}
