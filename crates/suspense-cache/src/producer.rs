use std::fmt;
use std::future::Future;
use std::hash::Hash;
use std::marker::PhantomData;

use futures::future::{BoxFuture, FutureExt};

use crate::error::CacheEntry;

/// Provides the computation that the [`SuspendingCache`](crate::SuspendingCache) caches.
pub trait Producer: Send + Sync + 'static {
    /// The key identifying a computation.
    type Key: Clone + Eq + Hash + fmt::Debug + Send + Sync + 'static;
    /// The value produced by a successful computation.
    ///
    /// The cache hands out clones of it, so use an [`Arc`](std::sync::Arc) for values that are
    /// expensive to clone.
    type Value: Clone + Send + Sync + 'static;

    /// Creates the computation for `key`.
    ///
    /// This is invoked at most once per key and cache. The returned future is spawned onto the
    /// cache's runtime, so it must not borrow from `self` or `key`.
    fn produce(&self, key: &Self::Key) -> BoxFuture<'static, CacheEntry<Self::Value>>;
}

/// A [`Producer`] wrapping a closure, see [`producer_fn`].
pub struct FnProducer<K, V, F> {
    f: F,
    _marker: PhantomData<fn(&K) -> V>,
}

impl<K, V, F> fmt::Debug for FnProducer<K, V, F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnProducer").finish_non_exhaustive()
    }
}

/// Turns a closure returning a future into a [`Producer`].
///
/// ```
/// use suspense_cache::{CacheError, producer_fn};
///
/// let producer = producer_fn(|id: &u32| {
///     let id = *id;
///     async move {
///         match id {
///             25 => Ok("pikachu"),
///             _ => Err(CacheError::NotFound),
///         }
///     }
/// });
/// # let _ = producer;
/// ```
pub fn producer_fn<K, V, F, Fut>(f: F) -> FnProducer<K, V, F>
where
    F: Fn(&K) -> Fut,
    Fut: Future<Output = CacheEntry<V>>,
{
    FnProducer {
        f,
        _marker: PhantomData,
    }
}

impl<K, V, F, Fut> Producer for FnProducer<K, V, F>
where
    K: Clone + Eq + Hash + fmt::Debug + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
    F: Fn(&K) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = CacheEntry<V>> + Send + 'static,
{
    type Key = K;
    type Value = V;

    fn produce(&self, key: &K) -> BoxFuture<'static, CacheEntry<V>> {
        (self.f)(key).boxed()
    }
}
