use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use futures::channel::oneshot;
use futures::future::{FutureExt, Shared};

use crate::error::{CacheEntry, CacheError};

/// The receiving end of a running computation, shared between all lookups of its key.
pub(crate) type ComputationChannel<T> = Shared<oneshot::Receiver<CacheEntry<T>>>;

/// The result of looking up a key in a [`SuspendingCache`](crate::SuspendingCache).
#[derive(Debug)]
pub enum Lookup<T> {
    /// The value is still being computed.
    ///
    /// The caller should suspend until the attached handle completes, and then look the key up
    /// again.
    Pending(Suspended<T>),
    /// The computation has settled, either with a value or with an error.
    Ready(CacheEntry<T>),
}

impl<T> Lookup<T> {
    /// Returns `true` if the computation has settled.
    pub fn is_ready(&self) -> bool {
        matches!(self, Self::Ready(_))
    }

    /// Returns `true` if the computation is still running.
    pub fn is_pending(&self) -> bool {
        matches!(self, Self::Pending(_))
    }

    /// Returns a reference to the settled result, if any.
    pub fn ready(&self) -> Option<&CacheEntry<T>> {
        match self {
            Self::Ready(entry) => Some(entry),
            Self::Pending(_) => None,
        }
    }

    pub fn into_ready(self) -> Option<CacheEntry<T>> {
        match self {
            Self::Ready(entry) => Some(entry),
            Self::Pending(_) => None,
        }
    }

    pub fn into_suspended(self) -> Option<Suspended<T>> {
        match self {
            Self::Pending(suspended) => Some(suspended),
            Self::Ready(_) => None,
        }
    }
}

/// A handle to a running computation.
///
/// Awaiting this handle waits for the computation to settle and yields its result. By the time
/// it completes, the result has already been stored in the cache, so a subsequent lookup of the
/// same key is guaranteed to be [`Lookup::Ready`].
///
/// Dropping the handle does not cancel the computation.
pub struct Suspended<T> {
    channel: ComputationChannel<T>,
}

impl<T> Suspended<T> {
    pub(crate) fn new(channel: ComputationChannel<T>) -> Self {
        Self { channel }
    }
}

impl<T> Clone for Suspended<T> {
    fn clone(&self) -> Self {
        Self {
            channel: self.channel.clone(),
        }
    }
}

impl<T> fmt::Debug for Suspended<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Suspended")
            .field("strong_count", &self.channel.strong_count())
            .finish()
    }
}

impl<T: Clone> Future for Suspended<T> {
    type Output = CacheEntry<T>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        // The sender is only ever dropped without sending if the settlement guard itself got lost,
        // which we treat the same as a lost computation.
        self.channel
            .poll_unpin(cx)
            .map(|result| result.unwrap_or(Err(CacheError::InternalError)))
    }
}
