//! A keyed store of asynchronous computations that never blocks the caller.
//!
//! The [`SuspendingCache`] is built for the "render, suspend, retry" style of data loading:
//! a lookup either hands out a value that is already available, or signals that the value is
//! still being computed, together with a [`Suspended`] handle that completes once the computation
//! settles. The caller is expected to come back and look the key up again at that point.
//!
//! ## Guarantees
//!
//! - Each key is computed at most once for the lifetime of a cache. Concurrent lookups of a key
//!   that is still being computed are coalesced onto the running computation.
//! - A computation settles exactly once, either with a value or with a [`CacheError`]. Failures
//!   are cached just like values and replayed to every later lookup, they are never retried.
//! - The settled result is written to the cache before any waiting [`Suspended`] handle
//!   completes.
//!
//! There is no eviction, expiry or invalidation. A cache holds on to every entry until it is
//! dropped.
//!
//! ## Example
//!
//! ```
//! use suspense_cache::{CacheConfig, Lookup, SuspendingCache, producer_fn};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let producer = producer_fn(|name: &String| {
//!     let name = name.clone();
//!     async move { Ok(name.to_uppercase()) }
//! });
//! let cache = SuspendingCache::new(
//!     CacheConfig::default(),
//!     producer,
//!     tokio::runtime::Handle::current(),
//! );
//!
//! let key = "pikachu".to_owned();
//! let value = match cache.get(&key) {
//!     Lookup::Ready(entry) => entry,
//!     Lookup::Pending(suspended) => {
//!         // wait for the computation to settle, then look the key up again
//!         let _settled = suspended.await;
//!         cache.get(&key).into_ready().unwrap()
//!     }
//! };
//! assert_eq!(value.unwrap(), "PIKACHU");
//! # }
//! ```

#[macro_use]
pub mod metrics;

mod cache;
pub mod config;
mod error;
pub mod logging;
mod lookup;
mod producer;


pub use cache::{EntryStatus, SuspendingCache};
pub use config::CacheConfig;
pub use error::{CacheEntry, CacheError};
pub use lookup::{Lookup, Suspended};
pub use producer::{FnProducer, Producer, producer_fn};
