//! Caching of expensive computations, shared between all workers.
//!
//! Computed values are stored in a [`SharedStore`], addressed by a *partition* naming the kind of
//! value (like `most_popular`) and a [`CacheKey`] derived from the request parameters.
//!
//! # Lifecycle
//!
//! The [`Coordinator`] guarantees that a value is computed at most once at a time per key:
//!
//! - A stored, finished value is returned right away without touching the lock.
//! - Otherwise the caller acquires the per-key lock from the [mutex service](mutex), waiting and
//!   retrying according to [`LockConfig`].
//! - Holding the lock, it checks the store again, since the previous lock holder has most likely
//!   just finished the value.
//! - If the value is still missing, it writes a placeholder, runs the producer, and replaces the
//!   placeholder with the formatted value. Failures remove the placeholder instead.
//!
//! # Stored records
//!
//! Records are tagged, see [`StoredEntry`]. A placeholder carries the time it was written, so that
//! placeholders of crashed workers can be told apart from running computations. Those older than
//! [`stale_placeholder_after`](CachingConfig::stale_placeholder_after) are logged and counted.
//!
//! # Metrics
//!
//! - `caches.access`: every call, tagged with the partition.
//! - `caches.hit`: values found in the store, tagged with the `path` they were found on.
//! - `caches.placeholder.stale`: placeholders found that exceed the stale cutoff.
//! - `caches.lock.wait` / `caches.lock.timeout`: time to acquire the lock, and failures to do so.
//! - `caches.computation`, `caches.computation.duration`, `caches.computation.error`: producer
//!   runs, tagged with their outcome.

mod cache_error;
mod cache_key;
mod config;
mod coordinator;
mod entry;
pub mod mutex;
pub mod shared_store;


pub use cache_error::{CacheEntry, CacheError, ProducerError};
pub use cache_key::{CacheKey, CacheKeyBuilder};
pub use config::{CachingConfig, LockConfig};
pub use coordinator::Coordinator;
pub use entry::StoredEntry;
pub use mutex::{LockManager, LockToken, MutexConfig, MutexService, MutexServiceRef};
pub use shared_store::{
    FilesystemSharedStoreConfig, SharedStore, SharedStoreConfig, SharedStoreRef,
};
