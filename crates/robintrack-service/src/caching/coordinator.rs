use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::time::{Duration, SystemTime};

use bytes::Bytes;
use futures::FutureExt;
use serde::Serialize;
use tokio::time::Instant;

use super::mutex::{LockManager, LockToken, MutexServiceRef};
use super::shared_store::SharedStoreRef;
use super::{CacheEntry, CacheError, CacheKey, CachingConfig, ProducerError, StoredEntry};

/// Computes expensive values at most once per key across all workers.
///
/// Values live in a [`SharedStore`](super::SharedStore), partitioned by the kind of value. On a
/// miss, exactly one worker at a time holds the per-key lock and runs the producer, while every
/// other caller for the same key waits for that lock and then finds the value ready.
///
/// While a computation is running, its entry holds a placeholder. A placeholder is never handed
/// out as a value, and every way out of a computation, including failures, timeouts, panics and
/// the caller going away, removes it again.
#[derive(Debug, Clone)]
pub struct Coordinator {
    store: SharedStoreRef,
    locks: LockManager,
    bypass: bool,
    stale_placeholder_after: Duration,
    producer_timeout: Duration,
}

impl Coordinator {
    pub fn new(store: SharedStoreRef, mutex: MutexServiceRef, config: &CachingConfig) -> Self {
        Self {
            store,
            locks: LockManager::new(mutex, config.lock),
            bypass: config.bypass,
            stale_placeholder_after: config.stale_placeholder_after,
            producer_timeout: config.producer_timeout,
        }
    }

    /// The shared store this coordinator reads from and writes to.
    pub fn store(&self) -> &SharedStoreRef {
        &self.store
    }

    /// Returns the value cached at `partition` / `key`, computing it on a miss.
    ///
    /// On a miss, `producer` is run under the per-key lock and its output is rendered to bytes by
    /// `formatter`. Only the formatted bytes are stored, and they are returned to every caller,
    /// whether it computed them or found them in the store.
    ///
    /// Neither errors nor [`ProducerError::NotFound`] are cached. The entry is reset instead, so
    /// the next call computes again.
    #[tracing::instrument(skip_all, fields(partition = %partition, key = %key))]
    pub async fn get_or_compute<T, P, Fut, F>(
        &self,
        partition: &str,
        key: &CacheKey,
        producer: P,
        formatter: F,
    ) -> CacheEntry<Bytes>
    where
        P: FnOnce() -> Fut + Send,
        Fut: Future<Output = Result<T, ProducerError>> + Send,
        F: FnOnce(T) -> CacheEntry<Bytes> + Send,
        T: Send,
    {
        metric!(counter("caches.access") += 1, "partition" => partition);

        if self.bypass {
            tracing::trace!("Caching bypassed");
            return self.run_producer(partition, producer, formatter).await;
        }

        match self.read(partition, key).await? {
            StoredEntry::Ready(value) => {
                metric!(counter("caches.hit") += 1, "partition" => partition, "path" => "fast");
                return Ok(value);
            }
            entry @ StoredEntry::Placeholder { .. } => {
                self.check_stale(partition, &entry);
            }
            StoredEntry::Absent => {}
        }

        let lock_name = LockManager::lock_name(partition, key.as_str());
        let token = self.locks.acquire(&lock_name).await?;
        let mut guard = ComputationGuard::new(self, partition, key, token);

        let result = self
            .compute_locked(&mut guard, partition, key, producer, formatter)
            .await;
        guard.finish().await;
        result
    }

    /// Like [`get_or_compute`](Self::get_or_compute), storing the value serialized as JSON.
    pub async fn get_or_compute_json<T, P, Fut>(
        &self,
        partition: &str,
        key: &CacheKey,
        producer: P,
    ) -> CacheEntry<Bytes>
    where
        P: FnOnce() -> Fut + Send,
        Fut: Future<Output = Result<T, ProducerError>> + Send,
        T: Serialize + Send,
    {
        self.get_or_compute(partition, key, producer, |value| {
            Ok(Bytes::from(serde_json::to_vec(&value)?))
        })
        .await
    }

    async fn read(&self, partition: &str, key: &CacheKey) -> CacheEntry<StoredEntry> {
        let raw = self.store.get(partition, key).await?;
        let entry = StoredEntry::decode(raw);
        tracing::trace!(partition, state = entry.state(), "Read cache entry");
        Ok(entry)
    }

    /// Logs a placeholder that is older than any computation should take.
    ///
    /// Its writer most likely died without cleaning up. Such a placeholder is not trusted and the
    /// caller goes on to take the lock, after which it is overwritten.
    fn check_stale(&self, partition: &str, entry: &StoredEntry) -> bool {
        let Some(age) = entry.placeholder_age(SystemTime::now()) else {
            return false;
        };
        if age <= self.stale_placeholder_after {
            return false;
        }
        metric!(counter("caches.placeholder.stale") += 1, "partition" => partition);
        tracing::warn!(?age, "Found stale placeholder");
        true
    }

    /// The part of a miss that runs while holding the lock.
    async fn compute_locked<T, P, Fut, F>(
        &self,
        guard: &mut ComputationGuard,
        partition: &str,
        key: &CacheKey,
        producer: P,
        formatter: F,
    ) -> CacheEntry<Bytes>
    where
        P: FnOnce() -> Fut + Send,
        Fut: Future<Output = Result<T, ProducerError>> + Send,
        F: FnOnce(T) -> CacheEntry<Bytes> + Send,
        T: Send,
    {
        // somebody else may have finished the computation while we were waiting for the lock
        match self.read(partition, key).await? {
            StoredEntry::Ready(value) => {
                metric!(counter("caches.hit") += 1, "partition" => partition, "path" => "locked");
                return Ok(value);
            }
            entry @ StoredEntry::Placeholder { .. } => {
                // as we hold the lock, whoever wrote this is gone
                if !self.check_stale(partition, &entry) {
                    tracing::debug!("Taking over placeholder of an abandoned computation");
                }
            }
            StoredEntry::Absent => {}
        }

        let placeholder = StoredEntry::encode_placeholder(SystemTime::now());
        self.store.set(partition, key, placeholder).await?;
        guard.placeholder_written = true;

        let value = self.run_producer(partition, producer, formatter).await?;

        match self
            .store
            .set(partition, key, StoredEntry::encode_ready(&value))
            .await
        {
            Ok(()) => guard.placeholder_written = false,
            // the caller still gets its value, the guard removes the placeholder
            Err(err) => tracing::error!(error = %err, "Failed to store computed value"),
        }
        Ok(value)
    }

    /// Runs the producer and formatter, turning timeouts and panics of either into errors.
    async fn run_producer<T, P, Fut, F>(
        &self,
        partition: &str,
        producer: P,
        formatter: F,
    ) -> CacheEntry<Bytes>
    where
        P: FnOnce() -> Fut + Send,
        Fut: Future<Output = Result<T, ProducerError>> + Send,
        F: FnOnce(T) -> CacheEntry<Bytes> + Send,
        T: Send,
    {
        let start = Instant::now();
        // the formatter runs inside the unwind boundary as well
        let future =
            AssertUnwindSafe(async move { producer().await.map(formatter) }).catch_unwind();

        let result = match tokio::time::timeout(self.producer_timeout, future).await {
            Ok(Ok(Ok(formatted))) => formatted,
            Ok(Ok(Err(err))) => Err(err.into()),
            Ok(Err(panic)) => {
                let message = panic_message(&*panic);
                tracing::error!(panic = message, "Cache computation panicked");
                Err(CacheError::ComputationFailed(format!("panicked: {message}")))
            }
            Err(_elapsed) => {
                tracing::error!(timeout = ?self.producer_timeout, "Cache computation timed out");
                Err(CacheError::Timeout(self.producer_timeout))
            }
        };

        let status = match &result {
            Ok(_) => "ok",
            Err(err) => err.metrics_tag(),
        };
        metric!(counter("caches.computation") += 1, "partition" => partition, "status" => status);
        metric!(
            timer("caches.computation.duration") = start.elapsed(),
            "partition" => partition,
        );
        if let Err(err) = &result {
            if *err != CacheError::NotFound {
                metric!(
                    counter("caches.computation.error") += 1,
                    "partition" => partition,
                    "kind" => err.metrics_tag(),
                );
            }
        }

        result
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(message) = panic.downcast_ref::<&'static str>() {
        message
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message
    } else {
        "unknown panic payload"
    }
}

/// What is left to clean up after a computation.
#[derive(Debug)]
struct Cleanup {
    store: SharedStoreRef,
    locks: LockManager,
    partition: String,
    key: CacheKey,
    token: LockToken,
    delete_entry: bool,
}

impl Cleanup {
    async fn run(self) {
        if self.delete_entry {
            if let Err(err) = self.store.delete(&self.partition, &self.key).await {
                tracing::error!(
                    error = %err,
                    partition = self.partition,
                    key = %self.key,
                    "Failed to remove placeholder",
                );
            }
        }
        if let Err(err) = self.locks.release(&self.token).await {
            tracing::error!(error = %err, lock = self.token.name(), "Failed to release lock");
        }
    }
}

/// Holds the lock of a running computation.
///
/// [`finish`](Self::finish) removes a leftover placeholder and releases the lock. If the guard is
/// dropped instead, because the caller stopped polling the computation, the same cleanup is
/// spawned onto the runtime.
struct ComputationGuard {
    cleanup: Option<Cleanup>,
    placeholder_written: bool,
}

impl ComputationGuard {
    fn new(coordinator: &Coordinator, partition: &str, key: &CacheKey, token: LockToken) -> Self {
        Self {
            cleanup: Some(Cleanup {
                store: coordinator.store.clone(),
                locks: coordinator.locks.clone(),
                partition: partition.to_owned(),
                key: key.clone(),
                token,
                delete_entry: false,
            }),
            placeholder_written: false,
        }
    }

    fn take_cleanup(&mut self) -> Option<Cleanup> {
        let mut cleanup = self.cleanup.take()?;
        cleanup.delete_entry = self.placeholder_written;
        Some(cleanup)
    }

    async fn finish(mut self) {
        if let Some(cleanup) = self.take_cleanup() {
            cleanup.run().await;
        }
    }
}

impl Drop for ComputationGuard {
    fn drop(&mut self) {
        let Some(cleanup) = self.take_cleanup() else {
            return;
        };
        tracing::warn!(
            partition = cleanup.partition,
            key = %cleanup.key,
            "Computation was cancelled, cleaning up in the background",
        );
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(cleanup.run());
            }
            Err(_) => tracing::error!("No runtime to clean up the cancelled computation on"),
        }
    }
}
