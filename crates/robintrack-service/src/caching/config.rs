use std::time::Duration;

use serde::Deserialize;

use super::mutex::MutexConfig;
use super::shared_store::SharedStoreConfig;

/// Retry budget and lifetime of the per-key computation lock.
#[derive(Debug, Clone, Copy, Deserialize, Eq, PartialEq)]
#[serde(default)]
pub struct LockConfig {
    /// How long a lock is held at most before the mutex service reclaims it.
    ///
    /// This must exceed [`CachingConfig::producer_timeout`].
    #[serde(with = "humantime_serde")]
    pub ttl: Duration,

    /// How many additional acquisition attempts are made after the first one failed.
    pub retry_count: u32,

    /// The delay between two acquisition attempts.
    #[serde(with = "humantime_serde")]
    pub retry_delay: Duration,

    /// The maximum random jitter added to each [`retry_delay`](Self::retry_delay).
    #[serde(with = "humantime_serde")]
    pub retry_jitter: Duration,
}

impl LockConfig {
    /// The longest time a caller may wait for the lock, ignoring jitter.
    pub fn max_wait(&self) -> Duration {
        self.retry_delay * self.retry_count
    }
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(60),
            // 240 retries at 500ms give a waiting budget of two minutes
            retry_count: 240,
            retry_delay: Duration::from_millis(500),
            retry_jitter: Duration::from_millis(50),
        }
    }
}

/// Configuration of the cache computation coordinator.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CachingConfig {
    /// Skip the shared store entirely and compute every request directly.
    ///
    /// This is an operational escape hatch for when the cached data is known to be bad.
    pub bypass: bool,

    /// The computation lock.
    pub lock: LockConfig,

    /// The age after which a placeholder is no longer trusted as evidence of an active
    /// computation.
    #[serde(with = "humantime_serde")]
    pub stale_placeholder_after: Duration,

    /// The maximum time a single producer call may take.
    #[serde(with = "humantime_serde")]
    pub producer_timeout: Duration,

    /// Where cached values are stored.
    pub shared_store: SharedStoreConfig,

    /// Which mutex service arbitrates computations.
    pub mutex: MutexConfig,
}

impl Default for CachingConfig {
    fn default() -> Self {
        Self {
            bypass: false,
            lock: LockConfig::default(),
            stale_placeholder_after: Duration::from_secs(5 * 60),
            producer_timeout: Duration::from_secs(50),
            shared_store: SharedStoreConfig::default(),
            mutex: MutexConfig::default(),
        }
    }
}
