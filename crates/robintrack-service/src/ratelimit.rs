//! Fixed-window request limits per client.
//!
//! Requests are counted per client address and *path class* in windows of
//! [`RateLimitConfig::window`]. All `/stocks/{symbol}/{action}` paths with the same action share
//! one class, so scraping the history of every symbol counts against a single budget.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use anyhow::Context as _;
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use serde::Deserialize;

use crate::utils::redis::{self as redis_utils, RedisConfig};

const KEY_PREFIX: &str = "request-count-ip";

/// Where request counts are kept.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RateLimitBackend {
    #[default]
    Memory,
    Redis(RedisConfig),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Turns rate limiting off entirely.
    pub enabled: bool,
    /// Requests allowed per client and path class within one window.
    pub max_requests: u64,
    /// Length of a counting window.
    #[serde(with = "humantime_serde")]
    pub window: Duration,
    /// Path prefixes that are never limited.
    pub exempt_paths: Vec<String>,
    pub backend: RateLimitBackend,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_requests: 33,
            window: Duration::from_secs(45),
            exempt_paths: vec!["/most_popular".into(), "/least_popular".into()],
            backend: RateLimitBackend::default(),
        }
    }
}

/// The outcome of [`RateLimiter::check`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Allowed,
    Limited {
        /// Time until the current window ends.
        retry_after: Duration,
    },
}

/// Counts requests per key, resetting each key after a window.
#[async_trait]
trait RequestCounter: fmt::Debug + Send + Sync {
    /// Increments the counter at `key` and returns its new value.
    async fn increment(&self, key: &str, window: Duration) -> anyhow::Result<u64>;
}

#[derive(Debug, Default)]
struct MemoryCounter {
    counts: Mutex<HashMap<String, (u64, SystemTime)>>,
}

#[async_trait]
impl RequestCounter for MemoryCounter {
    async fn increment(&self, key: &str, window: Duration) -> anyhow::Result<u64> {
        let now = SystemTime::now();
        let mut counts = self.counts.lock().unwrap_or_else(PoisonError::into_inner);
        counts.retain(|_, (_, expires)| *expires > now);
        let (count, _) = counts.entry(key.to_owned()).or_insert((0, now + window));
        *count += 1;
        Ok(*count)
    }
}

struct RedisCounter {
    connection: ConnectionManager,
}

impl fmt::Debug for RedisCounter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisCounter").finish_non_exhaustive()
    }
}

#[async_trait]
impl RequestCounter for RedisCounter {
    async fn increment(&self, key: &str, window: Duration) -> anyhow::Result<u64> {
        let mut connection = self.connection.clone();
        let (count,): (u64,) = redis::pipe()
            .atomic()
            .incr(key, 1)
            .expire(key, window.as_secs().max(1) as i64)
            .ignore()
            .query_async(&mut connection)
            .await?;
        Ok(count)
    }
}

/// Decides whether a client may make another request.
#[derive(Debug, Clone)]
pub struct RateLimiter {
    config: RateLimitConfig,
    counter: Arc<dyn RequestCounter>,
}

impl RateLimiter {
    pub async fn from_config(config: &RateLimitConfig) -> anyhow::Result<Self> {
        let counter: Arc<dyn RequestCounter> = match &config.backend {
            RateLimitBackend::Memory => Arc::new(MemoryCounter::default()),
            RateLimitBackend::Redis(redis) => Arc::new(RedisCounter {
                connection: redis_utils::connect(redis)
                    .await
                    .context("failed to initialize redis rate limiter")?,
            }),
        };
        Ok(Self {
            config: config.clone(),
            counter,
        })
    }

    /// Whether requests to `path` are never limited.
    pub fn is_exempt(&self, path: &str) -> bool {
        !self.config.enabled
            || self
                .config
                .exempt_paths
                .iter()
                .any(|prefix| path.starts_with(prefix.as_str()))
    }

    /// Counts a request of `client` to `path` and decides whether it may proceed.
    ///
    /// Errors of the counter backend are logged and let the request through.
    pub async fn check(&self, client: &str, path: &str) -> Decision {
        self.check_at(client, path, SystemTime::now()).await
    }

    async fn check_at(&self, client: &str, path: &str, now: SystemTime) -> Decision {
        if self.is_exempt(path) {
            return Decision::Allowed;
        }

        let window = self.config.window.as_secs().max(1);
        let now = now.duration_since(UNIX_EPOCH).unwrap_or_default().as_secs();
        let key = format!(
            "{KEY_PREFIX}-{client}-{}-{window}-{}",
            path_class(path),
            now / window
        );

        let count = match self.counter.increment(&key, self.config.window).await {
            Ok(count) => count,
            Err(err) => {
                tracing::error!(error = ?err, "Failed to count request");
                return Decision::Allowed;
            }
        };

        if count > self.config.max_requests {
            metric!(counter("requests.rate_limited") += 1);
            tracing::debug!(client, path, count, "Rate limited request");
            Decision::Limited {
                retry_after: Duration::from_secs(window - now % window),
            }
        } else {
            Decision::Allowed
        }
    }
}

/// The part of a path that requests are counted under.
///
/// Per-symbol paths `/stocks/{symbol}/{action}` are counted by their action, per-day paths
/// `/barometer/top_changes/{day}` all count as `top_changes`.
fn path_class(path: &str) -> &str {
    let mut segments = path.trim_start_matches('/').split('/');
    match (segments.next(), segments.next(), segments.next()) {
        (Some("stocks"), Some(_), Some(action)) if !action.is_empty() => action,
        (Some("barometer"), Some(action @ "top_changes"), Some(_)) => action,
        _ => path,
    }
}
