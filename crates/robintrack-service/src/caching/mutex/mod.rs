//! Named, expiring locks that serialize computations of the same cache entry across workers.
//!
//! A [`MutexService`] only offers a single non-blocking acquisition attempt. Waiting, retrying and
//! giving up is the job of the [`LockManager`].

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use anyhow::Context as _;
use async_trait::async_trait;
use rand::Rng;
use redis::aio::ConnectionManager;
use tokio::time::Instant;

use super::{CacheEntry, CacheError, LockConfig};
use crate::utils::redis::{self as redis_utils, RedisConfig};

mod config;

pub use config::MutexConfig;

/// Proof of holding a lock.
///
/// The token is random per acquisition, so releasing a lock that has expired and been taken by
/// another worker in the meantime has no effect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockToken {
    name: String,
    token: String,
}

impl LockToken {
    fn generate(name: &str) -> Self {
        let token: [u8; 16] = rand::random();
        Self {
            name: name.to_owned(),
            token: hex::encode(token),
        }
    }

    /// The name of the lock this token belongs to.
    pub fn name(&self) -> &str {
        &self.name
    }
}

/// A service granting named locks that expire on their own.
#[async_trait]
pub trait MutexService: fmt::Debug + Send + Sync {
    /// Tries once to acquire the lock `name` for at most `ttl`.
    ///
    /// Returns `None` if the lock is currently held by someone else.
    async fn try_acquire(&self, name: &str, ttl: Duration) -> CacheEntry<Option<LockToken>>;

    /// Releases a lock, if it is still held by `token`.
    ///
    /// Returns `false` if the lock had already expired or been taken over.
    async fn release(&self, token: &LockToken) -> CacheEntry<bool>;

    /// The backend name, for logs.
    fn name(&self) -> &'static str;
}

pub type MutexServiceRef = Arc<dyn MutexService>;

impl MutexConfig {
    /// Creates the configured mutex service.
    pub async fn create(&self) -> anyhow::Result<MutexServiceRef> {
        let mutex: MutexServiceRef = match self {
            MutexConfig::Memory => Arc::new(MemoryMutex::default()),
            MutexConfig::Redis(cfg) => Arc::new(
                RedisMutex::connect(cfg)
                    .await
                    .context("failed to initialize redis mutex")?,
            ),
        };
        tracing::info!(backend = mutex.name(), "Initialized mutex service");
        Ok(mutex)
    }
}

/// An in-process mutex service.
#[derive(Debug, Default)]
pub struct MemoryMutex {
    held: Mutex<HashMap<String, (String, Instant)>>,
}

#[async_trait]
impl MutexService for MemoryMutex {
    async fn try_acquire(&self, name: &str, ttl: Duration) -> CacheEntry<Option<LockToken>> {
        let now = Instant::now();
        let mut held = self.held.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some((_, expires)) = held.get(name) {
            if *expires > now {
                return Ok(None);
            }
        }
        let token = LockToken::generate(name);
        held.insert(name.to_owned(), (token.token.clone(), now + ttl));
        Ok(Some(token))
    }

    async fn release(&self, token: &LockToken) -> CacheEntry<bool> {
        let mut held = self.held.lock().unwrap_or_else(PoisonError::into_inner);
        match held.get(&token.name) {
            Some((current, expires)) if *current == token.token && *expires > Instant::now() => {
                held.remove(&token.name);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

/// Deletes the lock only if it still carries our token.
const RELEASE_SCRIPT: &str = r#"
if redis.call("GET", KEYS[1]) == ARGV[1] then
    return redis.call("DEL", KEYS[1])
else
    return 0
end
"#;

/// A mutex service backed by a single redis server.
pub struct RedisMutex {
    connection: ConnectionManager,
    release_script: redis::Script,
}

impl fmt::Debug for RedisMutex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisMutex").finish_non_exhaustive()
    }
}

impl RedisMutex {
    pub async fn connect(config: &RedisConfig) -> anyhow::Result<Self> {
        let connection = redis_utils::connect(config).await?;
        Ok(Self {
            connection,
            release_script: redis::Script::new(RELEASE_SCRIPT),
        })
    }
}

#[async_trait]
impl MutexService for RedisMutex {
    async fn try_acquire(&self, name: &str, ttl: Duration) -> CacheEntry<Option<LockToken>> {
        let token = LockToken::generate(name);
        let mut connection = self.connection.clone();
        let reply: Option<String> = redis::cmd("SET")
            .arg(name)
            .arg(&token.token)
            .arg("NX")
            .arg("PX")
            .arg(ttl.as_millis().max(1) as u64)
            .query_async(&mut connection)
            .await?;
        Ok(reply.map(|_| token))
    }

    async fn release(&self, token: &LockToken) -> CacheEntry<bool> {
        let mut connection = self.connection.clone();
        let deleted: i64 = self
            .release_script
            .key(&token.name)
            .arg(&token.token)
            .invoke_async(&mut connection)
            .await?;
        Ok(deleted == 1)
    }

    fn name(&self) -> &'static str {
        "redis"
    }
}

/// Acquires locks from a [`MutexService`], retrying with jitter until the budget is spent.
#[derive(Debug, Clone)]
pub struct LockManager {
    mutex: MutexServiceRef,
    config: LockConfig,
}

impl LockManager {
    pub fn new(mutex: MutexServiceRef, config: LockConfig) -> Self {
        Self { mutex, config }
    }

    /// The name of the lock guarding `key` in `partition`.
    pub fn lock_name(partition: &str, key: &str) -> String {
        format!("lock:{partition}:{key}")
    }

    /// Acquires the lock `name`, waiting for it if necessary.
    ///
    /// Makes one attempt plus [`retry_count`](LockConfig::retry_count) retries, sleeping
    /// `retry_delay` plus a random jitter in between. Fails with [`CacheError::LockTimeout`] once
    /// all attempts are exhausted.
    pub async fn acquire(&self, name: &str) -> CacheEntry<LockToken> {
        let start = Instant::now();
        for attempt in 0..=self.config.retry_count {
            if attempt > 0 {
                tokio::time::sleep(self.retry_delay()).await;
            }
            if let Some(token) = self.mutex.try_acquire(name, self.config.ttl).await? {
                metric!(timer("caches.lock.wait") = start.elapsed());
                if attempt > 0 {
                    tracing::debug!(lock = name, attempt, "Acquired lock after waiting");
                }
                return Ok(token);
            }
        }

        let waited = start.elapsed();
        metric!(counter("caches.lock.timeout") += 1);
        let budget = self.config.max_wait();
        tracing::warn!(lock = name, ?waited, ?budget, "Gave up waiting for lock");
        Err(CacheError::LockTimeout(waited))
    }

    /// Releases a previously acquired lock.
    ///
    /// A lock that has expired in the meantime is logged, since it means the computation outlived
    /// the lock TTL and may have overlapped with another one.
    pub async fn release(&self, token: &LockToken) -> CacheEntry {
        if !self.mutex.release(token).await? {
            tracing::warn!(lock = token.name(), "Lock expired before it was released");
        }
        Ok(())
    }

    fn retry_delay(&self) -> Duration {
        let jitter = self.config.retry_jitter.as_millis() as u64;
        let jitter = if jitter > 0 {
            rand::thread_rng().gen_range(0..=jitter)
        } else {
            0
        };
        self.config.retry_delay + Duration::from_millis(jitter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lock_config(retry_count: u32) -> LockConfig {
        LockConfig {
            ttl: Duration::from_secs(60),
            retry_count,
            retry_delay: Duration::from_millis(500),
            retry_jitter: Duration::from_millis(50),
        }
    }

    #[test]
    fn test_lock_name() {
        assert_eq!(
            LockManager::lock_name("most_popular", "50_0"),
            "lock:most_popular:50_0"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_memory_mutex_exclusion() {
        let mutex = MemoryMutex::default();
        let ttl = Duration::from_secs(10);

        let first = mutex.try_acquire("lock:a", ttl).await.unwrap().unwrap();
        assert_eq!(mutex.try_acquire("lock:a", ttl).await.unwrap(), None);
        // other names are independent
        assert!(mutex.try_acquire("lock:b", ttl).await.unwrap().is_some());

        assert!(mutex.release(&first).await.unwrap());
        // releasing twice reports the lock as gone
        assert!(!mutex.release(&first).await.unwrap());
        assert!(mutex.try_acquire("lock:a", ttl).await.unwrap().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_memory_mutex_expiry() {
        let mutex = MemoryMutex::default();
        let ttl = Duration::from_secs(10);

        let stale = mutex.try_acquire("lock:a", ttl).await.unwrap().unwrap();
        tokio::time::advance(Duration::from_secs(11)).await;

        let fresh = mutex.try_acquire("lock:a", ttl).await.unwrap().unwrap();
        assert_ne!(stale, fresh);

        // the expired holder must not release the new holder's lock
        assert!(!mutex.release(&stale).await.unwrap());
        assert_eq!(mutex.try_acquire("lock:a", ttl).await.unwrap(), None);
        assert!(mutex.release(&fresh).await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_lock_manager_waits_for_release() {
        let mutex = Arc::new(MemoryMutex::default());
        let manager = LockManager::new(mutex.clone(), lock_config(10));

        let held = manager.acquire("lock:a").await.unwrap();
        let releaser = {
            let manager = manager.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(1200)).await;
                manager.release(&held).await.unwrap();
            })
        };

        let start = Instant::now();
        let token = manager.acquire("lock:a").await.unwrap();
        assert!(start.elapsed() >= Duration::from_millis(1200));
        assert_eq!(token.name(), "lock:a");
        releaser.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_lock_manager_timeout() {
        let mutex = Arc::new(MemoryMutex::default());
        let manager = LockManager::new(mutex.clone(), lock_config(3));

        let _held = manager.acquire("lock:a").await.unwrap();
        let err = manager.acquire("lock:a").await.unwrap_err();
        let CacheError::LockTimeout(waited) = err else {
            panic!("unexpected error: {err:?}");
        };
        // three retries at 500ms plus up to 50ms jitter each
        assert_eq!(lock_config(3).max_wait(), Duration::from_millis(1500));
        assert!(waited >= lock_config(3).max_wait());
        assert!(waited <= Duration::from_millis(1650));
    }

    #[tokio::test]
    async fn test_redis_mutex_exclusion() {
        let url = robintrack_test::redis_url!();
        let mutex = RedisMutex::connect(&RedisConfig { url }).await.unwrap();
        let ttl = Duration::from_secs(10);
        let a = format!("lock:{}:a", robintrack_test::unique_prefix());
        let b = format!("lock:{}:b", robintrack_test::unique_prefix());

        let first = mutex.try_acquire(&a, ttl).await.unwrap().unwrap();
        assert_eq!(mutex.try_acquire(&a, ttl).await.unwrap(), None);
        let other = mutex.try_acquire(&b, ttl).await.unwrap().unwrap();

        assert!(mutex.release(&first).await.unwrap());
        assert!(!mutex.release(&first).await.unwrap());
        let second = mutex.try_acquire(&a, ttl).await.unwrap().unwrap();

        assert!(mutex.release(&second).await.unwrap());
        assert!(mutex.release(&other).await.unwrap());
    }

    #[tokio::test]
    async fn test_redis_mutex_expiry() {
        let url = robintrack_test::redis_url!();
        let mutex = RedisMutex::connect(&RedisConfig { url }).await.unwrap();
        let name = format!("lock:{}:a", robintrack_test::unique_prefix());

        // redis expires keys in real time
        let stale = mutex
            .try_acquire(&name, Duration::from_millis(100))
            .await
            .unwrap()
            .unwrap();
        tokio::time::sleep(Duration::from_millis(250)).await;

        let ttl = Duration::from_secs(10);
        let fresh = mutex.try_acquire(&name, ttl).await.unwrap().unwrap();
        assert_ne!(stale, fresh);

        // the expired holder must not release the new holder's lock
        assert!(!mutex.release(&stale).await.unwrap());
        assert_eq!(mutex.try_acquire(&name, ttl).await.unwrap(), None);
        assert!(mutex.release(&fresh).await.unwrap());
    }
}
