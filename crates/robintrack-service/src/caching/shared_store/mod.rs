//! The shared store holding cached values, addressed by partition and key.
//!
//! A store only deals in opaque bytes. It is the [`Coordinator`](super::Coordinator) that gives
//! them meaning by wrapping every value in a tagged record (see [`StoredEntry`](super::StoredEntry)).
//!
//! Every operation is a single atomic read or write, there are no transactions. Mutual exclusion
//! between workers is provided by the [mutex service](super::mutex) instead.

use std::collections::HashMap;
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use anyhow::Context as _;
use async_trait::async_trait;
use bytes::Bytes;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use sha2::{Digest, Sha256};
use tempfile::NamedTempFile;
use tokio::fs::{self, File};
use tokio::io::AsyncWriteExt;

use super::{CacheEntry, CacheError, CacheKey};
use crate::utils::redis::{self as redis_utils, RedisConfig};

mod config;

pub use config::{FilesystemSharedStoreConfig, SharedStoreConfig};

/// A keyed byte store, shared between all workers.
#[async_trait]
pub trait SharedStore: fmt::Debug + Send + Sync {
    /// Reads the record at `partition` / `key`, or `None` if there is none.
    async fn get(&self, partition: &str, key: &CacheKey) -> CacheEntry<Option<Bytes>>;

    /// Writes the record at `partition` / `key`, replacing any previous record.
    async fn set(&self, partition: &str, key: &CacheKey, value: Bytes) -> CacheEntry;

    /// Removes the record at `partition` / `key`. Removing a missing record is not an error.
    async fn delete(&self, partition: &str, key: &CacheKey) -> CacheEntry;

    /// The backend name, for logs.
    fn name(&self) -> &'static str;
}

pub type SharedStoreRef = Arc<dyn SharedStore>;

impl SharedStoreConfig {
    /// Creates the configured store.
    ///
    /// For the `redis` backend this establishes the connection, so a misconfigured server fails
    /// startup instead of the first request.
    pub async fn create(&self) -> anyhow::Result<SharedStoreRef> {
        let store: SharedStoreRef = match self {
            SharedStoreConfig::Memory => Arc::new(MemoryStore::default()),
            SharedStoreConfig::Filesystem(cfg) => Arc::new(FilesystemStore::new(&cfg.path)),
            SharedStoreConfig::Redis(cfg) => Arc::new(
                RedisStore::connect(cfg)
                    .await
                    .context("failed to initialize redis shared store")?,
            ),
        };
        tracing::info!(backend = store.name(), "Initialized shared store");
        Ok(store)
    }
}

/// An in-process store.
///
/// This is only shared between the coordinators of a single process.
#[derive(Debug, Default)]
pub struct MemoryStore {
    partitions: Mutex<HashMap<String, HashMap<CacheKey, Bytes>>>,
}

impl MemoryStore {
    /// Number of records currently held across all partitions.
    pub fn len(&self) -> usize {
        let partitions = self.partitions.lock().unwrap_or_else(PoisonError::into_inner);
        partitions.values().map(HashMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl SharedStore for MemoryStore {
    async fn get(&self, partition: &str, key: &CacheKey) -> CacheEntry<Option<Bytes>> {
        let partitions = self.partitions.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(partitions
            .get(partition)
            .and_then(|records| records.get(key))
            .cloned())
    }

    async fn set(&self, partition: &str, key: &CacheKey, value: Bytes) -> CacheEntry {
        let mut partitions = self.partitions.lock().unwrap_or_else(PoisonError::into_inner);
        partitions
            .entry(partition.to_owned())
            .or_default()
            .insert(key.clone(), value);
        Ok(())
    }

    async fn delete(&self, partition: &str, key: &CacheKey) -> CacheEntry {
        let mut partitions = self.partitions.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(records) = partitions.get_mut(partition) {
            records.remove(key);
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

/// A store keeping one file per record below a root directory.
///
/// Writes go to a temporary file first which is then moved into place, so readers never observe
/// a partially written record.
#[derive(Debug, Clone)]
pub struct FilesystemStore {
    root: PathBuf,
}

impl FilesystemStore {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_owned(),
        }
    }

    fn partition_dir(&self, partition: &str) -> PathBuf {
        let is_safe = !partition.is_empty()
            && !partition.starts_with('.')
            && partition
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-' || c == '.');
        if is_safe {
            self.root.join(partition)
        } else {
            self.root.join(format!("x-{}", hex::encode(partition)))
        }
    }

    /// Keys are arbitrary strings, so the file name is their hash.
    fn record_path(&self, partition: &str, key: &CacheKey) -> PathBuf {
        let digest = Sha256::digest(key.as_str().as_bytes());
        self.partition_dir(partition).join(hex::encode(digest))
    }
}

#[async_trait]
impl SharedStore for FilesystemStore {
    async fn get(&self, partition: &str, key: &CacheKey) -> CacheEntry<Option<Bytes>> {
        match fs::read(self.record_path(partition, key)).await {
            Ok(contents) => Ok(Some(contents.into())),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    async fn set(&self, partition: &str, key: &CacheKey, value: Bytes) -> CacheEntry {
        let abspath = self.record_path(partition, key);
        let temp_dir = self.partition_dir(partition).join(".tmp");
        fs::create_dir_all(&temp_dir).await?;

        let temp_file = NamedTempFile::new_in(&temp_dir)?;
        let mut dest = File::from_std(temp_file.reopen()?);
        dest.write_all(&value).await?;
        dest.flush().await?;

        temp_file
            .persist(abspath)
            .map_err(|err| CacheError::from_std_error(err.error))?;
        Ok(())
    }

    async fn delete(&self, partition: &str, key: &CacheKey) -> CacheEntry {
        match fs::remove_file(self.record_path(partition, key)).await {
            Err(err) if err.kind() != io::ErrorKind::NotFound => Err(err.into()),
            _ => Ok(()),
        }
    }

    fn name(&self) -> &'static str {
        "filesystem"
    }
}

/// A store backed by redis, keeping one hash per partition.
#[derive(Clone)]
pub struct RedisStore {
    connection: ConnectionManager,
}

impl fmt::Debug for RedisStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisStore").finish_non_exhaustive()
    }
}

impl RedisStore {
    pub async fn connect(config: &RedisConfig) -> anyhow::Result<Self> {
        let connection = redis_utils::connect(config).await?;
        Ok(Self { connection })
    }
}

#[async_trait]
impl SharedStore for RedisStore {
    async fn get(&self, partition: &str, key: &CacheKey) -> CacheEntry<Option<Bytes>> {
        let mut connection = self.connection.clone();
        let value: Option<Vec<u8>> = connection.hget(partition, key.as_str()).await?;
        Ok(value.map(Bytes::from))
    }

    async fn set(&self, partition: &str, key: &CacheKey, value: Bytes) -> CacheEntry {
        let mut connection = self.connection.clone();
        connection
            .hset::<_, _, _, ()>(partition, key.as_str(), value.as_ref())
            .await?;
        Ok(())
    }

    async fn delete(&self, partition: &str, key: &CacheKey) -> CacheEntry {
        let mut connection = self.connection.clone();
        connection
            .hdel::<_, _, ()>(partition, key.as_str())
            .await?;
        Ok(())
    }

    fn name(&self) -> &'static str {
        "redis"
    }
}
