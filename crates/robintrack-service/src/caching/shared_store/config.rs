use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::utils::redis::RedisConfig;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FilesystemSharedStoreConfig {
    /// The directory holding one subdirectory per partition.
    pub path: PathBuf,
}

/// The backend to use for the shared store.
///
/// Only the `redis` backend is shared between hosts. The `filesystem` backend is shared between
/// processes on one host, and `memory` only within a single process, which is useful for local
/// development and tests.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SharedStoreConfig {
    #[default]
    Memory,
    Filesystem(FilesystemSharedStoreConfig),
    Redis(RedisConfig),
}
