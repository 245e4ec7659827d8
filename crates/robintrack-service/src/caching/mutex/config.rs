use serde::{Deserialize, Serialize};

use crate::utils::redis::RedisConfig;

/// The backend of the distributed mutex service.
///
/// The `memory` backend only excludes computations within one process. Deployments running more
/// than one worker need `redis`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MutexConfig {
    #[default]
    Memory,
    Redis(RedisConfig),
}
