use std::time::Duration;

use thiserror::Error;

/// An error returned from [`Coordinator::get_or_compute`](super::Coordinator::get_or_compute).
///
/// None of these are ever written to the shared store. A failed computation resets the entry, so
/// the next request for the same key retries from scratch.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CacheError {
    /// The per-key lock could not be acquired within the configured retry budget.
    ///
    /// Another worker is most likely still computing the same key; the client may retry.
    #[error("timed out after {0:?} waiting for the computation lock")]
    LockTimeout(Duration),
    /// The producer reported that there is no data for the requested key.
    #[error("not found")]
    NotFound,
    /// The producer failed.
    ///
    /// The attached string contains the producer's error chain.
    #[error("computation failed: {0}")]
    ComputationFailed(String),
    /// The producer did not finish within the configured producer timeout.
    #[error("computation timed out after {0:?}")]
    Timeout(Duration),
    /// An unexpected error in robintrack itself, or in talking to the shared store or mutex.
    ///
    /// The details are logged where the error happens.
    #[error("internal error")]
    InternalError,
}

impl From<std::io::Error> for CacheError {
    #[track_caller]
    fn from(err: std::io::Error) -> Self {
        Self::from_std_error(err)
    }
}

impl From<serde_json::Error> for CacheError {
    #[track_caller]
    fn from(err: serde_json::Error) -> Self {
        Self::from_std_error(err)
    }
}

impl From<redis::RedisError> for CacheError {
    #[track_caller]
    fn from(err: redis::RedisError) -> Self {
        Self::from_std_error(err)
    }
}

impl CacheError {
    #[track_caller]
    pub fn from_std_error<E: std::error::Error + 'static>(e: E) -> Self {
        let dynerr: &dyn std::error::Error = &e; // tracing expects a `&dyn Error`
        tracing::error!(error = dynerr);
        Self::InternalError
    }

    /// A short, stable name used for metric tags.
    pub fn metrics_tag(&self) -> &'static str {
        match self {
            CacheError::LockTimeout(_) => "lock-timeout",
            CacheError::NotFound => "not-found",
            CacheError::ComputationFailed(_) => "failed",
            CacheError::Timeout(_) => "timeout",
            CacheError::InternalError => "internal",
        }
    }
}

/// The result of a cache lookup, containing either `Ok(T)` or the reason why no value is
/// available.
pub type CacheEntry<T = ()> = Result<T, CacheError>;

/// The failure outcomes of a producer, the function that computes a value on a cache miss.
#[derive(Debug, Error)]
pub enum ProducerError {
    /// There is no data for the requested parameters.
    ///
    /// This is a regular outcome and is not logged as an error.
    #[error("not found")]
    NotFound,
    /// Any other failure.
    #[error(transparent)]
    Failed(#[from] anyhow::Error),
}

impl ProducerError {
    /// Creates a [`ProducerError::Failed`] from a message.
    pub fn failed(msg: impl std::fmt::Display + std::fmt::Debug + Send + Sync + 'static) -> Self {
        Self::Failed(anyhow::Error::msg(msg))
    }
}

impl From<ProducerError> for CacheError {
    fn from(err: ProducerError) -> Self {
        match err {
            ProducerError::NotFound => CacheError::NotFound,
            ProducerError::Failed(err) => {
                tracing::error!(error = ?err, "Cache computation failed");
                CacheError::ComputationFailed(format!("{err:#}"))
            }
        }
    }
}
