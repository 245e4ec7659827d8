//! Provides the internal shared robintrack services and a way to initialize them.
//!
//! [`SharedServices`] builds the shared store, the mutex service, the cache coordinator on top of
//! them, the dataset and the rate limiter according to the provided [`Config`].

use std::sync::Arc;

use anyhow::{Context, Result};

use crate::caching::{Coordinator, ProducerError};
use crate::config::Config;
use crate::dataset::Dataset;
use crate::ratelimit::RateLimiter;

pub mod barometer;
pub mod popularity;
pub mod quotes;

pub use barometer::BarometerService;
pub use popularity::PopularityService;
pub use quotes::QuoteService;

pub struct SharedServices {
    pub config: Config,
    pub coordinator: Coordinator,
    pub popularity: PopularityService,
    pub quotes: QuoteService,
    pub barometer: BarometerService,
    pub rate_limiter: RateLimiter,
}

/// Runs a query on the blocking pool, as aggregating over the whole dataset may take a while.
async fn query<T, F>(dataset: &Arc<Dataset>, f: F) -> Result<T, ProducerError>
where
    T: Send + 'static,
    F: FnOnce(&Dataset) -> Result<T, ProducerError> + Send + 'static,
{
    let dataset = dataset.clone();
    tokio::task::spawn_blocking(move || f(&dataset))
        .await
        .map_err(|err| ProducerError::Failed(err.into()))?
}

impl SharedServices {
    pub async fn new(config: Config) -> Result<Self> {
        let store = config
            .caching
            .shared_store
            .create()
            .await
            .context("failed to create shared store")?;
        let mutex = config
            .caching
            .mutex
            .create()
            .await
            .context("failed to create mutex service")?;
        let coordinator = Coordinator::new(store, mutex, &config.caching);

        let dataset = match config.dataset_path {
            Some(ref path) => Dataset::load(path)?,
            None => {
                tracing::warn!("No dataset configured, serving empty rankings");
                Dataset::default()
            }
        };
        let dataset = Arc::new(dataset);
        let popularity = PopularityService::new(coordinator.clone(), dataset.clone());
        let quotes = QuoteService::new(coordinator.clone(), dataset.clone());
        let barometer = BarometerService::new(coordinator.clone(), dataset);

        let rate_limiter = RateLimiter::from_config(&config.rate_limit)
            .await
            .context("failed to create rate limiter")?;

        Ok(Self {
            config,
            coordinator,
            popularity,
            quotes,
            barometer,
            rate_limiter,
        })
    }
}
