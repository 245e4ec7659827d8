//! Cached popularity queries.
//!
//! Every query has its own cache partition. The partition name and the parameter names used to
//! build the key form the cache schema: changing either orphans all previously cached values.

use std::sync::Arc;

use bytes::Bytes;
use chrono::Utc;
use serde::Serialize;

use crate::caching::{CacheEntry, CacheError, CacheKey, Coordinator, ProducerError};
use crate::dataset::{history_csv, ChangeDirection, Dataset};

pub const MOST_POPULAR: &str = "most_popular";
pub const LEAST_POPULAR: &str = "least_popular";
pub const POPULARITY_HISTORY: &str = "popularity_history";
pub const POPULARITY_HISTORY_CSV: &str = "popularity_history_csv";
pub const POPULARITY_RANKING: &str = "popularity_ranking";
pub const TOTAL_SYMBOLS: &str = "total_symbols";
pub const POPULARITY_BINS: &str = "popularity_bins";

#[derive(Serialize)]
struct TotalSymbols {
    total_symbols: usize,
}

#[derive(Serialize)]
struct Ranking {
    ranking: usize,
}

/// Answers popularity queries from the cache, computing them from the [`Dataset`] on a miss.
///
/// All methods return the response body as stored in the cache.
#[derive(Debug, Clone)]
pub struct PopularityService {
    coordinator: Coordinator,
    dataset: Arc<Dataset>,
}

impl PopularityService {
    pub fn new(coordinator: Coordinator, dataset: Arc<Dataset>) -> Self {
        Self {
            coordinator,
            dataset,
        }
    }

    async fn query<T, F>(&self, f: F) -> Result<T, ProducerError>
    where
        T: Send + 'static,
        F: FnOnce(&Dataset) -> Result<T, ProducerError> + Send + 'static,
    {
        super::query(&self.dataset, f).await
    }

    pub async fn most_popular(&self, limit: usize, start_index: usize) -> CacheEntry<Bytes> {
        let key = CacheKey::builder()
            .param("limit", limit)
            .param("start_index", start_index)
            .build();
        self.coordinator
            .get_or_compute_json(MOST_POPULAR, &key, || {
                self.query(move |dataset| Ok(dataset.most_popular(limit, start_index)))
            })
            .await
    }

    pub async fn least_popular(&self, limit: usize, start_index: usize) -> CacheEntry<Bytes> {
        let key = CacheKey::builder()
            .param("limit", limit)
            .param("start_index", start_index)
            .build();
        self.coordinator
            .get_or_compute_json(LEAST_POPULAR, &key, || {
                self.query(move |dataset| Ok(dataset.least_popular(limit, start_index)))
            })
            .await
    }

    pub async fn popularity_history(&self, symbol: &str) -> CacheEntry<Bytes> {
        let key = CacheKey::builder().param("symbol", symbol).build();
        let symbol = symbol.to_owned();
        self.coordinator
            .get_or_compute_json(POPULARITY_HISTORY, &key, || {
                self.query(move |dataset| dataset.popularity_history(&symbol))
            })
            .await
    }

    /// The popularity history of `symbol`, rendered as CSV.
    pub async fn popularity_history_csv(&self, symbol: &str) -> CacheEntry<Bytes> {
        let key = CacheKey::builder().param("symbol", symbol).build();
        let symbol = symbol.to_owned();
        self.coordinator
            .get_or_compute(
                POPULARITY_HISTORY_CSV,
                &key,
                || self.query(move |dataset| dataset.popularity_history(&symbol)),
                |history| {
                    history_csv(&history)
                        .map(Bytes::from)
                        .map_err(CacheError::from_std_error)
                },
            )
            .await
    }

    pub async fn popularity_ranking(&self, symbol: &str) -> CacheEntry<Bytes> {
        let key = CacheKey::builder().param("symbol", symbol).build();
        let symbol = symbol.to_owned();
        self.coordinator
            .get_or_compute_json(POPULARITY_RANKING, &key, || {
                self.query(move |dataset| {
                    let ranking = dataset.popularity_ranking(&symbol)?;
                    Ok(Ranking { ranking })
                })
            })
            .await
    }

    pub async fn total_symbols(&self) -> CacheEntry<Bytes> {
        let key = CacheKey::builder().build();
        self.coordinator
            .get_or_compute_json(TOTAL_SYMBOLS, &key, || {
                self.query(|dataset| {
                    Ok(TotalSymbols {
                        total_symbols: dataset.total_symbols(),
                    })
                })
            })
            .await
    }

    /// Symbols whose popularity moved the most within the last `hours_ago` hours.
    ///
    /// The window ends when the value is computed, and the result is kept until it is overwritten.
    pub async fn largest_popularity_changes(
        &self,
        direction: ChangeDirection,
        hours_ago: u32,
        limit: usize,
    ) -> CacheEntry<Bytes> {
        let partition = format!("largest_popularity_{}", direction.name());
        let key = CacheKey::builder()
            .param("hours_ago", hours_ago)
            .param("limit", limit)
            .build();
        self.coordinator
            .get_or_compute_json(&partition, &key, || {
                self.query(move |dataset| {
                    Ok(dataset.largest_popularity_changes(direction, hours_ago, limit, Utc::now()))
                })
            })
            .await
    }

    pub async fn popularity_bins(&self, bins: usize) -> CacheEntry<Bytes> {
        let key = CacheKey::builder().param("bins", bins).build();
        self.coordinator
            .get_or_compute_json(POPULARITY_BINS, &key, || {
                self.query(move |dataset| Ok(dataset.popularity_bins(bins)))
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};
    use serde_json::Value;

    use crate::caching::{CacheError, StoredEntry};
    use crate::dataset::{Instrument, PopularitySample, Snapshot};
    use crate::test;

    use super::*;

    fn dataset() -> Dataset {
        let now = Utc::now();
        let sample = |id: &str, minutes_ago, popularity| PopularitySample {
            instrument_id: id.into(),
            timestamp: now - Duration::minutes(minutes_ago),
            popularity,
        };
        Dataset::from_snapshot(Snapshot {
            instruments: vec![
                Instrument {
                    instrument_id: "aapl_id".into(),
                    symbol: "AAPL".into(),
                    simple_name: None,
                },
                Instrument {
                    instrument_id: "amd_id".into(),
                    symbol: "AMD".into(),
                    simple_name: None,
                },
            ],
            popularity: vec![
                sample("aapl_id", 20, 893),
                sample("aapl_id", 90, 20),
                sample("amd_id", 20, 25),
                sample("amd_id", 90, 20),
            ],
            ..Default::default()
        })
    }

    fn service() -> (PopularityService, Arc<test::CountingStore>) {
        let (coordinator, store, _mutex) = test::coordinator(&test::caching_config());
        (
            PopularityService::new(coordinator, Arc::new(dataset())),
            store,
        )
    }

    fn json(bytes: &Bytes) -> Value {
        serde_json::from_slice(bytes).unwrap()
    }

    #[tokio::test]
    async fn test_most_popular_is_cached_under_its_key() {
        test::setup();
        let (service, store) = service();

        let body = service.most_popular(50, 0).await.unwrap();
        assert_eq!(
            json(&body),
            serde_json::json!([
                {"popularity": 893, "symbol": "AAPL"},
                {"popularity": 25, "symbol": "AMD"},
            ])
        );

        let key = CacheKey::for_testing("50_0");
        assert_eq!(
            store.entry(MOST_POPULAR, &key).await,
            StoredEntry::Ready(body)
        );
    }

    #[tokio::test]
    async fn test_unknown_symbol() {
        test::setup();
        let (service, store) = service();

        assert_eq!(
            service.popularity_history("QQWEQWE").await,
            Err(CacheError::NotFound)
        );
        assert_eq!(
            service.popularity_ranking("QQWEQWE").await,
            Err(CacheError::NotFound)
        );
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_ranking_and_total() {
        test::setup();
        let (service, _store) = service();

        let ranking = service.popularity_ranking("AMD").await.unwrap();
        assert_eq!(json(&ranking), serde_json::json!({"ranking": 2}));

        let total = service.total_symbols().await.unwrap();
        assert_eq!(json(&total), serde_json::json!({"total_symbols": 2}));
    }

    #[tokio::test]
    async fn test_history_csv() {
        test::setup();
        let (service, _store) = service();

        let csv = service.popularity_history_csv("AMD").await.unwrap();
        let csv = std::str::from_utf8(&csv).unwrap();
        let mut lines = csv.lines();
        assert_eq!(lines.next(), Some("timestamp,popularity"));
        assert!(lines.next().unwrap().ends_with(",25"));
        assert!(lines.next().unwrap().ends_with(",20"));
        assert_eq!(lines.next(), None);
    }

    #[tokio::test]
    async fn test_changes_partitions() {
        test::setup();
        let (service, store) = service();

        let increases = service
            .largest_popularity_changes(ChangeDirection::Increase, 2, 1)
            .await
            .unwrap();
        assert_eq!(
            json(&increases),
            serde_json::json!([{"popularity_difference": 873, "symbol": "AAPL"}])
        );

        let key = CacheKey::for_testing("2_1");
        assert!(matches!(
            store.entry("largest_popularity_increases", &key).await,
            StoredEntry::Ready(_)
        ));
        assert_eq!(
            store.entry("largest_popularity_decreases", &key).await,
            StoredEntry::Absent
        );
    }
}
