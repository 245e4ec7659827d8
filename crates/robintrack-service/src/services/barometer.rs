//! Cached market barometer queries, built from per-day popularity changes.

use std::sync::Arc;

use bytes::Bytes;

use crate::caching::{CacheEntry, CacheKey, Coordinator};
use crate::dataset::Dataset;

pub const BAROMETER_TIMESERIES: &str = "barometer_barometer_timeseries";
pub const BAROMETER_TOP_CHANGES: &str = "barometer_top_changes";

/// Number of changes returned by [`BarometerService::top_changes`] when no limit is given.
pub const DEFAULT_TOP_CHANGES: usize = 35;

#[derive(Debug, Clone)]
pub struct BarometerService {
    coordinator: Coordinator,
    dataset: Arc<Dataset>,
}

impl BarometerService {
    pub fn new(coordinator: Coordinator, dataset: Arc<Dataset>) -> Self {
        Self {
            coordinator,
            dataset,
        }
    }

    /// The sum of absolute popularity changes for every day, oldest first.
    pub async fn timeseries(&self) -> CacheEntry<Bytes> {
        let key = CacheKey::builder().build();
        self.coordinator
            .get_or_compute_json(BAROMETER_TIMESERIES, &key, || {
                super::query(&self.dataset, |dataset| Ok(dataset.barometer_timeseries()))
            })
            .await
    }

    /// The instruments that moved the most on `day_id`.
    ///
    /// `day_id` must already be validated as `YYYY-MM-DD`. Unknown days yield an empty list.
    pub async fn top_changes(&self, day_id: &str, limit: usize) -> CacheEntry<Bytes> {
        let key = CacheKey::builder()
            .param("day_id", day_id)
            .param("limit", limit)
            .build();
        let day_id = day_id.to_owned();
        self.coordinator
            .get_or_compute_json(BAROMETER_TOP_CHANGES, &key, || {
                super::query(&self.dataset, move |dataset| {
                    Ok(dataset.top_changes_for_day(&day_id, limit))
                })
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use serde_json::{json, Value};

    use crate::caching::StoredEntry;
    use crate::dataset::{DayChange, Instrument, Snapshot};
    use crate::test;

    use super::*;

    fn dataset() -> Dataset {
        let change = |id: &str, day_id: &str, start_popularity, end_popularity| DayChange {
            instrument_id: id.into(),
            day_id: day_id.into(),
            start_popularity,
            end_popularity,
        };
        Dataset::from_snapshot(Snapshot {
            instruments: vec![
                Instrument {
                    instrument_id: "aapl_id".into(),
                    symbol: "AAPL".into(),
                    simple_name: Some("Apple".into()),
                },
                Instrument {
                    instrument_id: "amd_id".into(),
                    symbol: "AMD".into(),
                    simple_name: None,
                },
            ],
            day_changes: vec![
                change("aapl_id", "2019-08-02", 900, 850),
                change("amd_id", "2019-08-02", 20, 95),
                change("gone_id", "2019-08-02", 10, 12),
                change("aapl_id", "2019-08-01", 800, 900),
                change("amd_id", "2019-07-31", 20, 20),
            ],
            ..Default::default()
        })
    }

    fn service() -> (BarometerService, Arc<test::CountingStore>) {
        let (coordinator, store, _mutex) = test::coordinator(&test::caching_config());
        (BarometerService::new(coordinator, Arc::new(dataset())), store)
    }

    fn json(bytes: &Bytes) -> Value {
        serde_json::from_slice(bytes).unwrap()
    }

    #[tokio::test]
    async fn test_timeseries() {
        test::setup();
        let (service, store) = service();

        let body = service.timeseries().await.unwrap();
        assert_eq!(
            json(&body),
            json!([
                {"day_id": "2019-08-01", "abs_pop_diff_sum": 100},
                {"day_id": "2019-08-02", "abs_pop_diff_sum": 127},
            ])
        );

        let key = CacheKey::builder().build();
        assert_eq!(
            store.entry(BAROMETER_TIMESERIES, &key).await,
            StoredEntry::Ready(body)
        );
    }

    #[tokio::test]
    async fn test_top_changes() {
        test::setup();
        let (service, store) = service();

        let body = service.top_changes("2019-08-02", 2).await.unwrap();
        assert_eq!(
            json(&body),
            json!([
                {"start_popularity": 20, "end_popularity": 95, "symbol": "AMD", "name": null},
                {"start_popularity": 900, "end_popularity": 850, "symbol": "AAPL", "name": "Apple"},
            ])
        );

        let key = CacheKey::for_testing("2019-08-02_2");
        assert_eq!(
            store.entry(BAROMETER_TOP_CHANGES, &key).await,
            StoredEntry::Ready(body)
        );

        let all = service.top_changes("2019-08-02", DEFAULT_TOP_CHANGES).await.unwrap();
        let all = json(&all);
        assert_eq!(all.as_array().unwrap().len(), 3);
        assert_eq!(all[2]["symbol"], Value::Null);

        let unknown = service.top_changes("2000-01-01", DEFAULT_TOP_CHANGES).await.unwrap();
        assert_eq!(json(&unknown), json!([]));
    }
}
