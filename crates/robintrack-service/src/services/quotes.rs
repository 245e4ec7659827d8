//! Cached quote queries.

use std::sync::Arc;

use bytes::Bytes;

use crate::caching::{CacheEntry, CacheKey, Coordinator};
use crate::dataset::Dataset;

pub const QUOTE: &str = "quote";
pub const QUOTE_HISTORY: &str = "quote_history";
pub const QUOTES: &str = "quotes";

/// Answers bid/ask price queries from the cache, computing them from the [`Dataset`] on a miss.
#[derive(Debug, Clone)]
pub struct QuoteService {
    coordinator: Coordinator,
    dataset: Arc<Dataset>,
}

impl QuoteService {
    pub fn new(coordinator: Coordinator, dataset: Arc<Dataset>) -> Self {
        Self {
            coordinator,
            dataset,
        }
    }

    /// The newest quote of `symbol`, as `{"bid", "ask"}`.
    pub async fn quote(&self, symbol: &str) -> CacheEntry<Bytes> {
        let key = CacheKey::builder().param("symbol", symbol).build();
        let symbol = symbol.to_owned();
        self.coordinator
            .get_or_compute_json(QUOTE, &key, || {
                super::query(&self.dataset, move |dataset| dataset.quote(&symbol))
            })
            .await
    }

    pub async fn quote_history(&self, symbol: &str) -> CacheEntry<Bytes> {
        let key = CacheKey::builder().param("symbol", symbol).build();
        let symbol = symbol.to_owned();
        self.coordinator
            .get_or_compute_json(QUOTE_HISTORY, &key, || {
                super::query(&self.dataset, move |dataset| dataset.quote_history(&symbol))
            })
            .await
    }

    /// The newest quote of each of `symbols`, keyed by symbol.
    ///
    /// The order and repetitions of `symbols` do not matter, they share one cache entry.
    pub async fn quotes(&self, symbols: &[String]) -> CacheEntry<Bytes> {
        let mut symbols = symbols.to_vec();
        symbols.sort();
        symbols.dedup();

        let key = CacheKey::builder()
            .param("symbols", symbols.join(","))
            .build();
        self.coordinator
            .get_or_compute_json(QUOTES, &key, || {
                super::query(&self.dataset, move |dataset| Ok(dataset.quotes(&symbols)))
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};
    use serde_json::{json, Value};

    use crate::caching::{CacheError, StoredEntry};
    use crate::dataset::{Instrument, QuoteSample, Snapshot};
    use crate::test;

    use super::*;

    fn dataset() -> Dataset {
        let quote = |id: &str, hour, bid_price, ask_price| QuoteSample {
            instrument_id: id.into(),
            updated_at: Utc.with_ymd_and_hms(2019, 8, 1, hour, 0, 0).unwrap(),
            bid_price,
            ask_price,
        };
        let instrument = |id: &str, symbol: &str| Instrument {
            instrument_id: id.into(),
            symbol: symbol.into(),
            simple_name: None,
        };
        Dataset::from_snapshot(Snapshot {
            instruments: vec![
                instrument("aapl_id", "AAPL"),
                instrument("amd_id", "AMD"),
                instrument("spy_id", "SPY"),
            ],
            quotes: vec![
                quote("aapl_id", 12, 208.5, 209.0),
                quote("aapl_id", 10, 207.25, 207.5),
                quote("amd_id", 11, 31.0, 31.5),
            ],
            ..Default::default()
        })
    }

    fn service() -> (QuoteService, Arc<test::CountingStore>) {
        let (coordinator, store, _mutex) = test::coordinator(&test::caching_config());
        (QuoteService::new(coordinator, Arc::new(dataset())), store)
    }

    fn json(bytes: &Bytes) -> Value {
        serde_json::from_slice(bytes).unwrap()
    }

    #[tokio::test]
    async fn test_quote_is_newest() {
        test::setup();
        let (service, store) = service();

        let body = service.quote("AAPL").await.unwrap();
        assert_eq!(json(&body), json!({"bid": 208.5, "ask": 209.0}));

        let key = CacheKey::for_testing("AAPL");
        assert_eq!(store.entry(QUOTE, &key).await, StoredEntry::Ready(body));
    }

    #[tokio::test]
    async fn test_quote_history() {
        test::setup();
        let (service, _store) = service();

        let body = service.quote_history("AAPL").await.unwrap();
        assert_eq!(
            json(&body),
            json!([
                {"bid": 207.25, "ask": 207.5, "timestamp": "2019-08-01T10:00:00Z"},
                {"bid": 208.5, "ask": 209.0, "timestamp": "2019-08-01T12:00:00Z"},
            ])
        );
    }

    #[tokio::test]
    async fn test_missing_quotes() {
        test::setup();
        let (service, store) = service();

        // SPY is a known instrument without any quotes
        for symbol in ["SPY", "QQWEQWE"] {
            assert_eq!(service.quote(symbol).await, Err(CacheError::NotFound));
            assert_eq!(
                service.quote_history(symbol).await,
                Err(CacheError::NotFound)
            );
        }
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_quotes_share_normalized_key() {
        test::setup();
        let (service, store) = service();

        let symbols = ["SPY", "AMD", "AAPL", "AMD", "NOPE"].map(String::from);
        let body = service.quotes(&symbols).await.unwrap();
        assert_eq!(
            json(&body),
            json!({
                "AAPL": {"bid": 208.5, "ask": 209.0},
                "AMD": {"bid": 31.0, "ask": 31.5},
            })
        );

        let key = CacheKey::for_testing("AAPL,AMD,NOPE,SPY");
        assert_eq!(store.entry(QUOTES, &key).await, StoredEntry::Ready(body));

        let reordered = ["AAPL", "NOPE", "SPY", "AMD"].map(String::from);
        service.quotes(&reordered).await.unwrap();
        assert_eq!(store.len(), 1);
    }
}
