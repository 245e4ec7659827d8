use robintrack_service::caching::{FilesystemSharedStoreConfig, SharedStoreConfig};
use robintrack_service::config::Config;
use robintrack_service::services::SharedServices;
use robintrack_test as test;

/// A config serving the fixture snapshot, caching below `store_dir`.
fn config(store_dir: &test::TempDir, with_dataset: bool) -> Config {
    let mut config = Config::default();
    config.dataset_path = with_dataset.then(|| test::fixture("snapshot.json"));
    config.caching.shared_store = SharedStoreConfig::Filesystem(FilesystemSharedStoreConfig {
        path: store_dir.path().to_owned(),
    });
    config
}

#[tokio::test]
async fn test_most_popular_from_snapshot() {
    test::setup();
    let store_dir = test::tempdir();
    let services = SharedServices::new(config(&store_dir, true)).await.unwrap();

    let body = services.popularity.most_popular(4, 0).await.unwrap();
    let body: serde_json::Value = serde_json::from_slice(&body).unwrap();
    let symbols: Vec<_> = body
        .as_array()
        .unwrap()
        .iter()
        .map(|entry| entry["symbol"].as_str().unwrap())
        .collect();
    assert_eq!(symbols, ["AAPL", "GOOG", "AMD", "SPY"]);
}

/// A second instance on the same store serves what the first one computed.
#[tokio::test]
async fn test_cache_shared_between_instances() {
    test::setup();
    let store_dir = test::tempdir();

    let first = SharedServices::new(config(&store_dir, true)).await.unwrap();
    let computed = first.popularity.least_popular(2, 1).await.unwrap();

    // without a dataset this instance could only ever compute empty rankings
    let second = SharedServices::new(config(&store_dir, false)).await.unwrap();
    let cached = second.popularity.least_popular(2, 1).await.unwrap();
    assert_eq!(cached, computed);

    let uncached = second.popularity.least_popular(2, 0).await.unwrap();
    assert_eq!(&uncached[..], b"[]");
}

#[tokio::test]
async fn test_missing_dataset_fails_startup() {
    test::setup();
    let store_dir = test::tempdir();
    let mut config = config(&store_dir, false);
    config.dataset_path = Some(store_dir.path().join("missing.json"));

    let err = SharedServices::new(config).await.err().unwrap();
    assert!(format!("{err:#}").contains("failed to read dataset"));
}

#[tokio::test]
async fn test_quotes_and_barometer_from_snapshot() {
    test::setup();
    let store_dir = test::tempdir();
    let services = SharedServices::new(config(&store_dir, true)).await.unwrap();

    let quotes = services
        .quotes
        .quotes(&["TSLA".into(), "AMD".into()])
        .await
        .unwrap();
    let quotes: serde_json::Value = serde_json::from_slice(&quotes).unwrap();
    assert_eq!(quotes["TSLA"]["bid"], 240.5);
    assert_eq!(quotes["AMD"]["ask"], 31.5);

    let timeseries = services.barometer.timeseries().await.unwrap();
    let timeseries: serde_json::Value = serde_json::from_slice(&timeseries).unwrap();
    assert_eq!(timeseries.as_array().unwrap().len(), 2);

    assert!(store_dir
        .path()
        .join("barometer_barometer_timeseries")
        .is_dir());
}
