//! The popularity dataset and the aggregations served from it.
//!
//! The dataset is loaded once from a JSON snapshot holding the instrument index, the popularity
//! samples and quotes scraped for each instrument, and per-day popularity changes. All queries are
//! computed in memory. They are what the [`Coordinator`](crate::caching::Coordinator) caches, so
//! none of them is expected to be cheap.

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::caching::ProducerError;

/// One entry of the instrument index.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Instrument {
    pub instrument_id: String,
    pub symbol: String,
    /// Human readable name, like `Apple`.
    #[serde(default)]
    pub simple_name: Option<String>,
}

/// The number of holders of an instrument at one point in time.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PopularitySample {
    pub instrument_id: String,
    pub timestamp: DateTime<Utc>,
    pub popularity: i64,
}

/// The on-disk format of a dataset.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Snapshot {
    #[serde(default)]
    pub instruments: Vec<Instrument>,
    #[serde(default)]
    pub popularity: Vec<PopularitySample>,
    #[serde(default)]
    pub quotes: Vec<QuoteSample>,
    #[serde(default)]
    pub day_changes: Vec<DayChange>,
}

/// Bid and ask price of an instrument at one point in time.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct QuoteSample {
    pub instrument_id: String,
    pub updated_at: DateTime<Utc>,
    pub bid_price: f64,
    pub ask_price: f64,
}

/// The popularity of an instrument at the start and the end of one day.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DayChange {
    pub instrument_id: String,
    /// The day, as `YYYY-MM-DD`.
    pub day_id: String,
    pub start_popularity: i64,
    pub end_popularity: i64,
}

impl DayChange {
    fn abs_difference(&self) -> i64 {
        (self.end_popularity - self.start_popularity).abs()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PopularityEntry {
    pub popularity: i64,
    pub symbol: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HistoryEntry {
    pub popularity: i64,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PopularityChange {
    pub popularity_difference: i64,
    pub symbol: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PopularityBin {
    pub start: f64,
    pub end: f64,
    pub count: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Quote {
    pub bid: f64,
    pub ask: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QuoteHistoryEntry {
    pub bid: f64,
    pub ask: f64,
    pub timestamp: DateTime<Utc>,
}

/// The sum of all absolute popularity changes on one day.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DayTotal {
    pub day_id: String,
    pub abs_pop_diff_sum: i64,
}

/// One of the largest popularity changes on a day.
///
/// `symbol` and `name` are missing for instruments no longer in the index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DayTopChange {
    pub start_popularity: i64,
    pub end_popularity: i64,
    pub symbol: Option<String>,
    pub name: Option<String>,
}

/// Which popularity changes to rank first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeDirection {
    /// Largest absolute change, in either direction.
    Any,
    Increase,
    Decrease,
}

impl ChangeDirection {
    pub fn name(&self) -> &'static str {
        match self {
            ChangeDirection::Any => "changes",
            ChangeDirection::Increase => "increases",
            ChangeDirection::Decrease => "decreases",
        }
    }
}

#[derive(Debug)]
struct Series {
    symbol: String,
    /// Samples sorted newest first.
    samples: Vec<(DateTime<Utc>, i64)>,
}

impl Series {
    fn latest(&self) -> Option<i64> {
        self.samples.first().map(|(_, popularity)| *popularity)
    }
}

/// An indexed, immutable popularity dataset.
#[derive(Debug, Default)]
pub struct Dataset {
    /// Only instruments with at least one sample.
    series: Vec<Series>,
    by_symbol: HashMap<String, usize>,
    /// Quotes per symbol, oldest first.
    quotes: HashMap<String, Vec<QuoteSample>>,
    /// Every instrument of the index by id.
    instruments: HashMap<String, Instrument>,
    day_changes: Vec<DayChange>,
}

impl Dataset {
    /// Loads a dataset snapshot from a JSON file.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read(path)
            .with_context(|| format!("failed to read dataset {}", path.display()))?;
        let snapshot: Snapshot =
            serde_json::from_slice(&contents).context("failed to parse dataset snapshot")?;
        let dataset = Self::from_snapshot(snapshot);
        tracing::info!(
            path = %path.display(),
            symbols = dataset.total_symbols(),
            "Loaded dataset",
        );
        Ok(dataset)
    }

    pub fn from_snapshot(snapshot: Snapshot) -> Self {
        let mut samples: HashMap<String, Vec<(DateTime<Utc>, i64)>> = HashMap::new();
        for sample in snapshot.popularity {
            samples
                .entry(sample.instrument_id)
                .or_default()
                .push((sample.timestamp, sample.popularity));
        }

        let mut quote_samples: HashMap<String, Vec<QuoteSample>> = HashMap::new();
        for quote in snapshot.quotes {
            quote_samples
                .entry(quote.instrument_id.clone())
                .or_default()
                .push(quote);
        }

        let mut series = Vec::new();
        let mut by_symbol = HashMap::new();
        let mut quotes: HashMap<String, Vec<QuoteSample>> = HashMap::new();
        let mut instruments: HashMap<String, Instrument> = HashMap::new();
        for instrument in snapshot.instruments {
            if instruments.contains_key(&instrument.instrument_id)
                || quotes.contains_key(&instrument.symbol)
            {
                tracing::warn!(symbol = instrument.symbol, "Duplicate instrument in dataset");
                continue;
            }

            let mut instrument_quotes = quote_samples
                .remove(&instrument.instrument_id)
                .unwrap_or_default();
            instrument_quotes.sort_by(|a, b| a.updated_at.cmp(&b.updated_at));
            quotes.insert(instrument.symbol.clone(), instrument_quotes);

            if let Some(mut samples) = samples.remove(&instrument.instrument_id) {
                samples.sort_by(|a, b| b.0.cmp(&a.0));
                by_symbol.insert(instrument.symbol.clone(), series.len());
                series.push(Series {
                    symbol: instrument.symbol.clone(),
                    samples,
                });
            }

            instruments.insert(instrument.instrument_id.clone(), instrument);
        }

        Self {
            series,
            by_symbol,
            quotes,
            instruments,
            day_changes: snapshot.day_changes,
        }
    }

    /// Number of symbols with at least one popularity sample.
    pub fn total_symbols(&self) -> usize {
        self.series.len()
    }

    fn ranked(&self, descending: bool) -> Vec<PopularityEntry> {
        let mut entries: Vec<_> = self
            .series
            .iter()
            .filter_map(|series| {
                Some(PopularityEntry {
                    popularity: series.latest()?,
                    symbol: series.symbol.clone(),
                })
            })
            .collect();
        entries.sort_by(|a, b| {
            let by_popularity = a.popularity.cmp(&b.popularity);
            let by_popularity = if descending {
                by_popularity.reverse()
            } else {
                by_popularity
            };
            by_popularity.then_with(|| a.symbol.cmp(&b.symbol))
        });
        entries
    }

    /// Symbols by latest popularity, highest first.
    pub fn most_popular(&self, limit: usize, start_index: usize) -> Vec<PopularityEntry> {
        page(self.ranked(true), limit, start_index)
    }

    /// Symbols by latest popularity, lowest first.
    pub fn least_popular(&self, limit: usize, start_index: usize) -> Vec<PopularityEntry> {
        page(self.ranked(false), limit, start_index)
    }

    /// The 1-based position of `symbol` among the most popular symbols.
    pub fn popularity_ranking(&self, symbol: &str) -> Result<usize, ProducerError> {
        self.ranked(true)
            .iter()
            .position(|entry| entry.symbol == symbol)
            .map(|index| index + 1)
            .ok_or(ProducerError::NotFound)
    }

    /// All popularity samples of `symbol`, newest first.
    pub fn popularity_history(&self, symbol: &str) -> Result<Vec<HistoryEntry>, ProducerError> {
        let index = self.by_symbol.get(symbol).ok_or(ProducerError::NotFound)?;
        Ok(self.series[*index]
            .samples
            .iter()
            .map(|(timestamp, popularity)| HistoryEntry {
                popularity: *popularity,
                timestamp: *timestamp,
            })
            .collect())
    }

    /// Symbols ranked by how much their popularity moved in the last `hours_ago` hours.
    ///
    /// The difference is taken between the newest and the oldest sample within that time.
    pub fn largest_popularity_changes(
        &self,
        direction: ChangeDirection,
        hours_ago: u32,
        limit: usize,
        now: DateTime<Utc>,
    ) -> Vec<PopularityChange> {
        let since = now
            .checked_sub_signed(Duration::hours(i64::from(hours_ago)))
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        let mut changes: Vec<_> = self
            .series
            .iter()
            .filter_map(|series| {
                let mut window = series
                    .samples
                    .iter()
                    .filter(|(timestamp, _)| *timestamp >= since);
                let newest = window.next()?.1;
                let oldest = window.last().map_or(newest, |(_, popularity)| *popularity);
                Some(PopularityChange {
                    popularity_difference: newest - oldest,
                    symbol: series.symbol.clone(),
                })
            })
            .collect();

        changes.sort_by(|a, b| {
            let order = match direction {
                ChangeDirection::Any => b
                    .popularity_difference
                    .abs()
                    .cmp(&a.popularity_difference.abs()),
                ChangeDirection::Increase => {
                    b.popularity_difference.cmp(&a.popularity_difference)
                }
                ChangeDirection::Decrease => {
                    a.popularity_difference.cmp(&b.popularity_difference)
                }
            };
            order.then_with(|| a.symbol.cmp(&b.symbol))
        });
        changes.truncate(limit);
        changes
    }

    /// A histogram of the latest popularity of all symbols, in `bins` equal-width buckets.
    ///
    /// The buckets span from the lowest to the highest latest popularity. The highest value falls
    /// into the last bucket. Without data, there are no buckets.
    pub fn popularity_bins(&self, bins: usize) -> Vec<PopularityBin> {
        let latest: Vec<i64> = self.series.iter().filter_map(Series::latest).collect();
        let (Some(min), Some(max)) = (latest.iter().min(), latest.iter().max()) else {
            return Vec::new();
        };
        if bins == 0 {
            return Vec::new();
        }

        let (min, max) = (*min as f64, *max as f64);
        let width = (max - min) / bins as f64;
        let mut result: Vec<_> = (0..bins)
            .map(|i| PopularityBin {
                start: min + width * i as f64,
                end: if i + 1 == bins {
                    max
                } else {
                    min + width * (i + 1) as f64
                },
                count: 0,
            })
            .collect();

        for popularity in latest {
            let index = if width > 0.0 {
                ((popularity as f64 - min) / width) as usize
            } else {
                0
            };
            result[index.min(bins - 1)].count += 1;
        }
        result
    }

    /// The newest quote of `symbol`.
    pub fn quote(&self, symbol: &str) -> Result<Quote, ProducerError> {
        self.quotes
            .get(symbol)
            .and_then(|quotes| quotes.last())
            .map(|quote| Quote {
                bid: quote.bid_price,
                ask: quote.ask_price,
            })
            .ok_or(ProducerError::NotFound)
    }

    /// All quotes of `symbol`, oldest first.
    pub fn quote_history(&self, symbol: &str) -> Result<Vec<QuoteHistoryEntry>, ProducerError> {
        let quotes = self
            .quotes
            .get(symbol)
            .filter(|quotes| !quotes.is_empty())
            .ok_or(ProducerError::NotFound)?;
        Ok(quotes
            .iter()
            .map(|quote| QuoteHistoryEntry {
                bid: quote.bid_price,
                ask: quote.ask_price,
                timestamp: quote.updated_at,
            })
            .collect())
    }

    /// The newest quote of each of `symbols`, by symbol. Symbols without quotes are left out.
    pub fn quotes(&self, symbols: &[String]) -> BTreeMap<String, Quote> {
        symbols
            .iter()
            .filter_map(|symbol| Some((symbol.clone(), self.quote(symbol).ok()?)))
            .collect()
    }

    /// The total absolute popularity change per day, oldest day first.
    ///
    /// Days without any change are left out.
    pub fn barometer_timeseries(&self) -> Vec<DayTotal> {
        let mut totals: BTreeMap<&str, i64> = BTreeMap::new();
        for change in &self.day_changes {
            *totals.entry(change.day_id.as_str()).or_default() += change.abs_difference();
        }
        totals
            .into_iter()
            .filter(|(_, sum)| *sum != 0)
            .map(|(day_id, abs_pop_diff_sum)| DayTotal {
                day_id: day_id.to_owned(),
                abs_pop_diff_sum,
            })
            .collect()
    }

    /// The `limit` instruments whose popularity changed the most on `day_id`, in either direction.
    pub fn top_changes_for_day(&self, day_id: &str, limit: usize) -> Vec<DayTopChange> {
        let mut changes: Vec<_> = self
            .day_changes
            .iter()
            .filter(|change| change.day_id == day_id)
            .map(|change| {
                let instrument = self.instruments.get(&change.instrument_id);
                DayTopChange {
                    start_popularity: change.start_popularity,
                    end_popularity: change.end_popularity,
                    symbol: instrument.map(|i| i.symbol.clone()),
                    name: instrument.and_then(|i| i.simple_name.clone()),
                }
            })
            .collect();

        changes.sort_by(|a, b| {
            let abs = |c: &DayTopChange| (c.end_popularity - c.start_popularity).abs();
            abs(b).cmp(&abs(a)).then_with(|| a.symbol.cmp(&b.symbol))
        });
        changes.truncate(limit);
        changes
    }
}

fn page<T>(entries: Vec<T>, limit: usize, start_index: usize) -> Vec<T> {
    entries.into_iter().skip(start_index).take(limit).collect()
}

/// One line of [`history_csv`].
#[derive(Serialize)]
struct HistoryRow {
    timestamp: String,
    popularity: i64,
}

/// Renders a popularity history as CSV with a header line.
pub fn history_csv(history: &[HistoryEntry]) -> Result<Vec<u8>, csv::Error> {
    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_writer(Vec::new());
    writer.write_record(["timestamp", "popularity"])?;
    for entry in history {
        writer.serialize(HistoryRow {
            timestamp: entry
                .timestamp
                .to_rfc3339_opts(chrono::SecondsFormat::Secs, true),
            popularity: entry.popularity,
        })?;
    }
    writer
        .into_inner()
        .map_err(|err| csv::Error::from(err.into_error()))
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2019, 8, 1, 12, 0, 0).unwrap()
    }

    /// Four symbols, two of them tied in popularity, sampled 20 and 90 minutes ago.
    fn dataset() -> Dataset {
        let instruments = [
            ("goog_id", "GOOG"),
            ("aapl_id", "AAPL"),
            ("spy_id", "SPY"),
            ("amd_id", "AMD"),
        ];
        let samples = [
            (20, "goog_id", 893),
            (20, "aapl_id", 893),
            (20, "spy_id", 8),
            (20, "amd_id", 25),
            (90, "goog_id", 20),
            (90, "aapl_id", 20),
            (90, "spy_id", 20),
            (90, "amd_id", 20),
        ];
        Dataset::from_snapshot(Snapshot {
            instruments: instruments
                .iter()
                .map(|(id, symbol)| Instrument {
                    instrument_id: id.to_string(),
                    symbol: symbol.to_string(),
                    simple_name: None,
                })
                .collect(),
            popularity: samples
                .iter()
                .map(|(minutes_ago, id, popularity)| PopularitySample {
                    instrument_id: id.to_string(),
                    timestamp: now() - Duration::minutes(*minutes_ago),
                    popularity: *popularity,
                })
                .collect(),
            ..Default::default()
        })
    }

    fn symbols<'a>(entries: impl IntoIterator<Item = &'a str>) -> Vec<&'a str> {
        entries.into_iter().collect()
    }

    #[test]
    fn test_most_popular() {
        let dataset = dataset();
        let names = |entries: Vec<PopularityEntry>| -> Vec<String> {
            entries.into_iter().map(|e| e.symbol).collect()
        };

        assert_eq!(
            names(dataset.most_popular(4, 0)),
            symbols(["AAPL", "GOOG", "AMD", "SPY"])
        );
        assert_eq!(names(dataset.most_popular(2, 0)), symbols(["AAPL", "GOOG"]));
        assert_eq!(names(dataset.most_popular(2, 1)), symbols(["GOOG", "AMD"]));
        assert_eq!(
            dataset.most_popular(1, 0),
            vec![PopularityEntry {
                popularity: 893,
                symbol: "AAPL".into()
            }]
        );
        assert!(dataset.most_popular(10, 4).is_empty());
    }

    #[test]
    fn test_least_popular() {
        let dataset = dataset();
        let names = |entries: Vec<PopularityEntry>| -> Vec<String> {
            entries.into_iter().map(|e| e.symbol).collect()
        };

        assert_eq!(
            names(dataset.least_popular(4, 0)),
            symbols(["SPY", "AMD", "AAPL", "GOOG"])
        );
        assert_eq!(names(dataset.least_popular(2, 0)), symbols(["SPY", "AMD"]));
        assert_eq!(names(dataset.least_popular(2, 1)), symbols(["AMD", "AAPL"]));
    }

    #[test]
    fn test_total_symbols_and_ranking() {
        let dataset = dataset();
        assert_eq!(dataset.total_symbols(), 4);
        assert_eq!(dataset.popularity_ranking("AMD").unwrap(), 3);
        assert!(matches!(
            dataset.popularity_ranking("QQWEQWE"),
            Err(ProducerError::NotFound)
        ));
    }

    #[test]
    fn test_history() {
        let dataset = dataset();
        let history = dataset.popularity_history("AMD").unwrap();
        insta::assert_json_snapshot!(history, @r###"
        [
          {
            "popularity": 25,
            "timestamp": "2019-08-01T11:40:00Z"
          },
          {
            "popularity": 20,
            "timestamp": "2019-08-01T10:30:00Z"
          }
        ]
        "###);

        assert!(matches!(
            dataset.popularity_history("QQWEQWE"),
            Err(ProducerError::NotFound)
        ));
    }

    #[test]
    fn test_history_csv() {
        let history = dataset().popularity_history("SPY").unwrap();
        let csv = history_csv(&history).unwrap();
        assert_eq!(
            std::str::from_utf8(&csv).unwrap(),
            "timestamp,popularity\n2019-08-01T11:40:00Z,8\n2019-08-01T10:30:00Z,20\n"
        );

        let empty = history_csv(&[]).unwrap();
        assert_eq!(&empty[..], b"timestamp,popularity\n");
    }

    #[test]
    fn test_largest_changes() {
        let dataset = dataset();
        let names = |direction| -> Vec<String> {
            dataset
                .largest_popularity_changes(direction, 2, 50, now())
                .into_iter()
                .map(|e| e.symbol)
                .collect()
        };

        assert_eq!(
            names(ChangeDirection::Any),
            symbols(["AAPL", "GOOG", "SPY", "AMD"])
        );
        assert_eq!(
            names(ChangeDirection::Decrease),
            symbols(["SPY", "AMD", "AAPL", "GOOG"])
        );
        assert_eq!(
            names(ChangeDirection::Increase),
            symbols(["AAPL", "GOOG", "AMD", "SPY"])
        );

        let changes = dataset.largest_popularity_changes(ChangeDirection::Decrease, 2, 1, now());
        assert_eq!(
            changes,
            vec![PopularityChange {
                popularity_difference: -12,
                symbol: "SPY".into()
            }]
        );
    }

    #[test]
    fn test_changes_outside_window() {
        // only the samples from 20 minutes ago are within the last hour
        let changes = dataset().largest_popularity_changes(ChangeDirection::Any, 1, 50, now());
        assert_eq!(changes.len(), 4);
        assert!(changes.iter().all(|c| c.popularity_difference == 0));
    }

    #[test]
    fn test_changes_beyond_representable_time() {
        let changes =
            dataset().largest_popularity_changes(ChangeDirection::Increase, u32::MAX, 1, now());
        assert_eq!(changes[0].popularity_difference, 873);
    }

    #[test]
    fn test_bins() {
        let bins = dataset().popularity_bins(2);
        assert_eq!(bins.len(), 2);
        assert_eq!(bins[0].start, 8.0);
        assert_eq!(bins[1].end, 893.0);
        // SPY and AMD in the lower half, AAPL and GOOG at the maximum
        assert_eq!(bins[0].count, 2);
        assert_eq!(bins[1].count, 2);

        let total: usize = dataset().popularity_bins(10).iter().map(|b| b.count).sum();
        assert_eq!(total, 4);

        assert!(Dataset::default().popularity_bins(10).is_empty());
    }

    #[test]
    fn test_instruments_without_samples_are_skipped() {
        let dataset = Dataset::from_snapshot(Snapshot {
            instruments: vec![Instrument {
                instrument_id: "tsla_id".into(),
                symbol: "TSLA".into(),
                simple_name: None,
            }],
            ..Default::default()
        });
        assert_eq!(dataset.total_symbols(), 0);
        assert!(dataset.most_popular(50, 0).is_empty());
        assert!(matches!(
            dataset.popularity_history("TSLA"),
            Err(ProducerError::NotFound)
        ));
    }

    #[test]
    fn test_quotes_without_samples() {
        let quote = |hour, bid_price| QuoteSample {
            instrument_id: "tsla_id".into(),
            updated_at: Utc.with_ymd_and_hms(2019, 8, 1, hour, 0, 0).unwrap(),
            bid_price,
            ask_price: bid_price + 1.0,
        };
        let dataset = Dataset::from_snapshot(Snapshot {
            instruments: vec![Instrument {
                instrument_id: "tsla_id".into(),
                symbol: "TSLA".into(),
                simple_name: Some("Tesla".into()),
            }],
            quotes: vec![quote(11, 240.0), quote(9, 230.0), quote(10, 235.0)],
            ..Default::default()
        });

        assert_eq!(
            dataset.quote("TSLA").unwrap(),
            Quote {
                bid: 240.0,
                ask: 241.0
            }
        );
        let bids: Vec<_> = dataset
            .quote_history("TSLA")
            .unwrap()
            .iter()
            .map(|entry| entry.bid)
            .collect();
        assert_eq!(bids, [230.0, 235.0, 240.0]);

        let quotes = dataset.quotes(&["TSLA".into(), "AAPL".into()]);
        assert_eq!(quotes.keys().collect::<Vec<_>>(), ["TSLA"]);
    }

    #[test]
    fn test_top_changes_for_day() {
        let change = |id: &str, start_popularity, end_popularity| DayChange {
            instrument_id: id.into(),
            day_id: "2019-08-01".into(),
            start_popularity,
            end_popularity,
        };
        let mut snapshot = Snapshot {
            instruments: vec![
                Instrument {
                    instrument_id: "goog_id".into(),
                    symbol: "GOOG".into(),
                    simple_name: Some("Alphabet".into()),
                },
                Instrument {
                    instrument_id: "aapl_id".into(),
                    symbol: "AAPL".into(),
                    simple_name: Some("Apple".into()),
                },
            ],
            day_changes: vec![
                change("goog_id", 10, 40),
                change("aapl_id", 70, 40),
                change("spy_id", 5, 6),
            ],
            ..Default::default()
        };
        snapshot.day_changes.push(DayChange {
            day_id: "2019-08-02".into(),
            ..change("spy_id", 0, 1000)
        });
        let dataset = Dataset::from_snapshot(snapshot);

        // equal movements are ordered by symbol
        let top = dataset.top_changes_for_day("2019-08-01", 2);
        assert_eq!(
            top,
            [
                DayTopChange {
                    start_popularity: 70,
                    end_popularity: 40,
                    symbol: Some("AAPL".into()),
                    name: Some("Apple".into()),
                },
                DayTopChange {
                    start_popularity: 10,
                    end_popularity: 40,
                    symbol: Some("GOOG".into()),
                    name: Some("Alphabet".into()),
                },
            ]
        );
        assert_eq!(dataset.top_changes_for_day("2019-08-01", 10).len(), 3);
        assert!(dataset.top_changes_for_day("2019-08-03", 10).is_empty());

        let days: Vec<_> = dataset
            .barometer_timeseries()
            .into_iter()
            .map(|total| (total.day_id, total.abs_pop_diff_sum))
            .collect();
        assert_eq!(
            days,
            [
                ("2019-08-01".to_owned(), 61),
                ("2019-08-02".to_owned(), 1000)
            ]
        );
    }
}
