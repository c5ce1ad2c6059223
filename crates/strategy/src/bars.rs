//! Per-cycle bar store.
//!
//! Bars are pulled in one bulk request per asset class and validated into
//! strictly-increasing series. A failed request leaves the store empty for
//! that asset class; the cycle carries on with whatever data arrived.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use common::{AssetClass, BarsRequest, Error, MarketData, RawBar};
use tracing::{debug, info, warn};

/// One OHLCV sample.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bar {
    pub timestamp: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl From<RawBar> for Bar {
    fn from(raw: RawBar) -> Self {
        Self {
            timestamp: raw.timestamp,
            open: raw.open,
            high: raw.high,
            low: raw.low,
            close: raw.close,
            volume: raw.volume,
        }
    }
}

/// Ordered bars for one symbol. Timestamps are strictly increasing.
#[derive(Debug, Clone, PartialEq)]
pub struct BarSeries {
    symbol: String,
    bars: Vec<Bar>,
}

impl BarSeries {
    pub fn new(symbol: &str, bars: Vec<Bar>) -> Result<Self, Error> {
        let invalid = |reason: String| Error::InvalidSeries {
            symbol: symbol.to_string(),
            reason,
        };

        for (idx, bar) in bars.iter().enumerate() {
            let prices = [bar.open, bar.high, bar.low, bar.close];
            if prices.iter().any(|p| !p.is_finite() || *p < 0.0) {
                return Err(invalid(format!("bar {} has a non-finite or negative price", idx)));
            }
            if !bar.volume.is_finite() || bar.volume < 0.0 {
                return Err(invalid(format!("bar {} has invalid volume {}", idx, bar.volume)));
            }
            if idx > 0 && bar.timestamp <= bars[idx - 1].timestamp {
                return Err(invalid(format!(
                    "timestamps not strictly increasing at bar {} ({} <= {})",
                    idx,
                    bar.timestamp,
                    bars[idx - 1].timestamp
                )));
            }
        }

        Ok(Self {
            symbol: symbol.to_string(),
            bars,
        })
    }

    pub fn from_raw(symbol: &str, raw: Vec<RawBar>) -> Result<Self, Error> {
        Self::new(symbol, raw.into_iter().map(Bar::from).collect())
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn bars(&self) -> &[Bar] {
        &self.bars
    }

    pub fn len(&self) -> usize {
        self.bars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bars.is_empty()
    }

    pub fn closes(&self) -> Vec<f64> {
        self.bars.iter().map(|b| b.close).collect()
    }
}

/// Bar series for the whole universe, valid for one cycle.
#[derive(Debug, Clone, Default)]
pub struct BarStore {
    series: HashMap<String, BarSeries>,
    failed: Vec<AssetClass>,
}

impl BarStore {
    /// Pull bars for `symbols`, one request per asset class.
    pub async fn load<M: MarketData + ?Sized>(
        source: &M,
        symbols: &[String],
        timeframe: &str,
        limit: u32,
    ) -> Self {
        let mut by_class: HashMap<AssetClass, Vec<String>> = HashMap::new();
        for symbol in symbols {
            by_class
                .entry(AssetClass::of_symbol(symbol))
                .or_default()
                .push(symbol.clone());
        }

        let mut store = Self::default();
        for class in [AssetClass::Equity, AssetClass::Crypto] {
            let Some(class_symbols) = by_class.remove(&class) else {
                continue;
            };
            let request = BarsRequest {
                asset_class: class,
                symbols: class_symbols,
                timeframe: timeframe.to_string(),
                limit,
            };

            match source.fetch_bars(&request).await {
                Ok(raw) => {
                    let fetched = raw.len();
                    store.ingest(raw);
                    info!(
                        "Loaded {:?} bars: {} of {} symbols returned data",
                        class,
                        fetched,
                        request.symbols.len()
                    );
                }
                Err(e) => {
                    warn!(
                        "Bar fetch failed for {} {:?} symbols, treating as no data: {}",
                        request.symbols.len(),
                        class,
                        e
                    );
                    store.failed.push(class);
                }
            }
        }

        store
    }

    /// Validate and insert raw series; invalid or empty ones are dropped.
    pub fn ingest(&mut self, raw: HashMap<String, Vec<RawBar>>) {
        for (symbol, bars) in raw {
            if bars.is_empty() {
                debug!("{}: no bars this cycle", symbol);
                continue;
            }
            match BarSeries::from_raw(&symbol, bars) {
                Ok(series) => {
                    self.series.insert(symbol, series);
                }
                Err(e) => warn!("{}: dropping bar series: {}", symbol, e),
            }
        }
    }

    pub fn get(&self, symbol: &str) -> Option<&BarSeries> {
        self.series.get(symbol)
    }

    pub fn len(&self) -> usize {
        self.series.len()
    }

    pub fn is_empty(&self) -> bool {
        self.series.is_empty()
    }

    /// Asset classes whose request failed this cycle.
    pub fn failed_requests(&self) -> &[AssetClass] {
        &self.failed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::{Duration, TimeZone};
    use std::sync::Mutex;

    fn raw(minute: i64, close: f64) -> RawBar {
        let base = Utc.with_ymd_and_hms(2024, 3, 1, 14, 30, 0).unwrap();
        RawBar {
            timestamp: base + Duration::minutes(minute),
            open: close,
            high: close + 1.0,
            low: close - 1.0,
            close,
            volume: 1_000.0,
        }
    }

    struct FakeFeed {
        requests: Mutex<Vec<BarsRequest>>,
        fail_crypto: bool,
    }

    #[async_trait]
    impl MarketData for FakeFeed {
        async fn fetch_bars(
            &self,
            request: &BarsRequest,
        ) -> common::Result<HashMap<String, Vec<RawBar>>> {
            self.requests.lock().unwrap().push(request.clone());
            if self.fail_crypto && request.asset_class == AssetClass::Crypto {
                return Err(Error::Http("connection reset".into()));
            }
            Ok(request
                .symbols
                .iter()
                .filter(|s| s.as_str() != "EMPTY")
                .map(|s| (s.clone(), vec![raw(0, 10.0), raw(1, 11.0)]))
                .collect())
        }
    }

    #[test]
    fn test_series_rejects_duplicate_timestamps() {
        let err = BarSeries::from_raw("AAPL", vec![raw(0, 1.0), raw(0, 2.0)]).unwrap_err();
        assert!(err.to_string().contains("strictly increasing"));
    }

    #[test]
    fn test_series_rejects_nan_close() {
        let mut bad = raw(1, 1.0);
        bad.close = f64::NAN;
        assert!(BarSeries::from_raw("AAPL", vec![raw(0, 1.0), bad]).is_err());
    }

    #[test]
    fn test_ingest_isolates_bad_symbols() {
        let mut store = BarStore::default();
        store.ingest(HashMap::from([
            ("GOOD".to_string(), vec![raw(0, 1.0), raw(1, 2.0)]),
            ("BAD".to_string(), vec![raw(1, 1.0), raw(0, 2.0)]),
            ("NONE".to_string(), Vec::new()),
        ]));
        assert_eq!(store.len(), 1);
        assert_eq!(store.get("GOOD").unwrap().len(), 2);
        assert!(store.get("BAD").is_none());
        assert!(store.get("NONE").is_none());
    }

    #[tokio::test]
    async fn test_load_splits_requests_by_asset_class() {
        let feed = FakeFeed {
            requests: Mutex::new(Vec::new()),
            fail_crypto: false,
        };
        let symbols = vec!["AAPL".to_string(), "BTC/USD".to_string(), "MSFT".to_string()];
        let store = BarStore::load(&feed, &symbols, "1Min", 1000).await;

        let requests = feed.requests.lock().unwrap();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[0].asset_class, AssetClass::Equity);
        assert_eq!(requests[0].symbols, vec!["AAPL", "MSFT"]);
        assert_eq!(requests[1].symbols, vec!["BTC/USD"]);
        assert_eq!(store.len(), 3);
    }

    #[tokio::test]
    async fn test_load_fails_open_per_request() {
        let feed = FakeFeed {
            requests: Mutex::new(Vec::new()),
            fail_crypto: true,
        };
        let symbols = vec!["AAPL".to_string(), "EMPTY".to_string(), "ETH/USD".to_string()];
        let store = BarStore::load(&feed, &symbols, "1Min", 1000).await;

        assert!(store.get("AAPL").is_some());
        assert!(store.get("EMPTY").is_none());
        assert!(store.get("ETH/USD").is_none());
        assert_eq!(store.failed_requests(), &[AssetClass::Crypto]);
    }
}
