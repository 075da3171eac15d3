use crate::error::EngineError;
use backtester::SymbolSeries;
use configuration::DataConfig;
use core_types::{Kline, Timeframe, Window};
use database::KlineStore;
use futures::future::try_join_all;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

type SeriesKey = (String, Timeframe, Window);

/// Bounded FIFO cache of fetched series.
#[derive(Debug, Default)]
struct SeriesCache {
    entries: HashMap<SeriesKey, Arc<[Kline]>>,
    order: VecDeque<SeriesKey>,
}

impl SeriesCache {
    fn get(&self, key: &SeriesKey) -> Option<Arc<[Kline]>> {
        self.entries.get(key).cloned()
    }

    fn insert(&mut self, key: SeriesKey, klines: Arc<[Kline]>, capacity: usize) {
        if capacity == 0 {
            return;
        }
        if self.entries.insert(key.clone(), klines).is_none() {
            self.order.push_back(key);
        }
        while self.entries.len() > capacity {
            match self.order.pop_front() {
                Some(oldest) => {
                    self.entries.remove(&oldest);
                }
                None => break,
            }
        }
    }
}

/// Read-through access to historical bars for the configured universe.
///
/// Cached per symbol, timeframe and window. Many strategies share the same
/// timeframe and the windows only move when the clock crosses a bar boundary, so
/// most fetches are hits.
pub struct MarketData {
    store: Arc<dyn KlineStore>,
    symbols: Vec<String>,
    fetch_timeout: Duration,
    capacity: usize,
    cache: Mutex<SeriesCache>,
}

impl MarketData {
    pub fn new(store: Arc<dyn KlineStore>, config: &DataConfig) -> Self {
        Self {
            store,
            symbols: config.symbols.clone(),
            fetch_timeout: Duration::from_secs(config.fetch_timeout_secs),
            capacity: config.cache_capacity,
            cache: Mutex::new(SeriesCache::default()),
        }
    }

    pub async fn series(&self, symbol: &str, timeframe: Timeframe, window: Window) -> Result<SymbolSeries, EngineError> {
        let key = (symbol.to_string(), timeframe, window);
        if let Some(klines) = self.cache.lock().await.get(&key) {
            return Ok(SymbolSeries { symbol: symbol.to_string(), klines });
        }

        let fetched = tokio::time::timeout(self.fetch_timeout, self.store.klines(symbol, timeframe, &window))
            .await
            .map_err(|_| EngineError::FetchTimeout {
                symbol: symbol.to_string(),
                secs: self.fetch_timeout.as_secs(),
            })??;
        tracing::debug!(symbol, %timeframe, bars = fetched.len(), "Fetched klines");

        let klines: Arc<[Kline]> = fetched.into();
        self.cache.lock().await.insert(key, Arc::clone(&klines), self.capacity);
        Ok(SymbolSeries { symbol: symbol.to_string(), klines })
    }

    /// Every configured symbol over `window`, in configuration order.
    pub async fn universe(&self, timeframe: Timeframe, window: Window) -> Result<Vec<SymbolSeries>, EngineError> {
        try_join_all(self.symbols.iter().map(|symbol| self.series(symbol, timeframe, window))).await
    }
}
