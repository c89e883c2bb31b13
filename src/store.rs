//! Document store contract and record types
//!
//! The engine never owns a database connection. Everything that needs shared
//! persistent state (scheduler, evaluator, trainer) receives a store handle
//! explicitly, which keeps process-wide singletons out and makes test doubles
//! trivial. [`MemoryStore`] is the bundled implementation used by tests and
//! local runs.
//!
//! All writes are appends: bars, sentiment, performance records and stored
//! forecasts accumulate history. Nothing here deletes or updates in place.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Mutex;

use crate::error::{ForecastError, Result};
use crate::metrics::Metrics;

/// One OHLCV observation for a symbol
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub symbol: String,
    pub timestamp: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

/// Sentiment classification attached to a scored headline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SentimentLabel {
    Positive,
    Negative,
    Neutral,
}

/// One scored news headline for a symbol
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SentimentRecord {
    pub symbol: String,
    pub title: String,
    /// Polarity in [-1, 1], rounded to four decimals by providers
    pub polarity: f64,
    pub label: SentimentLabel,
    pub published: DateTime<Utc>,
}

/// One evaluation result for a trained model; append-only, never mutated
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerformanceRecord {
    pub symbol: String,
    pub model_name: String,
    pub model_params: serde_json::Value,
    pub metrics: Metrics,
    pub timestamp: DateTime<Utc>,
    pub test_data_length: usize,
}

/// One point of a stored forecast
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictedPoint {
    pub timestamp: DateTime<Utc>,
    pub value: f64,
}

/// One stored forecast run for a symbol
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForecastRecord {
    pub symbol: String,
    pub model_used: String,
    pub generated_at: DateTime<Utc>,
    pub predictions: Vec<PredictedPoint>,
}

/// Typed document store over the engine's logical collections
///
/// Mirrors plain document-database semantics (filtered find, batch insert,
/// distinct, count) as typed methods per collection.
pub trait DocumentStore: Send + Sync {
    /// Append bars, skipping (symbol, timestamp) pairs already present so a
    /// daily refresh that re-fetches an overlapping window stays idempotent.
    /// Returns the number of bars actually inserted.
    fn insert_bars(&self, bars: &[Bar]) -> Result<usize>;

    /// Bars for a symbol in ascending timestamp order; with a limit, the most
    /// recent `limit` bars are returned (still ascending).
    fn bars(&self, symbol: &str, limit: Option<usize>) -> Result<Vec<Bar>>;

    /// Number of stored bars for a symbol
    fn bar_count(&self, symbol: &str) -> Result<usize>;

    /// Distinct symbols present in the bar collection
    fn symbols(&self) -> Result<Vec<String>>;

    /// Append sentiment records; returns the number inserted
    fn insert_sentiment(&self, records: &[SentimentRecord]) -> Result<usize>;

    /// Most recent sentiment records, newest first
    fn sentiment(&self, limit: Option<usize>) -> Result<Vec<SentimentRecord>>;

    /// Append performance records in one batch; returns the number inserted
    fn insert_performance(&self, records: &[PerformanceRecord]) -> Result<usize>;

    /// Performance records, newest first, optionally scoped to one symbol
    fn performance(&self, symbol: Option<&str>) -> Result<Vec<PerformanceRecord>>;

    /// Append one forecast run
    fn insert_forecast(&self, record: &ForecastRecord) -> Result<()>;

    /// The most recently generated forecast for a symbol
    fn latest_forecast(&self, symbol: &str) -> Result<Option<ForecastRecord>>;
}

#[derive(Debug, Default)]
struct StoreInner {
    bars: Vec<Bar>,
    sentiment: Vec<SentimentRecord>,
    performance: Vec<PerformanceRecord>,
    forecasts: Vec<ForecastRecord>,
}

/// In-memory document store
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<StoreInner>,
}

impl MemoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, StoreInner>> {
        self.inner
            .lock()
            .map_err(|_| ForecastError::DataError("Store lock poisoned".to_string()))
    }
}

impl DocumentStore for MemoryStore {
    fn insert_bars(&self, bars: &[Bar]) -> Result<usize> {
        let mut inner = self.lock()?;
        let mut inserted = 0;
        for bar in bars {
            let exists = inner
                .bars
                .iter()
                .any(|b| b.symbol == bar.symbol && b.timestamp == bar.timestamp);
            if !exists {
                inner.bars.push(bar.clone());
                inserted += 1;
            }
        }
        Ok(inserted)
    }

    fn bars(&self, symbol: &str, limit: Option<usize>) -> Result<Vec<Bar>> {
        let inner = self.lock()?;
        let mut bars: Vec<Bar> = inner
            .bars
            .iter()
            .filter(|b| b.symbol == symbol)
            .cloned()
            .collect();
        bars.sort_by_key(|b| b.timestamp);

        if let Some(limit) = limit {
            let start = bars.len().saturating_sub(limit);
            bars.drain(..start);
        }

        Ok(bars)
    }

    fn bar_count(&self, symbol: &str) -> Result<usize> {
        let inner = self.lock()?;
        Ok(inner.bars.iter().filter(|b| b.symbol == symbol).count())
    }

    fn symbols(&self) -> Result<Vec<String>> {
        let inner = self.lock()?;
        let mut symbols: Vec<String> = inner.bars.iter().map(|b| b.symbol.clone()).collect();
        symbols.sort();
        symbols.dedup();
        Ok(symbols)
    }

    fn insert_sentiment(&self, records: &[SentimentRecord]) -> Result<usize> {
        let mut inner = self.lock()?;
        inner.sentiment.extend_from_slice(records);
        Ok(records.len())
    }

    fn sentiment(&self, limit: Option<usize>) -> Result<Vec<SentimentRecord>> {
        let inner = self.lock()?;
        let mut records = inner.sentiment.clone();
        records.sort_by(|a, b| b.published.cmp(&a.published));
        if let Some(limit) = limit {
            records.truncate(limit);
        }
        Ok(records)
    }

    fn insert_performance(&self, records: &[PerformanceRecord]) -> Result<usize> {
        let mut inner = self.lock()?;
        inner.performance.extend_from_slice(records);
        Ok(records.len())
    }

    fn performance(&self, symbol: Option<&str>) -> Result<Vec<PerformanceRecord>> {
        let inner = self.lock()?;
        let mut records: Vec<PerformanceRecord> = inner
            .performance
            .iter()
            .filter(|r| symbol.map_or(true, |s| r.symbol == s))
            .cloned()
            .collect();
        records.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        Ok(records)
    }

    fn insert_forecast(&self, record: &ForecastRecord) -> Result<()> {
        let mut inner = self.lock()?;
        inner.forecasts.push(record.clone());
        Ok(())
    }

    fn latest_forecast(&self, symbol: &str) -> Result<Option<ForecastRecord>> {
        let inner = self.lock()?;
        Ok(inner
            .forecasts
            .iter()
            .filter(|f| f.symbol == symbol)
            .max_by_key(|f| f.generated_at)
            .cloned())
    }
}
