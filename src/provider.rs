//! Market data and sentiment provider contracts
//!
//! Live market feeds and news wires sit outside the engine; jobs that need
//! them receive a provider handle. The bundled synthetic implementations are
//! seeded random walks, deterministic per (seed, symbol), used by tests and
//! the demo binary.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use chrono::{Duration, NaiveTime, Utc};
use rand::prelude::*;

use crate::data::TimeSeriesFrame;
use crate::error::{ForecastError, Result};
use crate::store::{Bar, SentimentLabel, SentimentRecord};

/// Headlines fetched per symbol in one sentiment batch
pub const DEFAULT_HEADLINE_LIMIT: usize = 20;

/// Source of historical bars for a symbol
pub trait MarketDataProvider: Send + Sync {
    /// One daily bar per lookback day, ascending timestamps
    fn fetch_bars(&self, symbol: &str, lookback_days: u32) -> Result<Vec<Bar>>;

    /// The lookback window as a frame ready for model consumption
    fn fetch(&self, symbol: &str, lookback_days: u32) -> Result<TimeSeriesFrame> {
        TimeSeriesFrame::from_bars(&self.fetch_bars(symbol, lookback_days)?)
    }
}

/// Source of scored news headlines
pub trait SentimentProvider: Send + Sync {
    /// One batch covering every symbol, up to `limit` records per symbol
    fn fetch(&self, symbols: &[String], limit: usize) -> Result<Vec<SentimentRecord>>;
}

/// Deterministic random-walk market data
///
/// Every symbol gets its own walk derived from the provider seed, so repeated
/// fetches on the same day return identical bars and the daily refresh stays
/// idempotent.
#[derive(Debug, Clone)]
pub struct SyntheticMarketData {
    seed: u64,
}

impl SyntheticMarketData {
    pub fn new(seed: u64) -> Self {
        Self { seed }
    }
}

impl MarketDataProvider for SyntheticMarketData {
    fn fetch_bars(&self, symbol: &str, lookback_days: u32) -> Result<Vec<Bar>> {
        if symbol.trim().is_empty() {
            return Err(ForecastError::DataError(
                "Cannot fetch market data for an empty symbol".to_string(),
            ));
        }
        if lookback_days == 0 {
            return Err(ForecastError::DataError(format!(
                "Lookback for {} must cover at least one day",
                symbol
            )));
        }

        let symbol_seed = hash_symbol(symbol);
        let mut rng = StdRng::seed_from_u64(self.seed ^ symbol_seed);

        // Anchor on today's midnight so refetches within a day repeat the
        // same timestamps.
        let end = Utc::now().date_naive().and_time(NaiveTime::MIN).and_utc();
        let n = lookback_days as usize;

        let mut price = 60.0 + (symbol_seed % 440) as f64;
        let mut bars = Vec::with_capacity(n);
        for i in 0..n {
            let timestamp = end - Duration::days((n - i) as i64);
            let open = price;
            price *= 1.0 + rng.gen_range(-0.02..0.02);
            let close = price;
            let high = open.max(close) * (1.0 + rng.gen_range(0.0..0.01));
            let low = open.min(close) * (1.0 - rng.gen_range(0.0..0.01));
            let volume = rng.gen_range(100_000.0..1_000_000.0);

            bars.push(Bar {
                symbol: symbol.to_string(),
                timestamp,
                open,
                high,
                low,
                close,
                volume,
            });
        }

        Ok(bars)
    }
}

const POSITIVE_KEYWORDS: &[&str] = &[
    "surge", "surges", "surged", "rally", "rallies", "rise", "rises", "rose", "high", "higher",
    "highest", "gain", "gains", "gained", "boost", "boosted", "profit", "profits", "beat", "beats",
    "exceed", "exceeds", "exceeded", "strong", "stronger", "bullish", "optimistic", "breakthrough",
    "milestone", "record", "best", "outperform", "outperforming",
];

const NEGATIVE_KEYWORDS: &[&str] = &[
    "fall", "falls", "fell", "drop", "drops", "dropped", "decline", "declines", "declined",
    "crash", "crashes", "crashed", "loss", "losses", "lost", "miss", "misses", "missed", "weak",
    "weaker", "weakest", "bearish", "pessimistic", "concern", "concerns", "risk", "risks",
    "plunge", "plunges", "plunged", "tumble", "tumbles", "tumbled", "slump", "slumps", "slumped",
];

/// Score a headline into a polarity in [-1, 1] and a label.
///
/// Polarity is the balance of financial keyword hits, rounded to four
/// decimals. Negative hits outrank positive ones; small positive polarity is
/// enough to tip a tie toward positive.
pub fn score_headline(title: &str) -> (f64, SentimentLabel) {
    let lower = title.to_lowercase();
    let positive = POSITIVE_KEYWORDS.iter().filter(|w| lower.contains(*w)).count();
    let negative = NEGATIVE_KEYWORDS.iter().filter(|w| lower.contains(*w)).count();

    let matched = positive + negative;
    let polarity = if matched == 0 {
        0.0
    } else {
        let raw = (positive as f64 - negative as f64) / matched as f64;
        (raw * 10_000.0).round() / 10_000.0
    };

    let label = if negative > positive {
        SentimentLabel::Negative
    } else if positive > negative || polarity > 0.05 {
        SentimentLabel::Positive
    } else if polarity < -0.05 {
        SentimentLabel::Negative
    } else {
        SentimentLabel::Neutral
    };

    (polarity, label)
}

const HEADLINE_TEMPLATES: &[&str] = &[
    "{symbol} shares surge to a record high after earnings beat",
    "{symbol} rallies as analysts boost price targets",
    "Strong quarter lifts {symbol} profit outlook",
    "{symbol} falls as weak guidance stokes concern",
    "{symbol} shares plunge after quarterly earnings miss",
    "Investors flag risks as {symbol} declines",
    "{symbol} trades sideways ahead of quarterly report",
    "Markets await direction on {symbol}",
];

/// Deterministic headline generator scored with [`score_headline`]
#[derive(Debug, Clone)]
pub struct SyntheticSentiment {
    seed: u64,
}

// Separates the sentiment stream from the market-data stream under one seed
const SENTIMENT_SALT: u64 = 0x5EED_FEED;

impl SyntheticSentiment {
    pub fn new(seed: u64) -> Self {
        Self { seed }
    }
}

impl SentimentProvider for SyntheticSentiment {
    fn fetch(&self, symbols: &[String], limit: usize) -> Result<Vec<SentimentRecord>> {
        let now = Utc::now();
        let mut records = Vec::with_capacity(symbols.len() * limit);

        for symbol in symbols {
            let mut rng = StdRng::seed_from_u64(self.seed ^ hash_symbol(symbol) ^ SENTIMENT_SALT);
            for i in 0..limit {
                let template = HEADLINE_TEMPLATES[rng.gen_range(0..HEADLINE_TEMPLATES.len())];
                let title = template.replace("{symbol}", symbol);
                let (polarity, label) = score_headline(&title);

                records.push(SentimentRecord {
                    symbol: symbol.clone(),
                    title,
                    polarity,
                    label,
                    published: now - Duration::hours(i as i64),
                });
            }
        }

        Ok(records)
    }
}

fn hash_symbol(symbol: &str) -> u64 {
    let mut hasher = DefaultHasher::new();
    symbol.hash(&mut hasher);
    hasher.finish()
}
