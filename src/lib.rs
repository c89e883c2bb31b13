//! # Forecast Engine
//!
//! A Rust library for orchestrating financial time series forecasts across a
//! lineup of interchangeable models.
//!
//! ## Features
//!
//! - Time series data handling (OHLCV data with derived indicator features)
//! - Forecasting models (Moving Average, ARIMA, VAR, LSTM, GRU)
//! - Weighted ensemble combination with data-driven weight optimization
//! - Filesystem model registry with per-symbol artifacts
//! - Performance evaluation, rankings and comparison reports
//! - Scheduled data refresh, forecasting, retraining and sentiment updates
//!
//! ## Quick Start
//!
//! ```rust
//! use chrono::{Duration, TimeZone, Utc};
//! use forecast_engine::config::MovingAverageConfig;
//! use forecast_engine::data::TimeSeriesFrame;
//! use forecast_engine::models::{Forecaster, MovingAverageForecaster};
//!
//! # fn main() -> forecast_engine::Result<()> {
//! // Thirty days of steadily rising closes
//! let start = Utc.with_ymd_and_hms(2023, 1, 1, 0, 0, 0).unwrap();
//! let dates = (0..30).map(|i| start + Duration::days(i)).collect();
//! let closes = (0..30).map(|i| 100.0 + i as f64).collect();
//! let data = TimeSeriesFrame::new(dates, closes)?;
//!
//! // Fit a model and look five steps ahead
//! let mut model = MovingAverageForecaster::new(MovingAverageConfig::default());
//! model.train(&data)?;
//! let forecast = model.predict(5)?;
//! assert_eq!(forecast.len(), 5);
//! # Ok(())
//! # }
//! ```

use tracing_subscriber::EnvFilter;

pub mod config;
pub mod data;
pub mod ensemble;
pub mod error;
pub mod evaluator;
pub mod metrics;
pub mod models;
pub mod provider;
pub mod registry;
pub mod scheduler;
pub mod stationarity;
pub mod store;
pub mod training;
pub mod utils;

// Re-export commonly used types
pub use crate::config::EngineConfig;
pub use crate::data::{DataLoader, TimeSeriesFrame};
pub use crate::ensemble::EnsembleCombiner;
pub use crate::error::{ForecastError, Result};
pub use crate::evaluator::PerformanceEvaluator;
pub use crate::metrics::Metrics;
pub use crate::models::{Forecaster, ModelKind};
pub use crate::registry::ModelRegistry;
pub use crate::scheduler::ForecastScheduler;
pub use crate::store::{DocumentStore, MemoryStore};
pub use crate::training::ModelTrainer;

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const NAME: &str = env!("CARGO_PKG_NAME");

/// Installs the global tracing subscriber.
///
/// Filtering follows `RUST_LOG` when set and defaults to `info`. Repeated
/// calls are no-ops, so binaries and tests can both call this freely.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .try_init();
}
