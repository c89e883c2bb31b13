//! Engine and model configuration
//!
//! Every knob carries the production default; configs are plain serde structs
//! with consuming `with_*` setters so call sites read as one expression.

use chrono::Weekday;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::Result;

/// Baseline-average model configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MovingAverageConfig {
    /// Trailing window length
    pub window_size: usize,
    /// Extrapolate the window's linear trend instead of repeating the mean
    pub trend: bool,
}

impl Default for MovingAverageConfig {
    fn default() -> Self {
        Self {
            window_size: 20,
            trend: false,
        }
    }
}

impl MovingAverageConfig {
    /// Set the trailing window length
    pub fn with_window_size(mut self, window_size: usize) -> Self {
        self.window_size = window_size;
        self
    }

    /// Enable trend extrapolation
    pub fn with_trend(mut self) -> Self {
        self.trend = true;
        self
    }
}

/// Autoregressive-integrated model configuration: grid bounds for the
/// (p, d, q) order search
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArimaConfig {
    pub max_p: usize,
    pub max_d: usize,
    pub max_q: usize,
}

impl Default for ArimaConfig {
    fn default() -> Self {
        Self {
            max_p: 3,
            max_d: 2,
            max_q: 3,
        }
    }
}

/// Multivariate-autoregressive model configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VarConfig {
    /// Largest lag order considered during selection
    pub max_lags: usize,
    /// Minimum observations required to fit
    pub min_observations: usize,
}

impl Default for VarConfig {
    fn default() -> Self {
        Self {
            max_lags: 10,
            min_observations: 50,
        }
    }
}

/// Sequence-learning model configuration, shared by both cell kinds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecurrentConfig {
    /// Sliding window length fed to the network
    pub sequence_length: usize,
    /// Hidden width of each recurrent layer
    pub hidden_size: usize,
    /// Number of stacked recurrent layers
    pub num_layers: usize,
    /// Width of the dense layer between the recurrent stack and the output
    pub dense_size: usize,
    /// Dropout probability applied after each recurrent layer during training
    pub dropout: f64,
    pub epochs: usize,
    pub batch_size: usize,
    pub learning_rate: f64,
}

impl Default for RecurrentConfig {
    fn default() -> Self {
        Self {
            sequence_length: 60,
            hidden_size: 50,
            num_layers: 2,
            dense_size: 25,
            dropout: 0.2,
            epochs: 50,
            batch_size: 32,
            learning_rate: 0.001,
        }
    }
}

impl RecurrentConfig {
    /// Set the sliding window length
    pub fn with_sequence_length(mut self, sequence_length: usize) -> Self {
        self.sequence_length = sequence_length;
        self
    }

    /// Set the hidden width
    pub fn with_hidden_size(mut self, hidden_size: usize) -> Self {
        self.hidden_size = hidden_size;
        self
    }

    /// Set the number of training epochs
    pub fn with_epochs(mut self, epochs: usize) -> Self {
        self.epochs = epochs;
        self
    }

    /// Set the batch size
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// Set the learning rate
    pub fn with_learning_rate(mut self, learning_rate: f64) -> Self {
        self.learning_rate = learning_rate;
        self
    }

    /// Set the dropout probability
    pub fn with_dropout(mut self, dropout: f64) -> Self {
        self.dropout = dropout;
        self
    }
}

/// Per-model configuration bundle used by the training pipeline
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelConfigs {
    pub moving_average: MovingAverageConfig,
    pub arima: ArimaConfig,
    pub var: VarConfig,
    pub recurrent: RecurrentConfig,
}

/// Job cadence configuration for the scheduler
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduleConfig {
    /// Hour (UTC) of the daily data refresh
    pub data_refresh_hour: u32,
    /// First hour (UTC) of the hourly forecast refresh window
    pub forecast_start_hour: u32,
    /// Last hour (UTC, inclusive) of the hourly forecast refresh window
    pub forecast_end_hour: u32,
    /// Weekday of the weekly retrain
    pub retrain_weekday: Weekday,
    /// Hour (UTC) of the weekly retrain
    pub retrain_hour: u32,
    /// Interval between sentiment refreshes, in hours
    pub sentiment_interval_hours: u32,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            data_refresh_hour: 6,
            forecast_start_hour: 9,
            forecast_end_hour: 16,
            retrain_weekday: Weekday::Sun,
            retrain_hour: 2,
            sentiment_interval_hours: 4,
        }
    }
}

/// Top-level engine configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Symbol universe every scheduled job iterates over
    pub symbols: Vec<String>,
    /// Root directory for persisted model artifacts
    pub model_dir: PathBuf,
    /// Default prediction horizon in steps
    pub forecast_horizon: usize,
    /// Share of each frame held out for evaluation
    pub test_ratio: f64,
    /// Days of history requested from the market-data provider
    pub lookback_days: u32,
    /// Minimum training rows before the sequence-learning variants are fit
    pub neural_min_rows: usize,
    /// Trailing training rows used to optimize ensemble weights
    pub validation_rows: usize,
    pub schedule: ScheduleConfig,
    pub models: ModelConfigs,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            symbols: vec![
                "BTC-USD".to_string(),
                "AAPL".to_string(),
                "EURUSD=X".to_string(),
                "TSLA".to_string(),
                "GOOGL".to_string(),
            ],
            model_dir: PathBuf::from("models"),
            forecast_horizon: 24,
            test_ratio: 0.2,
            lookback_days: 730,
            neural_min_rows: 200,
            validation_rows: 50,
            schedule: ScheduleConfig::default(),
            // Scheduled retraining runs the sequence models with fewer epochs
            // and smaller batches than their standalone defaults
            models: ModelConfigs {
                recurrent: RecurrentConfig::default()
                    .with_epochs(20)
                    .with_batch_size(16),
                ..ModelConfigs::default()
            },
        }
    }
}

impl EngineConfig {
    /// Load a configuration from a JSON file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&contents)?)
    }

    /// Write the configuration to a JSON file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }
}
