//! Moving average baseline forecaster
//!
//! Averages the trailing window of closing prices and projects it
//! forward, either flat or with a linear trend read off the window.

use serde::{Deserialize, Serialize};

use crate::config::MovingAverageConfig;
use crate::data::TimeSeriesFrame;
use crate::error::{ForecastError, Result};
use crate::models::{Forecaster, ModelInfo, ModelKind};

/// Moving average model over the trailing `window_size` observations
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MovingAverageForecaster {
    config: MovingAverageConfig,
    /// Trailing window captured at train time, oldest first
    last_window: Option<Vec<f64>>,
}

impl MovingAverageForecaster {
    /// Create an untrained model from its configuration
    pub fn new(config: MovingAverageConfig) -> Self {
        Self {
            config,
            last_window: None,
        }
    }

    fn window(&self) -> Result<&[f64]> {
        self.last_window.as_deref().ok_or_else(|| {
            ForecastError::NotTrained("Moving average model has not been trained".to_string())
        })
    }
}

impl Forecaster for MovingAverageForecaster {
    fn train(&mut self, data: &TimeSeriesFrame) -> Result<()> {
        if self.config.window_size == 0 {
            return Err(ForecastError::Configuration(
                "Window size must be positive".to_string(),
            ));
        }

        let prices = data.close_prices()?;
        if prices.len() < self.config.window_size {
            return Err(ForecastError::InsufficientData(format!(
                "Moving average needs at least {} observations, got {}",
                self.config.window_size,
                prices.len()
            )));
        }

        self.last_window = Some(prices[prices.len() - self.config.window_size..].to_vec());
        Ok(())
    }

    fn predict(&self, horizon: usize) -> Result<Vec<f64>> {
        let window = self.window()?;

        if self.config.trend {
            // Linear extrapolation from the slope across the window
            let trend = (window[window.len() - 1] - window[0]) / window.len() as f64;
            let last = window[window.len() - 1];
            Ok((0..horizon)
                .map(|i| last + trend * (i + 1) as f64)
                .collect())
        } else {
            let average = window.iter().sum::<f64>() / window.len() as f64;
            Ok(vec![average; horizon])
        }
    }

    fn describe(&self) -> ModelInfo {
        ModelInfo::new(
            ModelKind::MovingAverage,
            self.last_window.is_some(),
            serde_json::json!({
                "window_size": self.config.window_size,
                "trend": self.config.trend,
            }),
        )
    }
}
