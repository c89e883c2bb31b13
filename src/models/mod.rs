//! Forecasting models for time series data
//!
//! Every model implements the object-safe [`Forecaster`] trait, so the
//! training pipeline, the ensemble and the registry can hold them as
//! `Box<dyn Forecaster>` without knowing the concrete variant.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::config::ModelConfigs;
use crate::data::TimeSeriesFrame;
use crate::error::{ForecastError, Result};
use crate::metrics::{forecast_accuracy, Metrics};

pub mod arima;
pub mod moving_average;
pub mod recurrent;
pub mod var;

pub use arima::ArimaForecaster;
pub use moving_average::MovingAverageForecaster;
pub use recurrent::{CellKind, RecurrentForecaster};
pub use var::VarForecaster;

/// Identifies a model variant. The string form (`"moving_average"`,
/// `"arima"`, ...) is what ends up in performance records, forecast
/// records and artifact file names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelKind {
    MovingAverage,
    Arima,
    Var,
    Lstm,
    Gru,
}

impl ModelKind {
    /// All variants, in the order the training pipeline fits them.
    pub fn all() -> [ModelKind; 5] {
        [
            ModelKind::MovingAverage,
            ModelKind::Arima,
            ModelKind::Var,
            ModelKind::Lstm,
            ModelKind::Gru,
        ]
    }

    /// The baseline variants that train on any reasonably sized frame.
    pub fn baselines() -> [ModelKind; 3] {
        [ModelKind::MovingAverage, ModelKind::Arima, ModelKind::Var]
    }

    /// The sequence-learning variants that need a larger training frame.
    pub fn neurals() -> [ModelKind; 2] {
        [ModelKind::Lstm, ModelKind::Gru]
    }

    /// Canonical snake_case name for records and file names
    pub fn as_str(&self) -> &'static str {
        match self {
            ModelKind::MovingAverage => "moving_average",
            ModelKind::Arima => "arima",
            ModelKind::Var => "var",
            ModelKind::Lstm => "lstm",
            ModelKind::Gru => "gru",
        }
    }

    /// Parse the canonical name back into a kind
    pub fn from_name(name: &str) -> Result<ModelKind> {
        match name {
            "moving_average" => Ok(ModelKind::MovingAverage),
            "arima" => Ok(ModelKind::Arima),
            "var" => Ok(ModelKind::Var),
            "lstm" => Ok(ModelKind::Lstm),
            "gru" => Ok(ModelKind::Gru),
            other => Err(ForecastError::Configuration(format!(
                "Unknown model kind: {}",
                other
            ))),
        }
    }

    /// True for the variants persisted in the native binary format
    pub fn uses_native_format(&self) -> bool {
        matches!(self, ModelKind::Lstm | ModelKind::Gru)
    }
}

impl fmt::Display for ModelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Static description of a model instance, reported by every
/// [`Forecaster`] and stored alongside evaluation records.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelInfo {
    /// Canonical model name
    pub name: String,
    /// Model variant
    pub kind: ModelKind,
    /// Whether the model has been trained
    pub is_trained: bool,
    /// Hyperparameters as a JSON object
    pub parameters: serde_json::Value,
}

impl ModelInfo {
    pub fn new(kind: ModelKind, is_trained: bool, parameters: serde_json::Value) -> Self {
        Self {
            name: kind.as_str().to_string(),
            kind,
            is_trained,
            parameters,
        }
    }
}

/// Common interface for forecasting models
///
/// The trait is object-safe on purpose: callers hold trained models as
/// `Box<dyn Forecaster>` and never branch on the concrete type.
pub trait Forecaster: Send {
    /// Fit the model to a training frame, replacing any previous fit
    fn train(&mut self, data: &TimeSeriesFrame) -> Result<()>;

    /// Forecast `horizon` steps past the end of the training data.
    ///
    /// Returns exactly `horizon` values or an error; fails with
    /// [`ForecastError::NotTrained`] before a successful `train`.
    fn predict(&self, horizon: usize) -> Result<Vec<f64>>;

    /// Score the trained model against a held-out frame
    fn evaluate(&self, test_data: &TimeSeriesFrame) -> Result<Metrics> {
        let actual = test_data.close_prices()?;
        let predicted = self.predict(actual.len())?;
        forecast_accuracy(&predicted, &actual)
    }

    /// Describe the model and its hyperparameters
    fn describe(&self) -> ModelInfo;
}

/// Build an untrained model of the given kind from the configuration bundle
pub fn build_model(kind: ModelKind, configs: &ModelConfigs) -> Box<dyn Forecaster> {
    match kind {
        ModelKind::MovingAverage => {
            Box::new(MovingAverageForecaster::new(configs.moving_average.clone()))
        }
        ModelKind::Arima => Box::new(ArimaForecaster::new(configs.arima.clone())),
        ModelKind::Var => Box::new(VarForecaster::new(configs.var.clone())),
        ModelKind::Lstm => Box::new(RecurrentForecaster::new(
            CellKind::Lstm,
            configs.recurrent.clone(),
        )),
        ModelKind::Gru => Box::new(RecurrentForecaster::new(
            CellKind::Gru,
            configs.recurrent.clone(),
        )),
    }
}
