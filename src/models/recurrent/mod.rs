//! Sequence-learning forecaster shared by the LSTM and GRU variants
//!
//! Eight engineered features are min-max scaled and cut into sliding
//! windows; a stack of recurrent layers turns each window into a hidden
//! vector and a two-layer linear readout maps that vector to the next
//! scaled close. The recurrent stack keeps its random projection fixed
//! while stochastic gradient descent fits the readout, with dropout on
//! the hidden vector during fitting. Multi-step prediction rolls the
//! window forward, rewriting only the close slot of the carried row.

mod cell;
mod scaler;

pub use cell::CellKind;
use cell::{Dense, LayerState, RecurrentLayer};
use scaler::MinMaxScaler;

use ndarray::{s, Array1, Array2, ArrayView2, Axis};
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::RecurrentConfig;
use crate::data::TimeSeriesFrame;
use crate::error::{ForecastError, Result};
use crate::models::{Forecaster, ModelInfo, ModelKind};

/// Scaled feature column holding the close, which is also the target
const CLOSE_INDEX: usize = 0;

/// Derived columns appended after close and volume
const DERIVED_FEATURES: [&str; 6] = [
    "daily_return",
    "volatility",
    "sma_7",
    "sma_14",
    "ema_7",
    "ema_14",
];

/// Fewest window/target pairs the fit will accept
const MIN_SEQUENCES: usize = 100;

/// Recurrent stack plus linear readout
#[derive(Debug, Clone, Serialize, Deserialize)]
struct RecurrentNetwork {
    layers: Vec<RecurrentLayer>,
    hidden_layer: Dense,
    output_layer: Dense,
}

impl RecurrentNetwork {
    fn new(kind: CellKind, input_size: usize, config: &RecurrentConfig) -> Self {
        let mut layers = Vec::with_capacity(config.num_layers);
        layers.push(RecurrentLayer::new(kind, input_size, config.hidden_size));
        for _ in 1..config.num_layers {
            layers.push(RecurrentLayer::new(
                kind,
                config.hidden_size,
                config.hidden_size,
            ));
        }

        Self {
            layers,
            hidden_layer: Dense::new(config.hidden_size, config.dense_size),
            output_layer: Dense::new(config.dense_size, 1),
        }
    }

    /// Run one window through the stack; returns the final hidden state
    /// of the last layer.
    fn features(&self, window: ArrayView2<'_, f64>) -> Array1<f64> {
        let mut states: Vec<LayerState> =
            self.layers.iter().map(|layer| layer.init_state()).collect();

        for row in window.rows() {
            let mut input = row.to_owned();
            for (layer, state) in self.layers.iter().zip(states.iter_mut()) {
                layer.step(&input, state);
                input = state.hidden.clone();
            }
        }

        states[states.len() - 1].hidden.clone()
    }

    /// Readout from a hidden vector to the scaled close prediction
    fn readout(&self, hidden: &Array1<f64>) -> f64 {
        let dense = self.hidden_layer.forward(hidden);
        self.output_layer.forward(&dense)[0]
    }

    /// Fit the readout by mini-batch SGD over precomputed hidden vectors;
    /// returns the per-epoch mean squared error.
    fn fit_readout(
        &mut self,
        hidden: &[Array1<f64>],
        targets: &[f64],
        config: &RecurrentConfig,
    ) -> Vec<f64> {
        let n_samples = hidden.len();
        let batch_size = config.batch_size.min(n_samples).max(1);
        let keep_prob = 1.0 - config.dropout;
        let mut rng = rand::thread_rng();
        let mut loss_history = Vec::with_capacity(config.epochs);

        for epoch in 0..config.epochs {
            let mut epoch_loss = 0.0;

            for batch_start in (0..n_samples).step_by(batch_size) {
                let batch_end = (batch_start + batch_size).min(n_samples);
                let batch_len = (batch_end - batch_start) as f64;

                let mut grad_w1 = Array2::zeros(self.hidden_layer.weights.raw_dim());
                let mut grad_b1 = Array1::zeros(self.hidden_layer.biases.raw_dim());
                let mut grad_w2 = Array1::zeros(self.output_layer.weights.ncols());
                let mut grad_b2 = 0.0;

                for index in batch_start..batch_end {
                    let dropped = if config.dropout > 0.0 {
                        hidden[index].mapv(|v| {
                            if rng.gen::<f64>() < keep_prob {
                                v / keep_prob
                            } else {
                                0.0
                            }
                        })
                    } else {
                        hidden[index].clone()
                    };

                    let dense = self.hidden_layer.forward(&dropped);
                    let predicted = self.output_layer.forward(&dense)[0];
                    let error = predicted - targets[index];
                    epoch_loss += error * error;

                    // Batch-mean MSE gradient through both linear layers
                    let factor = 2.0 * error / batch_len;
                    grad_w2.scaled_add(factor, &dense);
                    grad_b2 += factor;

                    let d_dense = self.output_layer.weights.row(0).mapv(|w| w * factor);
                    let outer = d_dense
                        .view()
                        .insert_axis(Axis(1))
                        .dot(&dropped.view().insert_axis(Axis(0)));
                    grad_w1 += &outer;
                    grad_b1 += &d_dense;
                }

                let lr = config.learning_rate;
                self.hidden_layer.weights.scaled_add(-lr, &grad_w1);
                self.hidden_layer.biases.scaled_add(-lr, &grad_b1);
                self.output_layer
                    .weights
                    .row_mut(0)
                    .scaled_add(-lr, &grad_w2);
                self.output_layer.biases[0] -= lr * grad_b2;
            }

            let mean_loss = epoch_loss / n_samples as f64;
            loss_history.push(mean_loss);
            debug!(epoch = epoch + 1, loss = mean_loss, "readout epoch");
        }

        loss_history
    }
}

/// Fitted state carried between train and predict
#[derive(Debug, Clone, Serialize, Deserialize)]
struct RecurrentState {
    scaler: MinMaxScaler,
    network: RecurrentNetwork,
    /// Scaled trailing window the rollout starts from
    last_window: Array2<f64>,
    loss_history: Vec<f64>,
}

/// LSTM/GRU forecaster over engineered price features
///
/// The network predicts a single step; longer horizons come from a recursive
/// rollout, so each later step feeds on earlier predictions and inherits
/// their accumulated error.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecurrentForecaster {
    cell_kind: CellKind,
    config: RecurrentConfig,
    state: Option<RecurrentState>,
}

impl RecurrentForecaster {
    /// Create an untrained model of the given cell kind
    pub fn new(cell_kind: CellKind, config: RecurrentConfig) -> Self {
        Self {
            cell_kind,
            config,
            state: None,
        }
    }

    pub fn cell_kind(&self) -> CellKind {
        self.cell_kind
    }

    fn trained(&self) -> Result<&RecurrentState> {
        self.state.as_ref().ok_or_else(|| {
            ForecastError::NotTrained(format!(
                "{} model has not been trained",
                self.cell_kind.as_str().to_uppercase()
            ))
        })
    }

    fn validate_config(&self) -> Result<()> {
        if self.config.sequence_length == 0
            || self.config.hidden_size == 0
            || self.config.num_layers == 0
            || self.config.dense_size == 0
        {
            return Err(ForecastError::Configuration(
                "Sequence model dimensions must be positive".to_string(),
            ));
        }
        if !(0.0..1.0).contains(&self.config.dropout) {
            return Err(ForecastError::Configuration(format!(
                "Dropout must lie in [0, 1), got {}",
                self.config.dropout
            )));
        }
        Ok(())
    }

    /// Assemble the scaled (rows x 8) feature matrix the windows are cut from
    fn feature_matrix(&self, data: &TimeSeriesFrame) -> Result<Array2<f64>> {
        let enriched = data.with_features()?;
        let volume_column = enriched
            .volume_column()
            .ok_or_else(|| {
                ForecastError::DataError(
                    "Sequence models require a volume column alongside the closing price"
                        .to_string(),
                )
            })?
            .clone();

        let mut columns = vec![enriched.target_column().to_string(), volume_column];
        columns.extend(DERIVED_FEATURES.iter().map(|name| name.to_string()));
        let column_refs: Vec<&str> = columns.iter().map(String::as_str).collect();

        let rows = enriched.feature_matrix(&column_refs)?;
        let width = column_refs.len();
        let flat: Vec<f64> = rows.into_iter().flatten().collect();
        let matrix = Array2::from_shape_vec((flat.len() / width, width), flat)
            .map_err(|e| ForecastError::DataError(e.to_string()))?;
        Ok(matrix)
    }
}

impl Forecaster for RecurrentForecaster {
    fn train(&mut self, data: &TimeSeriesFrame) -> Result<()> {
        self.validate_config()?;

        let matrix = self.feature_matrix(data)?;
        let sequence_length = self.config.sequence_length;
        let n_sequences = matrix.nrows().saturating_sub(sequence_length);
        if n_sequences < MIN_SEQUENCES {
            return Err(ForecastError::InsufficientData(format!(
                "{} training needs at least {} window/target pairs, got {}",
                self.cell_kind.as_str().to_uppercase(),
                MIN_SEQUENCES,
                n_sequences
            )));
        }

        let (scaler, scaled) = MinMaxScaler::fit_transform(&matrix)?;

        // The recurrent stack is fixed after initialization, so every
        // window's hidden vector can be computed once up front.
        let mut network = RecurrentNetwork::new(self.cell_kind, scaled.ncols(), &self.config);
        let mut hidden = Vec::with_capacity(n_sequences);
        let mut targets = Vec::with_capacity(n_sequences);
        for i in 0..n_sequences {
            let window = scaled.slice(s![i..i + sequence_length, ..]);
            hidden.push(network.features(window));
            targets.push(scaled[[i + sequence_length, CLOSE_INDEX]]);
        }

        let loss_history = network.fit_readout(&hidden, &targets, &self.config);
        if let Some(final_loss) = loss_history.last() {
            debug!(
                cell = self.cell_kind.as_str(),
                final_loss, "sequence model trained"
            );
        }

        let last_window = scaled
            .slice(s![scaled.nrows() - sequence_length.., ..])
            .to_owned();

        self.state = Some(RecurrentState {
            scaler,
            network,
            last_window,
            loss_history,
        });
        Ok(())
    }

    fn predict(&self, horizon: usize) -> Result<Vec<f64>> {
        let state = self.trained()?;
        let sequence_length = state.last_window.nrows();
        let width = state.last_window.ncols();

        let mut window = state.last_window.clone();
        let mut predictions = Vec::with_capacity(horizon);

        for _ in 0..horizon {
            let hidden = state.network.features(window.view());
            let scaled_close = state.network.readout(&hidden);
            predictions.push(state.scaler.inverse_value(CLOSE_INDEX, scaled_close));

            // Slide the window: carry the last row forward and replace
            // only its close slot with the prediction.
            let mut next_row = window.row(sequence_length - 1).to_owned();
            next_row[CLOSE_INDEX] = scaled_close;

            let mut rolled = Array2::zeros((sequence_length, width));
            rolled
                .slice_mut(s![..sequence_length - 1, ..])
                .assign(&window.slice(s![1.., ..]));
            rolled.row_mut(sequence_length - 1).assign(&next_row);
            window = rolled;
        }

        Ok(predictions)
    }

    fn describe(&self) -> ModelInfo {
        let kind = match self.cell_kind {
            CellKind::Lstm => ModelKind::Lstm,
            CellKind::Gru => ModelKind::Gru,
        };

        let mut parameters = serde_json::json!({
            "cell": self.cell_kind.as_str(),
            "sequence_length": self.config.sequence_length,
            "hidden_size": self.config.hidden_size,
            "num_layers": self.config.num_layers,
            "dense_size": self.config.dense_size,
            "dropout": self.config.dropout,
            "epochs": self.config.epochs,
            "batch_size": self.config.batch_size,
            "learning_rate": self.config.learning_rate,
        });
        if let Some(state) = &self.state {
            if let Some(final_loss) = state.loss_history.last() {
                parameters["final_loss"] = serde_json::json!(final_loss);
            }
        }

        ModelInfo::new(kind, self.state.is_some(), parameters)
    }
}
