//! Per-symbol training pipeline
//!
//! Trains every applicable model kind on stored history, assembles the
//! ensemble, evaluates everything against the held-out tail, persists
//! artifacts and performance records, and reports what succeeded and what
//! failed. One model's failure never aborts the run.

use std::sync::Arc;

use serde::Serialize;
use tracing::{info, warn};

use crate::config::EngineConfig;
use crate::data::TimeSeriesFrame;
use crate::ensemble::EnsembleCombiner;
use crate::error::{ForecastError, Result};
use crate::evaluator::PerformanceEvaluator;
use crate::models::{Forecaster, ModelKind};
use crate::registry::{ModelArtifact, ModelRegistry};
use crate::store::DocumentStore;
use crate::utils::train_test_split;

/// Ensemble weight optimization is skipped below this many training rows
const OPTIMIZE_MIN_ROWS: usize = 100;

/// Outcome of one training run
#[derive(Debug, Clone, Serialize)]
pub struct TrainingReport {
    pub symbol: String,
    pub rows: usize,
    pub train_size: usize,
    pub test_size: usize,
    /// Models that trained, evaluated and saved
    pub succeeded: Vec<String>,
    /// (model name, reason) for every model that fell out of the run
    pub failed: Vec<(String, String)>,
    /// Lowest test RMSE among the succeeded models
    pub best_model: Option<String>,
}

impl TrainingReport {
    fn new(symbol: &str, rows: usize, train_size: usize, test_size: usize) -> Self {
        Self {
            symbol: symbol.to_string(),
            rows,
            train_size,
            test_size,
            succeeded: Vec::new(),
            failed: Vec::new(),
            best_model: None,
        }
    }
}

/// Trains, evaluates and persists the full model lineup for one symbol
pub struct ModelTrainer {
    config: EngineConfig,
    store: Arc<dyn DocumentStore>,
    registry: ModelRegistry,
}

impl ModelTrainer {
    pub fn new(
        config: EngineConfig,
        store: Arc<dyn DocumentStore>,
        registry: ModelRegistry,
    ) -> Self {
        Self {
            config,
            store,
            registry,
        }
    }

    /// Run the whole pipeline for one symbol over its stored bars
    pub fn train_symbol(&self, symbol: &str) -> Result<TrainingReport> {
        let bars = self.store.bars(symbol, None)?;
        if bars.is_empty() {
            return Err(ForecastError::DataError(format!(
                "No stored bars for {}",
                symbol
            )));
        }

        let frame = TimeSeriesFrame::from_bars(&bars)?;
        let (train, test) = train_test_split(&frame, self.config.test_ratio)?;
        info!(
            symbol,
            rows = frame.len(),
            train = train.len(),
            test = test.len(),
            "training models"
        );

        let mut report = TrainingReport::new(symbol, frame.len(), train.len(), test.len());
        let mut evaluator = PerformanceEvaluator::new(Arc::clone(&self.store));
        let mut best: Option<(String, f64)> = None;
        let mut trained: Vec<(ModelKind, ModelArtifact)> = Vec::new();

        let mut kinds: Vec<ModelKind> = ModelKind::baselines().to_vec();
        if train.len() >= self.config.neural_min_rows {
            kinds.extend(ModelKind::neurals());
        } else {
            info!(
                symbol,
                rows = train.len(),
                "not enough training rows for sequence models, skipping"
            );
        }

        for kind in kinds {
            let name = kind.as_str();
            match self.run_model(kind, symbol, &train, &test, &mut evaluator) {
                Ok((artifact, rmse)) => {
                    info!(symbol, model = name, rmse, "model trained");
                    report.succeeded.push(name.to_string());
                    track_best(&mut best, name, rmse);
                    trained.push((kind, artifact));
                }
                Err(e) => {
                    warn!(symbol, model = name, error = %e, "model failed");
                    report.failed.push((name.to_string(), e.to_string()));
                }
            }
        }

        if trained.len() >= 2 {
            match self.run_ensemble(symbol, &trained, &train, &test, &mut evaluator) {
                Ok(rmse) => {
                    info!(symbol, model = "ensemble", rmse, "ensemble assembled");
                    report.succeeded.push("ensemble".to_string());
                    track_best(&mut best, "ensemble", rmse);
                }
                Err(e) => {
                    warn!(symbol, model = "ensemble", error = %e, "ensemble failed");
                    report.failed.push(("ensemble".to_string(), e.to_string()));
                }
            }
        } else {
            info!(symbol, "fewer than two trained models, skipping ensemble");
        }

        evaluator.flush(symbol)?;

        report.best_model = best.map(|(name, _)| name);
        info!(
            symbol,
            succeeded = report.succeeded.len(),
            failed = report.failed.len(),
            best = report.best_model.as_deref().unwrap_or("none"),
            "training complete"
        );
        Ok(report)
    }

    /// Train, evaluate and save one model; returns the artifact and its
    /// test RMSE.
    fn run_model(
        &self,
        kind: ModelKind,
        symbol: &str,
        train: &TimeSeriesFrame,
        test: &TimeSeriesFrame,
        evaluator: &mut PerformanceEvaluator,
    ) -> Result<(ModelArtifact, f64)> {
        let mut artifact = ModelArtifact::build(kind, &self.config.models);
        artifact.train(train)?;

        let info = artifact.describe();
        let record = evaluator.evaluate(&artifact, test, kind.as_str(), info.parameters)?;
        self.registry.save(symbol, &artifact)?;

        Ok((artifact, record.metrics.rmse))
    }

    /// Combine the trained models, fit the weights, evaluate and persist
    /// them; returns the ensemble's test RMSE.
    fn run_ensemble(
        &self,
        symbol: &str,
        trained: &[(ModelKind, ModelArtifact)],
        train: &TimeSeriesFrame,
        test: &TimeSeriesFrame,
        evaluator: &mut PerformanceEvaluator,
    ) -> Result<f64> {
        let mut ensemble = EnsembleCombiner::new();
        for (kind, artifact) in trained {
            ensemble.add_model(kind.as_str(), Box::new(artifact.clone()));
        }
        ensemble.normalize_weights();

        if train.len() > OPTIMIZE_MIN_ROWS {
            let window = self.config.validation_rows.min(train.len());
            let validation = train.tail(window)?;
            ensemble.optimize_weights(&validation)?;
        }

        let predicted = ensemble.predict(test.len())?;
        let actual = test.close_prices()?;
        let record =
            evaluator.evaluate_predictions("ensemble", &predicted, &actual, ensemble.info())?;

        self.registry.save_ensemble_weights(symbol, &ensemble.weights())?;
        Ok(record.metrics.rmse)
    }
}

fn track_best(best: &mut Option<(String, f64)>, name: &str, rmse: f64) {
    let better = match best {
        Some((_, current)) => rmse < *current,
        None => true,
    };
    if better {
        *best = Some((name.to_string(), rmse));
    }
}
