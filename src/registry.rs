//! Filesystem registry for trained model artifacts
//!
//! Artifacts live under `{root}/{symbol}/` with one file per model kind:
//! the sequence-learning variants as a native binary weight dump, the
//! classical variants as generic JSON. Every save also writes a metadata
//! sidecar. Loading reconstructs a ready-to-predict model and never
//! retrains.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::config::ModelConfigs;
use crate::data::TimeSeriesFrame;
use crate::error::{ForecastError, Result};
use crate::metrics::Metrics;
use crate::models::{
    ArimaForecaster, CellKind, Forecaster, ModelInfo, ModelKind, MovingAverageForecaster,
    RecurrentForecaster, VarForecaster,
};

/// Extension of the native binary weight dump
const NATIVE_EXTENSION: &str = "bin";
/// Extension of the generic serialized form
const GENERIC_EXTENSION: &str = "json";

/// Concrete model representation the registry can persist. Implements
/// [`Forecaster`] by delegation, so callers can treat an artifact as any
/// other model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ModelArtifact {
    MovingAverage(MovingAverageForecaster),
    Arima(ArimaForecaster),
    Var(VarForecaster),
    Recurrent(RecurrentForecaster),
}

impl ModelArtifact {
    /// Build an untrained artifact of the given kind from the
    /// configuration bundle.
    pub fn build(kind: ModelKind, configs: &ModelConfigs) -> Self {
        match kind {
            ModelKind::MovingAverage => ModelArtifact::MovingAverage(
                MovingAverageForecaster::new(configs.moving_average.clone()),
            ),
            ModelKind::Arima => ModelArtifact::Arima(ArimaForecaster::new(configs.arima.clone())),
            ModelKind::Var => ModelArtifact::Var(VarForecaster::new(configs.var.clone())),
            ModelKind::Lstm => ModelArtifact::Recurrent(RecurrentForecaster::new(
                CellKind::Lstm,
                configs.recurrent.clone(),
            )),
            ModelKind::Gru => ModelArtifact::Recurrent(RecurrentForecaster::new(
                CellKind::Gru,
                configs.recurrent.clone(),
            )),
        }
    }

    /// The kind this artifact persists as
    pub fn kind(&self) -> ModelKind {
        match self {
            ModelArtifact::MovingAverage(_) => ModelKind::MovingAverage,
            ModelArtifact::Arima(_) => ModelKind::Arima,
            ModelArtifact::Var(_) => ModelKind::Var,
            ModelArtifact::Recurrent(model) => match model.cell_kind() {
                CellKind::Lstm => ModelKind::Lstm,
                CellKind::Gru => ModelKind::Gru,
            },
        }
    }

    /// Move the artifact into a boxed trait object
    pub fn into_forecaster(self) -> Box<dyn Forecaster> {
        match self {
            ModelArtifact::MovingAverage(model) => Box::new(model),
            ModelArtifact::Arima(model) => Box::new(model),
            ModelArtifact::Var(model) => Box::new(model),
            ModelArtifact::Recurrent(model) => Box::new(model),
        }
    }

    fn as_forecaster(&self) -> &dyn Forecaster {
        match self {
            ModelArtifact::MovingAverage(model) => model,
            ModelArtifact::Arima(model) => model,
            ModelArtifact::Var(model) => model,
            ModelArtifact::Recurrent(model) => model,
        }
    }

    fn as_forecaster_mut(&mut self) -> &mut dyn Forecaster {
        match self {
            ModelArtifact::MovingAverage(model) => model,
            ModelArtifact::Arima(model) => model,
            ModelArtifact::Var(model) => model,
            ModelArtifact::Recurrent(model) => model,
        }
    }
}

impl Forecaster for ModelArtifact {
    fn train(&mut self, data: &TimeSeriesFrame) -> Result<()> {
        self.as_forecaster_mut().train(data)
    }

    fn predict(&self, horizon: usize) -> Result<Vec<f64>> {
        self.as_forecaster().predict(horizon)
    }

    fn evaluate(&self, test_data: &TimeSeriesFrame) -> Result<Metrics> {
        self.as_forecaster().evaluate(test_data)
    }

    fn describe(&self) -> ModelInfo {
        self.as_forecaster().describe()
    }
}

/// Metadata saved alongside every artifact
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactMetadata {
    pub symbol: String,
    pub kind: ModelKind,
    pub saved_at: DateTime<Utc>,
    /// Hyperparameters and training-derived quantities at save time
    pub parameters: serde_json::Value,
}

/// Optimized ensemble weights persisted per symbol
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnsembleWeightsArtifact {
    pub symbol: String,
    pub saved_at: DateTime<Utc>,
    pub weights: BTreeMap<String, f64>,
}

const ENSEMBLE_WEIGHTS_FILE: &str = "ensemble.json";

/// Filesystem-backed model registry
#[derive(Debug, Clone)]
pub struct ModelRegistry {
    root: PathBuf,
}

impl ModelRegistry {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Persist a trained artifact, overwriting any previous save of the
    /// same (symbol, kind). Returns the artifact path.
    pub fn save(&self, symbol: &str, artifact: &ModelArtifact) -> Result<PathBuf> {
        let info = artifact.describe();
        if !info.is_trained {
            return Err(ForecastError::NotTrained(format!(
                "Refusing to save an untrained {} model",
                info.name
            )));
        }

        let dir = self.root.join(symbol);
        fs::create_dir_all(&dir)?;

        let kind = artifact.kind();
        let path = match artifact {
            ModelArtifact::Recurrent(model) => {
                let path = dir.join(format!("{}.{}", kind, NATIVE_EXTENSION));
                let encoded = bincode::serialize(model)?;
                fs::write(&path, encoded)?;
                path
            }
            classical => {
                let path = dir.join(format!("{}.{}", kind, GENERIC_EXTENSION));
                let encoded = serde_json::to_vec(classical)?;
                fs::write(&path, encoded)?;
                path
            }
        };

        let metadata = ArtifactMetadata {
            symbol: symbol.to_string(),
            kind,
            saved_at: Utc::now(),
            parameters: info.parameters,
        };
        let sidecar = self.metadata_path(symbol, kind);
        fs::write(&sidecar, serde_json::to_vec_pretty(&metadata)?)?;

        info!(symbol, model = %kind, path = %path.display(), "model saved");
        Ok(path)
    }

    /// Load a saved artifact, trying the native binary form before the
    /// generic form.
    pub fn load(&self, symbol: &str, kind: ModelKind) -> Result<ModelArtifact> {
        if kind.uses_native_format() {
            let native = self.artifact_path(symbol, kind, NATIVE_EXTENSION);
            if native.exists() {
                let bytes = fs::read(&native)?;
                let model: RecurrentForecaster = bincode::deserialize(&bytes)?;
                info!(symbol, model = %kind, "model loaded from native artifact");
                return Ok(ModelArtifact::Recurrent(model));
            }
        }

        let generic = self.artifact_path(symbol, kind, GENERIC_EXTENSION);
        if generic.exists() {
            let bytes = fs::read(&generic)?;
            let artifact: ModelArtifact = serde_json::from_slice(&bytes)?;
            info!(symbol, model = %kind, "model loaded from generic artifact");
            return Ok(artifact);
        }

        Err(ForecastError::ModelNotFound(format!(
            "No saved {} model for {}",
            kind, symbol
        )))
    }

    /// Read the metadata sidecar for a saved artifact
    pub fn metadata(&self, symbol: &str, kind: ModelKind) -> Result<ArtifactMetadata> {
        let path = self.metadata_path(symbol, kind);
        if !path.exists() {
            return Err(ForecastError::ModelNotFound(format!(
                "No metadata for {} model of {}",
                kind, symbol
            )));
        }
        let bytes = fs::read(&path)?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// Kinds with a saved artifact for the symbol, sorted by name
    pub fn saved_kinds(&self, symbol: &str) -> Result<Vec<ModelKind>> {
        let dir = self.root.join(symbol);
        if !dir.exists() {
            return Ok(Vec::new());
        }

        let mut kinds = Vec::new();
        for entry in fs::read_dir(&dir)? {
            let path = entry?.path();
            let stem = match path.file_stem().and_then(|s| s.to_str()) {
                Some(stem) => stem,
                None => continue,
            };
            if let Ok(kind) = ModelKind::from_name(stem) {
                if !kinds.contains(&kind) {
                    kinds.push(kind);
                }
            }
        }
        kinds.sort_by_key(|k| k.as_str());
        Ok(kinds)
    }

    /// Persist optimized ensemble weights for a symbol (full overwrite)
    pub fn save_ensemble_weights(
        &self,
        symbol: &str,
        weights: &BTreeMap<String, f64>,
    ) -> Result<PathBuf> {
        let dir = self.root.join(symbol);
        fs::create_dir_all(&dir)?;

        let artifact = EnsembleWeightsArtifact {
            symbol: symbol.to_string(),
            saved_at: Utc::now(),
            weights: weights.clone(),
        };
        let path = dir.join(ENSEMBLE_WEIGHTS_FILE);
        fs::write(&path, serde_json::to_vec_pretty(&artifact)?)?;

        info!(symbol, "ensemble weights saved");
        Ok(path)
    }

    /// Stored ensemble weights, if any were saved for the symbol
    pub fn ensemble_weights(&self, symbol: &str) -> Result<Option<BTreeMap<String, f64>>> {
        let path = self.root.join(symbol).join(ENSEMBLE_WEIGHTS_FILE);
        if !path.exists() {
            return Ok(None);
        }
        let bytes = fs::read(&path)?;
        let artifact: EnsembleWeightsArtifact = serde_json::from_slice(&bytes)?;
        Ok(Some(artifact.weights))
    }

    fn artifact_path(&self, symbol: &str, kind: ModelKind, extension: &str) -> PathBuf {
        self.root.join(symbol).join(format!("{}.{}", kind, extension))
    }

    fn metadata_path(&self, symbol: &str, kind: ModelKind) -> PathBuf {
        self.root.join(symbol).join(format!("{}.meta.json", kind))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MovingAverageConfig;
    use chrono::{Duration, TimeZone, Utc};
    use tempfile::tempdir;

    fn frame_from(values: &[f64]) -> TimeSeriesFrame {
        let start = Utc.with_ymd_and_hms(2023, 1, 1, 0, 0, 0).unwrap();
        let dates = (0..values.len())
            .map(|i| start + Duration::days(i as i64))
            .collect();
        TimeSeriesFrame::new(dates, values.to_vec()).unwrap()
    }

    fn trained_moving_average() -> ModelArtifact {
        let mut artifact = ModelArtifact::MovingAverage(MovingAverageForecaster::new(
            MovingAverageConfig::default().with_window_size(3),
        ));
        artifact
            .train(&frame_from(&[10.0, 20.0, 30.0, 40.0, 50.0]))
            .unwrap();
        artifact
    }

    #[test]
    fn test_build_reports_matching_kind() {
        let configs = ModelConfigs::default();
        for kind in ModelKind::all() {
            let artifact = ModelArtifact::build(kind, &configs);
            assert_eq!(artifact.kind(), kind);
            assert!(!artifact.describe().is_trained);
        }
    }

    #[test]
    fn test_classical_round_trip_is_exact() {
        let dir = tempdir().unwrap();
        let registry = ModelRegistry::new(dir.path());

        let artifact = trained_moving_average();
        let expected = artifact.predict(4).unwrap();

        let path = registry.save("AAPL", &artifact).unwrap();
        assert_eq!(path, dir.path().join("AAPL").join("moving_average.json"));

        let restored = registry.load("AAPL", ModelKind::MovingAverage).unwrap();
        assert_eq!(restored.predict(4).unwrap(), expected);
    }

    #[test]
    fn test_metadata_sidecar_is_written() {
        let dir = tempdir().unwrap();
        let registry = ModelRegistry::new(dir.path());
        registry.save("AAPL", &trained_moving_average()).unwrap();

        let metadata = registry
            .metadata("AAPL", ModelKind::MovingAverage)
            .unwrap();
        assert_eq!(metadata.symbol, "AAPL");
        assert_eq!(metadata.kind, ModelKind::MovingAverage);
        assert_eq!(metadata.parameters["window_size"], 3);
    }

    #[test]
    fn test_missing_artifact_is_model_not_found() {
        let dir = tempdir().unwrap();
        let registry = ModelRegistry::new(dir.path());
        assert!(matches!(
            registry.load("AAPL", ModelKind::Arima),
            Err(ForecastError::ModelNotFound(_))
        ));
    }

    #[test]
    fn test_untrained_model_is_not_saved() {
        let dir = tempdir().unwrap();
        let registry = ModelRegistry::new(dir.path());
        let artifact = ModelArtifact::build(ModelKind::Arima, &ModelConfigs::default());
        assert!(matches!(
            registry.save("AAPL", &artifact),
            Err(ForecastError::NotTrained(_))
        ));
    }

    #[test]
    fn test_save_overwrites_previous_artifact() {
        let dir = tempdir().unwrap();
        let registry = ModelRegistry::new(dir.path());

        registry.save("AAPL", &trained_moving_average()).unwrap();

        let mut second = ModelArtifact::MovingAverage(MovingAverageForecaster::new(
            MovingAverageConfig::default().with_window_size(2),
        ));
        second.train(&frame_from(&[1.0, 2.0, 3.0, 4.0])).unwrap();
        registry.save("AAPL", &second).unwrap();

        let restored = registry.load("AAPL", ModelKind::MovingAverage).unwrap();
        assert_eq!(restored.predict(1).unwrap(), second.predict(1).unwrap());
    }

    #[test]
    fn test_saved_kinds_lists_artifacts() {
        let dir = tempdir().unwrap();
        let registry = ModelRegistry::new(dir.path());
        assert!(registry.saved_kinds("AAPL").unwrap().is_empty());

        registry.save("AAPL", &trained_moving_average()).unwrap();
        assert_eq!(
            registry.saved_kinds("AAPL").unwrap(),
            vec![ModelKind::MovingAverage]
        );
    }

    #[test]
    fn test_ensemble_weights_round_trip() {
        let dir = tempdir().unwrap();
        let registry = ModelRegistry::new(dir.path());
        assert!(registry.ensemble_weights("AAPL").unwrap().is_none());

        let mut weights = BTreeMap::new();
        weights.insert("arima".to_string(), 0.7);
        weights.insert("var".to_string(), 0.3);
        registry.save_ensemble_weights("AAPL", &weights).unwrap();

        assert_eq!(registry.ensemble_weights("AAPL").unwrap(), Some(weights));
        // the weights file is not mistaken for a model artifact
        assert!(registry.saved_kinds("AAPL").unwrap().is_empty());
    }
}
