//! Weighted ensemble over independently trained forecasters
//!
//! The combiner holds named [`Forecaster`] members with per-member
//! weights. Prediction is a weighted average that tolerates individual
//! member failures; weight optimization is a constrained search over the
//! validation window that never leaves the weights worse than the
//! equal-weight starting point.

use std::collections::{BTreeMap, HashMap};

use tracing::{debug, warn};

use crate::data::TimeSeriesFrame;
use crate::error::{ForecastError, Result};
use crate::metrics::{forecast_accuracy, Metrics};
use crate::models::Forecaster;

/// Coordinate-descent sweeps before the search gives up
const MAX_SWEEPS: usize = 60;
/// First per-coordinate step size; halved whenever a sweep stalls
const INITIAL_STEP: f64 = 0.25;
/// Search stops once the step size shrinks below this
const MIN_STEP: f64 = 1e-3;

struct Member {
    model: Box<dyn Forecaster>,
    weight: f64,
}

/// Named forecasters combined by weighted average
#[derive(Default)]
pub struct EnsembleCombiner {
    members: BTreeMap<String, Member>,
}

impl EnsembleCombiner {
    pub fn new() -> Self {
        Self {
            members: BTreeMap::new(),
        }
    }

    /// Add a member with the default weight of 1.0
    pub fn add_model(&mut self, name: impl Into<String>, model: Box<dyn Forecaster>) {
        self.add_model_with_weight(name, model, 1.0);
    }

    /// Add a member with an explicit weight; re-adding a name replaces
    /// the previous member.
    pub fn add_model_with_weight(
        &mut self,
        name: impl Into<String>,
        model: Box<dyn Forecaster>,
        weight: f64,
    ) {
        self.members.insert(name.into(), Member { model, weight });
    }

    /// Replace all weights; the key set must match the member set exactly
    pub fn set_weights(&mut self, weights: &HashMap<String, f64>) -> Result<()> {
        let mut expected: Vec<&String> = self.members.keys().collect();
        let mut provided: Vec<&String> = weights.keys().collect();
        expected.sort();
        provided.sort();
        if expected != provided {
            return Err(ForecastError::Configuration(
                "Weight keys must match model names".to_string(),
            ));
        }

        for (name, member) in self.members.iter_mut() {
            member.weight = weights[name];
        }
        Ok(())
    }

    /// Rescale weights to sum to one; a non-positive total leaves the
    /// weights untouched.
    pub fn normalize_weights(&mut self) {
        let total: f64 = self.members.values().map(|m| m.weight).sum();
        if total > 0.0 {
            for member in self.members.values_mut() {
                member.weight /= total;
            }
        }
    }

    /// Current weights keyed by member name
    pub fn weights(&self) -> BTreeMap<String, f64> {
        self.members
            .iter()
            .map(|(name, member)| (name.clone(), member.weight))
            .collect()
    }

    /// Member names in iteration order
    pub fn member_names(&self) -> Vec<String> {
        self.members.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Ensemble description in record form
    pub fn info(&self) -> serde_json::Value {
        serde_json::json!({
            "model_type": "Ensemble",
            "models": self.member_names(),
            "weights": self.weights(),
            "model_count": self.len(),
        })
    }

    /// Weighted-average forecast across the members.
    ///
    /// A failing member is logged and skipped; a member returning fewer
    /// than `horizon` values is padded by repeating its last value. The
    /// call fails only when every member fails.
    pub fn predict(&self, horizon: usize) -> Result<Vec<f64>> {
        if self.members.is_empty() {
            return Err(ForecastError::Configuration(
                "No models added to the ensemble".to_string(),
            ));
        }

        let mut combined = vec![0.0; horizon];
        let mut total_weight = 0.0;
        let mut contributed = 0usize;

        for (name, values) in self.member_predictions(horizon) {
            let weight = self.members[&name].weight;
            for (slot, value) in combined.iter_mut().zip(values.iter()) {
                *slot += weight * value;
            }
            total_weight += weight;
            contributed += 1;
        }

        if contributed == 0 {
            return Err(ForecastError::NoValidPredictions(
                "No valid predictions from any model".to_string(),
            ));
        }

        if total_weight > 0.0 {
            for slot in combined.iter_mut() {
                *slot /= total_weight;
            }
        }

        Ok(combined)
    }

    /// Score the ensemble against a held-out frame
    pub fn evaluate(&self, test_data: &TimeSeriesFrame) -> Result<Metrics> {
        let actual = test_data.close_prices()?;
        let predicted = self.predict(actual.len())?;
        forecast_accuracy(&predicted, &actual)
    }

    /// Fit the weights to a validation frame by minimizing ensemble RMSE.
    ///
    /// Starts from equal weights and only ever accepts improvements, so
    /// the stored weights are never worse on the validation window than
    /// the equal-weight combination. Returns the final weights.
    pub fn optimize_weights(
        &mut self,
        validation_data: &TimeSeriesFrame,
    ) -> Result<BTreeMap<String, f64>> {
        if self.members.is_empty() {
            return Err(ForecastError::Configuration(
                "No models added to the ensemble".to_string(),
            ));
        }

        let actual = validation_data.close_prices()?;
        if actual.is_empty() {
            return Err(ForecastError::InsufficientData(
                "Validation frame is empty".to_string(),
            ));
        }

        let predictions = self.member_predictions(actual.len());
        if predictions.is_empty() {
            return Err(ForecastError::NoValidPredictions(
                "No valid predictions from any model".to_string(),
            ));
        }

        let names: Vec<String> = predictions.iter().map(|(name, _)| name.clone()).collect();
        let series: Vec<&[f64]> = predictions.iter().map(|(_, p)| p.as_slice()).collect();

        let objective = |weights: &[f64]| ensemble_rmse(weights, &series, &actual);

        // Constrained coordinate descent with keep-best acceptance
        let mut best = vec![1.0 / names.len() as f64; names.len()];
        let mut best_rmse = objective(&best);
        let mut step = INITIAL_STEP;

        for _ in 0..MAX_SWEEPS {
            let mut improved = false;
            for coordinate in 0..best.len() {
                for direction in [step, -step] {
                    let mut candidate = best.clone();
                    candidate[coordinate] = (candidate[coordinate] + direction).clamp(0.0, 1.0);
                    let rmse = objective(&candidate);
                    if rmse < best_rmse {
                        best = candidate;
                        best_rmse = rmse;
                        improved = true;
                    }
                }
            }
            if !improved {
                step /= 2.0;
                if step < MIN_STEP {
                    break;
                }
            }
        }

        debug!(rmse = best_rmse, "optimized ensemble weights");

        // Renormalize and store; a degenerate all-zero result falls back
        // to equal weights.
        let total: f64 = best.iter().sum();
        let final_weights: Vec<f64> = if total > 0.0 {
            best.iter().map(|w| w / total).collect()
        } else {
            vec![1.0 / names.len() as f64; names.len()]
        };

        for (name, weight) in names.iter().zip(final_weights.iter()) {
            if let Some(member) = self.members.get_mut(name) {
                member.weight = *weight;
            }
        }

        Ok(self.weights())
    }

    /// Per-member predictions padded to `horizon`; failures are skipped
    fn member_predictions(&self, horizon: usize) -> Vec<(String, Vec<f64>)> {
        let mut predictions = Vec::with_capacity(self.members.len());
        for (name, member) in &self.members {
            match member.model.predict(horizon) {
                Ok(values) if values.is_empty() && horizon > 0 => {
                    warn!(model = name.as_str(), "member returned no predictions");
                }
                Ok(mut values) => {
                    if values.len() > horizon {
                        values.truncate(horizon);
                    } else if values.len() < horizon {
                        let last = values[values.len() - 1];
                        values.resize(horizon, last);
                    }
                    predictions.push((name.clone(), values));
                }
                Err(e) => {
                    warn!(model = name.as_str(), error = %e, "member prediction failed");
                }
            }
        }
        predictions
    }
}

/// RMSE of the weighted combination against the actual values; weights
/// are normalized inside so the search space is scale-free.
fn ensemble_rmse(weights: &[f64], series: &[&[f64]], actual: &[f64]) -> f64 {
    let total: f64 = weights.iter().sum();
    if total <= 0.0 {
        return f64::INFINITY;
    }

    let mut sum_squared = 0.0;
    for (i, &target) in actual.iter().enumerate() {
        let mut combined = 0.0;
        for (weight, values) in weights.iter().zip(series.iter()) {
            combined += weight * values[i];
        }
        combined /= total;
        let diff = target - combined;
        sum_squared += diff * diff;
    }
    (sum_squared / actual.len() as f64).sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ModelInfo, ModelKind};
    use assert_approx_eq::assert_approx_eq;
    use chrono::{Duration, TimeZone, Utc};

    /// Member that always predicts the same value at every step
    struct ConstantModel(f64);

    impl Forecaster for ConstantModel {
        fn train(&mut self, _data: &TimeSeriesFrame) -> Result<()> {
            Ok(())
        }

        fn predict(&self, horizon: usize) -> Result<Vec<f64>> {
            Ok(vec![self.0; horizon])
        }

        fn describe(&self) -> ModelInfo {
            ModelInfo::new(ModelKind::MovingAverage, true, serde_json::json!({}))
        }
    }

    /// Member that can only see `len` steps ahead
    struct ShortModel {
        value: f64,
        len: usize,
    }

    impl Forecaster for ShortModel {
        fn train(&mut self, _data: &TimeSeriesFrame) -> Result<()> {
            Ok(())
        }

        fn predict(&self, horizon: usize) -> Result<Vec<f64>> {
            Ok(vec![self.value; horizon.min(self.len)])
        }

        fn describe(&self) -> ModelInfo {
            ModelInfo::new(ModelKind::MovingAverage, true, serde_json::json!({}))
        }
    }

    /// Member whose predictions always fail
    struct BrokenModel;

    impl Forecaster for BrokenModel {
        fn train(&mut self, _data: &TimeSeriesFrame) -> Result<()> {
            Ok(())
        }

        fn predict(&self, _horizon: usize) -> Result<Vec<f64>> {
            Err(ForecastError::NotTrained("always broken".to_string()))
        }

        fn describe(&self) -> ModelInfo {
            ModelInfo::new(ModelKind::MovingAverage, false, serde_json::json!({}))
        }
    }

    fn frame_from(values: &[f64]) -> TimeSeriesFrame {
        let start = Utc.with_ymd_and_hms(2023, 1, 1, 0, 0, 0).unwrap();
        let dates = (0..values.len())
            .map(|i| start + Duration::days(i as i64))
            .collect();
        TimeSeriesFrame::new(dates, values.to_vec()).unwrap()
    }

    #[test]
    fn test_equal_weights_average_members() {
        let mut ensemble = EnsembleCombiner::new();
        ensemble.add_model_with_weight("a", Box::new(ConstantModel(10.0)), 0.5);
        ensemble.add_model_with_weight("b", Box::new(ConstantModel(20.0)), 0.5);

        assert_eq!(ensemble.predict(2).unwrap(), vec![15.0, 15.0]);
    }

    #[test]
    fn test_weighted_average_respects_weights() {
        let mut ensemble = EnsembleCombiner::new();
        ensemble.add_model_with_weight("a", Box::new(ConstantModel(10.0)), 3.0);
        ensemble.add_model_with_weight("b", Box::new(ConstantModel(20.0)), 1.0);

        // (3*10 + 1*20) / 4
        let predictions = ensemble.predict(3).unwrap();
        for value in predictions {
            assert_approx_eq!(value, 12.5, 1e-12);
        }
    }

    #[test]
    fn test_failed_member_is_skipped() {
        let mut ensemble = EnsembleCombiner::new();
        ensemble.add_model("good", Box::new(ConstantModel(10.0)));
        ensemble.add_model("broken", Box::new(BrokenModel));

        assert_eq!(ensemble.predict(2).unwrap(), vec![10.0, 10.0]);
    }

    #[test]
    fn test_all_members_failing_is_an_error() {
        let mut ensemble = EnsembleCombiner::new();
        ensemble.add_model("b1", Box::new(BrokenModel));
        ensemble.add_model("b2", Box::new(BrokenModel));

        assert!(matches!(
            ensemble.predict(2),
            Err(ForecastError::NoValidPredictions(_))
        ));
    }

    #[test]
    fn test_empty_ensemble_is_an_error() {
        let ensemble = EnsembleCombiner::new();
        assert!(matches!(
            ensemble.predict(2),
            Err(ForecastError::Configuration(_))
        ));
    }

    #[test]
    fn test_short_member_is_padded_with_its_last_value() {
        let mut ensemble = EnsembleCombiner::new();
        ensemble.add_model("full", Box::new(ConstantModel(10.0)));
        ensemble.add_model("short", Box::new(ShortModel { value: 30.0, len: 2 }));

        // Both contribute everywhere thanks to edge padding
        assert_eq!(ensemble.predict(4).unwrap(), vec![20.0; 4]);
    }

    #[test]
    fn test_set_weights_rejects_mismatched_keys() {
        let mut ensemble = EnsembleCombiner::new();
        ensemble.add_model("a", Box::new(ConstantModel(1.0)));
        ensemble.add_model("b", Box::new(ConstantModel(2.0)));

        let mut wrong = HashMap::new();
        wrong.insert("a".to_string(), 0.5);
        wrong.insert("c".to_string(), 0.5);
        assert!(matches!(
            ensemble.set_weights(&wrong),
            Err(ForecastError::Configuration(_))
        ));

        let mut right = HashMap::new();
        right.insert("a".to_string(), 0.7);
        right.insert("b".to_string(), 0.3);
        ensemble.set_weights(&right).unwrap();
        assert_approx_eq!(ensemble.weights()["a"], 0.7, 1e-12);
    }

    #[test]
    fn test_normalize_weights_sums_to_one() {
        let mut ensemble = EnsembleCombiner::new();
        ensemble.add_model_with_weight("a", Box::new(ConstantModel(1.0)), 2.0);
        ensemble.add_model_with_weight("b", Box::new(ConstantModel(2.0)), 6.0);

        ensemble.normalize_weights();
        let weights = ensemble.weights();
        assert_approx_eq!(weights["a"], 0.25, 1e-12);
        assert_approx_eq!(weights["b"], 0.75, 1e-12);
        assert_approx_eq!(weights.values().sum::<f64>(), 1.0, 1e-12);
    }

    #[test]
    fn test_normalize_ignores_non_positive_total() {
        let mut ensemble = EnsembleCombiner::new();
        ensemble.add_model_with_weight("a", Box::new(ConstantModel(1.0)), 0.0);
        ensemble.add_model_with_weight("b", Box::new(ConstantModel(2.0)), 0.0);

        ensemble.normalize_weights();
        assert_eq!(ensemble.weights()["a"], 0.0);
        assert_eq!(ensemble.weights()["b"], 0.0);
    }

    #[test]
    fn test_optimized_weights_never_beat_by_equal_weights() {
        // One member is exactly right, the other is far off; the search
        // should shift weight toward the accurate member.
        let actual = vec![10.0; 20];
        let validation = frame_from(&actual);

        let mut ensemble = EnsembleCombiner::new();
        ensemble.add_model("accurate", Box::new(ConstantModel(10.0)));
        ensemble.add_model("biased", Box::new(ConstantModel(40.0)));

        let equal_rmse = {
            let series: Vec<Vec<f64>> = vec![vec![10.0; 20], vec![40.0; 20]];
            let refs: Vec<&[f64]> = series.iter().map(|s| s.as_slice()).collect();
            ensemble_rmse(&[0.5, 0.5], &refs, &actual)
        };

        let weights = ensemble.optimize_weights(&validation).unwrap();
        assert_approx_eq!(weights.values().sum::<f64>(), 1.0, 1e-9);
        assert!(weights["accurate"] > weights["biased"]);

        let optimized_rmse = {
            let series: Vec<Vec<f64>> = vec![vec![10.0; 20], vec![40.0; 20]];
            let refs: Vec<&[f64]> = series.iter().map(|s| s.as_slice()).collect();
            ensemble_rmse(
                &[weights["accurate"], weights["biased"]],
                &refs,
                &actual,
            )
        };
        assert!(optimized_rmse <= equal_rmse + 1e-12);
    }

    #[test]
    fn test_evaluate_scores_the_combination() {
        let mut ensemble = EnsembleCombiner::new();
        ensemble.add_model("a", Box::new(ConstantModel(10.0)));
        ensemble.add_model("b", Box::new(ConstantModel(20.0)));

        let metrics = ensemble.evaluate(&frame_from(&[15.0; 10])).unwrap();
        assert_approx_eq!(metrics.rmse, 0.0, 1e-12);
        assert_approx_eq!(metrics.mae, 0.0, 1e-12);
    }

    #[test]
    fn test_info_reports_members_and_weights() {
        let mut ensemble = EnsembleCombiner::new();
        ensemble.add_model("arima", Box::new(ConstantModel(1.0)));
        ensemble.add_model("lstm", Box::new(ConstantModel(2.0)));

        let info = ensemble.info();
        assert_eq!(info["model_type"], "Ensemble");
        assert_eq!(info["model_count"], 2);
        assert_eq!(info["models"][0], "arima");
    }
}
