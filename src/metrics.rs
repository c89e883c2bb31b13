//! Accuracy metrics for evaluating forecasts against observed values

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{ForecastError, Result};

/// Forecast accuracy metrics
///
/// `mape` is `None` when any actual value is zero, because the percentage
/// error is undefined there; callers must treat a missing MAPE as "not
/// comparable", never as zero.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metrics {
    /// Root Mean Squared Error
    pub rmse: f64,
    /// Mean Absolute Error
    pub mae: f64,
    /// Mean Absolute Percentage Error, undefined when an actual value is zero
    pub mape: Option<f64>,
}

impl std::fmt::Display for Metrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Forecast Accuracy Metrics:")?;
        writeln!(f, "  RMSE: {:.4}", self.rmse)?;
        writeln!(f, "  MAE:  {:.4}", self.mae)?;
        match self.mape {
            Some(mape) => writeln!(f, "  MAPE: {:.4}%", mape)?,
            None => writeln!(f, "  MAPE: undefined (zero in actuals)")?,
        }
        Ok(())
    }
}

/// Compute accuracy metrics over an aligned (predicted, actual) pair.
///
/// The two series are truncated to the shorter length before comparison.
/// A zero-length overlap is an error, not a silent NaN.
pub fn forecast_accuracy(predicted: &[f64], actual: &[f64]) -> Result<Metrics> {
    let len = predicted.len().min(actual.len());
    if len == 0 {
        return Err(ForecastError::DataError(
            "Cannot compute metrics over a zero-length overlap".to_string(),
        ));
    }

    let predicted = &predicted[..len];
    let actual = &actual[..len];
    let n = len as f64;

    let mut abs_sum = 0.0;
    let mut sq_sum = 0.0;
    for (p, a) in predicted.iter().zip(actual.iter()) {
        let err = a - p;
        abs_sum += err.abs();
        sq_sum += err * err;
    }

    let mae = abs_sum / n;
    let rmse = (sq_sum / n).sqrt();

    // MAPE divides by the actual value, so a zero actual makes it undefined
    let mape = if actual.iter().any(|&a| a == 0.0) {
        warn!("MAPE undefined: actual series contains zero values");
        None
    } else {
        let pct_sum: f64 = predicted
            .iter()
            .zip(actual.iter())
            .map(|(p, a)| ((a - p) / a).abs())
            .sum();
        Some(pct_sum / n * 100.0)
    };

    Ok(Metrics { rmse, mae, mape })
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    #[test]
    fn computes_rmse_mae_mape() {
        let actual = vec![10.0, 20.0, 30.0, 40.0, 50.0];
        let predicted = vec![12.0, 18.0, 33.0, 37.0, 52.0];

        let metrics = forecast_accuracy(&predicted, &actual).unwrap();
        assert_approx_eq!(metrics.mae, 2.4, 1e-10);
        assert_approx_eq!(metrics.rmse, (30.0f64 / 5.0).sqrt(), 1e-10);

        let mape = metrics.mape.unwrap();
        assert!(mape > 0.0 && mape < 15.0);
    }

    #[test]
    fn perfect_forecast_is_zero_error() {
        let series = vec![5.0, 5.0, 5.0];
        let metrics = forecast_accuracy(&series, &series).unwrap();
        assert_approx_eq!(metrics.rmse, 0.0);
        assert_approx_eq!(metrics.mae, 0.0);
        assert_approx_eq!(metrics.mape.unwrap(), 0.0);
    }

    #[test]
    fn truncates_to_shorter_series() {
        let actual = vec![1.0, 2.0, 3.0, 4.0];
        let predicted = vec![1.0, 2.0];

        let metrics = forecast_accuracy(&predicted, &actual).unwrap();
        assert_approx_eq!(metrics.mae, 0.0);
    }

    #[test]
    fn zero_overlap_is_an_error() {
        let result = forecast_accuracy(&[], &[1.0, 2.0]);
        assert!(result.is_err());
    }

    #[test]
    fn mape_flagged_when_actual_contains_zero() {
        let actual = vec![0.0, 2.0, 4.0];
        let predicted = vec![1.0, 2.0, 4.0];

        let metrics = forecast_accuracy(&predicted, &actual).unwrap();
        assert!(metrics.mape.is_none());
        assert!(metrics.rmse > 0.0);
    }
}
