//! Multivariate-autoregressive forecaster
//!
//! Jointly models closing price, volume and daily return as a vector
//! autoregression. The lag order is chosen by AIC; forecasts roll the
//! full vector forward but only the close component is reported.

use nalgebra::DMatrix;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::VarConfig;
use crate::data::TimeSeriesFrame;
use crate::error::{ForecastError, Result};
use crate::models::{Forecaster, ModelInfo, ModelKind};

/// Variables entering the system, close first so predictions can take
/// the first component.
const FEATURE_COUNT: usize = 3;

/// Fitted state of one lag order
#[derive(Debug, Clone, Serialize, Deserialize)]
struct VarFit {
    lag: usize,
    aic: f64,
    /// Per-equation coefficient rows laid out as
    /// [intercept, y_{t-1} block, ..., y_{t-lag} block]
    coeffs: Vec<Vec<f64>>,
    /// Trailing `lag` observation rows, oldest first
    recent_rows: Vec<Vec<f64>>,
}

/// VAR model over close, volume and daily return
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VarForecaster {
    config: VarConfig,
    fit: Option<VarFit>,
}

impl VarForecaster {
    /// Create an untrained model from its configuration
    pub fn new(config: VarConfig) -> Self {
        Self { config, fit: None }
    }

    fn fitted(&self) -> Result<&VarFit> {
        self.fit.as_ref().ok_or_else(|| {
            ForecastError::NotTrained("VAR model has not been trained".to_string())
        })
    }

    /// Assemble the [close, volume, daily_return] rows the system is fit on
    fn system_rows(&self, data: &TimeSeriesFrame) -> Result<Vec<Vec<f64>>> {
        let enriched = data.with_features()?;
        let volume_column = enriched
            .volume_column()
            .ok_or_else(|| {
                ForecastError::DataError(
                    "VAR requires a volume column alongside the closing price".to_string(),
                )
            })?
            .clone();

        let columns = [
            enriched.target_column().to_string(),
            volume_column,
            "daily_return".to_string(),
        ];
        let column_refs: Vec<&str> = columns.iter().map(String::as_str).collect();
        let mut rows = enriched.feature_matrix(&column_refs)?;

        // The first return is a fill artifact rather than an observation
        if !rows.is_empty() {
            rows.remove(0);
        }
        Ok(rows)
    }
}

impl Forecaster for VarForecaster {
    fn train(&mut self, data: &TimeSeriesFrame) -> Result<()> {
        let rows = self.system_rows(data)?;
        if rows.len() < self.config.min_observations {
            return Err(ForecastError::InsufficientData(format!(
                "VAR needs at least {} observations, got {}",
                self.config.min_observations,
                rows.len()
            )));
        }

        // AIC selection across candidate lags; candidates that cannot be
        // estimated are skipped.
        let mut best: Option<FitCandidate> = None;
        let mut best_aic = f64::INFINITY;
        let mut best_lag = 0;
        for lag in 1..=self.config.max_lags {
            if let Some(candidate) = fit_var(&rows, lag) {
                if candidate.aic < best_aic {
                    best_aic = candidate.aic;
                    best_lag = lag;
                    best = Some(candidate);
                }
            }
        }

        // Selection failure falls back to lag 1 before giving up
        let (lag, candidate) = match best {
            Some(candidate) => (best_lag, candidate),
            None => {
                warn!("VAR lag selection failed, falling back to lag 1");
                let fallback = fit_var(&rows, 1).ok_or_else(|| {
                    ForecastError::MathError(
                        "VAR coefficient estimation failed even at lag 1".to_string(),
                    )
                })?;
                (1, fallback)
            }
        };

        debug!(lag, aic = candidate.aic, "selected VAR lag");

        let recent_rows = rows[rows.len() - lag..].to_vec();
        self.fit = Some(VarFit {
            lag,
            aic: candidate.aic,
            coeffs: candidate.coeffs,
            recent_rows,
        });
        Ok(())
    }

    fn predict(&self, horizon: usize) -> Result<Vec<f64>> {
        let fit = self.fitted()?;

        let mut window = fit.recent_rows.clone();
        let mut predictions = Vec::with_capacity(horizon);

        for _ in 0..horizon {
            let mut next = vec![0.0; FEATURE_COUNT];
            for (slot, equation) in next.iter_mut().zip(fit.coeffs.iter()) {
                let mut value = equation[0];
                for back in 1..=fit.lag {
                    let lagged = &window[window.len() - back];
                    let offset = 1 + (back - 1) * FEATURE_COUNT;
                    for (variable, lagged_value) in lagged.iter().enumerate() {
                        value += equation[offset + variable] * lagged_value;
                    }
                }
                *slot = value;
            }

            predictions.push(next[0]);
            window.push(next);
        }

        Ok(predictions)
    }

    fn describe(&self) -> ModelInfo {
        let parameters = match &self.fit {
            Some(fit) => serde_json::json!({
                "lag": fit.lag,
                "aic": fit.aic,
                "features": ["close", "volume", "daily_return"],
            }),
            None => serde_json::json!({
                "max_lags": self.config.max_lags,
                "min_observations": self.config.min_observations,
            }),
        };
        ModelInfo::new(ModelKind::Var, self.fit.is_some(), parameters)
    }
}

struct FitCandidate {
    coeffs: Vec<Vec<f64>>,
    aic: f64,
}

/// Estimate a VAR(lag) by per-equation OLS with a shared regressor
/// matrix; `None` when the sample is too short or the normal equations
/// are singular.
fn fit_var(rows: &[Vec<f64>], lag: usize) -> Option<FitCandidate> {
    let n = rows.len();
    let regressors = 1 + FEATURE_COUNT * lag;
    if n <= lag + regressors + 1 {
        return None;
    }
    let effective_n = n - lag;

    let mut x_data = Vec::with_capacity(effective_n * regressors);
    let mut y_data = Vec::with_capacity(effective_n * FEATURE_COUNT);
    for t in lag..n {
        x_data.push(1.0);
        for back in 1..=lag {
            x_data.extend_from_slice(&rows[t - back]);
        }
        y_data.extend_from_slice(&rows[t]);
    }

    let x = DMatrix::from_row_slice(effective_n, regressors, &x_data);
    let y = DMatrix::from_row_slice(effective_n, FEATURE_COUNT, &y_data);

    let xtx = x.transpose() * &x;
    let xty = x.transpose() * &y;
    let xtx_inv = xtx.try_inverse()?;
    let beta = xtx_inv * xty;

    // Residual covariance drives the information criterion
    let residuals = &y - &x * &beta;
    let sigma = residuals.transpose() * &residuals / effective_n as f64;
    let det = sigma.determinant();
    if !det.is_finite() || det <= 0.0 {
        return None;
    }

    let params = (FEATURE_COUNT * regressors) as f64;
    let aic = det.ln() + 2.0 * params / effective_n as f64;
    if !aic.is_finite() {
        return None;
    }

    // beta columns are equations; store row-per-equation for the rollout
    let coeffs = (0..FEATURE_COUNT)
        .map(|equation| beta.column(equation).iter().cloned().collect())
        .collect();

    Some(FitCandidate { coeffs, aic })
}
