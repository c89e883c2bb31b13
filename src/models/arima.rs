//! Autoregressive-integrated forecaster
//!
//! Runs an augmented Dickey-Fuller test on the raw closing prices,
//! differences once when the series is non-stationary, then grid-searches
//! the (p, d, q) order by AIC. Estimation is ordinary least squares for
//! pure AR orders, an iterative residual regression for pure MA orders
//! and two-step Hannan-Rissanen for mixed orders. Forecasts are always
//! integrated back to price level.

use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};
use statrs::statistics::Statistics;
use tracing::debug;

use crate::config::ArimaConfig;
use crate::data::TimeSeriesFrame;
use crate::error::{ForecastError, Result};
use crate::models::{Forecaster, ModelInfo, ModelKind};
use crate::stationarity::adf_test;

/// Smallest series the order search can do anything useful with
const MIN_OBSERVATIONS: usize = 20;

/// Fitted state, produced by the grid search
#[derive(Debug, Clone, Serialize, Deserialize)]
struct ArimaFit {
    /// Selected (p, d, q) order
    order: (usize, usize, usize),
    /// Whether the raw series was differenced before the search
    differenced: bool,
    ar_coeffs: Vec<f64>,
    ma_coeffs: Vec<f64>,
    constant: f64,
    /// Residual variance of the winning candidate
    sigma2: f64,
    aic: f64,
    /// Last `p` values of the fully differenced series, oldest first
    recent_values: Vec<f64>,
    /// Last `q` residuals of the winning candidate, oldest first
    recent_residuals: Vec<f64>,
    /// Last value of each intermediate difference level, innermost first;
    /// applied in order they undo the differencing down to price level
    anchors: Vec<f64>,
}

/// ARIMA model with automatic order selection
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArimaForecaster {
    config: ArimaConfig,
    fit: Option<ArimaFit>,
}

impl ArimaForecaster {
    /// Create an untrained model from its configuration
    pub fn new(config: ArimaConfig) -> Self {
        Self { config, fit: None }
    }

    fn fitted(&self) -> Result<&ArimaFit> {
        self.fit.as_ref().ok_or_else(|| {
            ForecastError::NotTrained("ARIMA model has not been trained".to_string())
        })
    }
}

impl Forecaster for ArimaForecaster {
    fn train(&mut self, data: &TimeSeriesFrame) -> Result<()> {
        let prices = data.close_prices()?;
        if prices.len() < MIN_OBSERVATIONS {
            return Err(ForecastError::InsufficientData(format!(
                "ARIMA needs at least {} observations, got {}",
                MIN_OBSERVATIONS,
                prices.len()
            )));
        }

        // A non-stationary (or inconclusive) series is differenced once
        // before the order search, mirroring the usual unit-root handling.
        let adf = adf_test(&prices, None);
        let differenced = !adf.is_stationary;
        let working = if differenced {
            difference(&prices, 1)
        } else {
            prices.clone()
        };

        let mut best: Option<(usize, usize, usize, FitOutcome)> = None;
        let mut best_aic = f64::INFINITY;
        for p in 0..=self.config.max_p {
            for d in 0..=self.config.max_d {
                for q in 0..=self.config.max_q {
                    if let Some(outcome) = fit_candidate(&working, p, d, q) {
                        if outcome.aic < best_aic {
                            best_aic = outcome.aic;
                            best = Some((p, d, q, outcome));
                        }
                    }
                }
            }
        }

        let (p, d, q, outcome) = match best {
            Some(found) => found,
            None => {
                return Err(ForecastError::InsufficientData(
                    "No ARIMA candidate could be fitted to the series".to_string(),
                ))
            }
        };

        debug!(
            order = ?(p, d, q),
            differenced,
            aic = outcome.aic,
            "selected ARIMA order"
        );

        // Anchors undo the grid differencing first, then the unit-root
        // differencing, ending at price level.
        let mut anchors = outcome.anchors;
        if differenced {
            anchors.push(prices[prices.len() - 1]);
        }

        self.fit = Some(ArimaFit {
            order: (p, d, q),
            differenced,
            ar_coeffs: outcome.ar_coeffs,
            ma_coeffs: outcome.ma_coeffs,
            constant: outcome.constant,
            sigma2: outcome.sigma2,
            aic: outcome.aic,
            recent_values: outcome.recent_values,
            recent_residuals: outcome.recent_residuals,
            anchors,
        });
        Ok(())
    }

    fn predict(&self, horizon: usize) -> Result<Vec<f64>> {
        let fit = self.fitted()?;

        // Linear recursion on the fully differenced scale; future shocks
        // enter at their expectation of zero.
        let mut history = fit.recent_values.clone();
        let mut shocks = fit.recent_residuals.clone();
        let mut forecasts = Vec::with_capacity(horizon);

        for _ in 0..horizon {
            let mut next = fit.constant;
            for (i, phi) in fit.ar_coeffs.iter().enumerate() {
                next += phi * history[history.len() - 1 - i];
            }
            for (i, theta) in fit.ma_coeffs.iter().enumerate() {
                next += theta * shocks[shocks.len() - 1 - i];
            }
            history.push(next);
            shocks.push(0.0);
            forecasts.push(next);
        }

        // Undo every differencing step so callers always see price level
        for &anchor in &fit.anchors {
            forecasts = integrate(&forecasts, anchor);
        }

        Ok(forecasts)
    }

    fn describe(&self) -> ModelInfo {
        let parameters = match &self.fit {
            Some(fit) => serde_json::json!({
                "order": [fit.order.0, fit.order.1, fit.order.2],
                "aic": fit.aic,
                "differenced": fit.differenced,
            }),
            None => serde_json::json!({
                "max_p": self.config.max_p,
                "max_d": self.config.max_d,
                "max_q": self.config.max_q,
            }),
        };
        ModelInfo::new(ModelKind::Arima, self.fit.is_some(), parameters)
    }
}

/// Everything a fitted candidate contributes to the search
struct FitOutcome {
    ar_coeffs: Vec<f64>,
    ma_coeffs: Vec<f64>,
    constant: f64,
    sigma2: f64,
    aic: f64,
    recent_values: Vec<f64>,
    recent_residuals: Vec<f64>,
    /// Last value of each intermediate difference level, innermost first
    anchors: Vec<f64>,
}

/// Fit one (p, d, q) candidate; `None` means the candidate is skipped.
fn fit_candidate(working: &[f64], p: usize, d: usize, q: usize) -> Option<FitOutcome> {
    if working.len() < p + d + q + 10 {
        return None;
    }

    // Difference level by level so each level's last value is available
    // as an integration anchor later.
    let mut levels = vec![working.to_vec()];
    for _ in 0..d {
        let next = difference(levels[levels.len() - 1].as_slice(), 1);
        levels.push(next);
    }
    let series = levels[d].clone();
    if series.len() < p.max(q) + 5 {
        return None;
    }

    let (ar_coeffs, ma_coeffs, constant, residuals) = if q == 0 {
        estimate_ar(&series, p)?
    } else if p == 0 {
        estimate_ma(&series, q)?
    } else {
        estimate_arma(&series, p, q)?
    };

    let n = residuals.len() as f64;
    let k = (p + q + 1) as f64;
    let sigma2 = residuals.iter().map(|r| r * r).sum::<f64>() / n;
    let log_likelihood = -0.5 * n * (1.0 + (2.0 * std::f64::consts::PI * sigma2).ln());
    let aic = -2.0 * log_likelihood + 2.0 * k;
    if aic.is_nan() {
        return None;
    }

    let recent_values = series[series.len() - p..].to_vec();
    let recent_residuals = residuals[residuals.len() - q..].to_vec();
    let anchors = (0..d)
        .rev()
        .map(|level| levels[level][levels[level].len() - 1])
        .collect();

    Some(FitOutcome {
        ar_coeffs,
        ma_coeffs,
        constant,
        sigma2,
        aic,
        recent_values,
        recent_residuals,
        anchors,
    })
}

/// Difference the series `d` times
fn difference(data: &[f64], d: usize) -> Vec<f64> {
    let mut result = data.to_vec();
    for _ in 0..d {
        if result.len() < 2 {
            return vec![];
        }
        result = result.windows(2).map(|w| w[1] - w[0]).collect();
    }
    result
}

/// Undo one differencing step by cumulative summation from `start`
fn integrate(diff: &[f64], start: f64) -> Vec<f64> {
    let mut result = Vec::with_capacity(diff.len());
    let mut cumsum = start;
    for &d in diff {
        cumsum += d;
        result.push(cumsum);
    }
    result
}

type Estimate = (Vec<f64>, Vec<f64>, f64, Vec<f64>);

/// AR(p) by OLS on the regressors [1, y_{t-1}, ..., y_{t-p}]
fn estimate_ar(data: &[f64], p: usize) -> Option<Estimate> {
    let n = data.len();
    if n < p + 2 {
        return None;
    }

    let effective_n = n - p;
    let y = DVector::from_vec(data[p..].to_vec());

    let mut x_data = Vec::with_capacity(effective_n * (p + 1));
    for t in p..n {
        x_data.push(1.0);
        for i in 1..=p {
            x_data.push(data[t - i]);
        }
    }
    let x = DMatrix::from_row_slice(effective_n, p + 1, &x_data);

    let beta = ols(&x, &y)?;
    let constant = beta[0];
    let ar_coeffs: Vec<f64> = beta.iter().skip(1).cloned().collect();

    let y_hat = &x * &beta;
    let residuals: Vec<f64> = (y - y_hat).iter().cloned().collect();

    Some((ar_coeffs, vec![], constant, residuals))
}

/// MA(q) by iterated regression of the series on its own lagged residuals
fn estimate_ma(data: &[f64], q: usize) -> Option<Estimate> {
    let n = data.len();
    let data_mean = data.iter().mean();
    let centered: Vec<f64> = data.iter().map(|x| x - data_mean).collect();

    let max_iter = 100;
    let tol = 1e-6;
    let mut ma_coeffs = vec![0.0; q];

    for _ in 0..max_iter {
        let residuals = ma_residuals(&centered, &ma_coeffs);

        let mut new_coeffs = vec![0.0; q];
        for (i, coeff) in new_coeffs.iter_mut().enumerate() {
            let mut num = 0.0;
            let mut den = 0.0;
            for t in (i + 1)..n {
                num += centered[t] * residuals[t - i - 1];
                den += residuals[t - i - 1] * residuals[t - i - 1];
            }
            if den > 0.0 {
                *coeff = num / den;
            }
        }

        let shift: f64 = ma_coeffs
            .iter()
            .zip(new_coeffs.iter())
            .map(|(a, b)| (a - b).abs())
            .sum();
        ma_coeffs = new_coeffs;
        if shift < tol {
            break;
        }
    }

    let residuals = ma_residuals(&centered, &ma_coeffs);
    Some((vec![], ma_coeffs, data_mean, residuals))
}

/// Residuals of an MA model with the given coefficients
fn ma_residuals(data: &[f64], ma_coeffs: &[f64]) -> Vec<f64> {
    let mut residuals = vec![0.0; data.len()];
    for t in 0..data.len() {
        let mut ma_part = 0.0;
        for (i, theta) in ma_coeffs.iter().enumerate() {
            if t > i {
                ma_part += theta * residuals[t - i - 1];
            }
        }
        residuals[t] = data[t] - ma_part;
    }
    residuals
}

/// ARMA(p, q) by two-step Hannan-Rissanen: a long AR fit supplies proxy
/// residuals, then one joint regression on lagged values and residuals.
fn estimate_arma(data: &[f64], p: usize, q: usize) -> Option<Estimate> {
    let n = data.len();
    let data_mean = data.iter().mean();
    let centered: Vec<f64> = data.iter().map(|x| x - data_mean).collect();

    let ar_order = (p + q).max(10).min(n / 4);
    let (_, _, _, proxy_residuals) = estimate_ar(&centered, ar_order)?;

    // Proxy residual for time t lives at index t - ar_order
    let start = p.max(q).max(ar_order);
    let effective_n = n - start;
    if effective_n < p + q + 2 {
        return None;
    }

    let num_params = p + q + 1;
    let mut x_data = Vec::with_capacity(effective_n * num_params);
    let mut y_data = Vec::with_capacity(effective_n);

    for t in start..n {
        y_data.push(centered[t]);
        x_data.push(1.0);
        for i in 1..=p {
            x_data.push(centered[t - i]);
        }
        for i in 1..=q {
            let residual = if t >= i + ar_order {
                proxy_residuals[t - i - ar_order]
            } else {
                0.0
            };
            x_data.push(residual);
        }
    }

    let x = DMatrix::from_row_slice(effective_n, num_params, &x_data);
    let y = DVector::from_vec(y_data);
    let beta = ols(&x, &y)?;

    let ar_coeffs: Vec<f64> = beta.iter().skip(1).take(p).cloned().collect();
    let ma_coeffs: Vec<f64> = beta.iter().skip(1 + p).take(q).cloned().collect();
    // Restore the mean removed before fitting
    let constant = beta[0] + data_mean * (1.0 - ar_coeffs.iter().sum::<f64>());

    let y_hat = &x * &beta;
    let residuals: Vec<f64> = (y - y_hat).iter().cloned().collect();

    Some((ar_coeffs, ma_coeffs, constant, residuals))
}

/// OLS solve; `None` when the normal equations are singular
fn ols(x: &DMatrix<f64>, y: &DVector<f64>) -> Option<DVector<f64>> {
    let xtx = x.transpose() * x;
    let xty = x.transpose() * y;
    let xtx_inv = xtx.try_inverse()?;
    Some(xtx_inv * xty)
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;
    use chrono::{Duration, TimeZone, Utc};

    fn frame_from(values: &[f64]) -> TimeSeriesFrame {
        let start = Utc.with_ymd_and_hms(2023, 1, 1, 0, 0, 0).unwrap();
        let dates = (0..values.len())
            .map(|i| start + Duration::days(i as i64))
            .collect();
        TimeSeriesFrame::new(dates, values.to_vec()).unwrap()
    }

    /// AR(1) with deterministic pseudo-noise, as a recoverable fixture
    fn ar1_series(n: usize, phi: f64) -> Vec<f64> {
        let mut data = vec![0.0];
        for i in 1..n {
            let noise = ((i * 7919) % 1000) as f64 / 5000.0 - 0.1;
            data.push(phi * data[i - 1] + noise);
        }
        data
    }

    #[test]
    fn test_difference_and_integrate_are_inverse() {
        let data = vec![1.0, 3.0, 6.0, 10.0, 15.0];
        let diff = difference(&data, 1);
        assert_eq!(diff, vec![2.0, 3.0, 4.0, 5.0]);
        assert_eq!(integrate(&diff, data[0]), vec![3.0, 6.0, 10.0, 15.0]);

        assert_eq!(difference(&data, 2), vec![1.0, 1.0, 1.0]);
    }

    #[test]
    fn test_estimate_ar_recovers_coefficient() {
        let data = ar1_series(200, 0.7);
        let (ar, ma, _, residuals) = estimate_ar(&data, 1).unwrap();
        assert_eq!(ar.len(), 1);
        assert!(ma.is_empty());
        assert!((ar[0] - 0.7).abs() < 0.2);
        assert_eq!(residuals.len(), 199);
    }

    #[test]
    fn test_train_selects_an_order() {
        let mut model = ArimaForecaster::new(ArimaConfig::default());
        model.train(&frame_from(&ar1_series(200, 0.7))).unwrap();

        let info = model.describe();
        assert!(info.is_trained);
        assert_eq!(info.parameters["differenced"], false);
        assert!(info.parameters["order"].is_array());

        let predictions = model.predict(5).unwrap();
        assert_eq!(predictions.len(), 5);
        assert!(predictions.iter().all(|v| v.is_finite()));
    }

    #[test]
    fn test_flat_series_forecasts_flat() {
        let mut model = ArimaForecaster::new(ArimaConfig::default());
        model.train(&frame_from(&vec![100.0; 40])).unwrap();

        for value in model.predict(6).unwrap() {
            assert_approx_eq!(value, 100.0, 1e-6);
        }
    }

    #[test]
    fn test_linear_trend_is_continued_at_price_level() {
        let values: Vec<f64> = (1..=50).map(|i| i as f64).collect();
        let mut model = ArimaForecaster::new(ArimaConfig::default());
        model.train(&frame_from(&values)).unwrap();

        // Forecasts must come back at price level, not difference level
        let predictions = model.predict(3).unwrap();
        assert_approx_eq!(predictions[0], 51.0, 0.5);
        assert_approx_eq!(predictions[1], 52.0, 0.5);
        assert_approx_eq!(predictions[2], 53.0, 0.5);
    }

    #[test]
    fn test_insufficient_data_is_rejected() {
        let mut model = ArimaForecaster::new(ArimaConfig::default());
        let result = model.train(&frame_from(&[1.0, 2.0, 3.0, 4.0, 5.0]));
        assert!(matches!(result, Err(ForecastError::InsufficientData(_))));
    }

    #[test]
    fn test_predict_before_train_fails() {
        let model = ArimaForecaster::new(ArimaConfig::default());
        assert!(matches!(
            model.predict(5),
            Err(ForecastError::NotTrained(_))
        ));
    }
}
