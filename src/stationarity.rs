//! Augmented Dickey-Fuller unit-root test
//!
//! Used by the autoregressive-integrated model to decide whether a series
//! needs differencing before fitting. H0: the series has a unit root
//! (non-stationary); rejecting at p < 0.05 means the raw series can be fit
//! directly.

use nalgebra::{DMatrix, DVector};

/// Significance level at which the unit-root hypothesis is rejected
pub const ADF_SIGNIFICANCE: f64 = 0.05;

/// Outcome of an ADF test
#[derive(Debug, Clone)]
pub struct AdfResult {
    /// t-statistic of the lagged-level coefficient
    pub statistic: f64,
    /// Approximate p-value (interpolated between tabulated critical values)
    pub p_value: f64,
    /// (label, value) critical values for the constant-only case
    pub critical_values: Vec<(String, f64)>,
    /// True when the unit-root hypothesis is rejected at 5%
    pub is_stationary: bool,
}

impl AdfResult {
    fn inconclusive() -> Self {
        Self {
            statistic: f64::NAN,
            p_value: 1.0,
            critical_values: Vec::new(),
            is_stationary: false,
        }
    }
}

/// Run the ADF regression Δy_t = α + β·y_{t-1} + Σ γ_i·Δy_{t-i} + ε_t and
/// test β against zero.
///
/// With no explicit lag the Schwert-style rule `2·n^(1/3)` is used, clamped
/// to [1, n/4]. Series too short for the regression (or with a singular
/// design) yield an inconclusive result with p = 1, which callers treat as
/// non-stationary.
pub fn adf_test(data: &[f64], max_lag: Option<usize>) -> AdfResult {
    let n = data.len();
    if n < 10 {
        return AdfResult::inconclusive();
    }

    // First difference of the series
    let diff: Vec<f64> = data.windows(2).map(|w| w[1] - w[0]).collect();

    let lag = max_lag.unwrap_or_else(|| ((n as f64).powf(1.0 / 3.0) * 2.0) as usize);
    let lag = lag.min(n / 4).max(1);

    let effective_n = n - 1 - lag;
    if effective_n < lag + 3 {
        return AdfResult::inconclusive();
    }

    // Dependent variable: Δy_t starting after the lag window
    let y: Vec<f64> = diff[lag..].to_vec();

    // Regressor rows: [1, y_{t-1}, Δy_{t-1}, ..., Δy_{t-lag}]
    let num_regressors = 2 + lag;
    let mut x_data = Vec::with_capacity(effective_n * num_regressors);
    for t in lag..diff.len() {
        x_data.push(1.0);
        x_data.push(data[t]);
        for i in 1..=lag {
            x_data.push(diff[t - i]);
        }
    }

    let x = DMatrix::from_row_slice(effective_n, num_regressors, &x_data);
    let y_vec = DVector::from_vec(y);

    // OLS: β = (X'X)^(-1) X'y
    let xtx = x.transpose() * &x;
    let xty = x.transpose() * &y_vec;
    let xtx_inv = match xtx.try_inverse() {
        Some(inv) => inv,
        None => return AdfResult::inconclusive(),
    };
    let beta = &xtx_inv * xty;

    // Residual variance and the standard error of the level coefficient
    let y_hat = &x * &beta;
    let residuals = &y_vec - y_hat;
    let sse: f64 = residuals.iter().map(|r| r * r).sum();
    let mse = sse / (effective_n - num_regressors) as f64;
    let se_beta = (mse * xtx_inv[(1, 1)]).sqrt();

    let t_stat = beta[1] / se_beta;

    let critical_values = vec![
        ("1%".to_string(), -3.43),
        ("5%".to_string(), -2.86),
        ("10%".to_string(), -2.57),
    ];

    let p_value = adf_p_value(t_stat, n);

    AdfResult {
        statistic: t_stat,
        p_value,
        critical_values,
        is_stationary: p_value < ADF_SIGNIFICANCE,
    }
}

/// Approximate p-value by interpolating between small-sample-adjusted
/// critical values; outside the table the tails decay exponentially.
fn adf_p_value(t_stat: f64, n: usize) -> f64 {
    let cv_1 = -3.43 - 6.0 / n as f64;
    let cv_5 = -2.86 - 4.0 / n as f64;
    let cv_10 = -2.57 - 3.0 / n as f64;

    if t_stat < cv_1 {
        0.01 * (cv_1 - t_stat).exp().recip()
    } else if t_stat < cv_5 {
        0.01 + (0.05 - 0.01) * (t_stat - cv_1) / (cv_5 - cv_1)
    } else if t_stat < cv_10 {
        0.05 + (0.10 - 0.05) * (t_stat - cv_5) / (cv_10 - cv_5)
    } else {
        0.10 + 0.90 * (1.0 - (-0.5 * (t_stat - cv_10)).exp())
    }
}
