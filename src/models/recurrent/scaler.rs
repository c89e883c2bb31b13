//! Per-column min-max scaling for the sequence models

use ndarray::Array2;
use serde::{Deserialize, Serialize};

use crate::error::{ForecastError, Result};

/// Maps each feature column into [0, 1] using the bounds observed at
/// fit time. Constant columns scale to 0 and invert back to their
/// constant value.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MinMaxScaler {
    mins: Vec<f64>,
    maxs: Vec<f64>,
}

impl MinMaxScaler {
    /// Learn column bounds from a (rows x features) matrix
    pub fn fit(data: &Array2<f64>) -> Result<Self> {
        if data.nrows() == 0 || data.ncols() == 0 {
            return Err(ForecastError::InsufficientData(
                "Cannot fit a scaler on an empty matrix".to_string(),
            ));
        }

        let mut mins = vec![f64::INFINITY; data.ncols()];
        let mut maxs = vec![f64::NEG_INFINITY; data.ncols()];
        for row in data.rows() {
            for (column, &value) in row.iter().enumerate() {
                if !value.is_finite() {
                    return Err(ForecastError::DataError(format!(
                        "Non-finite value in feature column {}",
                        column
                    )));
                }
                mins[column] = mins[column].min(value);
                maxs[column] = maxs[column].max(value);
            }
        }

        Ok(Self { mins, maxs })
    }

    /// Fit on the matrix and scale it in one step
    pub fn fit_transform(data: &Array2<f64>) -> Result<(Self, Array2<f64>)> {
        let scaler = Self::fit(data)?;
        let scaled = scaler.transform(data);
        Ok((scaler, scaled))
    }

    /// Scale a matrix with the fitted bounds
    pub fn transform(&self, data: &Array2<f64>) -> Array2<f64> {
        let mut scaled = data.clone();
        for mut row in scaled.rows_mut() {
            for (column, value) in row.iter_mut().enumerate() {
                *value = self.scale_value(column, *value);
            }
        }
        scaled
    }

    /// Scale a single value from the given column
    pub fn scale_value(&self, column: usize, value: f64) -> f64 {
        let range = self.maxs[column] - self.mins[column];
        if range == 0.0 {
            0.0
        } else {
            (value - self.mins[column]) / range
        }
    }

    /// Map a scaled value from the given column back to its original range
    pub fn inverse_value(&self, column: usize, scaled: f64) -> f64 {
        let range = self.maxs[column] - self.mins[column];
        self.mins[column] + scaled * range
    }

    /// Number of columns the scaler was fitted on
    pub fn columns(&self) -> usize {
        self.mins.len()
    }
}
