//! Utility functions for the forecast_engine crate

use crate::data::TimeSeriesFrame;
use crate::error::{ForecastError, Result};
use chrono::{DateTime, Duration, Utc};

/// Split a frame chronologically into training and test sets.
///
/// The split index is `len * (1 - test_ratio)` truncated, so a 0.2 ratio on
/// 100 rows yields 80 training rows. A ratio outside (0, 1) returns the whole
/// frame as training data and an empty test frame.
pub fn train_test_split(
    frame: &TimeSeriesFrame,
    test_ratio: f64,
) -> Result<(TimeSeriesFrame, TimeSeriesFrame)> {
    let n = frame.len();
    if n == 0 || test_ratio <= 0.0 || test_ratio >= 1.0 {
        return Ok((frame.clone(), frame.slice(n, None)?));
    }

    let train_len = (n as f64 * (1.0 - test_ratio)) as usize;
    let train = frame.slice(0, Some(train_len))?;
    let test = frame.slice(train_len, None)?;

    Ok((train, test))
}

/// Create future timestamps continuing from the last observed one
pub fn future_timestamps(
    last_timestamp: DateTime<Utc>,
    horizon: usize,
    frequency: &str,
) -> Result<Vec<DateTime<Utc>>> {
    let mut timestamps = Vec::with_capacity(horizon);
    let mut current = last_timestamp;

    let duration = match frequency {
        "daily" | "d" | "1d" => Duration::days(1),
        "weekly" | "w" | "1w" => Duration::weeks(1),
        "monthly" | "m" | "1m" => Duration::days(30),
        "hourly" | "h" | "1h" => Duration::hours(1),
        "minute" | "min" | "1min" => Duration::minutes(1),
        _ => {
            return Err(ForecastError::Configuration(format!(
                "Unsupported frequency: {}",
                frequency
            )))
        }
    };

    for _ in 0..horizon {
        current = current + duration;
        timestamps.push(current);
    }

    Ok(timestamps)
}
