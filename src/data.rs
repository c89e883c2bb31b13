//! Time series frame handling for forecasting
//!
//! A [`TimeSeriesFrame`] wraps a polars `DataFrame` holding one symbol's
//! ordered observations. Frames are validated on construction: timestamps
//! must be strictly increasing with no duplicates. Models borrow frames
//! read-only and never mutate them.

use crate::error::{ForecastError, Result};
use crate::store::Bar;
use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use polars::prelude::*;
use statrs::statistics::Statistics;
use std::fs::File;
use std::path::Path;

/// Rolling window used when deriving the volatility column
pub const VOLATILITY_WINDOW: usize = 14;

/// Time series frame for one symbol
#[derive(Debug, Clone)]
pub struct TimeSeriesFrame {
    /// Data frame containing the time series data
    df: DataFrame,
    /// Name of the time column
    time_column: String,
    /// Name of the forecast target column (conventionally the close price)
    target_column: String,
    /// Name of the volume column
    volume_column: Option<String>,
}

/// Data loader for time series frames
#[derive(Debug)]
pub struct DataLoader;

impl DataLoader {
    /// Load a time series frame from a CSV file
    pub fn from_csv<P: AsRef<Path>>(path: P) -> Result<TimeSeriesFrame> {
        let file = File::open(path)?;
        let df = CsvReader::new(file)
            .infer_schema(None)
            .has_header(true)
            .finish()?;

        Self::from_dataframe(df)
    }

    /// Create a time series frame from an existing DataFrame
    pub fn from_dataframe(df: DataFrame) -> Result<TimeSeriesFrame> {
        let time_column = Self::detect_time_column(&df)?;
        let target_column = Self::detect_target_column(&df)?;
        let volume_column = Self::detect_volume_column(&df);

        TimeSeriesFrame::create_new(df, time_column, target_column, volume_column)
    }

    /// Detect the time column in a DataFrame
    fn detect_time_column(df: &DataFrame) -> Result<String> {
        let column_names = df.get_column_names();

        // Look for common time column names
        for name in &column_names {
            let lower_name = name.to_lowercase();
            if lower_name.contains("time")
                || lower_name.contains("date")
                || lower_name.contains("timestamp")
            {
                return Ok(name.to_string());
            }
        }

        // If not found, use the first column if it looks like a date/time
        if let Some(first_col) = df.get_columns().first() {
            if first_col.dtype().is_temporal() {
                return Ok(first_col.name().to_string());
            }
        }

        Err(ForecastError::DataError(
            "No time column found in data".to_string(),
        ))
    }

    /// Detect the forecast target column (close price, or any price column)
    fn detect_target_column(df: &DataFrame) -> Result<String> {
        let column_names = df.get_column_names();

        for name in &column_names {
            if name.to_lowercase().contains("close") {
                return Ok(name.to_string());
            }
        }

        for name in &column_names {
            if name.to_lowercase().contains("price") {
                return Ok(name.to_string());
            }
        }

        Err(ForecastError::DataError(
            "No close or price column found in data".to_string(),
        ))
    }

    /// Detect the volume column in a DataFrame
    fn detect_volume_column(df: &DataFrame) -> Option<String> {
        let column_names = df.get_column_names();

        for name in &column_names {
            if name.to_lowercase().contains("volume") || name.to_lowercase().contains("vol") {
                return Some(name.to_string());
            }
        }

        None
    }
}

impl TimeSeriesFrame {
    /// Create a frame from explicit parts, validating timestamp order
    pub fn create_new(
        df: DataFrame,
        time_column: String,
        target_column: String,
        volume_column: Option<String>,
    ) -> Result<Self> {
        let frame = Self {
            df,
            time_column,
            target_column,
            volume_column,
        };
        frame.validate_time_order()?;
        Ok(frame)
    }

    /// Create a frame from dates and close values
    pub fn new(dates: Vec<DateTime<Utc>>, values: Vec<f64>) -> Result<Self> {
        let date_series = Series::new(
            "date",
            dates
                .iter()
                .map(|d| d.timestamp_millis())
                .collect::<Vec<i64>>(),
        );
        let close_series = Series::new("close", values);

        let df = DataFrame::new(vec![date_series, close_series])?;

        Self::create_new(df, "date".to_string(), "close".to_string(), None)
    }

    /// Create a frame from dates, OHLC tuples and volumes
    pub fn new_ohlcv(
        dates: Vec<DateTime<Utc>>,
        ohlc_data: Vec<(f64, f64, f64, f64)>,
        volumes: Vec<f64>,
    ) -> Result<Self> {
        let opens: Vec<f64> = ohlc_data.iter().map(|(o, _, _, _)| *o).collect();
        let highs: Vec<f64> = ohlc_data.iter().map(|(_, h, _, _)| *h).collect();
        let lows: Vec<f64> = ohlc_data.iter().map(|(_, _, l, _)| *l).collect();
        let closes: Vec<f64> = ohlc_data.iter().map(|(_, _, _, c)| *c).collect();

        let date_series = Series::new(
            "date",
            dates
                .iter()
                .map(|d| d.timestamp_millis())
                .collect::<Vec<i64>>(),
        );

        let df = DataFrame::new(vec![
            date_series,
            Series::new("open", opens),
            Series::new("high", highs),
            Series::new("low", lows),
            Series::new("close", closes),
            Series::new("volume", volumes),
        ])?;

        Self::create_new(
            df,
            "date".to_string(),
            "close".to_string(),
            Some("volume".to_string()),
        )
    }

    /// Create a frame from stored bars (bars must already be in ascending order)
    pub fn from_bars(bars: &[Bar]) -> Result<Self> {
        if bars.is_empty() {
            return Err(ForecastError::DataError(
                "Cannot build a frame from zero bars".to_string(),
            ));
        }

        let dates: Vec<DateTime<Utc>> = bars.iter().map(|b| b.timestamp).collect();
        let ohlc: Vec<(f64, f64, f64, f64)> = bars
            .iter()
            .map(|b| (b.open, b.high, b.low, b.close))
            .collect();
        let volumes: Vec<f64> = bars.iter().map(|b| b.volume).collect();

        Self::new_ohlcv(dates, ohlc, volumes)
    }

    /// Get the DataFrame
    pub fn dataframe(&self) -> &DataFrame {
        &self.df
    }

    /// Get the time column name
    pub fn time_column(&self) -> &str {
        &self.time_column
    }

    /// Get the target column name
    pub fn target_column(&self) -> &str {
        &self.target_column
    }

    /// Get the volume column name
    pub fn volume_column(&self) -> Option<&String> {
        self.volume_column.as_ref()
    }

    /// Get the close prices as a vector
    pub fn close_prices(&self) -> Result<Vec<f64>> {
        self.column_as_f64(&self.target_column)
    }

    /// Get the volumes as a vector
    pub fn volumes(&self) -> Result<Vec<f64>> {
        match &self.volume_column {
            Some(col) => self.column_as_f64(col),
            None => Err(ForecastError::DataError(
                "Frame has no volume column".to_string(),
            )),
        }
    }

    /// Get the timestamps as a vector
    pub fn timestamps(&self) -> Result<Vec<DateTime<Utc>>> {
        let col = self.df.column(&self.time_column)?;

        match col.dtype() {
            // Plain integer columns are interpreted as epoch milliseconds
            DataType::Int64 => col
                .i64()?
                .into_iter()
                .flatten()
                .map(millis_to_datetime)
                .collect(),
            DataType::Datetime(time_unit, _) => {
                let to_millis = match time_unit {
                    TimeUnit::Nanoseconds => 1_000_000,
                    TimeUnit::Microseconds => 1_000,
                    TimeUnit::Milliseconds => 1,
                };
                col.datetime()?
                    .into_iter()
                    .flatten()
                    .map(|ts| millis_to_datetime(ts / to_millis))
                    .collect()
            }
            DataType::Date => col
                .date()?
                .into_iter()
                .flatten()
                .map(|days| {
                    let date = NaiveDate::from_ymd_opt(1970, 1, 1)
                        .and_then(|epoch| {
                            if days >= 0 {
                                epoch.checked_add_days(chrono::Days::new(days as u64))
                            } else {
                                epoch.checked_sub_days(chrono::Days::new(days.unsigned_abs() as u64))
                            }
                        })
                        .ok_or_else(|| {
                            ForecastError::DataError(format!("Date value {} out of range", days))
                        })?;
                    let naive = NaiveDateTime::new(date, chrono::NaiveTime::default());
                    Ok(DateTime::<Utc>::from_naive_utc_and_offset(naive, Utc))
                })
                .collect(),
            DataType::Utf8 => col
                .utf8()?
                .into_iter()
                .flatten()
                .map(parse_datetime_str)
                .collect(),
            other => Err(ForecastError::DataError(format!(
                "Unsupported time column dtype: {:?}",
                other
            ))),
        }
    }

    /// Get a column as f64 values
    pub fn column_as_f64(&self, column_name: &str) -> Result<Vec<f64>> {
        let col = self.df.column(column_name).map_err(|e| {
            ForecastError::DataError(format!("Column '{}' not found: {}", column_name, e))
        })?;

        match col.dtype() {
            DataType::Float64 => Ok(col.f64()?.into_iter().flatten().collect()),
            DataType::Float32 => Ok(col
                .f32()?
                .into_iter()
                .flatten()
                .map(|v| v as f64)
                .collect()),
            DataType::Int64 => Ok(col
                .i64()?
                .into_iter()
                .flatten()
                .map(|v| v as f64)
                .collect()),
            DataType::Int32 => Ok(col
                .i32()?
                .into_iter()
                .flatten()
                .map(|v| v as f64)
                .collect()),
            DataType::UInt64 => Ok(col
                .u64()?
                .into_iter()
                .flatten()
                .map(|v| v as f64)
                .collect()),
            DataType::UInt32 => Ok(col
                .u32()?
                .into_iter()
                .flatten()
                .map(|v| v as f64)
                .collect()),
            _ => Err(ForecastError::DataError(format!(
                "Column '{}' cannot be converted to f64",
                column_name
            ))),
        }
    }

    /// Collect the given columns into a row-major matrix (one row per time step)
    pub fn feature_matrix(&self, columns: &[&str]) -> Result<Vec<Vec<f64>>> {
        let mut series: Vec<Vec<f64>> = Vec::with_capacity(columns.len());
        for name in columns {
            series.push(self.column_as_f64(name)?);
        }

        let rows = self.len();
        let mut matrix = Vec::with_capacity(rows);
        for i in 0..rows {
            let mut row = Vec::with_capacity(columns.len());
            for values in &series {
                let value = values.get(i).ok_or_else(|| {
                    ForecastError::DataError("Feature column shorter than frame".to_string())
                })?;
                row.push(*value);
            }
            matrix.push(row);
        }

        Ok(matrix)
    }

    /// Return a frame extended with derived feature columns where missing:
    /// daily_return, volatility (14-day rolling std of returns), sma_7/14/30
    /// and ema_7/14/30. Leading incomplete-window values are forward- then
    /// back-filled so no column carries holes.
    pub fn with_features(&self) -> Result<Self> {
        let close = self.close_prices()?;
        if close.is_empty() {
            return Err(ForecastError::InsufficientData(
                "Cannot derive features from an empty frame".to_string(),
            ));
        }

        let mut df = self.df.clone();
        let returns = pct_change(&close);

        if !has_column(&df, "daily_return") {
            df.with_column(Series::new("daily_return", fill_gaps(&returns)?))?;
        }

        if !has_column(&df, "volatility") {
            let vol = rolling_std(&returns, VOLATILITY_WINDOW);
            df.with_column(Series::new("volatility", fill_gaps(&vol)?))?;
        }

        for window in [7usize, 14, 30] {
            let sma_name = format!("sma_{}", window);
            if !has_column(&df, &sma_name) {
                let sma = rolling_mean(&close, window);
                df.with_column(Series::new(&sma_name, fill_gaps(&sma)?))?;
            }

            let ema_name = format!("ema_{}", window);
            if !has_column(&df, &ema_name) {
                df.with_column(Series::new(&ema_name, ema(&close, window)))?;
            }
        }

        Ok(Self {
            df,
            time_column: self.time_column.clone(),
            target_column: self.target_column.clone(),
            volume_column: self.volume_column.clone(),
        })
    }

    /// Get a slice of the data from start to end index
    pub fn slice(&self, start: usize, end: Option<usize>) -> Result<Self> {
        let end = end.unwrap_or(self.df.height());
        if start > end || end > self.df.height() {
            return Err(ForecastError::DataError(format!(
                "Invalid slice bounds {}..{} for frame of length {}",
                start,
                end,
                self.df.height()
            )));
        }
        let sliced_df = self.df.slice(start as i64, end - start);

        Ok(Self {
            df: sliced_df,
            time_column: self.time_column.clone(),
            target_column: self.target_column.clone(),
            volume_column: self.volume_column.clone(),
        })
    }

    /// Get the trailing `n` rows (the whole frame when it is shorter)
    pub fn tail(&self, n: usize) -> Result<Self> {
        let start = self.len().saturating_sub(n);
        self.slice(start, None)
    }

    /// Check if the time series is empty
    pub fn is_empty(&self) -> bool {
        self.df.height() == 0
    }

    /// Get the length of the time series
    pub fn len(&self) -> usize {
        self.df.height()
    }

    /// Calculate the mean of the close prices
    pub fn mean(&self) -> Result<f64> {
        let close_prices = self.close_prices()?;
        if close_prices.is_empty() {
            return Err(ForecastError::DataError(
                "No close prices available".to_string(),
            ));
        }

        Ok(close_prices.iter().mean())
    }

    /// Calculate the population standard deviation of the close prices
    pub fn std_dev(&self) -> Result<f64> {
        let close_prices = self.close_prices()?;
        if close_prices.is_empty() {
            return Err(ForecastError::DataError(
                "No close prices available".to_string(),
            ));
        }

        Ok(close_prices.iter().population_std_dev())
    }

    /// Timestamps must be strictly increasing; duplicates are rejected
    fn validate_time_order(&self) -> Result<()> {
        let timestamps = self.timestamps()?;
        for pair in timestamps.windows(2) {
            if pair[1] <= pair[0] {
                return Err(ForecastError::DataError(format!(
                    "Timestamps must be strictly increasing: {} followed by {}",
                    pair[0], pair[1]
                )));
            }
        }
        Ok(())
    }
}

fn has_column(df: &DataFrame, name: &str) -> bool {
    df.get_column_names().iter().any(|c| *c == name)
}

fn millis_to_datetime(millis: i64) -> Result<DateTime<Utc>> {
    Utc.timestamp_millis_opt(millis)
        .single()
        .ok_or_else(|| ForecastError::DataError(format!("Timestamp {} out of range", millis)))
}

fn parse_datetime_str(value: &str) -> Result<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Ok(dt.with_timezone(&Utc));
    }
    if let Ok(date) = NaiveDate::parse_from_str(value, "%Y-%m-%d") {
        let naive = NaiveDateTime::new(date, chrono::NaiveTime::default());
        return Ok(DateTime::<Utc>::from_naive_utc_and_offset(naive, Utc));
    }
    Err(ForecastError::DataError(format!(
        "Cannot parse '{}' as a date",
        value
    )))
}

/// Percent change between consecutive values; the first entry has no basis
fn pct_change(values: &[f64]) -> Vec<Option<f64>> {
    let mut out = Vec::with_capacity(values.len());
    out.push(None);
    for pair in values.windows(2) {
        if pair[0] == 0.0 {
            out.push(None);
        } else {
            out.push(Some((pair[1] - pair[0]) / pair[0]));
        }
    }
    out
}

/// Rolling mean over a full window; entries before the first complete window are None
fn rolling_mean(values: &[f64], window: usize) -> Vec<Option<f64>> {
    let mut out = Vec::with_capacity(values.len());
    for i in 0..values.len() {
        if i + 1 < window {
            out.push(None);
        } else {
            let slice = &values[i + 1 - window..=i];
            out.push(Some(slice.iter().mean()));
        }
    }
    out
}

/// Rolling sample standard deviation over optional values; a window containing
/// any gap yields None, matching pandas' full-window semantics
fn rolling_std(values: &[Option<f64>], window: usize) -> Vec<Option<f64>> {
    let mut out = Vec::with_capacity(values.len());
    for i in 0..values.len() {
        if i + 1 < window {
            out.push(None);
            continue;
        }
        let slice = &values[i + 1 - window..=i];
        if slice.iter().any(|v| v.is_none()) {
            out.push(None);
        } else {
            let filled: Vec<f64> = slice.iter().flatten().copied().collect();
            out.push(Some(filled.iter().std_dev()));
        }
    }
    out
}

/// Recursive exponential moving average with alpha = 2 / (span + 1)
fn ema(values: &[f64], span: usize) -> Vec<f64> {
    let alpha = 2.0 / (span as f64 + 1.0);
    let mut out = Vec::with_capacity(values.len());
    let mut current = match values.first() {
        Some(first) => *first,
        None => return out,
    };
    out.push(current);
    for value in &values[1..] {
        current = alpha * value + (1.0 - alpha) * current;
        out.push(current);
    }
    out
}

/// Forward-fill then back-fill; errors when every entry is a gap
fn fill_gaps(values: &[Option<f64>]) -> Result<Vec<f64>> {
    let mut filled: Vec<Option<f64>> = Vec::with_capacity(values.len());
    let mut last = None;
    for value in values {
        let value = value.or(last);
        filled.push(value);
        last = value;
    }

    let mut next = None;
    for value in filled.iter_mut().rev() {
        *value = value.or(next);
        next = *value;
    }

    filled
        .into_iter()
        .collect::<Option<Vec<f64>>>()
        .ok_or_else(|| {
            ForecastError::InsufficientData(
                "Too few rows to derive feature columns".to_string(),
            )
        })
}
