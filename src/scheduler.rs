//! Recurring job scheduling for the forecast engine
//!
//! Four jobs run on fixed cadences: a daily data refresh, an hourly ensemble
//! forecast refresh during market hours, a weekly full retrain, and a
//! periodic sentiment refresh. Each job gets one tokio timer task that sleeps
//! until its trigger's next fire; the job bodies themselves are synchronous
//! and run on the blocking pool. Firing times come from pure
//! [`Trigger::next_after`] arithmetic, so cadences are testable without
//! sleeping. A failure on one symbol is logged and never stops the rest of
//! the batch.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveTime, Timelike, Utc, Weekday};
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::config::{EngineConfig, ScheduleConfig};
use crate::data::TimeSeriesFrame;
use crate::ensemble::EnsembleCombiner;
use crate::error::{ForecastError, Result};
use crate::provider::{MarketDataProvider, SentimentProvider, DEFAULT_HEADLINE_LIMIT};
use crate::registry::ModelRegistry;
use crate::store::{DocumentStore, ForecastRecord, PredictedPoint};
use crate::training::ModelTrainer;
use crate::utils::future_timestamps;

/// When a job fires, relative to a given instant
///
/// `next_after` always returns an instant strictly after `now`, so a job that
/// fires exactly at its trigger time reschedules to the following occurrence
/// instead of firing twice.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    /// Every day at `hour`:00 UTC
    DailyAt { hour: u32 },
    /// Every top of hour with `start <= hour <= end` (UTC)
    HourlyBetween { start: u32, end: u32 },
    /// Once a week on `weekday` at `hour`:00 UTC
    WeeklyAt { weekday: Weekday, hour: u32 },
    /// Every `hours` hours from the moment of scheduling
    Every { hours: u32 },
}

impl Trigger {
    /// The next firing instant strictly after `now`
    pub fn next_after(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        match *self {
            Trigger::DailyAt { hour } => {
                let today = at_hour(now.date_naive(), hour);
                if today > now {
                    today
                } else {
                    today + Duration::days(1)
                }
            }
            Trigger::HourlyBetween { start, end } => {
                let mut candidate = truncate_to_hour(now) + Duration::hours(1);
                // at most one full day until the window reopens
                for _ in 0..48 {
                    let hour = candidate.hour();
                    if hour >= start && hour <= end {
                        break;
                    }
                    candidate += Duration::hours(1);
                }
                candidate
            }
            Trigger::WeeklyAt { weekday, hour } => {
                let days_ahead = (weekday.num_days_from_monday() + 7
                    - now.weekday().num_days_from_monday())
                    % 7;
                let candidate =
                    at_hour(now.date_naive(), hour) + Duration::days(i64::from(days_ahead));
                if candidate > now {
                    candidate
                } else {
                    candidate + Duration::days(7)
                }
            }
            Trigger::Every { hours } => now + Duration::hours(i64::from(hours)),
        }
    }

    /// Human-readable cadence for status output
    pub fn describe(&self) -> String {
        match *self {
            Trigger::DailyAt { hour } => format!("daily at {:02}:00 UTC", hour),
            Trigger::HourlyBetween { start, end } => {
                format!("hourly from {:02}:00 to {:02}:00 UTC", start, end)
            }
            Trigger::WeeklyAt { weekday, hour } => {
                format!("weekly on {} at {:02}:00 UTC", weekday, hour)
            }
            Trigger::Every { hours } => format!("every {} hours", hours),
        }
    }
}

/// `day` at `hour`:00:00 UTC; hours are validated at scheduler construction
fn at_hour(day: NaiveDate, hour: u32) -> DateTime<Utc> {
    day.and_hms_opt(hour, 0, 0)
        .unwrap_or_else(|| day.and_time(NaiveTime::MIN))
        .and_utc()
}

fn truncate_to_hour(instant: DateTime<Utc>) -> DateTime<Utc> {
    at_hour(instant.date_naive(), instant.hour())
}

/// The four recurring jobs
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum JobId {
    DataRefresh,
    ForecastRefresh,
    WeeklyRetrain,
    SentimentRefresh,
}

impl JobId {
    pub fn all() -> [JobId; 4] {
        [
            JobId::DataRefresh,
            JobId::ForecastRefresh,
            JobId::WeeklyRetrain,
            JobId::SentimentRefresh,
        ]
    }

    /// Stable identifier used in status payloads and logs
    pub fn as_str(&self) -> &'static str {
        match self {
            JobId::DataRefresh => "daily_data_update",
            JobId::ForecastRefresh => "hourly_forecast_refresh",
            JobId::WeeklyRetrain => "weekly_model_retrain",
            JobId::SentimentRefresh => "sentiment_update",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            JobId::DataRefresh => "Daily Market Data Update",
            JobId::ForecastRefresh => "Hourly Forecast Refresh",
            JobId::WeeklyRetrain => "Weekly Model Retraining",
            JobId::SentimentRefresh => "Sentiment Data Update",
        }
    }

    fn trigger(&self, schedule: &ScheduleConfig) -> Trigger {
        match self {
            JobId::DataRefresh => Trigger::DailyAt {
                hour: schedule.data_refresh_hour,
            },
            JobId::ForecastRefresh => Trigger::HourlyBetween {
                start: schedule.forecast_start_hour,
                end: schedule.forecast_end_hour,
            },
            JobId::WeeklyRetrain => Trigger::WeeklyAt {
                weekday: schedule.retrain_weekday,
                hour: schedule.retrain_hour,
            },
            JobId::SentimentRefresh => Trigger::Every {
                hours: schedule.sentiment_interval_hours,
            },
        }
    }
}

/// Manual trigger target
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobCategory {
    Data,
    Forecast,
    Sentiment,
    Models,
    All,
}

impl JobCategory {
    pub fn from_name(name: &str) -> Result<Self> {
        match name.to_lowercase().as_str() {
            "data" => Ok(JobCategory::Data),
            "forecast" => Ok(JobCategory::Forecast),
            "sentiment" => Ok(JobCategory::Sentiment),
            "models" => Ok(JobCategory::Models),
            "all" => Ok(JobCategory::All),
            other => Err(ForecastError::Configuration(format!(
                "Unknown job category '{}'. Use data, forecast, sentiment, models or all",
                other
            ))),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobCategory::Data => "data",
            JobCategory::Forecast => "forecast",
            JobCategory::Sentiment => "sentiment",
            JobCategory::Models => "models",
            JobCategory::All => "all",
        }
    }

    fn jobs(&self) -> Vec<JobId> {
        match self {
            JobCategory::Data => vec![JobId::DataRefresh],
            JobCategory::Forecast => vec![JobId::ForecastRefresh],
            JobCategory::Sentiment => vec![JobId::SentimentRefresh],
            JobCategory::Models => vec![JobId::WeeklyRetrain],
            JobCategory::All => vec![
                JobId::DataRefresh,
                JobId::ForecastRefresh,
                JobId::SentimentRefresh,
                JobId::WeeklyRetrain,
            ],
        }
    }
}

/// Outcome of one job body invocation
#[derive(Debug, Clone, Serialize)]
pub struct JobRun {
    /// Job identifier, as in [`JobId::as_str`]
    pub job: String,
    /// Symbols (or records, for the sentiment job) handled without error
    pub processed: usize,
    /// (symbol, reason) per failure; failures never abort the run
    pub failed: Vec<(String, String)>,
}

impl JobRun {
    fn new(job: JobId) -> Self {
        Self {
            job: job.as_str().to_string(),
            processed: 0,
            failed: Vec::new(),
        }
    }
}

/// One job's entry in the status payload
#[derive(Debug, Clone, Serialize)]
pub struct JobStatus {
    pub id: String,
    pub name: String,
    pub next_run: Option<DateTime<Utc>>,
    pub trigger: String,
}

/// Snapshot of the scheduler and its jobs
#[derive(Debug, Clone, Serialize)]
pub struct SchedulerStatus {
    /// `"running"` or `"stopped"`
    pub status: String,
    pub jobs: Vec<JobStatus>,
    pub total_jobs: usize,
}

/// The four job bodies and everything they touch
///
/// Kept apart from the scheduling machinery so manual triggers and tests can
/// run bodies directly, without a runtime.
struct JobRunner {
    config: EngineConfig,
    store: Arc<dyn DocumentStore>,
    registry: ModelRegistry,
    market: Arc<dyn MarketDataProvider>,
    sentiment: Arc<dyn SentimentProvider>,
}

impl JobRunner {
    fn run(&self, job: JobId) -> JobRun {
        match job {
            JobId::DataRefresh => self.refresh_data(),
            JobId::ForecastRefresh => self.refresh_forecasts(),
            JobId::WeeklyRetrain => self.retrain_models(),
            JobId::SentimentRefresh => self.refresh_sentiment(),
        }
    }

    /// Pull fresh bars for every symbol and upsert them into the store
    fn refresh_data(&self) -> JobRun {
        info!("starting scheduled data refresh");
        let mut run = JobRun::new(JobId::DataRefresh);
        for symbol in &self.config.symbols {
            match self.refresh_symbol_data(symbol) {
                Ok(inserted) => {
                    info!(symbol, inserted, "market data refreshed");
                    run.processed += 1;
                }
                Err(e) => {
                    warn!(symbol, error = %e, "data refresh failed");
                    run.failed.push((symbol.clone(), e.to_string()));
                }
            }
        }
        run
    }

    fn refresh_symbol_data(&self, symbol: &str) -> Result<usize> {
        let bars = self.market.fetch_bars(symbol, self.config.lookback_days)?;
        if bars.is_empty() {
            return Err(ForecastError::DataError(format!(
                "Provider returned no bars for {}",
                symbol
            )));
        }
        self.store.insert_bars(&bars)
    }

    /// Regenerate the stored ensemble forecast for every symbol
    fn refresh_forecasts(&self) -> JobRun {
        info!("starting scheduled forecast refresh");
        let mut run = JobRun::new(JobId::ForecastRefresh);
        for symbol in &self.config.symbols {
            match self.forecast_symbol(symbol) {
                Ok(record) => {
                    info!(symbol, points = record.predictions.len(), "forecast refreshed");
                    run.processed += 1;
                }
                Err(e) => {
                    warn!(symbol, error = %e, "forecast refresh failed");
                    run.failed.push((symbol.clone(), e.to_string()));
                }
            }
        }
        run
    }

    /// Load every saved model for `symbol`, rebuild the weighted ensemble and
    /// store a fresh horizon-long forecast
    fn forecast_symbol(&self, symbol: &str) -> Result<ForecastRecord> {
        let bars = self.store.bars(symbol, None)?;
        let frame = TimeSeriesFrame::from_bars(&bars)?;

        let kinds = self.registry.saved_kinds(symbol)?;
        if kinds.is_empty() {
            return Err(ForecastError::ModelNotFound(format!(
                "No saved models for {}",
                symbol
            )));
        }

        let mut ensemble = EnsembleCombiner::new();
        for kind in kinds {
            match self.registry.load(symbol, kind) {
                Ok(artifact) => ensemble.add_model(kind.as_str(), artifact.into_forecaster()),
                Err(e) => warn!(symbol, model = kind.as_str(), error = %e, "skipping unloadable model"),
            }
        }
        if ensemble.is_empty() {
            return Err(ForecastError::ModelNotFound(format!(
                "No loadable models for {}",
                symbol
            )));
        }

        // Optimized weights apply only while they cover exactly the loaded
        // members; otherwise fall back to equal weighting.
        match self.registry.ensemble_weights(symbol)? {
            Some(weights) => {
                let weights: HashMap<String, f64> = weights.into_iter().collect();
                if ensemble.set_weights(&weights).is_err() {
                    warn!(symbol, "stored ensemble weights no longer match saved models");
                    ensemble.normalize_weights();
                }
            }
            None => ensemble.normalize_weights(),
        }

        let horizon = self.config.forecast_horizon;
        let values = ensemble.predict(horizon)?;
        let last = frame
            .timestamps()?
            .last()
            .copied()
            .ok_or_else(|| ForecastError::DataError(format!("No stored bars for {}", symbol)))?;
        let timestamps = future_timestamps(last, horizon, "daily")?;

        let record = ForecastRecord {
            symbol: symbol.to_string(),
            model_used: "ensemble".to_string(),
            generated_at: Utc::now(),
            predictions: timestamps
                .into_iter()
                .zip(values)
                .map(|(timestamp, value)| PredictedPoint { timestamp, value })
                .collect(),
        };
        self.store.insert_forecast(&record)?;
        Ok(record)
    }

    /// Retrain the full model lineup for every symbol
    fn retrain_models(&self) -> JobRun {
        info!("starting scheduled model retraining");
        let mut run = JobRun::new(JobId::WeeklyRetrain);
        let trainer = ModelTrainer::new(
            self.config.clone(),
            Arc::clone(&self.store),
            self.registry.clone(),
        );
        for symbol in &self.config.symbols {
            match trainer.train_symbol(symbol) {
                Ok(report) => {
                    info!(
                        symbol,
                        succeeded = report.succeeded.len(),
                        failed = report.failed.len(),
                        best = report.best_model.as_deref().unwrap_or("none"),
                        "models retrained"
                    );
                    run.processed += 1;
                }
                Err(e) => {
                    warn!(symbol, error = %e, "retraining failed");
                    run.failed.push((symbol.clone(), e.to_string()));
                }
            }
        }
        run
    }

    /// Pull one batch of scored headlines covering the whole symbol universe
    fn refresh_sentiment(&self) -> JobRun {
        info!("starting scheduled sentiment refresh");
        let mut run = JobRun::new(JobId::SentimentRefresh);
        match self.fetch_and_store_sentiment() {
            Ok(inserted) => {
                info!(inserted, "sentiment records stored");
                run.processed = inserted;
            }
            Err(e) => {
                warn!(error = %e, "sentiment refresh failed");
                run.failed.push(("sentiment".to_string(), e.to_string()));
            }
        }
        run
    }

    fn fetch_and_store_sentiment(&self) -> Result<usize> {
        let records = self
            .sentiment
            .fetch(&self.config.symbols, DEFAULT_HEADLINE_LIMIT)?;
        if records.is_empty() {
            return Err(ForecastError::DataError(
                "Sentiment provider returned no records".to_string(),
            ));
        }
        self.store.insert_sentiment(&records)
    }
}

/// Runs the four recurring jobs and exposes manual triggers and status
///
/// [`ForecastScheduler::start`] must be called from within a tokio runtime;
/// everything else works without one.
pub struct ForecastScheduler {
    runner: Arc<JobRunner>,
    next_runs: Arc<Mutex<BTreeMap<&'static str, DateTime<Utc>>>>,
    stop: Option<watch::Sender<bool>>,
    handles: Vec<JoinHandle<()>>,
}

impl ForecastScheduler {
    /// Builds a stopped scheduler; fails when the schedule config is invalid
    pub fn new(
        config: EngineConfig,
        store: Arc<dyn DocumentStore>,
        market: Arc<dyn MarketDataProvider>,
        sentiment: Arc<dyn SentimentProvider>,
    ) -> Result<Self> {
        validate_schedule(&config.schedule)?;
        let registry = ModelRegistry::new(&config.model_dir);
        Ok(Self {
            runner: Arc::new(JobRunner {
                config,
                store,
                registry,
                market,
                sentiment,
            }),
            next_runs: Arc::new(Mutex::new(BTreeMap::new())),
            stop: None,
            handles: Vec::new(),
        })
    }

    pub fn is_running(&self) -> bool {
        self.stop.is_some()
    }

    /// Spawns one timer task per job
    pub fn start(&mut self) -> Result<()> {
        if self.is_running() {
            return Err(ForecastError::Configuration(
                "Scheduler is already running".to_string(),
            ));
        }

        let (stop_tx, stop_rx) = watch::channel(false);
        for job in JobId::all() {
            let trigger = job.trigger(&self.runner.config.schedule);
            let runner = Arc::clone(&self.runner);
            let next_runs = Arc::clone(&self.next_runs);
            let mut stop = stop_rx.clone();

            let handle = tokio::spawn(async move {
                loop {
                    let next = trigger.next_after(Utc::now());
                    if let Ok(mut map) = next_runs.lock() {
                        map.insert(job.as_str(), next);
                    }
                    let wait = (next - Utc::now()).to_std().unwrap_or_default();

                    tokio::select! {
                        _ = tokio::time::sleep(wait) => {
                            let body = Arc::clone(&runner);
                            // Training and registry I/O block; keep them off
                            // the timer threads.
                            match tokio::task::spawn_blocking(move || body.run(job)).await {
                                Ok(run) => info!(
                                    job = job.as_str(),
                                    processed = run.processed,
                                    failed = run.failed.len(),
                                    "scheduled job finished"
                                ),
                                Err(e) => warn!(job = job.as_str(), error = %e, "scheduled job panicked"),
                            }
                        }
                        _ = stop.changed() => break,
                    }
                }
            });
            self.handles.push(handle);
        }

        self.stop = Some(stop_tx);
        info!(jobs = JobId::all().len(), "scheduler started");
        Ok(())
    }

    /// Signals every timer task to stop and aborts any still in flight
    pub fn stop(&mut self) {
        let Some(stop) = self.stop.take() else {
            return;
        };
        let _ = stop.send(true);
        for handle in self.handles.drain(..) {
            handle.abort();
        }
        if let Ok(mut map) = self.next_runs.lock() {
            map.clear();
        }
        info!("scheduler stopped");
    }

    /// Current run state plus one entry per job with its next firing time
    pub fn status(&self) -> SchedulerStatus {
        if !self.is_running() {
            return SchedulerStatus {
                status: "stopped".to_string(),
                jobs: Vec::new(),
                total_jobs: 0,
            };
        }

        let next_runs = self.next_runs.lock().ok();
        let jobs: Vec<JobStatus> = JobId::all()
            .iter()
            .map(|job| JobStatus {
                id: job.as_str().to_string(),
                name: job.display_name().to_string(),
                next_run: next_runs
                    .as_ref()
                    .and_then(|map| map.get(job.as_str()).copied()),
                trigger: job.trigger(&self.runner.config.schedule).describe(),
            })
            .collect();

        SchedulerStatus {
            status: "running".to_string(),
            total_jobs: jobs.len(),
            jobs,
        }
    }

    /// Synchronously runs the job bodies for `category`, outside their cadence
    ///
    /// `All` runs data, forecast, sentiment and retraining in that order, so
    /// later bodies see what earlier ones stored.
    pub fn run_job(&self, category: JobCategory) -> Vec<JobRun> {
        info!(category = category.as_str(), "manual job trigger");
        category
            .jobs()
            .into_iter()
            .map(|job| self.runner.run(job))
            .collect()
    }
}

impl Drop for ForecastScheduler {
    fn drop(&mut self) {
        self.stop();
    }
}

fn validate_schedule(schedule: &ScheduleConfig) -> Result<()> {
    if schedule.data_refresh_hour > 23
        || schedule.retrain_hour > 23
        || schedule.forecast_start_hour > 23
        || schedule.forecast_end_hour > 23
    {
        return Err(ForecastError::Configuration(
            "Schedule hours must lie in 0..=23".to_string(),
        ));
    }
    if schedule.forecast_start_hour > schedule.forecast_end_hour {
        return Err(ForecastError::Configuration(
            "Forecast window start hour must not be after its end hour".to_string(),
        ));
    }
    if schedule.sentiment_interval_hours == 0 {
        return Err(ForecastError::Configuration(
            "Sentiment refresh interval must be at least one hour".to_string(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn utc(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, min, 0).unwrap()
    }

    #[test]
    fn test_daily_trigger_fires_later_today_or_tomorrow() {
        let trigger = Trigger::DailyAt { hour: 6 };
        assert_eq!(
            trigger.next_after(utc(2023, 6, 15, 5, 0)),
            utc(2023, 6, 15, 6, 0)
        );
        assert_eq!(
            trigger.next_after(utc(2023, 6, 15, 6, 0)),
            utc(2023, 6, 16, 6, 0)
        );
        assert_eq!(
            trigger.next_after(utc(2023, 6, 15, 7, 30)),
            utc(2023, 6, 16, 6, 0)
        );
    }

    #[test]
    fn test_hourly_window_trigger_skips_to_window_open() {
        let trigger = Trigger::HourlyBetween { start: 9, end: 16 };
        assert_eq!(
            trigger.next_after(utc(2023, 6, 15, 8, 30)),
            utc(2023, 6, 15, 9, 0)
        );
        assert_eq!(
            trigger.next_after(utc(2023, 6, 15, 12, 0)),
            utc(2023, 6, 15, 13, 0)
        );
        assert_eq!(
            trigger.next_after(utc(2023, 6, 15, 16, 30)),
            utc(2023, 6, 16, 9, 0)
        );
    }

    #[test]
    fn test_weekly_trigger_lands_on_weekday() {
        let trigger = Trigger::WeeklyAt {
            weekday: Weekday::Sun,
            hour: 2,
        };
        // 2023-06-15 is a Thursday
        assert_eq!(
            trigger.next_after(utc(2023, 6, 15, 12, 0)),
            utc(2023, 6, 18, 2, 0)
        );
        // Sunday before the hour fires the same day
        assert_eq!(
            trigger.next_after(utc(2023, 6, 18, 1, 0)),
            utc(2023, 6, 18, 2, 0)
        );
        // Sunday at the hour exactly waits a full week
        assert_eq!(
            trigger.next_after(utc(2023, 6, 18, 2, 0)),
            utc(2023, 6, 25, 2, 0)
        );
    }

    #[test]
    fn test_interval_trigger_counts_from_now() {
        let trigger = Trigger::Every { hours: 4 };
        assert_eq!(
            trigger.next_after(utc(2023, 6, 15, 11, 30)),
            utc(2023, 6, 15, 15, 30)
        );
    }

    #[test]
    fn test_trigger_descriptions() {
        assert_eq!(
            Trigger::DailyAt { hour: 6 }.describe(),
            "daily at 06:00 UTC"
        );
        assert_eq!(
            Trigger::HourlyBetween { start: 9, end: 16 }.describe(),
            "hourly from 09:00 to 16:00 UTC"
        );
        assert_eq!(
            Trigger::WeeklyAt {
                weekday: Weekday::Sun,
                hour: 2
            }
            .describe(),
            "weekly on Sun at 02:00 UTC"
        );
        assert_eq!(Trigger::Every { hours: 4 }.describe(), "every 4 hours");
    }

    #[test]
    fn test_job_category_parsing() {
        assert_eq!(JobCategory::from_name("data").unwrap(), JobCategory::Data);
        assert_eq!(JobCategory::from_name("ALL").unwrap(), JobCategory::All);
        assert!(JobCategory::from_name("bogus").is_err());
    }

    #[test]
    fn test_schedule_validation_rejects_bad_hours() {
        let mut schedule = ScheduleConfig::default();
        schedule.data_refresh_hour = 24;
        assert!(validate_schedule(&schedule).is_err());

        let mut schedule = ScheduleConfig::default();
        schedule.forecast_start_hour = 17;
        schedule.forecast_end_hour = 9;
        assert!(validate_schedule(&schedule).is_err());

        let mut schedule = ScheduleConfig::default();
        schedule.sentiment_interval_hours = 0;
        assert!(validate_schedule(&schedule).is_err());
    }
}
