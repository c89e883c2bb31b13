//! Trains the full model lineup over synthetic market data.
//!
//! Seeds deterministic random-walk history for the configured symbols, runs
//! the per-symbol training pipeline, refreshes the stored ensemble forecasts
//! and finishes with the performance rankings per symbol.

use std::sync::Arc;

use tracing::{error, info};

use forecast_engine::provider::{MarketDataProvider, SyntheticMarketData, SyntheticSentiment};
use forecast_engine::scheduler::{ForecastScheduler, JobCategory};
use forecast_engine::store::{DocumentStore, MemoryStore};
use forecast_engine::{EngineConfig, ModelRegistry, ModelTrainer, PerformanceEvaluator};

fn main() -> forecast_engine::Result<()> {
    forecast_engine::init_tracing();

    let config = EngineConfig::default();
    let store: Arc<dyn DocumentStore> = Arc::new(MemoryStore::new());
    let registry = ModelRegistry::new(&config.model_dir);
    let market = SyntheticMarketData::new(42);

    info!(symbols = config.symbols.len(), "seeding market data");
    for symbol in &config.symbols {
        let bars = market.fetch_bars(symbol, config.lookback_days)?;
        let inserted = store.insert_bars(&bars)?;
        info!(symbol, inserted, "bars stored");
    }

    let trainer = ModelTrainer::new(config.clone(), Arc::clone(&store), registry);
    for symbol in &config.symbols {
        match trainer.train_symbol(symbol) {
            Ok(report) => info!(
                symbol,
                rows = report.rows,
                succeeded = report.succeeded.join(", "),
                failed = report.failed.len(),
                best = report.best_model.as_deref().unwrap_or("none"),
                "training finished"
            ),
            Err(e) => error!(symbol, error = %e, "training failed"),
        }
    }

    // Store one ensemble forecast per symbol from the freshly saved artifacts
    let scheduler = ForecastScheduler::new(
        config.clone(),
        Arc::clone(&store),
        Arc::new(market),
        Arc::new(SyntheticSentiment::new(42)),
    )?;
    for run in scheduler.run_job(JobCategory::Forecast) {
        info!(
            job = run.job,
            processed = run.processed,
            failed = run.failed.len(),
            "manual forecast refresh finished"
        );
    }

    let evaluator = PerformanceEvaluator::new(Arc::clone(&store));
    for symbol in &config.symbols {
        match evaluator.best_model("rmse", Some(symbol.as_str())) {
            Ok(best) => info!(
                symbol,
                best_model = best.best_model,
                rmse = best.score,
                recommendation = best.recommendation,
                "evaluation summary"
            ),
            Err(e) => error!(symbol, error = %e, "no evaluation available"),
        }
    }

    let records = store.performance(None)?;
    info!(total_records = records.len(), "training run complete");
    Ok(())
}
