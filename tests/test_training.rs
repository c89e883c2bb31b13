use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;

use tempfile::tempdir;

use forecast_engine::config::{ModelConfigs, RecurrentConfig};
use forecast_engine::provider::{MarketDataProvider, SyntheticMarketData};
use forecast_engine::store::DocumentStore;
use forecast_engine::{EngineConfig, MemoryStore, ModelRegistry, ModelTrainer, PerformanceEvaluator};

fn cheap_config(model_dir: &Path) -> EngineConfig {
    EngineConfig {
        symbols: vec!["AAPL".to_string()],
        model_dir: model_dir.to_path_buf(),
        models: ModelConfigs {
            recurrent: RecurrentConfig::default()
                .with_sequence_length(10)
                .with_hidden_size(6)
                .with_epochs(2)
                .with_batch_size(8),
            ..Default::default()
        },
        ..Default::default()
    }
}

// 300 days gives a 240/60 split, enough to put the sequence models in play.
fn seeded_store(days: u32) -> Arc<MemoryStore> {
    let store = Arc::new(MemoryStore::new());
    let bars = SyntheticMarketData::new(21).fetch_bars("AAPL", days).unwrap();
    store.insert_bars(&bars).unwrap();
    store
}

fn trainer_for(config: &EngineConfig, store: &Arc<MemoryStore>) -> ModelTrainer {
    ModelTrainer::new(
        config.clone(),
        Arc::clone(store) as Arc<dyn DocumentStore>,
        ModelRegistry::new(&config.model_dir),
    )
}

#[test]
fn test_full_lineup_attempts_every_model_once() {
    let dir = tempdir().unwrap();
    let config = cheap_config(dir.path());
    let store = seeded_store(300);

    let report = trainer_for(&config, &store).train_symbol("AAPL").unwrap();

    // five kinds plus the ensemble, each in exactly one bucket
    assert_eq!(report.succeeded.len() + report.failed.len(), 6);
    for name in ["moving_average", "arima", "var", "ensemble"] {
        assert!(
            report.succeeded.contains(&name.to_string()),
            "{} should have trained",
            name
        );
    }
    assert!(report.best_model.is_some());

    // every succeeded model except the ensemble left an artifact behind
    let registry = ModelRegistry::new(&config.model_dir);
    let saved: BTreeSet<String> = registry
        .saved_kinds("AAPL")
        .unwrap()
        .iter()
        .map(|kind| kind.as_str().to_string())
        .collect();
    let expected: BTreeSet<String> = report
        .succeeded
        .iter()
        .filter(|name| name.as_str() != "ensemble")
        .cloned()
        .collect();
    assert_eq!(saved, expected);

    // the fitted ensemble weights were persisted normalized
    let weights = registry.ensemble_weights("AAPL").unwrap().unwrap();
    let total: f64 = weights.values().sum();
    assert!((total - 1.0).abs() < 1e-9);
    for name in weights.keys() {
        assert!(report.succeeded.contains(name));
    }
}

#[test]
fn test_retraining_overwrites_artifacts_and_appends_history() {
    let dir = tempdir().unwrap();
    let config = cheap_config(dir.path());
    let store = seeded_store(300);
    let trainer = trainer_for(&config, &store);

    let first = trainer.train_symbol("AAPL").unwrap();
    let registry = ModelRegistry::new(&config.model_dir);
    let saved_before = registry.saved_kinds("AAPL").unwrap();
    let records_before = store.performance(Some("AAPL")).unwrap().len();
    assert_eq!(records_before, first.succeeded.len());

    let second = trainer.train_symbol("AAPL").unwrap();

    // artifacts are replaced in place, the evaluation history grows
    assert_eq!(registry.saved_kinds("AAPL").unwrap(), saved_before);
    let records_after = store.performance(Some("AAPL")).unwrap().len();
    assert_eq!(records_after, records_before + second.succeeded.len());
}

#[test]
fn test_training_feeds_the_reporting_surface() {
    let dir = tempdir().unwrap();
    let config = cheap_config(dir.path());
    let store = seeded_store(300);

    let report = trainer_for(&config, &store).train_symbol("AAPL").unwrap();

    let evaluator = PerformanceEvaluator::new(Arc::clone(&store) as Arc<dyn DocumentStore>);
    let best = evaluator.best_model("rmse", Some("AAPL")).unwrap();
    assert_eq!(best.symbol, "AAPL");
    assert!(best.score.is_finite());
    assert!(report.succeeded.contains(&best.best_model));

    // the trainer's pick and the stored-record ranking agree
    assert_eq!(report.best_model.as_deref(), Some(best.best_model.as_str()));
}
