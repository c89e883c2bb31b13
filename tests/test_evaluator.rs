use std::sync::Arc;

use forecast_engine::evaluator::{performance_score, ModelCategory, RANKING_METRICS};
use forecast_engine::store::DocumentStore;
use forecast_engine::{ForecastError, MemoryStore, PerformanceEvaluator};

fn evaluator_over(store: &Arc<MemoryStore>) -> PerformanceEvaluator {
    PerformanceEvaluator::new(Arc::clone(store) as Arc<dyn DocumentStore>)
}

// Queue one record per (model, rmse) pair and flush them under the symbol
fn seed_symbol(store: &Arc<MemoryStore>, symbol: &str, models: &[(&str, f64)]) {
    let mut evaluator = evaluator_over(store);
    for (name, rmse) in models {
        let actual = vec![100.0, 100.0, 100.0, 100.0];
        let predicted: Vec<f64> = actual.iter().map(|a| a + rmse).collect();
        evaluator
            .evaluate_predictions(name, &predicted, &actual, serde_json::json!({}))
            .unwrap();
    }
    evaluator.flush(symbol).unwrap();
}

#[test]
fn test_flush_writes_the_batch_under_one_symbol() {
    let store = Arc::new(MemoryStore::new());
    let mut evaluator = evaluator_over(&store);

    evaluator
        .evaluate_predictions("arima", &[10.0, 11.0], &[10.0, 12.0], serde_json::json!({}))
        .unwrap();
    evaluator
        .evaluate_predictions("var", &[9.0, 12.0], &[10.0, 12.0], serde_json::json!({}))
        .unwrap();
    assert_eq!(evaluator.pending_count(), 2);

    assert_eq!(evaluator.flush("BTC-USD").unwrap(), 2);
    assert_eq!(evaluator.pending_count(), 0);

    let records = store.performance(Some("BTC-USD")).unwrap();
    assert_eq!(records.len(), 2);
    assert!(records.iter().all(|r| r.symbol == "BTC-USD"));
}

#[test]
fn test_rankings_cover_every_supported_metric() {
    let store = Arc::new(MemoryStore::new());
    seed_symbol(&store, "AAPL", &[("arima", 1.0), ("var", 3.0), ("lstm", 2.0)]);

    let rankings = evaluator_over(&store).rankings(Some("AAPL")).unwrap();
    assert_eq!(rankings.len(), RANKING_METRICS.len());

    for ranking in &rankings {
        // constant offsets make every metric agree on the order
        assert_eq!(ranking.best, "arima");
        assert_eq!(ranking.worst, "var");
        assert_eq!(ranking.scores.len(), 3);
        for pair in ranking.scores.windows(2) {
            assert!(pair[0].1 <= pair[1].1);
        }
    }
}

#[test]
fn test_rank_is_scoped_by_symbol() {
    let store = Arc::new(MemoryStore::new());
    seed_symbol(&store, "AAPL", &[("arima", 5.0), ("var", 1.0)]);
    seed_symbol(&store, "TSLA", &[("arima", 1.0), ("var", 5.0)]);

    let evaluator = evaluator_over(&store);
    assert_eq!(evaluator.rank("rmse", Some("AAPL")).unwrap().best, "var");
    assert_eq!(evaluator.rank("rmse", Some("TSLA")).unwrap().best, "arima");
}

#[test]
fn test_rank_rejects_unknown_metric_and_empty_store() {
    let store = Arc::new(MemoryStore::new());
    let evaluator = evaluator_over(&store);

    assert!(matches!(
        evaluator.rank("r2", Some("AAPL")),
        Err(ForecastError::Configuration(_))
    ));
    assert!(matches!(
        evaluator.rank("rmse", Some("AAPL")),
        Err(ForecastError::DataError(_))
    ));
}

#[test]
fn test_compare_categorizes_and_scores_models() {
    let store = Arc::new(MemoryStore::new());
    seed_symbol(
        &store,
        "AAPL",
        &[("moving_average", 2.0), ("lstm", 1.0), ("ensemble", 0.5)],
    );

    let comparison = evaluator_over(&store).compare(Some("AAPL")).unwrap();
    assert_eq!(comparison.symbol, "AAPL");
    assert_eq!(comparison.models.len(), 3);
    assert_eq!(
        comparison.models["moving_average"].model_type,
        ModelCategory::Traditional
    );
    assert_eq!(
        comparison.models["lstm"].model_type,
        ModelCategory::NeuralNetwork
    );
    assert_eq!(
        comparison.models["ensemble"].model_type,
        ModelCategory::Ensemble
    );

    for entry in comparison.models.values() {
        assert!(entry.performance_score >= 0.0);
        assert!(entry.performance_score <= 100.0);
    }
}

#[test]
fn test_report_produces_recommendations_for_mixed_lineup() {
    let store = Arc::new(MemoryStore::new());
    seed_symbol(
        &store,
        "AAPL",
        &[
            ("arima", 0.5),
            ("moving_average", 4.0),
            ("lstm", 2.0),
            ("gru", 2.5),
        ],
    );

    let report = evaluator_over(&store).report(Some("AAPL")).unwrap();
    assert_eq!(report.symbol, "AAPL");
    assert_eq!(report.summary.total_models, 4);
    assert_eq!(report.summary.symbols_tested, 1);
    assert!(report.summary.last_update.is_some());

    assert!(report
        .recommendations
        .iter()
        .any(|r| r.starts_with("Best RMSE: arima")));
    assert!(report
        .recommendations
        .contains(&"Consider ensemble approach combining traditional and neural models".to_string()));
    assert!(!report.insights.is_empty());
}

#[test]
fn test_best_model_reflects_latest_records_only() {
    let store = Arc::new(MemoryStore::new());
    // arima starts badly, then its newest record wins
    seed_symbol(&store, "AAPL", &[("arima", 9.0), ("var", 2.0)]);
    seed_symbol(&store, "AAPL", &[("arima", 0.5)]);

    let best = evaluator_over(&store).best_model("rmse", Some("AAPL")).unwrap();
    assert_eq!(best.best_model, "arima");
    assert_eq!(best.model_type, ModelCategory::Traditional);
    assert_eq!(
        best.recommendation,
        "Excellent for time series with clear patterns"
    );
}

#[test]
fn test_performance_score_is_bounded() {
    let store = Arc::new(MemoryStore::new());
    seed_symbol(&store, "AAPL", &[("good", 0.01), ("bad", 500.0)]);

    let records = store.performance(Some("AAPL")).unwrap();
    for record in &records {
        let score = performance_score(record);
        assert!((0.0..=100.0).contains(&score));
    }
}
