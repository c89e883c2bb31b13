use chrono::{Duration, TimeZone, Utc};
use rstest::rstest;

use forecast_engine::config::{ModelConfigs, RecurrentConfig};
use forecast_engine::data::TimeSeriesFrame;
use forecast_engine::models::{build_model, ModelKind};
use forecast_engine::provider::{MarketDataProvider, SyntheticMarketData};
use forecast_engine::ForecastError;

// Realistic OHLCV history so the multivariate models have volume to work with
fn market_frame(days: u32) -> TimeSeriesFrame {
    let bars = SyntheticMarketData::new(9).fetch_bars("AAPL", days).unwrap();
    TimeSeriesFrame::from_bars(&bars).unwrap()
}

fn close_only_frame(values: Vec<f64>) -> TimeSeriesFrame {
    let start = Utc.with_ymd_and_hms(2023, 1, 1, 0, 0, 0).unwrap();
    let dates = (0..values.len())
        .map(|i| start + Duration::days(i as i64))
        .collect();
    TimeSeriesFrame::new(dates, values).unwrap()
}

// Sequence models sized down so the tests stay quick
fn cheap_configs() -> ModelConfigs {
    ModelConfigs {
        recurrent: RecurrentConfig::default()
            .with_sequence_length(10)
            .with_hidden_size(6)
            .with_epochs(2)
            .with_batch_size(8),
        ..Default::default()
    }
}

#[rstest]
#[case::moving_average(ModelKind::MovingAverage)]
#[case::arima(ModelKind::Arima)]
#[case::var(ModelKind::Var)]
fn test_baseline_kinds_train_and_predict(#[case] kind: ModelKind) {
    let frame = market_frame(160);
    let train = frame.slice(0, Some(130)).unwrap();
    let test = frame.slice(130, None).unwrap();

    let mut model = build_model(kind, &cheap_configs());
    model.train(&train).unwrap();

    let predictions = model.predict(12).unwrap();
    assert_eq!(predictions.len(), 12);
    assert!(predictions.iter().all(|v| v.is_finite()));

    let info = model.describe();
    assert!(info.is_trained);
    assert_eq!(info.kind, kind);

    let metrics = model.evaluate(&test).unwrap();
    assert!(metrics.rmse.is_finite());
    assert!(metrics.rmse >= 0.0);
    // RMSE never undercuts MAE
    assert!(metrics.rmse >= metrics.mae - 1e-9);
}

#[rstest]
#[case::lstm(ModelKind::Lstm)]
#[case::gru(ModelKind::Gru)]
fn test_sequence_kinds_train_and_predict(#[case] kind: ModelKind) {
    let frame = market_frame(160);

    let mut model = build_model(kind, &cheap_configs());
    model.train(&frame).unwrap();

    let predictions = model.predict(8).unwrap();
    assert_eq!(predictions.len(), 8);
    assert!(predictions.iter().all(|v| v.is_finite()));

    let info = model.describe();
    assert!(info.is_trained);
    assert_eq!(info.kind, kind);
}

#[test]
fn test_predict_before_train_fails_for_every_kind() {
    let configs = cheap_configs();
    for kind in ModelKind::all() {
        let model = build_model(kind, &configs);
        assert!(
            matches!(model.predict(5), Err(ForecastError::NotTrained(_))),
            "{} predicted without training",
            kind
        );
    }
}

#[test]
fn test_zero_horizon_is_empty() {
    let frame = market_frame(120);
    for kind in ModelKind::baselines() {
        let mut model = build_model(kind, &cheap_configs());
        model.train(&frame).unwrap();
        assert!(model.predict(0).unwrap().is_empty());
    }
}

#[test]
fn test_arima_stays_near_the_trend_level() {
    // Noisy upward drift from 100 to about 180
    let values: Vec<f64> = (0..80)
        .map(|i| 100.0 + i as f64 + (i as f64 * 0.7).sin() * 0.5)
        .collect();
    let frame = close_only_frame(values);

    let mut model = build_model(ModelKind::Arima, &cheap_configs());
    model.train(&frame).unwrap();

    // Forecasts continue at price level, not on the differenced scale
    let predictions = model.predict(5).unwrap();
    assert!(predictions.iter().all(|v| *v > 140.0 && *v < 230.0));
}

#[test]
fn test_var_needs_a_volume_column() {
    let frame = close_only_frame((0..120).map(|i| 100.0 + i as f64).collect());
    let mut model = build_model(ModelKind::Var, &cheap_configs());
    assert!(matches!(
        model.train(&frame),
        Err(ForecastError::DataError(_))
    ));
}

#[test]
fn test_insufficient_history_is_rejected() {
    let frame = market_frame(10);
    for kind in [ModelKind::MovingAverage, ModelKind::Arima, ModelKind::Var] {
        let mut model = build_model(kind, &cheap_configs());
        assert!(
            matches!(model.train(&frame), Err(ForecastError::InsufficientData(_))),
            "{} trained on 10 rows",
            kind
        );
    }
}

#[test]
fn test_retrain_replaces_the_previous_fit() {
    let mut model = build_model(ModelKind::MovingAverage, &cheap_configs());

    model
        .train(&close_only_frame(vec![10.0; 30]))
        .unwrap();
    let first = model.predict(3).unwrap();
    assert_eq!(first, vec![10.0, 10.0, 10.0]);

    model
        .train(&close_only_frame(vec![50.0; 30]))
        .unwrap();
    let second = model.predict(3).unwrap();
    assert_eq!(second, vec![50.0, 50.0, 50.0]);
}
