//! Integration tests for the forecasting stage.
//!
//! Tests verify:
//! 1. A triple with enough history gets one forecast per horizon month
//! 2. Confidence bounds always bracket the projection and are non-negative
//! 3. Thin history is skipped, unpriced capabilities forecast units only
//! 4. Last month's forecasts are audited against actual usage

use chrono::{Days, NaiveDate};
use license_chargeback_core::{
    ingest::{self, ApplicationStub, UsageInput},
    pipeline::Pipeline,
    pricing::{round_currency, PriceRule},
    types::{AppId, Source},
};
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

fn d(y: i32, m: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, day).unwrap()
}

fn build(as_of: NaiveDate) -> Pipeline {
    let pipeline = Pipeline::build_test(as_of).expect("build_test failed");
    ingest::ingest_price_rules(
        &pipeline.store,
        &[PriceRule {
            id: None,
            capability_code: "APM".into(),
            tier: "Peak".into(),
            start_date: d(2025, 1, 1),
            end_date: None,
            unit_rate: dec!(1.25),
        }],
    )
    .unwrap();
    pipeline
}

fn app(pipeline: &Pipeline, key: &str) -> AppId {
    pipeline
        .store
        .upsert_application_stub(
            &ApplicationStub::new(Source::Monitoring, key, key).with_tag("sector", "Finance"),
        )
        .unwrap()
}

/// `days` consecutive daily readings ending on `last`; `units(i)` gives
/// the reading for the i-th day.
fn daily_usage(
    pipeline: &Pipeline,
    key: &str,
    capability: &str,
    tier: &str,
    last: NaiveDate,
    days: u64,
    units: impl Fn(u64) -> f64,
) {
    let first = last.checked_sub_days(Days::new(days - 1)).unwrap();
    let records: Vec<UsageInput> = (0..days)
        .map(|i| UsageInput {
            timestamp: first
                .checked_add_days(Days::new(i))
                .unwrap()
                .and_hms_opt(2, 0, 0)
                .unwrap(),
            app_external_id: key.into(),
            source: Source::Monitoring,
            capability_code: capability.into(),
            tier: tier.into(),
            units: units(i),
            node_count: 4,
        })
        .collect();
    let summary = ingest::ingest_usage(&pipeline.store, &records).unwrap();
    assert_eq!(summary.accepted, days);
}

// ─────────────────────────────────────────────────────────────────────────────
// Projections
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn growing_usage_gets_a_full_horizon_of_forecasts() {
    let mut pipeline = build(d(2025, 6, 30));
    let app_id = app(&pipeline, "trend-app");
    daily_usage(&pipeline, "trend-app", "APM", "Peak", d(2025, 6, 30), 60, |i| 100.0 + i as f64);

    let diag = pipeline.run("fc-trend").unwrap();
    assert!(!diag.has_hard_failures());
    assert_eq!(diag.forecasts_generated, 12);
    assert_eq!(diag.forecast_skips, 0);
    assert_eq!(diag.forecasts_unpriced, 0);

    let forecasts = pipeline.store.forecasts_for_application(app_id).unwrap();
    assert_eq!(forecasts.len(), 12);
    assert_eq!(forecasts[0].target_month, d(2025, 7, 1));
    assert_eq!(forecasts[11].target_month, d(2026, 6, 1));
    assert!(
        forecasts[0].projected_units > 31.0 * 100.0,
        "July should extrapolate above the historic floor, got {}",
        forecasts[0].projected_units
    );

    for f in &forecasts {
        assert!(f.confidence_low >= 0.0);
        assert!(f.confidence_low <= f.projected_units && f.projected_units <= f.confidence_high);
        assert_eq!(f.method, "ensemble_linear_exp");
        assert_eq!(f.generated_on, d(2025, 6, 30));
        let expected = round_currency(Decimal::from_f64(f.projected_units).unwrap() * dec!(1.25));
        assert_eq!(f.projected_cost, Some(expected), "{}", f.target_month);
    }
}

#[test]
fn rerun_on_the_same_day_replaces_forecasts() {
    let mut pipeline = build(d(2025, 6, 30));
    let app_id = app(&pipeline, "trend-app");
    daily_usage(&pipeline, "trend-app", "APM", "Peak", d(2025, 6, 30), 45, |i| 50.0 + (i % 7) as f64);

    pipeline.run("fc-rerun-1").unwrap();
    let first = pipeline.store.forecasts_for_application(app_id).unwrap();
    pipeline.run("fc-rerun-2").unwrap();
    let second = pipeline.store.forecasts_for_application(app_id).unwrap();

    assert_eq!(second.len(), 12);
    assert_eq!(first, second);
}

#[test]
fn constant_usage_forecasts_a_flat_band() {
    let mut pipeline = build(d(2025, 6, 30));
    let app_id = app(&pipeline, "flat-app");
    daily_usage(&pipeline, "flat-app", "APM", "Peak", d(2025, 6, 30), 60, |_| 100.0);

    pipeline.run("fc-flat").unwrap();

    let forecasts = pipeline.store.forecasts_for_application(app_id).unwrap();
    let july = &forecasts[0];
    assert_eq!(july.projected_units, 3100.0);
    assert_eq!(july.confidence_low, 3100.0);
    assert_eq!(july.confidence_high, 3100.0);
    assert_eq!(july.projected_cost, Some(dec!(3875.00)));
    let september = forecasts.iter().find(|f| f.target_month == d(2025, 9, 1)).unwrap();
    assert_eq!(september.projected_units, 3000.0);
}

// ─────────────────────────────────────────────────────────────────────────────
// Skips and unpriced triples
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn thin_history_is_skipped() {
    let mut pipeline = build(d(2025, 6, 30));
    let app_id = app(&pipeline, "new-app");
    daily_usage(&pipeline, "new-app", "APM", "Peak", d(2025, 6, 30), 10, |_| 20.0);

    let diag = pipeline.run("fc-thin").unwrap();
    assert_eq!(diag.forecasts_generated, 0);
    assert_eq!(diag.forecast_skips, 1);
    assert!(!diag.has_hard_failures());
    assert!(pipeline.store.forecasts_for_application(app_id).unwrap().is_empty());
    assert_eq!(pipeline.store.count_events("fc-thin", "forecast_skipped").unwrap(), 1);
}

#[test]
fn history_outside_the_window_does_not_count() {
    let mut pipeline = build(d(2025, 6, 30));
    let app_id = app(&pipeline, "dormant-app");
    // 60 days of usage that stopped in February, well before the 90-day window.
    daily_usage(&pipeline, "dormant-app", "APM", "Peak", d(2025, 2, 28), 60, |_| 80.0);

    let diag = pipeline.run("fc-dormant").unwrap();
    assert_eq!(diag.forecasts_generated, 0);
    assert!(pipeline.store.forecasts_for_application(app_id).unwrap().is_empty());
}

#[test]
fn unpriced_capability_forecasts_units_without_cost() {
    let mut pipeline = build(d(2025, 6, 30));
    let app_id = app(&pipeline, "rum-app");
    daily_usage(&pipeline, "rum-app", "BRUM", "Pro", d(2025, 6, 30), 40, |i| 10.0 + i as f64 * 0.5);

    let diag = pipeline.run("fc-unpriced").unwrap();
    assert_eq!(diag.forecasts_generated, 12);
    assert_eq!(diag.forecasts_unpriced, 12);

    let forecasts = pipeline.store.forecasts_for_application(app_id).unwrap();
    assert!(forecasts.iter().all(|f| f.projected_cost.is_none()));
    assert!(forecasts.iter().all(|f| f.projected_units > 0.0));
}

#[test]
fn each_capability_tier_pair_is_forecast_separately() {
    let mut pipeline = build(d(2025, 6, 30));
    let app_id = app(&pipeline, "multi-app");
    daily_usage(&pipeline, "multi-app", "APM", "Peak", d(2025, 6, 30), 40, |_| 10.0);
    daily_usage(&pipeline, "multi-app", "BRUM", "Pro", d(2025, 6, 30), 40, |_| 30.0);

    let diag = pipeline.run("fc-multi").unwrap();
    assert_eq!(diag.forecasts_generated, 24);

    let july = pipeline.store.forecasts_for_month(d(2025, 7, 1)).unwrap();
    assert_eq!(july.len(), 2);
    assert!(july.iter().all(|f| f.app_id == app_id));
}

// ─────────────────────────────────────────────────────────────────────────────
// Accuracy audit
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn accuracy_is_measured_against_last_months_actuals() {
    let mut pipeline = build(d(2025, 5, 31));
    app(&pipeline, "steady-app");
    daily_usage(&pipeline, "steady-app", "APM", "Peak", d(2025, 5, 31), 60, |_| 100.0);

    let first = pipeline.run("fc-audit-may").unwrap();
    assert_eq!(first.forecast_mape_pct, None, "no earlier forecasts to audit");

    // June actually used what was forecast: 100 per day.
    daily_usage(&pipeline, "steady-app", "APM", "Peak", d(2025, 6, 30), 30, |_| 100.0);
    pipeline.as_of = d(2025, 7, 15);
    let second = pipeline.run("fc-audit-july").unwrap();

    let mape = second.forecast_mape_pct.expect("June forecasts should be audited");
    assert!(mape < 0.01, "mape = {mape}");
}

#[test]
fn accuracy_reflects_a_missed_forecast() {
    let mut pipeline = build(d(2025, 5, 31));
    app(&pipeline, "surprise-app");
    daily_usage(&pipeline, "surprise-app", "APM", "Peak", d(2025, 5, 31), 60, |_| 100.0);
    pipeline.run("fc-miss-may").unwrap();

    // June doubled: forecast 3000, actual 6000, 50% error.
    daily_usage(&pipeline, "surprise-app", "APM", "Peak", d(2025, 6, 30), 30, |_| 200.0);
    pipeline.as_of = d(2025, 7, 15);
    let diag = pipeline.run("fc-miss-july").unwrap();

    assert_eq!(diag.forecast_mape_pct, Some(50.0));
}
