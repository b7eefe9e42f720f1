//! Integration tests for the cost & chargeback stage.
//!
//! Tests verify:
//! 1. Cost is units × rate in exact cents, using the rule in force on the usage date
//! 2. Usage without a price rule is an orphan, never a guessed cost
//! 3. Overlapping price rules fail the stage and every stage after it
//! 4. Direct chargeback equals the month's costs and never double counts
//! 5. Cost-center coverage is reported

use chrono::NaiveDate;
use license_chargeback_core::{
    calendar::month_start,
    ingest::{self, ApplicationStub, UsageInput},
    pipeline::Pipeline,
    pricing::PriceRule,
    types::{ChargebackCycle, Source, UNASSIGNED_SECTOR},
};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

fn d(y: i32, m: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, day).unwrap()
}

fn build() -> Pipeline {
    Pipeline::build_test(d(2025, 6, 30)).expect("build_test failed")
}

fn usage(key: &str, date: NaiveDate, capability: &str, tier: &str, units: f64) -> UsageInput {
    UsageInput {
        timestamp: date.and_hms_opt(2, 0, 0).unwrap(),
        app_external_id: key.into(),
        source: Source::Monitoring,
        capability_code: capability.into(),
        tier: tier.into(),
        units,
        node_count: 2,
    }
}

fn rule(capability: &str, tier: &str, start: NaiveDate, end: Option<NaiveDate>, rate: Decimal) -> PriceRule {
    PriceRule {
        id: None,
        capability_code: capability.into(),
        tier: tier.into(),
        start_date: start,
        end_date: end,
        unit_rate: rate,
    }
}

/// One Sales application with an H-code and the APM/Peak price history.
fn seed_sales_app(pipeline: &Pipeline) {
    ingest::ingest_applications(
        &pipeline.store,
        &[ApplicationStub::new(Source::Monitoring, "appd_0001", "Customer Portal")
            .with_tag("sector", "Sales")
            .with_tag("cost_center", "H30110042")],
    )
    .unwrap();
    ingest::ingest_price_rules(
        &pipeline.store,
        &[
            rule("APM", "Peak", d(2024, 1, 1), Some(d(2024, 12, 31)), dec!(1.10)),
            rule("APM", "Peak", d(2025, 1, 1), None, dec!(1.25)),
        ],
    )
    .unwrap();
}

// ─────────────────────────────────────────────────────────────────────────────
// Cost derivation
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn hundred_units_at_one_twenty_five_cost_125() {
    let mut pipeline = build();
    seed_sales_app(&pipeline);
    ingest::ingest_usage(&pipeline.store, &[usage("appd_0001", d(2025, 6, 1), "APM", "Peak", 100.0)]).unwrap();

    let diag = pipeline.run("cost-125").unwrap();
    assert_eq!(diag.cost_records, 1);
    assert_eq!(diag.orphaned_costs, 0);

    let costs = pipeline.store.costs_for_active_applications().unwrap();
    assert_eq!(costs.len(), 1);
    assert_eq!(costs[0].amount, dec!(125.00));
    assert_eq!(costs[0].unit_rate, dec!(1.25));
    assert!(costs[0].price_rule_id.is_some());
}

#[test]
fn rate_follows_the_rule_in_force_on_the_usage_date() {
    let mut pipeline = build();
    seed_sales_app(&pipeline);
    ingest::ingest_usage(
        &pipeline.store,
        &[
            usage("appd_0001", d(2024, 12, 31), "APM", "Peak", 10.0),
            usage("appd_0001", d(2025, 1, 1), "APM", "Peak", 10.0),
        ],
    )
    .unwrap();

    pipeline.run("cost-boundary").unwrap();

    let app = pipeline.store.active_app_for_key(Source::Monitoring, "appd_0001").unwrap().unwrap();
    let old = pipeline.store.cost_for(app, "APM", "Peak", d(2024, 12, 31)).unwrap().unwrap();
    let new = pipeline.store.cost_for(app, "APM", "Peak", d(2025, 1, 1)).unwrap().unwrap();
    assert_eq!(old.amount, dec!(11.00));
    assert_eq!(new.amount, dec!(12.50));
}

#[test]
fn usage_without_a_price_rule_is_an_orphan() {
    let mut pipeline = build();
    seed_sales_app(&pipeline);
    ingest::ingest_usage(
        &pipeline.store,
        &[
            usage("appd_0001", d(2025, 6, 1), "APM", "Peak", 100.0),
            usage("appd_0001", d(2025, 6, 1), "BRUM", "Pro", 40.0),
        ],
    )
    .unwrap();

    let diag = pipeline.run("cost-orphan").unwrap();
    assert_eq!(diag.orphaned_costs, 1);
    assert_eq!(diag.cost_records, 1);
    assert!(!diag.has_hard_failures(), "orphans are data quality, not violations");
    assert_eq!(pipeline.store.count_cost_records().unwrap(), 1);
    assert_eq!(pipeline.store.count_events("cost-orphan", "cost_orphaned").unwrap(), 1);
}

#[test]
fn corrected_rule_that_no_longer_covers_usage_withdraws_its_cost() {
    let mut pipeline = build();
    seed_sales_app(&pipeline);
    ingest::ingest_usage(&pipeline.store, &[usage("appd_0001", d(2025, 6, 1), "APM", "Peak", 100.0)]).unwrap();

    pipeline.run("cost-withdraw-1").unwrap();
    let direct = pipeline.store.chargebacks(Some(ChargebackCycle::Direct)).unwrap();
    assert_eq!(direct.len(), 1);
    assert_eq!(direct[0].amount, dec!(125.00));

    // The 2025 rate is closed at the end of May, leaving June unpriced.
    ingest::ingest_price_rules(
        &pipeline.store,
        &[rule("APM", "Peak", d(2025, 1, 1), Some(d(2025, 5, 31)), dec!(1.25))],
    )
    .unwrap();

    let diag = pipeline.run("cost-withdraw-2").unwrap();
    assert_eq!(diag.orphaned_costs, 1);
    assert_eq!(diag.cost_records, 0);
    assert_eq!(pipeline.store.count_cost_records().unwrap(), 0);
    assert!(pipeline.store.chargebacks(Some(ChargebackCycle::Direct)).unwrap().is_empty());
    assert_eq!(diag.chargeback_total, Decimal::ZERO);
}

#[test]
fn overlapping_rules_fail_the_stage_and_skip_later_stages() {
    let mut pipeline = build();
    seed_sales_app(&pipeline);
    ingest::ingest_price_rules(
        &pipeline.store,
        &[rule("APM", "Peak", d(2025, 3, 1), Some(d(2025, 9, 30)), dec!(2.00))],
    )
    .unwrap();
    ingest::ingest_usage(&pipeline.store, &[usage("appd_0001", d(2025, 6, 1), "APM", "Peak", 100.0)]).unwrap();

    let diag = pipeline.run("cost-overlap").unwrap();
    assert!(diag.has_hard_failures());
    assert_eq!(diag.failed_stages, vec!["cost_chargeback".to_string()]);
    assert_eq!(
        diag.skipped_stages,
        vec!["allocation".to_string(), "forecasting".to_string()]
    );
    assert_eq!(pipeline.store.count_cost_records().unwrap(), 0);
    assert_eq!(pipeline.store.count_events("cost-overlap", "invariant_violated").unwrap(), 1);

    let (status, _) = pipeline.store.run_outcome("cost-overlap").unwrap().unwrap();
    assert_eq!(status, "completed_with_violations");
}

#[test]
fn malformed_rule_fails_the_stage() {
    let mut pipeline = build();
    seed_sales_app(&pipeline);
    ingest::ingest_price_rules(
        &pipeline.store,
        &[rule("MRUM", "Pro", d(2025, 6, 1), Some(d(2025, 5, 1)), dec!(0.20))],
    )
    .unwrap();

    let diag = pipeline.run("cost-malformed").unwrap();
    assert_eq!(diag.failed_stages, vec!["cost_chargeback".to_string()]);
}

// ─────────────────────────────────────────────────────────────────────────────
// Chargeback aggregation
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn direct_chargeback_equals_the_sum_of_monthly_costs() {
    let mut pipeline = build();
    seed_sales_app(&pipeline);
    let records: Vec<UsageInput> = (1..=30)
        .map(|day| usage("appd_0001", d(2025, 6, day), "APM", "Peak", 10.0 + f64::from(day) * 0.37))
        .chain((1..=31).map(|day| usage("appd_0001", d(2025, 5, day), "APM", "Peak", 7.5)))
        .collect();
    ingest::ingest_usage(&pipeline.store, &records).unwrap();

    pipeline.run("cb-conservation").unwrap();

    let costs = pipeline.store.costs_for_active_applications().unwrap();
    let chargebacks = pipeline.store.chargebacks(Some(ChargebackCycle::Direct)).unwrap();
    assert_eq!(chargebacks.len(), 2);
    for cb in &chargebacks {
        let expected: Decimal = costs
            .iter()
            .filter(|c| month_start(c.usage_date) == cb.month && c.app_id == cb.app_id)
            .map(|c| c.amount)
            .sum();
        assert_eq!(cb.amount, expected, "month {}", cb.month);
        assert_eq!(cb.sector, "Sales");
        assert_eq!(cb.cost_center.as_deref(), Some("H30110042"));
    }
    let may = chargebacks.iter().find(|cb| cb.month == d(2025, 5, 1)).unwrap();
    assert_eq!(may.amount, dec!(290.78), "31 days of 9.375 rounded to 9.38");
}

#[test]
fn rerun_never_double_counts() {
    let mut pipeline = build();
    seed_sales_app(&pipeline);
    ingest::ingest_usage(&pipeline.store, &[usage("appd_0001", d(2025, 6, 1), "APM", "Peak", 100.0)]).unwrap();

    pipeline.run("cb-rerun-1").unwrap();
    let first = pipeline.store.chargebacks(None).unwrap();
    ingest::ingest_usage(&pipeline.store, &[usage("appd_0001", d(2025, 6, 1), "APM", "Peak", 100.0)]).unwrap();
    pipeline.run("cb-rerun-2").unwrap();
    let second = pipeline.store.chargebacks(None).unwrap();

    assert_eq!(first, second);
    assert_eq!(second.len(), 1);
    assert_eq!(second[0].amount, dec!(125.00));
    assert_eq!(pipeline.store.count_cost_records().unwrap(), 1);
}

#[test]
fn sector_correction_moves_the_direct_row() {
    let mut pipeline = build();
    seed_sales_app(&pipeline);
    ingest::ingest_usage(&pipeline.store, &[usage("appd_0001", d(2025, 6, 1), "APM", "Peak", 100.0)]).unwrap();
    pipeline.run("cb-sector-1").unwrap();

    ingest::ingest_applications(
        &pipeline.store,
        &[ApplicationStub::new(Source::Monitoring, "appd_0001", "Customer Portal").with_tag("sector", "Finance")],
    )
    .unwrap();
    pipeline.run("cb-sector-2").unwrap();

    let rows = pipeline.store.chargebacks_for_month(d(2025, 6, 1)).unwrap();
    assert_eq!(rows.len(), 1, "the Sales row must not linger");
    assert_eq!(rows[0].sector, "Finance");
    assert_eq!(rows[0].amount, dec!(125.00));
}

#[test]
fn missing_sector_is_charged_to_unassigned() {
    let mut pipeline = build();
    ingest::ingest_applications(
        &pipeline.store,
        &[ApplicationStub::new(Source::Monitoring, "appd_0001", "Edge Computing")],
    )
    .unwrap();
    ingest::ingest_price_rules(&pipeline.store, &[rule("APM", "Peak", d(2025, 1, 1), None, dec!(1.25))]).unwrap();
    ingest::ingest_usage(&pipeline.store, &[usage("appd_0001", d(2025, 6, 1), "APM", "Peak", 8.0)]).unwrap();

    pipeline.run("cb-unassigned").unwrap();
    let rows = pipeline.store.chargebacks(Some(ChargebackCycle::Direct)).unwrap();
    assert_eq!(rows[0].sector, UNASSIGNED_SECTOR);
    assert_eq!(rows[0].amount, dec!(10.00));
}

#[test]
fn cost_center_coverage_is_reported() {
    let mut pipeline = build();
    ingest::ingest_applications(
        &pipeline.store,
        &[
            ApplicationStub::new(Source::Monitoring, "appd_0001", "Customer Portal").with_tag("h_code", "H1"),
            ApplicationStub::new(Source::Monitoring, "appd_0002", "Billing Engine"),
            ApplicationStub::new(Source::Monitoring, "appd_0003", "Audit System"),
            ApplicationStub::new(Source::Monitoring, "appd_0004", "HR Portal").with_tag("cost_center", "H4"),
        ],
    )
    .unwrap();

    let diag = pipeline.run("cb-coverage").unwrap();
    assert_eq!(diag.cost_center_coverage_pct, 50.0);
}

#[test]
fn run_diagnostics_are_persisted_on_the_run_row() {
    let mut pipeline = build();
    seed_sales_app(&pipeline);
    ingest::ingest_usage(&pipeline.store, &[usage("appd_0001", d(2025, 6, 1), "APM", "Peak", 100.0)]).unwrap();

    let diag = pipeline.run("cb-persist").unwrap();
    let (status, json) = pipeline.store.run_outcome("cb-persist").unwrap().unwrap();
    assert_eq!(status, "completed");
    let stored: license_chargeback_core::diagnostics::RunDiagnostics =
        serde_json::from_str(&json.unwrap()).unwrap();
    assert_eq!(stored, diag);
}
