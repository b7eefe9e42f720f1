//! pipeline-runner: headless batch runner for the license chargeback pipeline.
//!
//! Usage:
//!   pipeline-runner --demo-seed 42 --as-of 2025-06-30
//!   pipeline-runner --db chargeback.db --inputs ./inputs --as-of 2025-06-30
//!
//! Input directory layout (every file optional):
//!   applications.json  price_rules.json  usage.json  overrides.json

use anyhow::{Context, Result};
use chrono::NaiveDate;
use license_chargeback_core::{
    command::ManualOverride,
    config::PipelineConfig,
    demo::{self, DemoDataset, DemoOptions},
    diagnostics::RunDiagnostics,
    ingest::{self, ApplicationStub, IngestSummary, UsageInput},
    pipeline::Pipeline,
    pricing::PriceRule,
    store::LicenseStore,
};
use serde::de::DeserializeOwned;
use std::env;
use std::path::Path;

fn main() -> Result<()> {
    env_logger::init();

    let args: Vec<String> = env::args().collect();
    let db = flag(&args, "--db").unwrap_or(":memory:");
    let data_dir = flag(&args, "--data-dir").unwrap_or("./data");
    let inputs = flag(&args, "--inputs");
    let demo_seed: Option<u64> = flag(&args, "--demo-seed")
        .map(|s| s.parse().with_context(|| format!("--demo-seed expects an integer, got '{s}'")))
        .transpose()?;
    let as_of = match flag(&args, "--as-of") {
        Some(s) => NaiveDate::parse_from_str(s, "%Y-%m-%d")
            .with_context(|| format!("--as-of expects YYYY-MM-DD, got '{s}'"))?,
        None => chrono::Local::now().date_naive(),
    };
    let run_id = flag(&args, "--run-id")
        .map(str::to_string)
        .unwrap_or_else(|| format!("run-{}", uuid::Uuid::new_v4()));

    println!("License chargeback pipeline-runner");
    println!("  run_id:    {run_id}");
    println!("  as_of:     {as_of}");
    println!("  db:        {db}");
    println!("  data_dir:  {data_dir}");
    if let Some(seed) = demo_seed {
        println!("  demo seed: {seed}");
    }
    if let Some(dir) = inputs {
        println!("  inputs:    {dir}");
    }
    println!();

    let config = PipelineConfig::load(data_dir)?;
    let store = LicenseStore::open(db)?;
    store.migrate()?;
    log::info!("store: {} migrated", store.path().unwrap_or(":memory:"));

    let dataset = match (demo_seed, inputs) {
        (Some(seed), _) => demo::generate(&DemoOptions::new(seed, as_of)),
        (None, Some(dir)) => load_inputs(Path::new(dir))?,
        (None, None) => DemoDataset::default(),
    };

    let apps = ingest::ingest_applications(&store, &dataset.applications)?;
    let rules = ingest::ingest_price_rules(&store, &dataset.price_rules)?;
    for ov in &dataset.overrides {
        store.upsert_manual_override(ov)?;
    }
    let usage = ingest::ingest_usage(&store, &dataset.usage)?;
    print_ingest("applications", &apps);
    print_ingest("price rules", &rules);
    print_ingest("usage", &usage);
    println!(
        "  overrides      loaded={} on file={}",
        dataset.overrides.len(),
        store.manual_overrides()?.len()
    );
    println!();

    let mut pipeline = Pipeline::build(as_of, store, &config);
    let diag = pipeline.run(&run_id)?;
    print_summary(&diag);

    if diag.has_hard_failures() {
        log::error!("run={run_id} finished with invariant violations");
        std::process::exit(1);
    }
    Ok(())
}

fn flag<'a>(args: &'a [String], name: &str) -> Option<&'a str> {
    args.windows(2)
        .find(|w| w[0] == name)
        .map(|w| w[1].as_str())
}

/// Read a JSON array from `dir/file`; a missing file is an empty list.
fn read_records<T: DeserializeOwned>(dir: &Path, file: &str) -> Result<Vec<T>> {
    let path = dir.join(file);
    if !path.exists() {
        log::info!("inputs: {} not found, skipping", path.display());
        return Ok(Vec::new());
    }
    let content = std::fs::read_to_string(&path)
        .map_err(|e| anyhow::anyhow!("Cannot read {}: {e}", path.display()))?;
    serde_json::from_str(&content).with_context(|| format!("Cannot parse {}", path.display()))
}

fn load_inputs(dir: &Path) -> Result<DemoDataset> {
    let applications: Vec<ApplicationStub> = read_records(dir, "applications.json")?;
    let usage: Vec<UsageInput> = read_records(dir, "usage.json")?;
    let price_rules: Vec<PriceRule> = read_records(dir, "price_rules.json")?;
    let overrides: Vec<ManualOverride> = read_records(dir, "overrides.json")?;
    Ok(DemoDataset {
        applications,
        usage,
        price_rules,
        overrides,
    })
}

fn print_ingest(label: &str, summary: &IngestSummary) {
    println!(
        "  {label:<14} accepted={} duplicates={} rejected={}",
        summary.accepted, summary.duplicates, summary.rejected
    );
}

fn print_summary(diag: &RunDiagnostics) {
    println!("=== Reconciliation ===");
    println!("  auto matched:          {}", diag.auto_matched);
    println!("  manual matched:        {}", diag.manual_matched);
    println!("  needs review:          {}", diag.needs_review);
    println!("  rejected:              {}", diag.rejected);
    println!("  unmatched:             {}", diag.unmatched);
    println!("  stale overrides:       {}", diag.stale_overrides);
    println!("  unresolved:            {}", diag.unresolved_reconciliation);
    println!("  match rate:            {:.2}%", diag.match_rate_pct);
    println!();
    println!("=== Cost & chargeback ===");
    println!("  cost records:          {}", diag.cost_records);
    println!("  orphaned costs:        {}", diag.orphaned_costs);
    println!("  chargeback records:    {}", diag.chargeback_records);
    println!("  direct total:          {}", diag.chargeback_total);
    println!("  cost-center coverage:  {:.2}%", diag.cost_center_coverage_pct);
    println!();
    println!("=== Allocation ===");
    println!("  allocated records:     {}", diag.allocated_records);
    println!("  unallocated:           {} ({})", diag.unallocated_count, diag.unallocated_amount);
    println!();
    println!("=== Forecasting ===");
    println!("  forecasts generated:   {}", diag.forecasts_generated);
    println!("  skipped triples:       {}", diag.forecast_skips);
    println!("  unpriced forecasts:    {}", diag.forecasts_unpriced);
    match diag.forecast_mape_pct {
        Some(mape) => println!("  last-month MAPE:       {mape:.2}%"),
        None => println!("  last-month MAPE:       n/a"),
    }
    println!();
    if diag.has_hard_failures() {
        println!("=== Invariant violations ===");
        for v in &diag.invariant_violations {
            println!("  {v}");
        }
        if !diag.skipped_stages.is_empty() {
            println!("  skipped stages: {}", diag.skipped_stages.join(", "));
        }
    } else {
        println!("No invariant violations.");
    }
}
