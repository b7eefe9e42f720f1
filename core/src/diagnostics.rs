//! Per-run counters. Data-quality faults land here instead of being
//! papered over; the runner persists the whole struct as JSON on the
//! run row and derives its exit status from `has_hard_failures`.

use crate::error::PipelineError;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RunDiagnostics {
    // ── Reconciliation ─────────────────────────────
    pub auto_matched: u64,
    pub manual_matched: u64,
    pub needs_review: u64,
    pub rejected: u64,
    pub unmatched: u64,
    /// Link overrides whose Source-B stub is missing or already owned.
    pub stale_overrides: u64,
    /// Source-A applications still without a Source-B key after the stage.
    pub unresolved_reconciliation: u64,
    pub match_rate_pct: f64,

    // ── Cost & chargeback ──────────────────────────
    pub cost_records: u64,
    pub orphaned_costs: u64,
    pub chargeback_records: u64,
    pub chargeback_total: Decimal,
    pub cost_center_coverage_pct: f64,

    // ── Allocation ─────────────────────────────────
    pub allocated_records: u64,
    pub unallocated_count: u64,
    pub unallocated_amount: Decimal,

    // ── Forecasting ────────────────────────────────
    pub forecasts_generated: u64,
    pub forecast_skips: u64,
    pub forecasts_unpriced: u64,
    /// Mean absolute percentage error of last month's forecasts, when any.
    pub forecast_mape_pct: Option<f64>,

    // ── Failures ───────────────────────────────────
    pub invariant_violations: Vec<String>,
    pub failed_stages: Vec<String>,
    pub skipped_stages: Vec<String>,
}

impl RunDiagnostics {
    pub fn record_violation(&mut self, stage: &str, error: &PipelineError) {
        self.invariant_violations.push(format!("{stage}: {error}"));
    }

    /// True when any invariant was violated. Data-quality counters
    /// (orphans, skips, review queue) are not hard failures.
    pub fn has_hard_failures(&self) -> bool {
        !self.invariant_violations.is_empty() || !self.failed_stages.is_empty()
    }
}

/// Percentage rounded to two decimals; zero when the denominator is.
pub fn percentage(part: u64, whole: u64) -> f64 {
    if whole == 0 {
        return 0.0;
    }
    (part as f64 * 10_000.0 / whole as f64).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn percentage_rounds_to_two_places() {
        assert_eq!(percentage(1, 3), 33.33);
        assert_eq!(percentage(2, 3), 66.67);
        assert_eq!(percentage(0, 0), 0.0);
        assert_eq!(percentage(5, 5), 100.0);
    }

    #[test]
    fn data_quality_counters_are_not_hard_failures() {
        let mut diag = RunDiagnostics {
            orphaned_costs: 4,
            forecast_skips: 2,
            needs_review: 7,
            ..RunDiagnostics::default()
        };
        assert!(!diag.has_hard_failures());

        diag.record_violation(
            "allocation",
            &PipelineError::MergeConflict { survivor_id: 1, retired_id: 2 },
        );
        assert!(diag.has_hard_failures());
        assert!(diag.invariant_violations[0].starts_with("allocation: "));
    }
}
