//! Pipeline events. Every stage reports what it did as a list of events;
//! the pipeline persists them to the event log in emission order.

use crate::types::{AppId, RunId};
use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Variants are added, never removed or reordered.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PipelineEvent {
    // ── Pipeline ───────────────────────────────────
    RunInitialized {
        run_id: RunId,
        as_of: NaiveDate,
    },
    StageStarted {
        stage: String,
    },
    StageCompleted {
        stage: String,
    },
    InvariantViolated {
        stage: String,
        detail: String,
    },

    // ── Reconciliation ─────────────────────────────
    ApplicationsMerged {
        survivor_id: AppId,
        retired_id: AppId,
        source_a_key: String,
        source_b_key: String,
        score: f64,
        manual: bool,
    },
    MatchQueuedForReview {
        source_a_key: String,
        source_b_key: String,
        score: f64,
    },
    MatchRejected {
        source_a_key: String,
        source_b_key: String,
    },
    OverrideTargetMissing {
        source_a_key: String,
        source_b_key: String,
    },

    // ── Cost & chargeback ──────────────────────────
    CostOrphaned {
        app_id: AppId,
        capability: String,
        tier: String,
        usage_date: NaiveDate,
    },
    CostsComputed {
        records: u64,
        orphaned: u64,
    },
    ChargebacksAggregated {
        months: u64,
        records: u64,
        total: Decimal,
    },

    // ── Allocation ─────────────────────────────────
    SharedCostAllocated {
        app_id: AppId,
        month: NaiveDate,
        rule: String,
        method: String,
        total: Decimal,
        sectors: u64,
    },
    SharedCostUnallocated {
        app_id: AppId,
        month: NaiveDate,
        amount: Decimal,
        reason: String,
    },

    // ── Forecasting ────────────────────────────────
    ForecastGenerated {
        app_id: AppId,
        capability: String,
        tier: String,
        method: String,
        periods: u32,
    },
    ForecastSkipped {
        app_id: AppId,
        capability: String,
        tier: String,
        reason: String,
        observed_days: u32,
    },
}

impl PipelineEvent {
    /// Stable name for the event_type column in event_log.
    pub fn type_name(&self) -> &'static str {
        match self {
            PipelineEvent::RunInitialized { .. }        => "run_initialized",
            PipelineEvent::StageStarted { .. }          => "stage_started",
            PipelineEvent::StageCompleted { .. }        => "stage_completed",
            PipelineEvent::InvariantViolated { .. }     => "invariant_violated",
            PipelineEvent::ApplicationsMerged { .. }    => "applications_merged",
            PipelineEvent::MatchQueuedForReview { .. }  => "match_queued_for_review",
            PipelineEvent::MatchRejected { .. }         => "match_rejected",
            PipelineEvent::OverrideTargetMissing { .. } => "override_target_missing",
            PipelineEvent::CostOrphaned { .. }          => "cost_orphaned",
            PipelineEvent::CostsComputed { .. }         => "costs_computed",
            PipelineEvent::ChargebacksAggregated { .. } => "chargebacks_aggregated",
            PipelineEvent::SharedCostAllocated { .. }   => "shared_cost_allocated",
            PipelineEvent::SharedCostUnallocated { .. } => "shared_cost_unallocated",
            PipelineEvent::ForecastGenerated { .. }     => "forecast_generated",
            PipelineEvent::ForecastSkipped { .. }       => "forecast_skipped",
        }
    }
}

/// The event log entry as persisted to SQLite.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventLogEntry {
    pub id: Option<i64>,
    pub run_id: RunId,
    pub stage: String,
    pub event_type: String,
    pub payload: String, // JSON-serialized PipelineEvent
}
