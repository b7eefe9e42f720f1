use crate::types::AppId;
use chrono::NaiveDate;
use rust_decimal::Decimal;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("No active application for {origin} key '{external_id}'")]
    UnknownApplication { origin: String, external_id: String },

    #[error("Invalid price rule {capability}/{tier} starting {start}: {reason}")]
    InvalidPriceRule {
        capability: String,
        tier: String,
        start: NaiveDate,
        reason: String,
    },

    #[error("Overlapping price rules for {capability}/{tier}: {first_start} and {second_start}")]
    OverlappingPriceRules {
        capability: String,
        tier: String,
        first_start: NaiveDate,
        second_start: NaiveDate,
    },

    #[error("{matches} price rules match {capability}/{tier} on {date}")]
    AmbiguousPriceRule {
        capability: String,
        tier: String,
        date: NaiveDate,
        matches: usize,
    },

    #[error("Allocation for app {app_id} in {month} sums to {allocated}, expected {expected}")]
    AllocationMismatch {
        app_id: AppId,
        month: NaiveDate,
        allocated: Decimal,
        expected: Decimal,
    },

    #[error("Forecast bounds inverted for app {app_id} {capability}/{tier} {month}: {low} <= {projected} <= {high} does not hold")]
    ForecastBoundsInverted {
        app_id: AppId,
        capability: String,
        tier: String,
        month: NaiveDate,
        low: f64,
        projected: f64,
        high: f64,
    },

    #[error("Merge conflict: stub {retired_id} is already owned, cannot merge into {survivor_id}")]
    MergeConflict { survivor_id: AppId, retired_id: AppId },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl PipelineError {
    /// Hard failures that point at upstream configuration bugs rather
    /// than data variance. These are never masked.
    pub fn is_invariant_violation(&self) -> bool {
        matches!(
            self,
            PipelineError::InvalidPriceRule { .. }
                | PipelineError::OverlappingPriceRules { .. }
                | PipelineError::AmbiguousPriceRule { .. }
                | PipelineError::AllocationMismatch { .. }
                | PipelineError::ForecastBoundsInverted { .. }
                | PipelineError::MergeConflict { .. }
        )
    }
}

pub type PipelineResult<T> = Result<T, PipelineError>;
