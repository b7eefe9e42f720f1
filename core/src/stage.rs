//! Stage trait.
//!
//! RULE: Every pipeline step implements PipelineStage.
//! The pipeline calls run() on each registered stage once per run,
//! in registration order. The order is fixed and documented in pipeline.rs.

use crate::{
    diagnostics::RunDiagnostics,
    error::PipelineResult,
    event::PipelineEvent,
    store::LicenseStore,
};
use chrono::NaiveDate;

/// What a stage may see of the run.
pub struct StageContext<'a> {
    pub run_id: &'a str,
    /// Business date of the run; history windows end here.
    pub as_of: NaiveDate,
    pub store: &'a LicenseStore,
}

pub trait PipelineStage {
    /// Unique stable name, used in logs and the event log.
    fn name(&self) -> &'static str;

    /// Run the stage to completion.
    ///
    /// Unit-level invariant violations are recorded in `diag` and the
    /// stage keeps going. Returning an invariant-violation error aborts
    /// this stage and every stage after it.
    fn run(
        &mut self,
        ctx: &StageContext<'_>,
        diag: &mut RunDiagnostics,
    ) -> PipelineResult<Vec<PipelineEvent>>;
}
