//! The pipeline driver.
//!
//! EXECUTION ORDER (fixed, documented, never reordered):
//!   1. Reconciliation      (collapse dual-keyed applications)
//!   2. Cost & chargeback   (price usage, aggregate monthly direct cost)
//!   3. Allocation          (redistribute shared-service cost)
//!   4. Forecasting         (project usage and cost forward)
//!
//! RULES:
//!   - Stages execute in registration order, once per run.
//!   - Stages share state only through the store.
//!   - Every event a stage emits is persisted to the event log.
//!   - A stage-level invariant violation stops the run at that stage.

use crate::{
    allocation_stage::AllocationStage,
    config::PipelineConfig,
    cost_stage::CostChargebackStage,
    diagnostics::RunDiagnostics,
    error::PipelineResult,
    event::{EventLogEntry, PipelineEvent},
    forecast_stage::ForecastStage,
    reconciliation_stage::ReconciliationStage,
    stage::{PipelineStage, StageContext},
    store::LicenseStore,
};
use chrono::NaiveDate;

pub struct Pipeline {
    pub as_of: NaiveDate,
    stages:    Vec<Box<dyn PipelineStage>>,
    pub store: LicenseStore,
}

impl Pipeline {
    pub fn new(as_of: NaiveDate, store: LicenseStore) -> Self {
        Self {
            as_of,
            stages: Vec::new(),
            store,
        }
    }

    /// Build a fully wired pipeline with every stage registered.
    pub fn build(as_of: NaiveDate, store: LicenseStore, config: &PipelineConfig) -> Self {
        let mut pipeline = Pipeline::new(as_of, store);
        // EXECUTION ORDER: fixed and documented. Never reorder.
        pipeline.register(Box::new(ReconciliationStage::new(config.reconciliation.clone())));
        pipeline.register(Box::new(CostChargebackStage::new()));
        pipeline.register(Box::new(AllocationStage::new(config.allocation.clone())));
        pipeline.register(Box::new(ForecastStage::new(config.forecast.clone())));
        pipeline
    }

    /// In-memory, migrated store and the default test configuration.
    pub fn build_test(as_of: NaiveDate) -> PipelineResult<Self> {
        Self::build_test_with(as_of, &PipelineConfig::default_test())
    }

    pub fn build_test_with(as_of: NaiveDate, config: &PipelineConfig) -> PipelineResult<Self> {
        let store = LicenseStore::in_memory()?;
        store.migrate()?;
        Ok(Self::build(as_of, store, config))
    }

    /// Register a stage. Call in the documented execution order.
    pub fn register(&mut self, stage: Box<dyn PipelineStage>) {
        self.stages.push(stage);
    }

    pub fn stage_names(&self) -> Vec<&'static str> {
        self.stages.iter().map(|s| s.name()).collect()
    }

    /// Run every stage once. Infrastructure errors propagate; invariant
    /// violations end up in the returned diagnostics.
    pub fn run(&mut self, run_id: &str) -> PipelineResult<RunDiagnostics> {
        let store = &self.store;
        let mut diag = RunDiagnostics::default();

        store.insert_run(run_id, self.as_of, env!("CARGO_PKG_VERSION"))?;
        persist(
            store,
            run_id,
            "pipeline",
            &[PipelineEvent::RunInitialized {
                run_id: run_id.to_string(),
                as_of: self.as_of,
            }],
        )?;
        log::info!("run={run_id} as_of={} stages={}", self.as_of, self.stages.len());

        let ctx = StageContext {
            run_id,
            as_of: self.as_of,
            store,
        };
        let mut aborted_at: Option<usize> = None;

        for (idx, stage) in self.stages.iter_mut().enumerate() {
            let name = stage.name();
            persist(store, run_id, name, &[PipelineEvent::StageStarted { stage: name.to_string() }])?;

            match stage.run(&ctx, &mut diag) {
                Ok(events) => {
                    persist(store, run_id, name, &events)?;
                    persist(store, run_id, name, &[PipelineEvent::StageCompleted { stage: name.to_string() }])?;
                    log::debug!("run={run_id} stage={name} completed events={}", events.len());
                }
                Err(e) if e.is_invariant_violation() => {
                    log::error!("run={run_id} stage={name} aborted: {e}");
                    diag.record_violation(name, &e);
                    diag.failed_stages.push(name.to_string());
                    persist(
                        store,
                        run_id,
                        name,
                        &[PipelineEvent::InvariantViolated {
                            stage: name.to_string(),
                            detail: e.to_string(),
                        }],
                    )?;
                    aborted_at = Some(idx);
                    break;
                }
                Err(e) => {
                    log::error!("run={run_id} stage={name} failed: {e}");
                    diag.failed_stages.push(name.to_string());
                    store.finish_run(run_id, "failed", &serde_json::to_string(&diag)?)?;
                    return Err(e);
                }
            }
        }

        if let Some(idx) = aborted_at {
            diag.skipped_stages = self.stages[idx + 1..]
                .iter()
                .map(|s| s.name().to_string())
                .collect();
        }

        let status = if diag.has_hard_failures() {
            "completed_with_violations"
        } else {
            "completed"
        };
        store.finish_run(run_id, status, &serde_json::to_string(&diag)?)?;
        log::info!("run={run_id} finished status={status}");
        Ok(diag)
    }
}

fn persist(
    store: &LicenseStore,
    run_id: &str,
    stage: &str,
    events: &[PipelineEvent],
) -> PipelineResult<()> {
    for event in events {
        let entry = EventLogEntry {
            id:         None,
            run_id:     run_id.to_string(),
            stage:      stage.to_string(),
            event_type: event.type_name().to_string(),
            payload:    serde_json::to_string(event)?,
        };
        store.append_event(&entry)?;
    }
    Ok(())
}
