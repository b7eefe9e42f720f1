//! Reconciliation: collapse monitoring-only and CMDB-only stubs that
//! describe the same application into one active record.
//!
//! Manual overrides are applied before any scoring. Otherwise each
//! pending monitoring application is scored against every remaining
//! CMDB stub and only the single best candidate is considered.

use crate::{
    command::OverrideDecision,
    config::ReconciliationConfig,
    diagnostics::{percentage, RunDiagnostics},
    error::{PipelineError, PipelineResult},
    event::PipelineEvent,
    similarity::similarity,
    stage::{PipelineStage, StageContext},
    store::{ApplicationRow, ReconciliationLogRow},
    types::MatchStatus,
};

pub struct ReconciliationStage {
    config: ReconciliationConfig,
}

impl ReconciliationStage {
    pub fn new(config: ReconciliationConfig) -> Self {
        Self { config }
    }

    /// Merge `candidate` into `app` and log the outcome. A lost claim is
    /// recorded as a violation for this pair only.
    fn merge(
        &self,
        ctx: &StageContext<'_>,
        diag: &mut RunDiagnostics,
        app: &ApplicationRow,
        candidate: &ApplicationRow,
        score: f64,
        status: MatchStatus,
        events: &mut Vec<PipelineEvent>,
    ) -> PipelineResult<()> {
        let a_key = app.source_a_key.clone().unwrap_or_default();
        let b_key = candidate.source_b_key.clone().unwrap_or_default();

        match ctx.store.merge_applications(app.app_id, candidate.app_id) {
            Ok(()) => {}
            Err(e @ PipelineError::MergeConflict { .. }) => {
                log::error!("stage=reconciliation {e}");
                diag.record_violation(self.name(), &e);
                events.push(PipelineEvent::InvariantViolated {
                    stage: self.name().to_string(),
                    detail: e.to_string(),
                });
                return Ok(());
            }
            Err(e) => return Err(e),
        }

        ctx.store.log_reconciliation(&ReconciliationLogRow {
            id: None,
            run_id: ctx.run_id.to_string(),
            source_a_key: a_key.clone(),
            source_b_key: b_key.clone(),
            source_a_name: app.source_a_name.clone(),
            source_b_name: candidate.source_b_name.clone(),
            score,
            status,
            app_id: Some(app.app_id),
        })?;

        match status {
            MatchStatus::ManualMatched => diag.manual_matched += 1,
            _ => diag.auto_matched += 1,
        }
        log::info!(
            "stage=reconciliation merged '{}' <- '{}' score={score:.2} status={}",
            app.source_a_name.as_deref().unwrap_or_default(),
            candidate.source_b_name.as_deref().unwrap_or_default(),
            status.as_str()
        );
        events.push(PipelineEvent::ApplicationsMerged {
            survivor_id: app.app_id,
            retired_id: candidate.app_id,
            source_a_key: a_key,
            source_b_key: b_key,
            score,
            manual: status == MatchStatus::ManualMatched,
        });
        Ok(())
    }
}

fn position_of_key(pool: &[ApplicationRow], b_key: &str) -> Option<usize> {
    pool.iter()
        .position(|c| c.source_b_key.as_deref() == Some(b_key))
}

/// Highest-scoring candidate; the lowest id wins a tie.
fn best_candidate(name: &str, pool: &[ApplicationRow]) -> Option<(usize, f64)> {
    let mut best: Option<(usize, f64)> = None;
    for (idx, candidate) in pool.iter().enumerate() {
        let score = similarity(name, candidate.source_b_name.as_deref().unwrap_or_default());
        if best.map_or(true, |(_, top)| score > top) {
            best = Some((idx, score));
        }
    }
    best
}

impl PipelineStage for ReconciliationStage {
    fn name(&self) -> &'static str {
        "reconciliation"
    }

    fn run(
        &mut self,
        ctx: &StageContext<'_>,
        diag: &mut RunDiagnostics,
    ) -> PipelineResult<Vec<PipelineEvent>> {
        let store = ctx.store;
        let pending = store.source_a_only_applications()?;
        let mut pool = store.source_b_only_applications()?;
        let mut events = Vec::new();

        log::info!(
            "stage=reconciliation pending_a={} candidates_b={}",
            pending.len(),
            pool.len()
        );

        for app in &pending {
            let a_key = app.source_a_key.clone().unwrap_or_default();
            let a_name = app.source_a_name.clone().unwrap_or_default();

            if let Some(ov) = store.manual_override(&a_key)? {
                match &ov.decision {
                    OverrideDecision::Link { source_b_key } => {
                        match position_of_key(&pool, source_b_key) {
                            Some(idx) => {
                                let candidate = pool.remove(idx);
                                self.merge(ctx, diag, app, &candidate, 100.0, MatchStatus::ManualMatched, &mut events)?;
                            }
                            None => {
                                log::warn!(
                                    "stage=reconciliation override for '{a_key}' names '{source_b_key}', \
                                     which is missing or already owned"
                                );
                                diag.stale_overrides += 1;
                                events.push(PipelineEvent::OverrideTargetMissing {
                                    source_a_key: a_key.clone(),
                                    source_b_key: source_b_key.clone(),
                                });
                            }
                        }
                    }
                    OverrideDecision::Reject { source_b_key } => {
                        let b_name = position_of_key(&pool, source_b_key)
                            .and_then(|idx| pool[idx].source_b_name.clone());
                        store.log_reconciliation(&ReconciliationLogRow {
                            id: None,
                            run_id: ctx.run_id.to_string(),
                            source_a_key: a_key.clone(),
                            source_b_key: source_b_key.clone(),
                            source_a_name: app.source_a_name.clone(),
                            source_b_name: b_name,
                            score: 0.0,
                            status: MatchStatus::Rejected,
                            app_id: None,
                        })?;
                        diag.rejected += 1;
                        events.push(PipelineEvent::MatchRejected {
                            source_a_key: a_key.clone(),
                            source_b_key: source_b_key.clone(),
                        });
                    }
                }
                continue;
            }

            match best_candidate(&a_name, &pool) {
                Some((idx, score)) if score >= self.config.auto_match_threshold => {
                    let candidate = pool.remove(idx);
                    self.merge(ctx, diag, app, &candidate, score, MatchStatus::AutoMatched, &mut events)?;
                }
                Some((idx, score)) if score >= self.config.review_threshold => {
                    let candidate = &pool[idx];
                    let b_key = candidate.source_b_key.clone().unwrap_or_default();
                    store.log_reconciliation(&ReconciliationLogRow {
                        id: None,
                        run_id: ctx.run_id.to_string(),
                        source_a_key: a_key.clone(),
                        source_b_key: b_key.clone(),
                        source_a_name: app.source_a_name.clone(),
                        source_b_name: candidate.source_b_name.clone(),
                        score,
                        status: MatchStatus::NeedsReview,
                        app_id: None,
                    })?;
                    diag.needs_review += 1;
                    log::debug!(
                        "stage=reconciliation review '{a_name}' ~ '{}' score={score:.2}",
                        candidate.source_b_name.as_deref().unwrap_or_default()
                    );
                    events.push(PipelineEvent::MatchQueuedForReview {
                        source_a_key: a_key,
                        source_b_key: b_key,
                        score,
                    });
                }
                _ => diag.unmatched += 1,
            }
        }

        let active = store.active_applications()?;
        let with_a: Vec<_> = active.iter().filter(|a| a.source_a_key.is_some()).collect();
        let resolved = with_a.iter().filter(|a| a.source_b_key.is_some()).count() as u64;
        diag.unresolved_reconciliation = with_a.len() as u64 - resolved;
        diag.match_rate_pct = percentage(resolved, with_a.len() as u64);

        log::info!(
            "stage=reconciliation auto={} manual={} review={} rejected={} unmatched={} match_rate={:.2}%",
            diag.auto_matched,
            diag.manual_matched,
            diag.needs_review,
            diag.rejected,
            diag.unmatched,
            diag.match_rate_pct
        );
        Ok(events)
    }
}
