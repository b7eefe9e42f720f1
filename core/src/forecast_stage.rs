//! Forecasting: project monthly usage and cost for every
//! (application, capability, tier) with enough recent history.
//!
//! Each triple is modelled on its daily unit totals over the trailing
//! window. The daily-rate projection is sampled at each future month's
//! midpoint and scaled by the month's length.

use crate::{
    calendar::{add_months, days_in_month, month_end, month_midpoint, previous_month},
    config::ForecastModelConfig,
    diagnostics::RunDiagnostics,
    error::{PipelineError, PipelineResult},
    event::PipelineEvent,
    forecast_model::{ensemble, LinearTrend, Projection, SmoothedLevel},
    pricing::{cost_for, PriceTable},
    stage::{PipelineStage, StageContext},
    store::ForecastRow,
    types::AppId,
};
use chrono::{Days, NaiveDate};
use std::collections::{BTreeMap, HashMap};

type Triple = (AppId, String, String);

pub struct ForecastStage {
    config: ForecastModelConfig,
}

/// Why a triple produced no forecast.
const INSUFFICIENT_HISTORY: &str = "insufficient_history";
const DEGENERATE_HISTORY: &str = "degenerate_history";

impl ForecastStage {
    pub fn new(config: ForecastModelConfig) -> Self {
        Self { config }
    }

    fn window_start(&self, as_of: NaiveDate) -> NaiveDate {
        let span = u64::from(self.config.history_window_days.saturating_sub(1));
        as_of.checked_sub_days(Days::new(span)).unwrap_or(as_of)
    }

    /// Monthly projections for one triple, or None when a model cannot
    /// be fitted. Bounds are checked before anything is written.
    fn project_triple(
        &self,
        triple: &Triple,
        window_start: NaiveDate,
        as_of: NaiveDate,
        daily: &BTreeMap<NaiveDate, f64>,
    ) -> PipelineResult<Option<Vec<(NaiveDate, Projection)>>> {
        let points: Vec<(f64, f64)> = daily
            .iter()
            .map(|(date, units)| ((*date - window_start).num_days() as f64, *units))
            .collect();
        let series: Vec<f64> = points.iter().map(|(_, y)| *y).collect();
        let last_x = points.last().map_or(0.0, |(x, _)| *x);

        let (Some(linear), Some(smoothing)) = (
            LinearTrend::fit(&points),
            SmoothedLevel::fit(&series, self.config.smoothing_alpha),
        ) else {
            return Ok(None);
        };

        let z = self.config.z_score;
        let mut months = Vec::with_capacity(self.config.horizon_months as usize);
        for k in 1..=self.config.horizon_months {
            let month = add_months(as_of, k);
            let x0 = (month_midpoint(month) - window_start).num_days() as f64;
            let daily_rate = ensemble(
                linear.project(x0, z),
                smoothing.project(x0 - last_x, z),
                self.config.linear_weight,
                self.config.smoothing_weight,
            );
            let monthly = daily_rate
                .scaled(f64::from(days_in_month(month)))
                .clamped_non_negative()
                .rounded();
            if !monthly.is_ordered() {
                return Err(PipelineError::ForecastBoundsInverted {
                    app_id: triple.0,
                    capability: triple.1.clone(),
                    tier: triple.2.clone(),
                    month,
                    low: monthly.low,
                    projected: monthly.point,
                    high: monthly.high,
                });
            }
            months.push((month, monthly));
        }
        Ok(Some(months))
    }

    /// MAPE of stored forecasts for the month before `as_of` that were
    /// generated before that month began.
    fn accuracy_audit(&self, ctx: &StageContext<'_>) -> PipelineResult<Option<f64>> {
        let target = previous_month(ctx.as_of);
        let forecasts: Vec<ForecastRow> = ctx
            .store
            .forecasts_for_month(target)?
            .into_iter()
            .filter(|f| f.generated_on < target)
            .collect();
        if forecasts.is_empty() {
            return Ok(None);
        }

        let mut actual: HashMap<Triple, f64> = HashMap::new();
        for usage in ctx.store.usage_between(target, month_end(target))? {
            *actual
                .entry((usage.app_id, usage.capability_code, usage.tier))
                .or_default() += usage.units;
        }

        let errors: Vec<f64> = forecasts
            .iter()
            .filter_map(|f| {
                let key = (f.app_id, f.capability_code.clone(), f.tier.clone());
                let observed = *actual.get(&key)?;
                (observed > 0.0).then(|| (observed - f.projected_units).abs() / observed)
            })
            .collect();
        if errors.is_empty() {
            return Ok(None);
        }
        let mape = errors.iter().sum::<f64>() / errors.len() as f64 * 100.0;
        Ok(Some((mape * 100.0).round() / 100.0))
    }
}

impl PipelineStage for ForecastStage {
    fn name(&self) -> &'static str {
        "forecasting"
    }

    fn run(
        &mut self,
        ctx: &StageContext<'_>,
        diag: &mut RunDiagnostics,
    ) -> PipelineResult<Vec<PipelineEvent>> {
        let table = PriceTable::new(ctx.store.price_rules()?)?;
        let window_start = self.window_start(ctx.as_of);
        let method = self.config.method_tag();

        diag.forecast_mape_pct = self.accuracy_audit(ctx)?;
        if let Some(mape) = diag.forecast_mape_pct {
            log::info!("stage=forecasting mape={mape:.2}% for {}", previous_month(ctx.as_of));
        }

        let mut history: BTreeMap<Triple, BTreeMap<NaiveDate, f64>> = BTreeMap::new();
        for usage in ctx.store.usage_between(window_start, ctx.as_of)? {
            *history
                .entry((usage.app_id, usage.capability_code, usage.tier))
                .or_default()
                .entry(usage.usage_date)
                .or_default() += usage.units;
        }

        let mut events = Vec::new();
        for (triple, daily) in &history {
            let (app_id, capability, tier) = triple;
            let observed_days = daily.len() as u32;
            let skip = |reason: &str| PipelineEvent::ForecastSkipped {
                app_id: *app_id,
                capability: capability.clone(),
                tier: tier.clone(),
                reason: reason.to_string(),
                observed_days,
            };

            if observed_days < self.config.min_history_days {
                log::debug!(
                    "stage=forecasting skip app={app_id} {capability}/{tier}: {observed_days} days of history"
                );
                diag.forecast_skips += 1;
                events.push(skip(INSUFFICIENT_HISTORY));
                continue;
            }

            let months = match self.project_triple(triple, window_start, ctx.as_of, daily) {
                Ok(Some(months)) => months,
                Ok(None) => {
                    diag.forecast_skips += 1;
                    events.push(skip(DEGENERATE_HISTORY));
                    continue;
                }
                Err(e) if e.is_invariant_violation() => {
                    log::error!("stage=forecasting {e}");
                    diag.record_violation(self.name(), &e);
                    events.push(PipelineEvent::InvariantViolated {
                        stage: self.name().to_string(),
                        detail: e.to_string(),
                    });
                    continue;
                }
                Err(e) => return Err(e),
            };

            for (month, projection) in &months {
                let projected_cost = match table.forecast_rule_for(capability, tier, *month)? {
                    Some(rule) => cost_for(projection.point, rule.unit_rate),
                    None => None,
                };
                if projected_cost.is_none() {
                    diag.forecasts_unpriced += 1;
                }
                ctx.store.upsert_forecast(&ForecastRow {
                    target_month: *month,
                    app_id: *app_id,
                    capability_code: capability.clone(),
                    tier: tier.clone(),
                    projected_units: projection.point,
                    projected_cost,
                    confidence_low: projection.low,
                    confidence_high: projection.high,
                    method: method.to_string(),
                    generated_on: ctx.as_of,
                })?;
            }

            diag.forecasts_generated += months.len() as u64;
            events.push(PipelineEvent::ForecastGenerated {
                app_id: *app_id,
                capability: capability.clone(),
                tier: tier.clone(),
                method: method.to_string(),
                periods: months.len() as u32,
            });
        }

        log::info!(
            "stage=forecasting triples={} generated={} skipped={} unpriced={}",
            history.len(),
            diag.forecasts_generated,
            diag.forecast_skips,
            diag.forecasts_unpriced
        );
        Ok(events)
    }
}
