//! Cost & chargeback: price every usage fact against the contract
//! price table, then roll daily costs up into monthly direct
//! chargeback per application.

use crate::{
    calendar::month_start,
    diagnostics::{percentage, RunDiagnostics},
    error::{PipelineError, PipelineResult},
    event::PipelineEvent,
    pricing::{cost_for, PriceTable},
    stage::{PipelineStage, StageContext},
    store::{ApplicationRow, ChargebackRow, CostRow},
    types::{AppId, ChargebackCycle},
};
use chrono::NaiveDate;
use rust_decimal::Decimal;
use std::collections::{BTreeMap, BTreeSet, HashMap};

#[derive(Default)]
pub struct CostChargebackStage;

impl CostChargebackStage {
    pub fn new() -> Self {
        Self
    }

    fn derive_costs(
        &self,
        ctx: &StageContext<'_>,
        table: &PriceTable,
        diag: &mut RunDiagnostics,
        events: &mut Vec<PipelineEvent>,
    ) -> PipelineResult<()> {
        let mut computed = 0u64;
        let mut orphaned = 0u64;

        for usage in ctx.store.usage_for_active_applications()? {
            let Some(rule) = table.rule_for(&usage.capability_code, &usage.tier, usage.usage_date)? else {
                log::warn!(
                    "stage=cost orphan: app={} {}/{} on {} has no price rule",
                    usage.app_id, usage.capability_code, usage.tier, usage.usage_date
                );
                ctx.store.delete_cost(usage.app_id, &usage.capability_code, &usage.tier, usage.usage_date)?;
                orphaned += 1;
                events.push(PipelineEvent::CostOrphaned {
                    app_id: usage.app_id,
                    capability: usage.capability_code.clone(),
                    tier: usage.tier.clone(),
                    usage_date: usage.usage_date,
                });
                continue;
            };

            let amount = cost_for(usage.units, rule.unit_rate).ok_or_else(|| {
                PipelineError::InvalidInput(format!(
                    "usage units {} for app {} cannot be priced",
                    usage.units, usage.app_id
                ))
            })?;
            ctx.store.upsert_cost(&CostRow {
                app_id: usage.app_id,
                capability_code: usage.capability_code,
                tier: usage.tier,
                usage_date: usage.usage_date,
                recorded_at: usage.recorded_at,
                units: usage.units,
                unit_rate: rule.unit_rate,
                amount,
                price_rule_id: rule.id,
            })?;
            computed += 1;
        }

        diag.cost_records += computed;
        diag.orphaned_costs += orphaned;
        events.push(PipelineEvent::CostsComputed { records: computed, orphaned });
        log::info!("stage=cost priced={computed} orphaned={orphaned} rules={}", table.len());
        Ok(())
    }

    fn aggregate_chargeback(
        &self,
        ctx: &StageContext<'_>,
        apps: &HashMap<AppId, ApplicationRow>,
        diag: &mut RunDiagnostics,
        events: &mut Vec<PipelineEvent>,
    ) -> PipelineResult<()> {
        let mut monthly: BTreeMap<(NaiveDate, AppId), Decimal> = BTreeMap::new();
        for cost in ctx.store.costs_for_active_applications()? {
            *monthly
                .entry((month_start(cost.usage_date), cost.app_id))
                .or_default() += cost.amount;
        }

        // Direct rows left behind by costs that no longer exist.
        let stale: BTreeSet<(NaiveDate, AppId)> = ctx
            .store
            .chargebacks(Some(ChargebackCycle::Direct))?
            .into_iter()
            .map(|cb| (cb.month, cb.app_id))
            .filter(|key| !monthly.contains_key(key))
            .collect();
        for (month, app_id) in stale {
            ctx.store.delete_direct_chargebacks(month, app_id)?;
            log::info!("stage=chargeback app={app_id} month={month} no remaining cost, direct row removed");
        }

        let mut months = BTreeSet::new();
        let mut total = Decimal::ZERO;
        for (&(month, app_id), &amount) in &monthly {
            let Some(app) = apps.get(&app_id) else { continue };
            let sector = app.sector_or_unassigned().to_string();
            ctx.store.upsert_chargeback(&ChargebackRow {
                month,
                app_id,
                cost_center: app.cost_center.clone(),
                sector: sector.clone(),
                amount,
                cycle: ChargebackCycle::Direct,
            })?;
            let removed = ctx.store.delete_stale_direct_chargebacks(month, app_id, &sector)?;
            if removed > 0 {
                log::info!("stage=chargeback app={app_id} month={month} moved to sector '{sector}'");
            }
            months.insert(month);
            total += amount;
        }

        diag.chargeback_records += monthly.len() as u64;
        diag.chargeback_total += total;
        events.push(PipelineEvent::ChargebacksAggregated {
            months: months.len() as u64,
            records: monthly.len() as u64,
            total,
        });
        log::info!(
            "stage=chargeback months={} records={} total={total}",
            months.len(),
            monthly.len()
        );
        Ok(())
    }
}

impl PipelineStage for CostChargebackStage {
    fn name(&self) -> &'static str {
        "cost_chargeback"
    }

    fn run(
        &mut self,
        ctx: &StageContext<'_>,
        diag: &mut RunDiagnostics,
    ) -> PipelineResult<Vec<PipelineEvent>> {
        // A malformed table fails the whole stage before anything is priced.
        let table = PriceTable::new(ctx.store.price_rules()?)?;
        let apps: HashMap<AppId, ApplicationRow> = ctx
            .store
            .active_applications()?
            .into_iter()
            .map(|a| (a.app_id, a))
            .collect();
        let mut events = Vec::new();

        self.derive_costs(ctx, &table, diag, &mut events)?;
        self.aggregate_chargeback(ctx, &apps, diag, &mut events)?;

        let with_cost_center = apps
            .values()
            .filter(|a| a.cost_center.as_deref().is_some_and(|c| !c.trim().is_empty()))
            .count() as u64;
        diag.cost_center_coverage_pct = percentage(with_cost_center, apps.len() as u64);
        log::info!(
            "stage=chargeback cost_center_coverage={:.2}% ({with_cost_center}/{})",
            diag.cost_center_coverage_pct,
            apps.len()
        );
        Ok(events)
    }
}
