//! Allocation: redistribute each shared service's monthly direct cost
//! across the business sectors that consume it.

use crate::{
    allocation::{distribute, is_conserved, SectorUsage, UnallocatedReason},
    calendar::{month_end, month_label},
    config::{AllocationConfig, AllocationRule},
    diagnostics::RunDiagnostics,
    error::{PipelineError, PipelineResult},
    event::PipelineEvent,
    pricing::round_currency,
    stage::{PipelineStage, StageContext},
    store::{AllocationRecordRow, ApplicationRow, ChargebackRow},
    types::{AppId, ChargebackCycle},
};
use chrono::NaiveDate;
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use std::collections::{BTreeMap, HashMap};

pub struct AllocationStage {
    config: AllocationConfig,
}

impl AllocationStage {
    pub fn new(config: AllocationConfig) -> Self {
        Self { config }
    }

    /// Usage per consuming sector for one shared service and month.
    /// Every eligible sector is present, including those with no usage.
    fn consuming_sectors(
        &self,
        shared: &ApplicationRow,
        rule: &AllocationRule,
        consumers: &[&ApplicationRow],
        units: &HashMap<AppId, f64>,
    ) -> Vec<SectorUsage> {
        let own_sector = shared.sector_or_unassigned();
        let mut sectors: BTreeMap<String, Decimal> = BTreeMap::new();
        for app in consumers {
            let sector = app.sector_or_unassigned();
            if self.config.is_shared_sector(sector) || sector.eq_ignore_ascii_case(own_sector) {
                continue;
            }
            if let Some(targets) = &rule.target_sectors {
                if !targets.iter().any(|t| t.eq_ignore_ascii_case(sector)) {
                    continue;
                }
            }
            let used = units
                .get(&app.app_id)
                .and_then(|u| Decimal::from_f64(*u))
                .unwrap_or_default()
                .round_dp(4);
            *sectors.entry(sector.to_string()).or_default() += used;
        }
        sectors
            .into_iter()
            .map(|(sector, units)| SectorUsage { sector, units })
            .collect()
    }

    fn report_unallocated(
        &self,
        ctx: &StageContext<'_>,
        diag: &mut RunDiagnostics,
        events: &mut Vec<PipelineEvent>,
        app_id: AppId,
        month: NaiveDate,
        total: Decimal,
        reason: UnallocatedReason,
    ) -> PipelineResult<()> {
        // Drop whatever an earlier run allocated for this unit.
        ctx.store.replace_allocation(month, app_id, &[], &[])?;
        diag.unallocated_count += 1;
        diag.unallocated_amount += total;
        log::warn!(
            "stage=allocation app={app_id} month={} amount={total} unallocated: {reason}",
            month_label(month)
        );
        events.push(PipelineEvent::SharedCostUnallocated {
            app_id,
            month,
            amount: total,
            reason: reason.to_string(),
        });
        Ok(())
    }
}

impl PipelineStage for AllocationStage {
    fn name(&self) -> &'static str {
        "allocation"
    }

    fn run(
        &mut self,
        ctx: &StageContext<'_>,
        diag: &mut RunDiagnostics,
    ) -> PipelineResult<Vec<PipelineEvent>> {
        let store = ctx.store;
        store.sync_allocation_rules(&self.config.rules)?;

        let active = store.active_applications()?;
        let (shared, consumers): (Vec<&ApplicationRow>, Vec<&ApplicationRow>) =
            active.iter().partition(|a| {
                self.config
                    .is_shared_service(a.cost_center.as_deref(), a.sector.as_deref())
            });
        let shared: HashMap<AppId, &ApplicationRow> =
            shared.into_iter().map(|a| (a.app_id, a)).collect();

        let mut direct: BTreeMap<(AppId, NaiveDate), Decimal> = BTreeMap::new();
        for cb in store.chargebacks(Some(ChargebackCycle::Direct))? {
            if shared.contains_key(&cb.app_id) {
                *direct.entry((cb.app_id, cb.month)).or_default() += cb.amount;
            }
        }

        // Units allocated earlier whose application is no longer shared or
        // whose direct cost is gone.
        for (app_id, month) in store.allocated_units()? {
            if !direct.contains_key(&(app_id, month)) {
                store.replace_allocation(month, app_id, &[], &[])?;
                log::info!(
                    "stage=allocation app={app_id} month={} cleared stale allocation",
                    month_label(month)
                );
            }
        }

        log::info!(
            "stage=allocation shared_services={} units={} consumers={}",
            shared.len(),
            direct.len(),
            consumers.len()
        );

        let mut usage_by_month: HashMap<NaiveDate, HashMap<AppId, f64>> = HashMap::new();
        let mut events = Vec::new();

        for (&(app_id, month), &total) in &direct {
            let app = shared[&app_id];
            let total = round_currency(total);
            if total <= Decimal::ZERO {
                store.replace_allocation(month, app_id, &[], &[])?;
                continue;
            }

            let Some(rule) = self
                .config
                .rule_for(app.cost_center.as_deref(), app.sector.as_deref())
            else {
                self.report_unallocated(ctx, diag, &mut events, app_id, month, total, UnallocatedReason::NoMatchingRule)?;
                continue;
            };

            if !usage_by_month.contains_key(&month) {
                let units = store.units_by_application(month, month_end(month))?;
                usage_by_month.insert(month, units.into_iter().collect());
            }
            let units = &usage_by_month[&month];
            let sectors = self.consuming_sectors(app, rule, &consumers, units);

            let shares = match distribute(total, &sectors, &rule.method) {
                Ok(shares) => shares,
                Err(reason) => {
                    self.report_unallocated(ctx, diag, &mut events, app_id, month, total, reason)?;
                    continue;
                }
            };

            if !is_conserved(total, &shares, self.config.tolerance_per_sector) {
                let allocated: Decimal = shares.iter().map(|s| s.amount).sum();
                let err = PipelineError::AllocationMismatch {
                    app_id,
                    month,
                    allocated,
                    expected: total,
                };
                log::error!("stage=allocation {err}");
                diag.record_violation(self.name(), &err);
                events.push(PipelineEvent::InvariantViolated {
                    stage: self.name().to_string(),
                    detail: err.to_string(),
                });
                continue;
            }

            let chargebacks: Vec<ChargebackRow> = shares
                .iter()
                .map(|s| ChargebackRow {
                    month,
                    app_id,
                    cost_center: app.cost_center.clone(),
                    sector: s.sector.clone(),
                    amount: s.amount,
                    cycle: ChargebackCycle::Allocated,
                })
                .collect();
            let records: Vec<AllocationRecordRow> = shares
                .iter()
                .map(|s| AllocationRecordRow {
                    run_id: ctx.run_id.to_string(),
                    month,
                    shared_app_id: app_id,
                    target_sector: s.sector.clone(),
                    rule_name: rule.name.clone(),
                    method: rule.method.as_str().to_string(),
                    sector_usage: s.usage,
                    amount: s.amount,
                })
                .collect();
            store.replace_allocation(month, app_id, &chargebacks, &records)?;

            diag.allocated_records += shares.len() as u64;
            log::info!(
                "stage=allocation app={app_id} month={} rule='{}' method={} total={total} sectors={}",
                month_label(month),
                rule.name,
                rule.method.as_str(),
                shares.len()
            );
            events.push(PipelineEvent::SharedCostAllocated {
                app_id,
                month,
                rule: rule.name.clone(),
                method: rule.method.as_str().to_string(),
                total,
                sectors: shares.len() as u64,
            });
        }

        log::info!(
            "stage=allocation allocated_records={} unallocated={} amount={}",
            diag.allocated_records,
            diag.unallocated_count,
            diag.unallocated_amount
        );
        Ok(events)
    }
}
