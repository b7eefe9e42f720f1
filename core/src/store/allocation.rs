use super::{chargeback::chargeback_from_row, decimal_at, AllocationRecordRow, ChargebackRow, LicenseStore};
use crate::{
    config::{AllocationRule, DistributionMethod},
    error::PipelineResult,
    types::AppId,
};
use chrono::NaiveDate;
use rusqlite::params;

impl LicenseStore {
    /// Mirror the configured rules so they can be queried next to the
    /// records they produced. Rules no longer configured are removed.
    pub fn sync_allocation_rules(&self, rules: &[AllocationRule]) -> PipelineResult<()> {
        let tx = self.conn.unchecked_transaction()?;
        tx.execute("DELETE FROM allocation_rule", [])?;
        for (position, rule) in rules.iter().enumerate() {
            let weight = match &rule.method {
                DistributionMethod::WeightedCustom { proportional_weight } => {
                    Some(proportional_weight.to_string())
                }
                _ => None,
            };
            let targets = rule
                .target_sectors
                .as_ref()
                .map(serde_json::to_string)
                .transpose()?;
            tx.execute(
                "INSERT INTO allocation_rule
                    (name, method, proportional_weight, shared_service_code,
                     target_sectors, active, position)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    rule.name,
                    rule.method.as_str(),
                    weight,
                    rule.shared_service_code,
                    targets,
                    rule.active,
                    position as i64,
                ],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    /// (name, method) of the mirrored rules in configuration order.
    pub fn allocation_rule_names(&self) -> PipelineResult<Vec<(String, String)>> {
        let mut stmt = self
            .conn
            .prepare("SELECT name, method FROM allocation_rule ORDER BY position")?;
        let rows = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Replace everything allocated from one shared service in one month
    /// as a unit. An empty slice clears a previous allocation.
    pub fn replace_allocation(
        &self,
        month: NaiveDate,
        shared_app_id: AppId,
        chargebacks: &[ChargebackRow],
        records: &[AllocationRecordRow],
    ) -> PipelineResult<()> {
        let tx = self.conn.unchecked_transaction()?;
        tx.execute(
            "DELETE FROM chargeback_record
             WHERE month = ?1 AND app_id = ?2 AND cycle = 'allocated'",
            params![month, shared_app_id],
        )?;
        tx.execute(
            "DELETE FROM allocation_record WHERE month = ?1 AND shared_app_id = ?2",
            params![month, shared_app_id],
        )?;
        for cb in chargebacks {
            tx.execute(
                "INSERT INTO chargeback_record (month, app_id, cost_center, sector, amount, cycle)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                 ON CONFLICT (month, app_id, sector) DO UPDATE SET
                    cost_center = excluded.cost_center,
                    amount = excluded.amount,
                    cycle = excluded.cycle,
                    updated_at = datetime('now')",
                params![
                    cb.month,
                    cb.app_id,
                    cb.cost_center,
                    cb.sector,
                    cb.amount.to_string(),
                    cb.cycle.as_str(),
                ],
            )?;
        }
        for rec in records {
            tx.execute(
                "INSERT INTO allocation_record
                    (run_id, month, shared_app_id, target_sector, rule_name,
                     method, sector_usage, amount)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    rec.run_id,
                    rec.month,
                    rec.shared_app_id,
                    rec.target_sector,
                    rec.rule_name,
                    rec.method,
                    rec.sector_usage.to_string(),
                    rec.amount.to_string(),
                ],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    /// Every (shared application, month) holding allocated chargeback or
    /// allocation detail.
    pub fn allocated_units(&self) -> PipelineResult<Vec<(AppId, NaiveDate)>> {
        let mut stmt = self.conn.prepare(
            "SELECT app_id, month FROM chargeback_record WHERE cycle = 'allocated'
             UNION
             SELECT shared_app_id, month FROM allocation_record
             ORDER BY 1, 2",
        )?;
        let rows = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn allocation_records(&self, shared_app_id: AppId) -> PipelineResult<Vec<AllocationRecordRow>> {
        let mut stmt = self.conn.prepare(
            "SELECT run_id, month, shared_app_id, target_sector, rule_name,
                    method, sector_usage, amount
             FROM allocation_record
             WHERE shared_app_id = ?1
             ORDER BY month, target_sector",
        )?;
        let rows = stmt
            .query_map(params![shared_app_id], |row| {
                Ok(AllocationRecordRow {
                    run_id: row.get(0)?,
                    month: row.get(1)?,
                    shared_app_id: row.get(2)?,
                    target_sector: row.get(3)?,
                    rule_name: row.get(4)?,
                    method: row.get(5)?,
                    sector_usage: decimal_at(row, 6)?,
                    amount: decimal_at(row, 7)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Allocated chargebacks produced from one shared service.
    pub fn allocated_chargebacks(&self, shared_app_id: AppId) -> PipelineResult<Vec<ChargebackRow>> {
        let mut stmt = self.conn.prepare(
            "SELECT month, app_id, cost_center, sector, amount, cycle
             FROM chargeback_record
             WHERE app_id = ?1 AND cycle = 'allocated'
             ORDER BY month, sector",
        )?;
        let rows = stmt
            .query_map(params![shared_app_id], chargeback_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }
}
