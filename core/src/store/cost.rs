use super::{decimal_at, CostRow, LicenseStore};
use crate::{error::PipelineResult, types::AppId};
use chrono::NaiveDate;
use rusqlite::{params, Row};

fn cost_from_row(row: &Row<'_>) -> rusqlite::Result<CostRow> {
    Ok(CostRow {
        app_id: row.get(0)?,
        capability_code: row.get(1)?,
        tier: row.get(2)?,
        usage_date: row.get(3)?,
        recorded_at: row.get(4)?,
        units: row.get(5)?,
        unit_rate: decimal_at(row, 6)?,
        amount: decimal_at(row, 7)?,
        price_rule_id: row.get(8)?,
    })
}

impl LicenseStore {
    /// Upsert on (application, capability, tier, usage date).
    pub fn upsert_cost(&self, cost: &CostRow) -> PipelineResult<()> {
        self.conn.execute(
            "INSERT INTO cost_record
                (app_id, capability_code, tier, usage_date, recorded_at,
                 units, unit_rate, amount, price_rule_id)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
             ON CONFLICT (app_id, capability_code, tier, usage_date) DO UPDATE SET
                recorded_at = excluded.recorded_at,
                units = excluded.units,
                unit_rate = excluded.unit_rate,
                amount = excluded.amount,
                price_rule_id = excluded.price_rule_id",
            params![
                cost.app_id,
                cost.capability_code,
                cost.tier,
                cost.usage_date,
                cost.recorded_at,
                cost.units,
                cost.unit_rate.to_string(),
                cost.amount.to_string(),
                cost.price_rule_id,
            ],
        )?;
        Ok(())
    }

    /// Costs of active applications, ordered by date.
    pub fn costs_for_active_applications(&self) -> PipelineResult<Vec<CostRow>> {
        let mut stmt = self.conn.prepare(
            "SELECT c.app_id, c.capability_code, c.tier, c.usage_date, c.recorded_at,
                    c.units, c.unit_rate, c.amount, c.price_rule_id
             FROM cost_record c
             JOIN application a ON a.app_id = c.app_id
             WHERE a.superseded_by IS NULL
             ORDER BY c.usage_date, c.app_id, c.capability_code, c.tier",
        )?;
        let rows = stmt
            .query_map([], cost_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Remove the cost of one usage fact that no longer has a price.
    /// Returns the number of rows removed.
    pub fn delete_cost(
        &self,
        app_id: AppId,
        capability: &str,
        tier: &str,
        usage_date: NaiveDate,
    ) -> PipelineResult<usize> {
        let removed = self.conn.execute(
            "DELETE FROM cost_record
             WHERE app_id = ?1 AND capability_code = ?2 AND tier = ?3 AND usage_date = ?4",
            params![app_id, capability, tier, usage_date],
        )?;
        Ok(removed)
    }

    pub fn cost_for(
        &self,
        app_id: AppId,
        capability: &str,
        tier: &str,
        usage_date: NaiveDate,
    ) -> PipelineResult<Option<CostRow>> {
        let mut stmt = self.conn.prepare(
            "SELECT app_id, capability_code, tier, usage_date, recorded_at,
                    units, unit_rate, amount, price_rule_id
             FROM cost_record
             WHERE app_id = ?1 AND capability_code = ?2 AND tier = ?3 AND usage_date = ?4",
        )?;
        let mut rows = stmt.query_map(params![app_id, capability, tier, usage_date], cost_from_row)?;
        Ok(rows.next().transpose()?)
    }

    pub fn count_cost_records(&self) -> PipelineResult<i64> {
        let count = self
            .conn
            .query_row("SELECT COUNT(*) FROM cost_record", [], |row| row.get(0))?;
        Ok(count)
    }
}
