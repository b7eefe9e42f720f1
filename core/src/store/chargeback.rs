use super::{decimal_at, tag_at, ChargebackRow, LicenseStore};
use crate::{
    error::PipelineResult,
    types::{AppId, ChargebackCycle},
};
use chrono::NaiveDate;
use rusqlite::{params, Row};

pub(super) fn chargeback_from_row(row: &Row<'_>) -> rusqlite::Result<ChargebackRow> {
    Ok(ChargebackRow {
        month: row.get(0)?,
        app_id: row.get(1)?,
        cost_center: row.get(2)?,
        sector: row.get(3)?,
        amount: decimal_at(row, 4)?,
        cycle: tag_at(row, 5, ChargebackCycle::parse)?,
    })
}

impl LicenseStore {
    /// Upsert on (month, application, sector).
    pub fn upsert_chargeback(&self, record: &ChargebackRow) -> PipelineResult<()> {
        self.conn.execute(
            "INSERT INTO chargeback_record (month, app_id, cost_center, sector, amount, cycle)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT (month, app_id, sector) DO UPDATE SET
                cost_center = excluded.cost_center,
                amount = excluded.amount,
                cycle = excluded.cycle,
                updated_at = datetime('now')",
            params![
                record.month,
                record.app_id,
                record.cost_center,
                record.sector,
                record.amount.to_string(),
                record.cycle.as_str(),
            ],
        )?;
        Ok(())
    }

    /// Drop direct rows of (month, application) filed under any other
    /// sector. Returns the number removed.
    pub fn delete_stale_direct_chargebacks(
        &self,
        month: NaiveDate,
        app_id: AppId,
        current_sector: &str,
    ) -> PipelineResult<usize> {
        let removed = self.conn.execute(
            "DELETE FROM chargeback_record
             WHERE month = ?1 AND app_id = ?2 AND cycle = 'direct' AND sector <> ?3",
            params![month, app_id, current_sector],
        )?;
        Ok(removed)
    }

    /// Drop every direct row of (month, application), whatever its sector.
    pub fn delete_direct_chargebacks(&self, month: NaiveDate, app_id: AppId) -> PipelineResult<usize> {
        let removed = self.conn.execute(
            "DELETE FROM chargeback_record
             WHERE month = ?1 AND app_id = ?2 AND cycle = 'direct'",
            params![month, app_id],
        )?;
        Ok(removed)
    }

    pub fn chargebacks(&self, cycle: Option<ChargebackCycle>) -> PipelineResult<Vec<ChargebackRow>> {
        let mut stmt = self.conn.prepare(
            "SELECT month, app_id, cost_center, sector, amount, cycle
             FROM chargeback_record
             WHERE ?1 IS NULL OR cycle = ?1
             ORDER BY month, app_id, sector",
        )?;
        let rows = stmt
            .query_map(params![cycle.map(|c| c.as_str())], chargeback_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn chargebacks_for_month(&self, month: NaiveDate) -> PipelineResult<Vec<ChargebackRow>> {
        let mut stmt = self.conn.prepare(
            "SELECT month, app_id, cost_center, sector, amount, cycle
             FROM chargeback_record
             WHERE month = ?1
             ORDER BY app_id, sector",
        )?;
        let rows = stmt
            .query_map(params![month], chargeback_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }
}
