use super::{LicenseStore, UsageRow};
use crate::{
    error::{PipelineError, PipelineResult},
    ingest::UsageInput,
    types::AppId,
};
use chrono::NaiveDate;
use rusqlite::{params, Row};

fn usage_from_row(row: &Row<'_>) -> rusqlite::Result<UsageRow> {
    Ok(UsageRow {
        app_id: row.get(0)?,
        capability_code: row.get(1)?,
        tier: row.get(2)?,
        usage_date: row.get(3)?,
        recorded_at: row.get(4)?,
        units: row.get(5)?,
        node_count: row.get(6)?,
    })
}

impl LicenseStore {
    /// Record one usage fact against the active application holding the
    /// external key. Returns false when the fact already exists.
    pub fn ingest_usage(&self, input: &UsageInput) -> PipelineResult<bool> {
        input.validate()?;
        let app_id = self
            .active_app_for_key(input.source, &input.app_external_id)?
            .ok_or_else(|| PipelineError::UnknownApplication {
                origin: input.source.to_string(),
                external_id: input.app_external_id.clone(),
            })?;
        let inserted = self.conn.execute(
            "INSERT INTO usage_record
                (app_id, capability_code, tier, usage_date, recorded_at, units, node_count)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT (app_id, capability_code, tier, usage_date) DO NOTHING",
            params![
                app_id,
                input.capability_code,
                input.tier,
                input.timestamp.date(),
                input.timestamp,
                input.units,
                input.node_count,
            ],
        )?;
        Ok(inserted == 1)
    }

    /// Usage of active applications, oldest first.
    pub fn usage_for_active_applications(&self) -> PipelineResult<Vec<UsageRow>> {
        let mut stmt = self.conn.prepare(
            "SELECT u.app_id, u.capability_code, u.tier, u.usage_date, u.recorded_at,
                    u.units, u.node_count
             FROM usage_record u
             JOIN application a ON a.app_id = u.app_id
             WHERE a.superseded_by IS NULL
             ORDER BY u.usage_date, u.app_id, u.capability_code, u.tier",
        )?;
        let rows = stmt
            .query_map([], usage_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Usage of active applications with `from <= usage_date <= to`.
    pub fn usage_between(&self, from: NaiveDate, to: NaiveDate) -> PipelineResult<Vec<UsageRow>> {
        let mut stmt = self.conn.prepare(
            "SELECT u.app_id, u.capability_code, u.tier, u.usage_date, u.recorded_at,
                    u.units, u.node_count
             FROM usage_record u
             JOIN application a ON a.app_id = u.app_id
             WHERE a.superseded_by IS NULL AND u.usage_date BETWEEN ?1 AND ?2
             ORDER BY u.app_id, u.capability_code, u.tier, u.usage_date",
        )?;
        let rows = stmt
            .query_map(params![from, to], usage_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Total units per active application within a date range.
    pub fn units_by_application(&self, from: NaiveDate, to: NaiveDate) -> PipelineResult<Vec<(AppId, f64)>> {
        let mut stmt = self.conn.prepare(
            "SELECT u.app_id, COALESCE(SUM(u.units), 0.0)
             FROM usage_record u
             JOIN application a ON a.app_id = u.app_id
             WHERE a.superseded_by IS NULL AND u.usage_date BETWEEN ?1 AND ?2
             GROUP BY u.app_id
             ORDER BY u.app_id",
        )?;
        let rows = stmt
            .query_map(params![from, to], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn count_usage_records(&self) -> PipelineResult<i64> {
        let count = self
            .conn
            .query_row("SELECT COUNT(*) FROM usage_record", [], |row| row.get(0))?;
        Ok(count)
    }
}
