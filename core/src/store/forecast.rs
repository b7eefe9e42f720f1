use super::{optional_decimal_at, ForecastRow, LicenseStore};
use crate::{error::PipelineResult, types::AppId};
use chrono::NaiveDate;
use rusqlite::{params, Row};

fn forecast_from_row(row: &Row<'_>) -> rusqlite::Result<ForecastRow> {
    Ok(ForecastRow {
        target_month: row.get(0)?,
        app_id: row.get(1)?,
        capability_code: row.get(2)?,
        tier: row.get(3)?,
        projected_units: row.get(4)?,
        projected_cost: optional_decimal_at(row, 5)?,
        confidence_low: row.get(6)?,
        confidence_high: row.get(7)?,
        method: row.get(8)?,
        generated_on: row.get(9)?,
    })
}

const FORECAST_COLUMNS: &str = "target_month, app_id, capability_code, tier, projected_units,
     projected_cost, confidence_low, confidence_high, method, generated_on";

impl LicenseStore {
    /// Upsert on (target month, application, capability, tier).
    pub fn upsert_forecast(&self, forecast: &ForecastRow) -> PipelineResult<()> {
        self.conn.execute(
            &format!(
                "INSERT INTO forecast_record ({FORECAST_COLUMNS})
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
                 ON CONFLICT (target_month, app_id, capability_code, tier) DO UPDATE SET
                    projected_units = excluded.projected_units,
                    projected_cost = excluded.projected_cost,
                    confidence_low = excluded.confidence_low,
                    confidence_high = excluded.confidence_high,
                    method = excluded.method,
                    generated_on = excluded.generated_on"
            ),
            params![
                forecast.target_month,
                forecast.app_id,
                forecast.capability_code,
                forecast.tier,
                forecast.projected_units,
                forecast.projected_cost.map(|c| c.to_string()),
                forecast.confidence_low,
                forecast.confidence_high,
                forecast.method,
                forecast.generated_on,
            ],
        )?;
        Ok(())
    }

    pub fn forecasts(&self) -> PipelineResult<Vec<ForecastRow>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {FORECAST_COLUMNS} FROM forecast_record
             ORDER BY app_id, capability_code, tier, target_month"
        ))?;
        let rows = stmt
            .query_map([], forecast_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn forecasts_for_month(&self, target_month: NaiveDate) -> PipelineResult<Vec<ForecastRow>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {FORECAST_COLUMNS} FROM forecast_record
             WHERE target_month = ?1
             ORDER BY app_id, capability_code, tier"
        ))?;
        let rows = stmt
            .query_map(params![target_month], forecast_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn forecasts_for_application(&self, app_id: AppId) -> PipelineResult<Vec<ForecastRow>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {FORECAST_COLUMNS} FROM forecast_record
             WHERE app_id = ?1
             ORDER BY capability_code, tier, target_month"
        ))?;
        let rows = stmt
            .query_map(params![app_id], forecast_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }
}
