use super::{decimal_at, LicenseStore};
use crate::{error::PipelineResult, pricing::PriceRule};
use rusqlite::params;

impl LicenseStore {
    /// Upsert on (capability, tier, start date). Returns the rule id.
    pub fn upsert_price_rule(&self, rule: &PriceRule) -> PipelineResult<i64> {
        let id = self.conn.query_row(
            "INSERT INTO price_rule (capability_code, tier, start_date, end_date, unit_rate)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT (capability_code, tier, start_date) DO UPDATE SET
                end_date = excluded.end_date,
                unit_rate = excluded.unit_rate
             RETURNING id",
            params![
                rule.capability_code,
                rule.tier,
                rule.start_date,
                rule.end_date,
                rule.unit_rate.to_string(),
            ],
            |row| row.get(0),
        )?;
        Ok(id)
    }

    pub fn price_rules(&self) -> PipelineResult<Vec<PriceRule>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, capability_code, tier, start_date, end_date, unit_rate
             FROM price_rule
             ORDER BY capability_code, tier, start_date",
        )?;
        let rules = stmt
            .query_map([], |row| {
                Ok(PriceRule {
                    id: Some(row.get(0)?),
                    capability_code: row.get(1)?,
                    tier: row.get(2)?,
                    start_date: row.get(3)?,
                    end_date: row.get(4)?,
                    unit_rate: decimal_at(row, 5)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rules)
    }
}
