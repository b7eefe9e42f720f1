use super::{tag_at, LicenseStore, ReconciliationLogRow};
use crate::{
    command::{ManualOverride, OverrideDecision},
    error::{PipelineError, PipelineResult},
    types::MatchStatus,
};
use rusqlite::{params, OptionalExtension, Row};

fn log_from_row(row: &Row<'_>) -> rusqlite::Result<ReconciliationLogRow> {
    Ok(ReconciliationLogRow {
        id: Some(row.get(0)?),
        run_id: row.get(1)?,
        source_a_key: row.get(2)?,
        source_b_key: row.get(3)?,
        source_a_name: row.get(4)?,
        source_b_name: row.get(5)?,
        score: row.get(6)?,
        status: tag_at(row, 7, MatchStatus::parse)?,
        app_id: row.get(8)?,
    })
}

fn override_from_parts(
    source_a_key: String,
    decision: &str,
    source_b_key: String,
    note: Option<String>,
) -> PipelineResult<ManualOverride> {
    let decision = match decision {
        "link"   => OverrideDecision::Link { source_b_key },
        "reject" => OverrideDecision::Reject { source_b_key },
        other    => {
            return Err(PipelineError::InvalidInput(format!(
                "unknown override decision '{other}' for '{source_a_key}'"
            )))
        }
    };
    Ok(ManualOverride { source_a_key, decision, note })
}

impl LicenseStore {
    /// Append to the reconciliation audit trail. Returns false when the
    /// same (key pair, status) was already logged by an earlier run.
    pub fn log_reconciliation(&self, entry: &ReconciliationLogRow) -> PipelineResult<bool> {
        let inserted = self.conn.execute(
            "INSERT OR IGNORE INTO reconciliation_log
                (run_id, source_a_key, source_b_key, source_a_name, source_b_name,
                 score, status, app_id)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                entry.run_id,
                entry.source_a_key,
                entry.source_b_key,
                entry.source_a_name,
                entry.source_b_name,
                entry.score,
                entry.status.as_str(),
                entry.app_id,
            ],
        )?;
        Ok(inserted == 1)
    }

    pub fn reconciliation_log(&self) -> PipelineResult<Vec<ReconciliationLogRow>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, run_id, source_a_key, source_b_key, source_a_name, source_b_name,
                    score, status, app_id
             FROM reconciliation_log ORDER BY id ASC",
        )?;
        let rows = stmt
            .query_map([], log_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    // ── Manual overrides ──────────────────────────────────────

    /// One decision per Source-A key; the latest wins.
    pub fn upsert_manual_override(&self, ov: &ManualOverride) -> PipelineResult<()> {
        self.conn.execute(
            "INSERT INTO manual_override (source_a_key, decision, source_b_key, note)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT (source_a_key) DO UPDATE SET
                decision = excluded.decision,
                source_b_key = excluded.source_b_key,
                note = excluded.note,
                updated_at = datetime('now')",
            params![
                ov.source_a_key,
                ov.decision.kind(),
                ov.decision.source_b_key(),
                ov.note,
            ],
        )?;
        Ok(())
    }

    pub fn manual_override(&self, source_a_key: &str) -> PipelineResult<Option<ManualOverride>> {
        let parts: Option<(String, String, String, Option<String>)> = self
            .conn
            .query_row(
                "SELECT source_a_key, decision, source_b_key, note
                 FROM manual_override WHERE source_a_key = ?1",
                params![source_a_key],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
            )
            .optional()?;
        parts
            .map(|(a, decision, b, note)| override_from_parts(a, &decision, b, note))
            .transpose()
    }

    pub fn manual_overrides(&self) -> PipelineResult<Vec<ManualOverride>> {
        let mut stmt = self.conn.prepare(
            "SELECT source_a_key, decision, source_b_key, note
             FROM manual_override ORDER BY source_a_key",
        )?;
        let parts = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, Option<String>>(3)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        parts
            .into_iter()
            .map(|(a, decision, b, note)| override_from_parts(a, &decision, b, note))
            .collect()
    }
}
