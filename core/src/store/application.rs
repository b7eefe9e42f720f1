use super::{tag_at, ApplicationRow, LicenseStore};
use crate::{
    error::{PipelineError, PipelineResult},
    ingest::ApplicationStub,
    types::{AppId, Architecture, Source},
};
use rusqlite::{params, OptionalExtension, Row};
use serde_json::{Map, Value};

const APPLICATION_COLUMNS: &str = "app_id, source_a_key, source_b_key, source_a_name, source_b_name,
     owner, sector, architecture, cost_center, raw_tags, superseded_by";

fn application_from_row(row: &Row<'_>) -> rusqlite::Result<ApplicationRow> {
    Ok(ApplicationRow {
        app_id: row.get(0)?,
        source_a_key: row.get(1)?,
        source_b_key: row.get(2)?,
        source_a_name: row.get(3)?,
        source_b_name: row.get(4)?,
        owner: row.get(5)?,
        sector: row.get(6)?,
        architecture: tag_at(row, 7, |t| Some(Architecture::from_tag(t)))?,
        cost_center: row.get(8)?,
        raw_tags: row.get(9)?,
        superseded_by: row.get(10)?,
    })
}

fn key_columns(source: Source) -> (&'static str, &'static str) {
    match source {
        Source::Monitoring => ("source_a_key", "source_a_name"),
        Source::Cmdb       => ("source_b_key", "source_b_name"),
    }
}

impl LicenseStore {
    /// Insert a pending stub, or refresh the active application already
    /// holding the key. Metadata present on the stub overwrites stored
    /// values; absent metadata never clears them.
    pub fn upsert_application_stub(&self, stub: &ApplicationStub) -> PipelineResult<AppId> {
        let (key_col, name_col) = key_columns(stub.source);
        let owner = stub.owner();
        let sector = stub.sector();
        let cost_center = stub.cost_center();
        let architecture = stub.architecture().map(|a| a.as_str());

        match self.active_app_for_key(stub.source, &stub.external_id)? {
            Some(app_id) => {
                let stored: String = self.conn.query_row(
                    "SELECT raw_tags FROM application WHERE app_id = ?1",
                    params![app_id],
                    |row| row.get(0),
                )?;
                let mut tags: Map<String, Value> = serde_json::from_str(&stored)?;
                tags.extend(stub.raw_tags.clone());

                self.conn.execute(
                    &format!(
                        "UPDATE application SET
                            {name_col} = ?2,
                            owner = COALESCE(?3, owner),
                            sector = COALESCE(?4, sector),
                            cost_center = COALESCE(?5, cost_center),
                            architecture = COALESCE(?6, architecture),
                            raw_tags = ?7,
                            updated_at = datetime('now')
                         WHERE app_id = ?1"
                    ),
                    params![
                        app_id,
                        stub.display_name,
                        owner,
                        sector,
                        cost_center,
                        architecture,
                        serde_json::to_string(&tags)?,
                    ],
                )?;
                Ok(app_id)
            }
            None => {
                self.conn.execute(
                    &format!(
                        "INSERT INTO application
                            ({key_col}, {name_col}, owner, sector, cost_center, architecture, raw_tags)
                         VALUES (?1, ?2, ?3, ?4, ?5, COALESCE(?6, 'unknown'), ?7)"
                    ),
                    params![
                        stub.external_id,
                        stub.display_name,
                        owner,
                        sector,
                        cost_center,
                        architecture,
                        serde_json::to_string(&stub.raw_tags)?,
                    ],
                )?;
                Ok(self.conn.last_insert_rowid())
            }
        }
    }

    /// The active application holding an external key.
    pub fn active_app_for_key(&self, source: Source, key: &str) -> PipelineResult<Option<AppId>> {
        let (key_col, _) = key_columns(source);
        let app_id = self
            .conn
            .query_row(
                &format!(
                    "SELECT app_id FROM application
                     WHERE {key_col} = ?1 AND superseded_by IS NULL"
                ),
                params![key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(app_id)
    }

    pub fn application(&self, app_id: AppId) -> PipelineResult<Option<ApplicationRow>> {
        let row = self
            .conn
            .query_row(
                &format!("SELECT {APPLICATION_COLUMNS} FROM application WHERE app_id = ?1"),
                params![app_id],
                application_from_row,
            )
            .optional()?;
        Ok(row)
    }

    fn applications_where(&self, filter: &str) -> PipelineResult<Vec<ApplicationRow>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {APPLICATION_COLUMNS} FROM application WHERE {filter} ORDER BY app_id ASC"
        ))?;
        let rows = stmt
            .query_map([], application_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn active_applications(&self) -> PipelineResult<Vec<ApplicationRow>> {
        self.applications_where("superseded_by IS NULL")
    }

    /// Pending monitoring-only applications, in id order.
    pub fn source_a_only_applications(&self) -> PipelineResult<Vec<ApplicationRow>> {
        self.applications_where(
            "superseded_by IS NULL AND source_a_key IS NOT NULL AND source_b_key IS NULL",
        )
    }

    /// Pending CMDB-only applications, in id order.
    pub fn source_b_only_applications(&self) -> PipelineResult<Vec<ApplicationRow>> {
        self.applications_where(
            "superseded_by IS NULL AND source_b_key IS NOT NULL AND source_a_key IS NULL",
        )
    }

    pub fn superseded_applications(&self) -> PipelineResult<Vec<ApplicationRow>> {
        self.applications_where("superseded_by IS NOT NULL")
    }

    /// Collapse a CMDB-only stub into a monitoring application.
    ///
    /// One transaction. The first statement claims the stub only while it
    /// is still unowned; a second merger of the same stub sees zero rows
    /// and gets `MergeConflict`. Usage and cost facts move to the survivor;
    /// derived rows of the stub are dropped and rebuilt by later stages.
    pub fn merge_applications(&self, survivor_id: AppId, retired_id: AppId) -> PipelineResult<()> {
        let conflict = || PipelineError::MergeConflict { survivor_id, retired_id };
        let tx = self.conn.unchecked_transaction()?;

        let claimed = tx.execute(
            "UPDATE application
             SET superseded_by = ?1, updated_at = datetime('now')
             WHERE app_id = ?2
               AND superseded_by IS NULL
               AND source_a_key IS NULL
               AND source_b_key IS NOT NULL",
            params![survivor_id, retired_id],
        )?;
        if claimed != 1 {
            return Err(conflict());
        }

        let updated = tx.execute(
            "UPDATE application SET
                source_b_key  = (SELECT source_b_key  FROM application WHERE app_id = ?2),
                source_b_name = (SELECT source_b_name FROM application WHERE app_id = ?2),
                owner         = COALESCE((SELECT owner       FROM application WHERE app_id = ?2), owner),
                sector        = COALESCE((SELECT sector      FROM application WHERE app_id = ?2), sector),
                cost_center   = COALESCE((SELECT cost_center FROM application WHERE app_id = ?2), cost_center),
                architecture  = CASE
                    WHEN (SELECT architecture FROM application WHERE app_id = ?2) <> 'unknown'
                    THEN (SELECT architecture FROM application WHERE app_id = ?2)
                    ELSE architecture END,
                raw_tags      = json_patch(raw_tags, (SELECT raw_tags FROM application WHERE app_id = ?2)),
                updated_at    = datetime('now')
             WHERE app_id = ?1 AND superseded_by IS NULL AND source_b_key IS NULL",
            params![survivor_id, retired_id],
        )?;
        if updated != 1 {
            return Err(conflict());
        }

        for table in ["usage_record", "cost_record"] {
            tx.execute(
                &format!("UPDATE OR IGNORE {table} SET app_id = ?1 WHERE app_id = ?2"),
                params![survivor_id, retired_id],
            )?;
        }
        tx.execute("DELETE FROM cost_record WHERE app_id = ?1", params![retired_id])?;
        tx.execute("DELETE FROM chargeback_record WHERE app_id = ?1", params![retired_id])?;
        tx.execute("DELETE FROM allocation_record WHERE shared_app_id = ?1", params![retired_id])?;
        tx.execute("DELETE FROM forecast_record WHERE app_id = ?1", params![retired_id])?;

        tx.commit()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> LicenseStore {
        let store = LicenseStore::in_memory().unwrap();
        store.migrate().unwrap();
        store
    }

    #[test]
    fn refresh_merges_new_tags_into_stored_ones() {
        let store = store();
        let first = ApplicationStub::new(Source::Monitoring, "appd_0001", "Orders API")
            .with_tag("owner", "Alice Chen");
        let app_id = store.upsert_application_stub(&first).unwrap();

        let second = ApplicationStub::new(Source::Monitoring, "appd_0001", "Orders API")
            .with_tag("sector", "Sales");
        assert_eq!(store.upsert_application_stub(&second).unwrap(), app_id);

        let row = store.application(app_id).unwrap().unwrap();
        let tags: Map<String, Value> = serde_json::from_str(&row.raw_tags).unwrap();
        assert_eq!(tags["owner"], "Alice Chen");
        assert_eq!(tags["sector"], "Sales");
    }

    #[test]
    fn unreadable_stored_tags_fail_the_refresh() {
        let store = store();
        let stub = ApplicationStub::new(Source::Monitoring, "appd_0001", "Orders API")
            .with_tag("owner", "Alice Chen");
        let app_id = store.upsert_application_stub(&stub).unwrap();
        store
            .conn
            .execute("UPDATE application SET raw_tags = 'not json' WHERE app_id = ?1", params![app_id])
            .unwrap();

        let refreshed = ApplicationStub::new(Source::Monitoring, "appd_0001", "Orders API")
            .with_tag("sector", "Sales");
        let err = store.upsert_application_stub(&refreshed).unwrap_err();
        assert!(matches!(err, PipelineError::Serialization(_)), "got {err}");

        let row = store.application(app_id).unwrap().unwrap();
        assert_eq!(row.raw_tags, "not json");
    }
}
