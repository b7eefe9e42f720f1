//! SQLite persistence layer.
//!
//! RULE: Only the store talks to the database.
//! Stages call store methods; they never execute SQL directly.
//!
//! Currency amounts are stored as TEXT decimal strings and parsed back
//! into `Decimal` so no float ever touches money.

use crate::{
    error::PipelineResult,
    event::EventLogEntry,
    types::{AppId, Architecture, ChargebackCycle, MatchStatus},
};
use chrono::{NaiveDate, NaiveDateTime};
use rusqlite::{params, types::Type, Connection, OptionalExtension, Row};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

mod allocation;
mod application;
mod chargeback;
mod cost;
mod forecast;
mod pricing;
mod reconciliation;
mod usage;

pub struct LicenseStore {
    conn: Connection,
    path: Option<String>, // None for :memory:
}

impl LicenseStore {
    pub fn open(path: &str) -> PipelineResult<Self> {
        let conn = Connection::open_with_flags(
            path,
            rusqlite::OpenFlags::SQLITE_OPEN_READ_WRITE
                | rusqlite::OpenFlags::SQLITE_OPEN_CREATE
                | rusqlite::OpenFlags::SQLITE_OPEN_URI,
        )?;
        // WAL only applies to real files.
        let _ = conn.execute_batch("PRAGMA journal_mode=WAL;");
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        Ok(Self {
            conn,
            path: Some(path.to_string()),
        })
    }

    /// Open an in-memory database (used in tests and demo runs).
    pub fn in_memory() -> PipelineResult<Self> {
        let conn = Connection::open(":memory:")?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        Ok(Self { conn, path: None })
    }

    pub fn path(&self) -> Option<&str> {
        self.path.as_deref()
    }

    /// Apply all schema migrations in order. Every migration is
    /// idempotent, so calling this on an existing database is safe.
    pub fn migrate(&self) -> PipelineResult<()> {
        self.conn
            .execute_batch(include_str!("../../../migrations/001_foundation.sql"))?;
        self.conn
            .execute_batch(include_str!("../../../migrations/002_applications.sql"))?;
        self.conn
            .execute_batch(include_str!("../../../migrations/003_usage_pricing.sql"))?;
        self.conn
            .execute_batch(include_str!("../../../migrations/004_chargeback.sql"))?;
        self.conn
            .execute_batch(include_str!("../../../migrations/005_allocation.sql"))?;
        self.conn
            .execute_batch(include_str!("../../../migrations/006_forecast.sql"))?;
        Ok(())
    }

    // ── Run ────────────────────────────────────────────────────

    pub fn insert_run(&self, run_id: &str, as_of: NaiveDate, version: &str) -> PipelineResult<()> {
        self.conn.execute(
            "INSERT INTO run (run_id, as_of, version) VALUES (?1, ?2, ?3)",
            params![run_id, as_of, version],
        )?;
        Ok(())
    }

    pub fn finish_run(&self, run_id: &str, status: &str, diagnostics_json: &str) -> PipelineResult<()> {
        self.conn.execute(
            "UPDATE run SET status = ?2, diagnostics = ?3, finished_at = datetime('now')
             WHERE run_id = ?1",
            params![run_id, status, diagnostics_json],
        )?;
        Ok(())
    }

    /// (status, diagnostics JSON) of a run.
    pub fn run_outcome(&self, run_id: &str) -> PipelineResult<Option<(String, Option<String>)>> {
        let outcome = self
            .conn
            .query_row(
                "SELECT status, diagnostics FROM run WHERE run_id = ?1",
                params![run_id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;
        Ok(outcome)
    }

    // ── Event log ──────────────────────────────────────────────

    pub fn append_event(&self, entry: &EventLogEntry) -> PipelineResult<()> {
        self.conn.execute(
            "INSERT INTO event_log (run_id, stage, event_type, payload)
             VALUES (?1, ?2, ?3, ?4)",
            params![entry.run_id, entry.stage, entry.event_type, entry.payload],
        )?;
        Ok(())
    }

    pub fn events_for_run(&self, run_id: &str) -> PipelineResult<Vec<EventLogEntry>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, run_id, stage, event_type, payload
             FROM event_log WHERE run_id = ?1
             ORDER BY id ASC",
        )?;
        let entries = stmt
            .query_map(params![run_id], |row| {
                Ok(EventLogEntry {
                    id: Some(row.get(0)?),
                    run_id: row.get(1)?,
                    stage: row.get(2)?,
                    event_type: row.get(3)?,
                    payload: row.get(4)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(entries)
    }

    pub fn count_events(&self, run_id: &str, event_type: &str) -> PipelineResult<i64> {
        let count = self.conn.query_row(
            "SELECT COUNT(*) FROM event_log WHERE run_id = ?1 AND event_type = ?2",
            params![run_id, event_type],
            |row| row.get(0),
        )?;
        Ok(count)
    }
}

// ── Column helpers ─────────────────────────────────────────────

/// Read a TEXT column holding a decimal string.
fn decimal_at(row: &Row<'_>, idx: usize) -> rusqlite::Result<Decimal> {
    let text: String = row.get(idx)?;
    Decimal::from_str(&text)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn optional_decimal_at(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<Decimal>> {
    let text: Option<String> = row.get(idx)?;
    text.map(|t| {
        Decimal::from_str(&t)
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
    })
    .transpose()
}

/// Read a TEXT column holding one of a closed set of tags.
fn tag_at<T>(row: &Row<'_>, idx: usize, parse: fn(&str) -> Option<T>) -> rusqlite::Result<T> {
    let text: String = row.get(idx)?;
    parse(&text).ok_or(rusqlite::Error::InvalidColumnType(idx, text, Type::Text))
}

// ── Row types ──────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ApplicationRow {
    pub app_id: AppId,
    pub source_a_key: Option<String>,
    pub source_b_key: Option<String>,
    pub source_a_name: Option<String>,
    pub source_b_name: Option<String>,
    pub owner: Option<String>,
    pub sector: Option<String>,
    pub architecture: Architecture,
    pub cost_center: Option<String>,
    pub raw_tags: String,
    pub superseded_by: Option<AppId>,
}

impl ApplicationRow {
    pub fn is_active(&self) -> bool {
        self.superseded_by.is_none()
    }

    /// CMDB name when known, else the monitoring name.
    pub fn display_name(&self) -> &str {
        self.source_b_name
            .as_deref()
            .or(self.source_a_name.as_deref())
            .unwrap_or_default()
    }

    pub fn sector_or_unassigned(&self) -> &str {
        self.sector
            .as_deref()
            .filter(|s| !s.trim().is_empty())
            .unwrap_or(crate::types::UNASSIGNED_SECTOR)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UsageRow {
    pub app_id: AppId,
    pub capability_code: String,
    pub tier: String,
    pub usage_date: NaiveDate,
    pub recorded_at: NaiveDateTime,
    pub units: f64,
    pub node_count: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CostRow {
    pub app_id: AppId,
    pub capability_code: String,
    pub tier: String,
    pub usage_date: NaiveDate,
    pub recorded_at: NaiveDateTime,
    pub units: f64,
    pub unit_rate: Decimal,
    pub amount: Decimal,
    pub price_rule_id: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChargebackRow {
    pub month: NaiveDate,
    pub app_id: AppId,
    pub cost_center: Option<String>,
    pub sector: String,
    pub amount: Decimal,
    pub cycle: ChargebackCycle,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AllocationRecordRow {
    pub run_id: String,
    pub month: NaiveDate,
    pub shared_app_id: AppId,
    pub target_sector: String,
    pub rule_name: String,
    pub method: String,
    pub sector_usage: Decimal,
    pub amount: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ForecastRow {
    pub target_month: NaiveDate,
    pub app_id: AppId,
    pub capability_code: String,
    pub tier: String,
    pub projected_units: f64,
    pub projected_cost: Option<Decimal>,
    pub confidence_low: f64,
    pub confidence_high: f64,
    pub method: String,
    pub generated_on: NaiveDate,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReconciliationLogRow {
    pub id: Option<i64>,
    pub run_id: String,
    pub source_a_key: String,
    pub source_b_key: String,
    pub source_a_name: Option<String>,
    pub source_b_name: Option<String>,
    pub score: f64,
    pub status: MatchStatus,
    pub app_id: Option<AppId>,
}
