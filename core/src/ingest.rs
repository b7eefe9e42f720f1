//! Typed ingestion inputs and the per-record ingestion loop.
//!
//! Extraction clients hand over plain records; this module validates
//! them and writes them through the store. A bad record is rejected on
//! its own and counted, the rest of the batch still lands.

use crate::{
    error::{PipelineError, PipelineResult},
    pricing::PriceRule,
    store::LicenseStore,
    types::{Architecture, Source},
};
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// One catalog entry from either upstream.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ApplicationStub {
    pub source: Source,
    pub external_id: String,
    pub display_name: String,
    #[serde(default)]
    pub raw_tags: Map<String, Value>,
}

impl ApplicationStub {
    pub fn new(source: Source, external_id: &str, display_name: &str) -> Self {
        Self {
            source,
            external_id: external_id.to_string(),
            display_name: display_name.to_string(),
            raw_tags: Map::new(),
        }
    }

    pub fn with_tag(mut self, key: &str, value: &str) -> Self {
        self.raw_tags.insert(key.to_string(), Value::String(value.to_string()));
        self
    }

    /// Non-empty string (or number) tag value.
    fn tag(&self, key: &str) -> Option<String> {
        match self.raw_tags.get(key)? {
            Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }

    pub fn owner(&self) -> Option<String> {
        self.tag("owner")
    }

    pub fn sector(&self) -> Option<String> {
        self.tag("sector")
    }

    /// The CMDB calls the cost-center an H-code.
    pub fn cost_center(&self) -> Option<String> {
        self.tag("cost_center").or_else(|| self.tag("h_code"))
    }

    pub fn architecture(&self) -> Option<Architecture> {
        self.tag("architecture")
            .map(|a| Architecture::from_tag(&a))
            .filter(|a| *a != Architecture::Unknown)
    }
}

/// One daily usage observation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UsageInput {
    pub timestamp: NaiveDateTime,
    pub app_external_id: String,
    #[serde(default = "default_usage_source")]
    pub source: Source,
    pub capability_code: String,
    pub tier: String,
    pub units: f64,
    #[serde(default)]
    pub node_count: i64,
}

fn default_usage_source() -> Source {
    Source::Monitoring
}

impl UsageInput {
    pub fn validate(&self) -> PipelineResult<()> {
        if !self.units.is_finite() || self.units < 0.0 {
            return Err(PipelineError::InvalidInput(format!(
                "units must be a finite non-negative number, got {} for '{}'",
                self.units, self.app_external_id
            )));
        }
        if self.node_count < 0 {
            return Err(PipelineError::InvalidInput(format!(
                "node_count must be >= 0, got {} for '{}'",
                self.node_count, self.app_external_id
            )));
        }
        if self.capability_code.trim().is_empty() || self.tier.trim().is_empty() {
            return Err(PipelineError::InvalidInput(format!(
                "capability and tier are required for '{}'",
                self.app_external_id
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct IngestSummary {
    pub accepted: u64,
    /// Already present; re-ingestion is a no-op.
    pub duplicates: u64,
    pub rejected: u64,
}

pub fn ingest_applications(
    store: &LicenseStore,
    stubs: &[ApplicationStub],
) -> PipelineResult<IngestSummary> {
    let mut summary = IngestSummary::default();
    for stub in stubs {
        if stub.external_id.trim().is_empty() {
            log::warn!("ingest: application stub without external id skipped ({})", stub.display_name);
            summary.rejected += 1;
            continue;
        }
        store.upsert_application_stub(stub)?;
        summary.accepted += 1;
    }
    log::info!(
        "ingest: applications accepted={} rejected={}",
        summary.accepted, summary.rejected
    );
    Ok(summary)
}

/// Ingest usage; input errors reject the record, database errors abort.
pub fn ingest_usage(store: &LicenseStore, records: &[UsageInput]) -> PipelineResult<IngestSummary> {
    let mut summary = IngestSummary::default();
    for record in records {
        match store.ingest_usage(record) {
            Ok(true) => summary.accepted += 1,
            Ok(false) => summary.duplicates += 1,
            Err(e @ (PipelineError::InvalidInput(_) | PipelineError::UnknownApplication { .. })) => {
                log::warn!("ingest: usage record rejected: {e}");
                summary.rejected += 1;
            }
            Err(e) => return Err(e),
        }
    }
    log::info!(
        "ingest: usage accepted={} duplicates={} rejected={}",
        summary.accepted, summary.duplicates, summary.rejected
    );
    Ok(summary)
}

pub fn ingest_price_rules(store: &LicenseStore, rules: &[PriceRule]) -> PipelineResult<IngestSummary> {
    let mut summary = IngestSummary::default();
    for rule in rules {
        store.upsert_price_rule(rule)?;
        summary.accepted += 1;
    }
    log::info!("ingest: price rules upserted={}", summary.accepted);
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn usage(units: f64, nodes: i64) -> UsageInput {
        UsageInput {
            timestamp: NaiveDate::from_ymd_opt(2025, 3, 1)
                .unwrap()
                .and_hms_opt(6, 0, 0)
                .unwrap(),
            app_external_id: "app-1".into(),
            source: Source::Monitoring,
            capability_code: "APM".into(),
            tier: "Peak".into(),
            units,
            node_count: nodes,
        }
    }

    #[test]
    fn tags_populate_metadata() {
        let stub = ApplicationStub::new(Source::Cmdb, "sys-1", "Order Management")
            .with_tag("owner", "dana@corp.example")
            .with_tag("h_code", "H-FIN-001")
            .with_tag("architecture", "Microservices")
            .with_tag("sector", "  ");
        assert_eq!(stub.owner().as_deref(), Some("dana@corp.example"));
        assert_eq!(stub.cost_center().as_deref(), Some("H-FIN-001"));
        assert_eq!(stub.architecture(), Some(Architecture::Microservices));
        assert_eq!(stub.sector(), None);
    }

    #[test]
    fn usage_validation_rejects_bad_numbers() {
        assert!(usage(10.0, 2).validate().is_ok());
        assert!(usage(0.0, 0).validate().is_ok());
        assert!(usage(-1.0, 0).validate().is_err());
        assert!(usage(f64::NAN, 0).validate().is_err());
        assert!(usage(f64::INFINITY, 0).validate().is_err());
        assert!(usage(1.0, -3).validate().is_err());
    }

    #[test]
    fn usage_input_parses_from_json() {
        let json = r#"{"timestamp":"2025-03-01T06:00:00","app_external_id":"app-1",
            "capability_code":"APM","tier":"Peak","units":12.5}"#;
        let input: UsageInput = serde_json::from_str(json).unwrap();
        assert_eq!(input.source, Source::Monitoring);
        assert_eq!(input.node_count, 0);
    }
}
