//! Shared primitive types used across the pipeline.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Surrogate key of an Application row.
pub type AppId = i64;

/// The canonical run identifier.
pub type RunId = String;

/// Sector name used when an Application carries no sector.
pub const UNASSIGNED_SECTOR: &str = "Unassigned";

/// Which upstream catalog a record came from.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Source {
    /// Source A: the monitoring platform.
    Monitoring,
    /// Source B: the CMDB.
    Cmdb,
}

impl Source {
    pub fn as_str(&self) -> &'static str {
        match self {
            Source::Monitoring => "monitoring",
            Source::Cmdb       => "cmdb",
        }
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum Architecture {
    Monolith,
    Microservices,
    #[default]
    Unknown,
}

impl Architecture {
    pub fn as_str(&self) -> &'static str {
        match self {
            Architecture::Monolith      => "monolith",
            Architecture::Microservices => "microservices",
            Architecture::Unknown       => "unknown",
        }
    }

    /// Lenient parse of a tag value ("Monolithic", "micro-services", ...).
    pub fn from_tag(value: &str) -> Self {
        let v = value.trim().to_ascii_lowercase();
        if v.starts_with("monolith") {
            Architecture::Monolith
        } else if v.starts_with("micro") {
            Architecture::Microservices
        } else {
            Architecture::Unknown
        }
    }
}

/// Which chargeback cycle produced a row.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ChargebackCycle {
    /// The application's own metered cost.
    Direct,
    /// A share of a shared service's cost.
    Allocated,
}

impl ChargebackCycle {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChargebackCycle::Direct    => "direct",
            ChargebackCycle::Allocated => "allocated",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "direct"    => Some(ChargebackCycle::Direct),
            "allocated" => Some(ChargebackCycle::Allocated),
            _           => None,
        }
    }
}

/// Outcome recorded in the reconciliation log.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum MatchStatus {
    AutoMatched,
    ManualMatched,
    NeedsReview,
    Rejected,
}

impl MatchStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MatchStatus::AutoMatched   => "auto_matched",
            MatchStatus::ManualMatched => "manual_matched",
            MatchStatus::NeedsReview   => "needs_review",
            MatchStatus::Rejected      => "rejected",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "auto_matched"   => Some(MatchStatus::AutoMatched),
            "manual_matched" => Some(MatchStatus::ManualMatched),
            "needs_review"   => Some(MatchStatus::NeedsReview),
            "rejected"       => Some(MatchStatus::Rejected),
            _                => None,
        }
    }
}
