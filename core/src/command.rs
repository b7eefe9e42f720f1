use serde::{Deserialize, Serialize};

/// Operator decisions that take precedence over automatic matching.
/// Variants are only ever appended.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum OverrideDecision {
    /// Merge the Source-A application with this Source-B stub.
    Link { source_b_key: String },
    /// Never match the Source-A application with this Source-B stub.
    Reject { source_b_key: String },
}

impl OverrideDecision {
    pub fn kind(&self) -> &'static str {
        match self {
            OverrideDecision::Link { .. }   => "link",
            OverrideDecision::Reject { .. } => "reject",
        }
    }

    pub fn source_b_key(&self) -> &str {
        match self {
            OverrideDecision::Link { source_b_key } | OverrideDecision::Reject { source_b_key } => {
                source_b_key
            }
        }
    }
}

/// One override, keyed by the Source-A external id.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ManualOverride {
    pub source_a_key: String,
    #[serde(flatten)]
    pub decision: OverrideDecision,
    #[serde(default)]
    pub note: Option<String>,
}
