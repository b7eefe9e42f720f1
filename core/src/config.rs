use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

// ── Reconciliation ─────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconciliationConfig {
    /// Scores at or above this merge automatically.
    pub auto_match_threshold: f64,
    /// Scores at or above this (and below auto-match) go to manual review.
    pub review_threshold: f64,
}

// ── Allocation ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DistributionMethod {
    ProportionalUsage,
    EqualSplit,
    /// `proportional_weight` of the cost follows usage, the rest is split equally.
    WeightedCustom { proportional_weight: Decimal },
}

impl DistributionMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            DistributionMethod::ProportionalUsage  => "proportional_usage",
            DistributionMethod::EqualSplit         => "equal_split",
            DistributionMethod::WeightedCustom { .. } => "weighted_custom",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AllocationRule {
    pub name: String,
    pub method: DistributionMethod,
    /// Case-insensitive substring matched against the shared service's
    /// cost-center code (or sector when it has none).
    pub shared_service_code: String,
    #[serde(default)]
    pub target_sectors: Option<Vec<String>>,
    #[serde(default = "default_true")]
    pub active: bool,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AllocationConfig {
    pub shared_cost_center_markers: Vec<String>,
    pub shared_sectors: Vec<String>,
    pub rules: Vec<AllocationRule>,
    /// Allowed deviation per target sector when checking conservation.
    pub tolerance_per_sector: Decimal,
}

impl AllocationConfig {
    /// True when the cost-center carries a shared marker or the sector is
    /// flagged as a shared/platform sector.
    pub fn is_shared_service(&self, cost_center: Option<&str>, sector: Option<&str>) -> bool {
        let by_code = cost_center.is_some_and(|code| {
            let code = code.to_ascii_uppercase();
            self.shared_cost_center_markers
                .iter()
                .any(|m| code.contains(&m.to_ascii_uppercase()))
        });
        by_code || sector.is_some_and(|s| self.is_shared_sector(s))
    }

    pub fn is_shared_sector(&self, sector: &str) -> bool {
        self.shared_sectors
            .iter()
            .any(|s| s.eq_ignore_ascii_case(sector.trim()))
    }

    /// First active rule whose code pattern occurs in the cost-center,
    /// falling back to the sector name.
    pub fn rule_for(&self, cost_center: Option<&str>, sector: Option<&str>) -> Option<&AllocationRule> {
        self.rules.iter().filter(|r| r.active).find(|r| {
            let pattern = r.shared_service_code.to_ascii_uppercase();
            [cost_center, sector]
                .into_iter()
                .flatten()
                .any(|field| field.to_ascii_uppercase().contains(&pattern))
        })
    }
}

// ── Forecasting ────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForecastModelConfig {
    pub smoothing_alpha: f64,
    pub linear_weight: f64,
    pub smoothing_weight: f64,
    pub horizon_months: u32,
    pub history_window_days: u32,
    pub min_history_days: u32,
    /// Two-sided normal quantile for the confidence band (1.96 → 95%).
    pub z_score: f64,
}

impl ForecastModelConfig {
    /// Method tag stored on every ForecastRecord, naming the models that
    /// actually contribute.
    pub fn method_tag(&self) -> &'static str {
        match (self.linear_weight > 0.0, self.smoothing_weight > 0.0) {
            (true, true)  => "ensemble_linear_exp",
            (true, false) => "linear_trend",
            _             => "exp_smoothing",
        }
    }
}

// ── Aggregate ──────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub reconciliation: ReconciliationConfig,
    pub allocation: AllocationConfig,
    pub forecast: ForecastModelConfig,
}

impl PipelineConfig {
    /// Load from the data/ directory.
    /// In tests, use PipelineConfig::default_test().
    pub fn load(data_dir: &str) -> anyhow::Result<Self> {
        let recon_path = format!("{data_dir}/reconciliation/reconciliation_config.json");
        let recon_content = std::fs::read_to_string(&recon_path)
            .map_err(|e| anyhow::anyhow!("Cannot read {recon_path}: {e}"))?;
        let reconciliation: ReconciliationConfig = serde_json::from_str(&recon_content)?;

        let alloc_path = format!("{data_dir}/allocation/allocation_rules.json");
        let alloc_content = std::fs::read_to_string(&alloc_path)
            .map_err(|e| anyhow::anyhow!("Cannot read {alloc_path}: {e}"))?;
        let allocation: AllocationConfig = serde_json::from_str(&alloc_content)?;

        let forecast_path = format!("{data_dir}/forecast/forecast_model.json");
        let forecast_content = std::fs::read_to_string(&forecast_path)
            .map_err(|e| anyhow::anyhow!("Cannot read {forecast_path}: {e}"))?;
        let forecast: ForecastModelConfig = serde_json::from_str(&forecast_content)?;

        let config = Self {
            reconciliation,
            allocation,
            forecast,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        let r = &self.reconciliation;
        anyhow::ensure!(
            (0.0..=100.0).contains(&r.review_threshold)
                && (0.0..=100.0).contains(&r.auto_match_threshold)
                && r.review_threshold <= r.auto_match_threshold,
            "reconciliation thresholds must satisfy 0 <= review ({}) <= auto_match ({}) <= 100",
            r.review_threshold,
            r.auto_match_threshold
        );

        for rule in &self.allocation.rules {
            anyhow::ensure!(
                !rule.shared_service_code.trim().is_empty(),
                "allocation rule '{}' has an empty shared_service_code",
                rule.name
            );
            if let DistributionMethod::WeightedCustom { proportional_weight } = &rule.method {
                anyhow::ensure!(
                    *proportional_weight >= Decimal::ZERO && *proportional_weight <= Decimal::ONE,
                    "allocation rule '{}': proportional_weight {} outside [0, 1]",
                    rule.name,
                    proportional_weight
                );
            }
        }
        anyhow::ensure!(
            self.allocation.tolerance_per_sector >= Decimal::ZERO,
            "allocation tolerance_per_sector must be non-negative"
        );

        let f = &self.forecast;
        anyhow::ensure!(
            f.smoothing_alpha > 0.0 && f.smoothing_alpha <= 1.0,
            "forecast smoothing_alpha {} outside (0, 1]",
            f.smoothing_alpha
        );
        anyhow::ensure!(
            f.linear_weight >= 0.0
                && f.smoothing_weight >= 0.0
                && (f.linear_weight + f.smoothing_weight - 1.0).abs() < 1e-9,
            "forecast weights {} + {} must be a convex combination",
            f.linear_weight,
            f.smoothing_weight
        );
        anyhow::ensure!(f.horizon_months > 0, "forecast horizon_months must be positive");
        anyhow::ensure!(
            f.min_history_days >= 2 && f.min_history_days <= f.history_window_days,
            "forecast min_history_days {} must be in [2, history_window_days {}]",
            f.min_history_days,
            f.history_window_days
        );
        anyhow::ensure!(f.z_score > 0.0, "forecast z_score must be positive");
        Ok(())
    }

    /// Config with hardcoded defaults for use in unit tests.
    pub fn default_test() -> Self {
        Self {
            reconciliation: ReconciliationConfig {
                auto_match_threshold: 80.0,
                review_threshold: 50.0,
            },
            allocation: AllocationConfig {
                shared_cost_center_markers: vec![
                    "PLATFORM".into(),
                    "SHARED".into(),
                    "GLOBAL".into(),
                ],
                shared_sectors: vec![
                    "Corporate/Shared Services".into(),
                    "Global IT".into(),
                ],
                rules: vec![
                    AllocationRule {
                        name: "Platform Services - Proportional".into(),
                        method: DistributionMethod::ProportionalUsage,
                        shared_service_code: "PLATFORM".into(),
                        target_sectors: None,
                        active: true,
                    },
                    AllocationRule {
                        name: "Global IT - Equal Split".into(),
                        method: DistributionMethod::EqualSplit,
                        shared_service_code: "GLOBAL".into(),
                        target_sectors: None,
                        active: true,
                    },
                    AllocationRule {
                        name: "Shared Services - Weighted".into(),
                        method: DistributionMethod::WeightedCustom {
                            proportional_weight: Decimal::new(4, 1),
                        },
                        shared_service_code: "SHARED".into(),
                        target_sectors: None,
                        active: true,
                    },
                ],
                tolerance_per_sector: Decimal::new(1, 2),
            },
            forecast: ForecastModelConfig {
                smoothing_alpha: 0.3,
                linear_weight: 0.6,
                smoothing_weight: 0.4,
                horizon_months: 12,
                history_window_days: 90,
                min_history_days: 30,
                z_score: 1.96,
            },
        }
    }
}
