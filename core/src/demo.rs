//! Deterministic demo dataset: a realistic application portfolio seen
//! from both upstream catalogs, daily usage and a versioned price table.
//!
//! All generation is deterministic (same seed = same dataset).

use crate::{
    calendar::month_start,
    command::{ManualOverride, OverrideDecision},
    ingest::{ApplicationStub, UsageInput},
    pricing::PriceRule,
    rng::{StreamRng, StreamSlot},
    types::Source,
};
use chrono::{Days, Months, NaiveDate};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

const SECTORS: &[&str] = &[
    "Finance",
    "Supply Chain",
    "Sales",
    "IT Operations",
    "Corporate/Shared Services",
    "Global IT",
    "Manufacturing",
];

const APP_NAMES: &[&str] = &[
    "Customer Portal", "Order Management", "Inventory System", "Billing Engine",
    "CRM Platform", "Supply Chain Hub", "Analytics Dashboard", "Mobile App Backend",
    "Payment Gateway", "Warehouse Management", "Sales Force Automation", "ERP System",
    "Marketing Automation", "Customer Service Portal", "Product Catalog",
    "Shipping Tracker", "Returns Processing", "Loyalty Program", "Procurement System",
    "Asset Management", "HR Portal", "Expense Management", "Time Tracking",
    "Document Management", "Collaboration Suite", "Email Gateway", "API Gateway",
    "Data Warehouse", "Business Intelligence", "Machine Learning Pipeline",
    "IoT Platform", "Edge Computing", "Cloud Migration Tool", "Security Monitor",
    "Compliance Dashboard", "Audit System", "Identity Management", "Access Control",
    "Network Monitor", "Application Firewall", "Load Balancer", "Cache Service",
    "Message Queue", "Event Bus", "Workflow Engine", "Notification Service",
    "Search Engine", "Recommendation Engine", "Fraud Detection", "Risk Analysis",
];

const OWNERS: &[&str] = &[
    "j.okafor", "s.lindqvist", "m.tanaka", "l.moreau", "d.alvarez", "r.patel", "k.novak",
];

const ARCHITECTURES: &[&str] = &["Monolithic", "Microservices", "Serverless", "Legacy"];

/// (capability, base rate in thousandths of a currency unit).
const CAPABILITIES: &[(&str, i64)] = &[
    ("APM", 450),
    ("MRUM", 200),
    ("BRUM", 150),
    ("ANALYTICS", 300),
    ("INFRA", 250),
];

const TIERS: &[&str] = &["Peak", "Pro"];

/// Pair deliberately left out of the price table so orphan costs show
/// up in every demo run.
const UNPRICED: (&str, &str) = ("INFRA", "Pro");

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DemoDataset {
    pub applications: Vec<ApplicationStub>,
    pub usage: Vec<UsageInput>,
    pub price_rules: Vec<PriceRule>,
    pub overrides: Vec<ManualOverride>,
}

#[derive(Debug, Clone, Copy)]
pub struct DemoOptions {
    pub seed: u64,
    pub as_of: NaiveDate,
    pub app_count: usize,
    pub history_days: u32,
}

impl DemoOptions {
    pub fn new(seed: u64, as_of: NaiveDate) -> Self {
        Self {
            seed,
            as_of,
            app_count: 40,
            history_days: 120,
        }
    }
}

/// How the monitoring platform spells a catalog name.
fn monitoring_spelling(name: &str, variant: usize) -> String {
    match variant {
        0 => name.to_string(),
        1 => name.to_lowercase().replace(' ', "-"),
        2 => format!("{name} App"),
        _ => format!("{name} - Prod"),
    }
}

fn cost_center(sector: &str, rng: &mut StreamRng) -> Option<String> {
    if rng.chance(0.12) {
        return None;
    }
    let code = match sector {
        "Corporate/Shared Services" => format!("H-SHARED-{:03}", rng.next_below(1000)),
        "Global IT" => format!("H-GLOBAL-{:03}", rng.next_below(1000)),
        "IT Operations" if rng.chance(0.4) => format!("H-PLATFORM-{:03}", rng.next_below(1000)),
        _ => format!("H{:08}", rng.next_below(100_000_000)),
    };
    Some(code)
}

fn sys_id(rng: &mut StreamRng) -> String {
    let mut bytes = [0u8; 16];
    rng.fill_bytes(&mut bytes);
    uuid::Builder::from_random_bytes(bytes)
        .into_uuid()
        .simple()
        .to_string()
}

fn price_rules(as_of: NaiveDate) -> Vec<PriceRule> {
    let contract_start = month_start(as_of.checked_sub_days(Days::new(730)).unwrap_or(as_of));
    let repriced = month_start(as_of)
        .checked_sub_months(Months::new(6))
        .unwrap_or(as_of);
    let mut rules = Vec::new();
    for &(capability, base) in CAPABILITIES {
        for (t, &tier) in TIERS.iter().enumerate() {
            if (capability, tier) == UNPRICED {
                continue;
            }
            // Peak costs half again as much as Pro.
            let rate = if t == 0 { base * 3 / 2 } else { base };
            rules.push(PriceRule {
                id: None,
                capability_code: capability.to_string(),
                tier: tier.to_string(),
                start_date: contract_start,
                end_date: repriced.pred_opt(),
                unit_rate: Decimal::new(rate, 3),
            });
            rules.push(PriceRule {
                id: None,
                capability_code: capability.to_string(),
                tier: tier.to_string(),
                start_date: repriced,
                end_date: None,
                unit_rate: Decimal::new(rate * 105 / 100, 3),
            });
        }
    }
    rules
}

pub fn generate(options: &DemoOptions) -> DemoDataset {
    let mut catalog = StreamRng::new(options.seed, StreamSlot::Catalog);
    let mut usage_rng = StreamRng::new(options.seed, StreamSlot::Usage);
    let mut keys = StreamRng::new(options.seed, StreamSlot::Keys);

    let mut applications = Vec::new();
    let mut usage = Vec::new();
    let mut monitoring_only = Vec::new();
    let mut cmdb_only = Vec::new();

    for i in 0..options.app_count {
        let base_name = APP_NAMES[i % APP_NAMES.len()];
        let name = if i < APP_NAMES.len() {
            base_name.to_string()
        } else {
            format!("{base_name} {}", i / APP_NAMES.len() + 1)
        };
        let sector = *catalog.pick(SECTORS);
        let in_cmdb = !catalog.chance(0.1);
        let in_monitoring = !in_cmdb || !catalog.chance(0.1);

        let b_key = sys_id(&mut keys);
        if in_cmdb {
            let mut stub = ApplicationStub::new(Source::Cmdb, &b_key, &name)
                .with_tag("owner", &format!("{}@corp.example", catalog.pick(OWNERS)))
                .with_tag("sector", sector)
                .with_tag("architecture", *catalog.pick(ARCHITECTURES));
            if let Some(code) = cost_center(sector, &mut catalog) {
                stub = stub.with_tag("h_code", &code);
            }
            applications.push(stub);
        }
        if !in_monitoring {
            cmdb_only.push(b_key);
            continue;
        }

        let a_key = format!("appd_{:04}", i + 1);
        let spelling = if in_cmdb {
            monitoring_spelling(&name, catalog.next_below(4))
        } else {
            format!("svc-{:04x}", catalog.next_below(0xffff))
        };
        applications.push(ApplicationStub::new(Source::Monitoring, &a_key, &spelling));
        if !in_cmdb {
            monitoring_only.push(a_key.clone());
        }

        let pairs = 1 + usage_rng.next_below(2);
        for _ in 0..pairs {
            let (capability, _) = *usage_rng.pick(CAPABILITIES);
            let tier = *usage_rng.pick(TIERS);
            let base = usage_rng.uniform(20.0, 400.0);
            let growth = usage_rng.uniform(-0.002, 0.006);
            for day in 0..options.history_days {
                let Some(date) = options
                    .as_of
                    .checked_sub_days(Days::new(u64::from(options.history_days - 1 - day)))
                else {
                    continue;
                };
                if usage_rng.chance(0.05) {
                    continue;
                }
                let noise = usage_rng.uniform(0.85, 1.15);
                let units = (base * (1.0 + growth * f64::from(day)) * noise).max(0.0);
                let Some(timestamp) = date.and_hms_opt(2, 0, 0) else { continue };
                usage.push(UsageInput {
                    timestamp,
                    app_external_id: a_key.clone(),
                    source: Source::Monitoring,
                    capability_code: capability.to_string(),
                    tier: tier.to_string(),
                    units: (units * 100.0).round() / 100.0,
                    node_count: 2 + usage_rng.next_below(40) as i64,
                });
            }
        }
    }

    // An operator confirmed that the first opaque monitoring service is
    // the first catalog-only application.
    let overrides = match (monitoring_only.first(), cmdb_only.first()) {
        (Some(a_key), Some(b_key)) => vec![ManualOverride {
            source_a_key: a_key.clone(),
            decision: OverrideDecision::Link {
                source_b_key: b_key.clone(),
            },
            note: Some("confirmed by service owner".into()),
        }],
        _ => Vec::new(),
    };

    log::debug!(
        "demo: seed={} stubs={} usage={} overrides={}",
        options.seed,
        applications.len(),
        usage.len(),
        overrides.len()
    );

    DemoDataset {
        applications,
        usage,
        price_rules: price_rules(options.as_of),
        overrides,
    }
}
