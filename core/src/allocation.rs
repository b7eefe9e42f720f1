//! Shared-cost distribution arithmetic.
//!
//! Shares are computed exactly, rounded down to cents, and the leftover
//! cents go to the sectors with the largest remainders (ties by sector
//! name) so the shares always sum to the total.

use crate::config::DistributionMethod;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, PartialEq)]
pub struct SectorUsage {
    pub sector: String,
    pub units: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SectorShare {
    pub sector: String,
    pub usage: Decimal,
    pub amount: Decimal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnallocatedReason {
    NoMatchingRule,
    NoConsumingSectors,
    NoConsumingUsage,
}

impl fmt::Display for UnallocatedReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            UnallocatedReason::NoMatchingRule     => "no_matching_rule",
            UnallocatedReason::NoConsumingSectors => "no_consuming_sectors",
            UnallocatedReason::NoConsumingUsage   => "no_consuming_usage",
        })
    }
}

fn proportional_weight(method: &DistributionMethod) -> Decimal {
    match method {
        DistributionMethod::ProportionalUsage => Decimal::ONE,
        DistributionMethod::EqualSplit => Decimal::ZERO,
        DistributionMethod::WeightedCustom { proportional_weight } => *proportional_weight,
    }
}

/// Split `total` (already in cents) across `sectors`.
pub fn distribute(
    total: Decimal,
    sectors: &[SectorUsage],
    method: &DistributionMethod,
) -> Result<Vec<SectorShare>, UnallocatedReason> {
    if sectors.is_empty() {
        return Err(UnallocatedReason::NoConsumingSectors);
    }
    let weight = proportional_weight(method);
    let total_usage: Decimal = sectors.iter().map(|s| s.units).sum();
    if weight > Decimal::ZERO && total_usage <= Decimal::ZERO {
        return Err(UnallocatedReason::NoConsumingUsage);
    }

    let count = Decimal::from(sectors.len());
    let equal_part = total * (Decimal::ONE - weight) / count;
    let raw: Vec<Decimal> = sectors
        .iter()
        .map(|s| {
            let usage_part = if weight > Decimal::ZERO {
                total * weight * s.units / total_usage
            } else {
                Decimal::ZERO
            };
            usage_part + equal_part
        })
        .collect();

    let mut shares: Vec<SectorShare> = sectors
        .iter()
        .zip(&raw)
        .map(|(s, r)| SectorShare {
            sector: s.sector.clone(),
            usage: s.units,
            amount: r.round_dp_with_strategy(2, RoundingStrategy::ToZero),
        })
        .collect();

    let floored: Decimal = shares.iter().map(|s| s.amount).sum();
    let leftover_cents = ((total - floored) * Decimal::ONE_HUNDRED)
        .round()
        .to_i64()
        .unwrap_or(0)
        .max(0) as usize;

    let mut order: Vec<usize> = (0..shares.len()).collect();
    order.sort_by(|&a, &b| {
        let rem_a = raw[a] - shares[a].amount;
        let rem_b = raw[b] - shares[b].amount;
        rem_b.cmp(&rem_a).then_with(|| shares[a].sector.cmp(&shares[b].sector))
    });
    let cent = Decimal::new(1, 2);
    for &idx in order.iter().cycle().take(leftover_cents) {
        shares[idx].amount += cent;
    }

    shares.sort_by(|a, b| a.sector.cmp(&b.sector));
    Ok(shares)
}

/// Conservation check: allocations may deviate from the total by at most
/// `tolerance_per_sector` per sector.
pub fn is_conserved(total: Decimal, shares: &[SectorShare], tolerance_per_sector: Decimal) -> bool {
    let allocated: Decimal = shares.iter().map(|s| s.amount).sum();
    (allocated - total).abs() <= tolerance_per_sector * Decimal::from(shares.len())
}
