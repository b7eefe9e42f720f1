//! Contract pricing: the versioned PriceRule table and the
//! usage-to-cost arithmetic.
//!
//! A PriceTable is built once per stage from every stored rule and
//! passed around read-only. Building it validates the table: for one
//! capability+tier the inclusive date ranges must not overlap.

use crate::error::{PipelineError, PipelineResult};
use chrono::NaiveDate;
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Decimal places kept on every currency amount.
pub const CURRENCY_DP: u32 = 2;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PriceRule {
    #[serde(default)]
    pub id: Option<i64>,
    pub capability_code: String,
    pub tier: String,
    pub start_date: NaiveDate,
    /// None = open-ended, the current rate.
    #[serde(default)]
    pub end_date: Option<NaiveDate>,
    pub unit_rate: Decimal,
}

impl PriceRule {
    pub fn covers(&self, date: NaiveDate) -> bool {
        date >= self.start_date && self.end_date.map_or(true, |end| date <= end)
    }

    fn validate(&self) -> PipelineResult<()> {
        let invalid = |reason: &str| PipelineError::InvalidPriceRule {
            capability: self.capability_code.clone(),
            tier: self.tier.clone(),
            start: self.start_date,
            reason: reason.to_string(),
        };
        if self.end_date.is_some_and(|end| end < self.start_date) {
            return Err(invalid("end date precedes start date"));
        }
        if self.unit_rate.is_sign_negative() {
            return Err(invalid("negative unit rate"));
        }
        Ok(())
    }
}

/// Round a currency amount the way invoices do.
pub fn round_currency(amount: Decimal) -> Decimal {
    amount.round_dp_with_strategy(CURRENCY_DP, RoundingStrategy::MidpointAwayFromZero)
}

/// `units × unit_rate`, rounded to cents. None when `units` is not a
/// finite number.
pub fn cost_for(units: f64, unit_rate: Decimal) -> Option<Decimal> {
    Decimal::from_f64(units).map(|u| round_currency(u * unit_rate))
}

#[derive(Debug, Default)]
pub struct PriceTable {
    by_pair: HashMap<(String, String), Vec<PriceRule>>,
}

impl PriceTable {
    /// Index and validate the rules. Overlapping ranges for one
    /// capability+tier are an invariant violation.
    pub fn new(rules: Vec<PriceRule>) -> PipelineResult<Self> {
        let mut by_pair: HashMap<(String, String), Vec<PriceRule>> = HashMap::new();
        for rule in rules {
            rule.validate()?;
            by_pair
                .entry((rule.capability_code.clone(), rule.tier.clone()))
                .or_default()
                .push(rule);
        }

        for ((capability, tier), rules) in by_pair.iter_mut() {
            rules.sort_by_key(|r| r.start_date);
            for pair in rules.windows(2) {
                let (earlier, later) = (&pair[0], &pair[1]);
                let overlaps = earlier.end_date.map_or(true, |end| later.start_date <= end);
                if overlaps {
                    return Err(PipelineError::OverlappingPriceRules {
                        capability: capability.clone(),
                        tier: tier.clone(),
                        first_start: earlier.start_date,
                        second_start: later.start_date,
                    });
                }
            }
        }
        Ok(Self { by_pair })
    }

    pub fn len(&self) -> usize {
        self.by_pair.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The rule whose range contains `date`. Ok(None) is an orphan;
    /// more than one match is never resolved silently.
    pub fn rule_for(
        &self,
        capability: &str,
        tier: &str,
        date: NaiveDate,
    ) -> PipelineResult<Option<&PriceRule>> {
        let Some(rules) = self.by_pair.get(&(capability.to_string(), tier.to_string())) else {
            return Ok(None);
        };
        let mut matches = rules.iter().filter(|r| r.covers(date));
        let first = matches.next();
        let extra = matches.count();
        if extra > 0 {
            return Err(PipelineError::AmbiguousPriceRule {
                capability: capability.to_string(),
                tier: tier.to_string(),
                date,
                matches: extra + 1,
            });
        }
        Ok(first)
    }

    /// Rate used for a forecast month: the rule active on `date`, else the
    /// latest open-ended rule for the pair.
    pub fn forecast_rule_for(
        &self,
        capability: &str,
        tier: &str,
        date: NaiveDate,
    ) -> PipelineResult<Option<&PriceRule>> {
        if let Some(rule) = self.rule_for(capability, tier, date)? {
            return Ok(Some(rule));
        }
        Ok(self
            .by_pair
            .get(&(capability.to_string(), tier.to_string()))
            .and_then(|rules| {
                rules
                    .iter()
                    .filter(|r| r.end_date.is_none())
                    .max_by_key(|r| r.start_date)
            }))
    }
}
