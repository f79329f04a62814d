use crate::engine::CellResolver;
use crate::metrics::variance;
use crate::schema::PeriodSet;
use crate::utils::safe_ratio;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct PvmTotals {
    pub amount: f64,
    /// Physical volume in kilograms.
    pub volume: f64,
}

impl PvmTotals {
    pub fn new(amount: f64, volume: f64) -> Self {
        Self { amount, volume }
    }

    fn is_usable(&self) -> bool {
        self.amount != 0.0 && self.volume != 0.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PvmBasis {
    PriorYear,
    Budget,
}

/// Product mix needs per-SKU detail that aggregated totals do not carry, so
/// it is reported as unavailable with a zero value instead of being left out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum MixEffect {
    #[default]
    Unavailable,
}

impl MixEffect {
    pub fn value(&self) -> f64 {
        0.0
    }

    pub fn is_available(&self) -> bool {
        false
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PvmResult {
    pub basis: PvmBasis,
    /// Amount per metric ton.
    pub avg_price_current: f64,
    pub avg_price_base: f64,
    /// Percent change in average price; `None` without a base price.
    pub price_effect: Option<f64>,
    /// Percent change in volume; `None` without a base volume.
    pub volume_effect: Option<f64>,
    pub mix_effect: MixEffect,
}

/// Amount per metric ton, given a volume in kilograms. Zero without volume.
pub fn kilo_rate(amount: f64, volume_kg: f64) -> f64 {
    safe_ratio(amount, volume_kg / 1000.0)
}

pub fn price_volume_mix(current: PvmTotals, base: PvmTotals, basis: PvmBasis) -> PvmResult {
    let avg_price_current = kilo_rate(current.amount, current.volume);
    let avg_price_base = kilo_rate(base.amount, base.volume);

    PvmResult {
        basis,
        avg_price_current,
        avg_price_base,
        price_effect: variance(avg_price_current, avg_price_base),
        volume_effect: variance(current.volume, base.volume),
        mix_effect: MixEffect::Unavailable,
    }
}

/// Prior year is preferred; the budget is the fallback when prior-year
/// totals are missing or empty.
pub fn select_base(
    prior_year: Option<PvmTotals>,
    budget: Option<PvmTotals>,
) -> Option<(PvmTotals, PvmBasis)> {
    match (prior_year, budget) {
        (Some(prior), _) if prior.is_usable() => Some((prior, PvmBasis::PriorYear)),
        (_, Some(budget)) if budget.is_usable() => Some((budget, PvmBasis::Budget)),
        _ => None,
    }
}

/// Decomposes the period at `index` against its prior-year column, or its
/// budget column when no usable prior year is configured.
pub fn pvm_for_period(
    resolver: &CellResolver<'_>,
    periods: &PeriodSet,
    index: usize,
) -> Option<PvmResult> {
    let schema = resolver.schema();
    let totals_at = |i: usize| {
        let period = periods.get(i)?;
        Some(PvmTotals::new(
            resolver.compute_cell_value(schema.sales_row, period),
            resolver.compute_cell_value(schema.volume_row, period),
        ))
    };

    let current = totals_at(index)?;
    let prior_year = periods.yoy_counterpart(index).and_then(totals_at);
    let budget = periods.budget_counterpart(index).and_then(totals_at);
    let (base, basis) = select_base(prior_year, budget)?;
    Some(price_volume_mix(current, base, basis))
}
