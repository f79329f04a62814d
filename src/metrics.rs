use crate::engine::{CellResolver, DataTable};
use crate::ledger::RowSchema;
use crate::schema::{period_key, Period, PeriodSet, PeriodSpan, PeriodType};
use crate::utils::{months_remaining, safe_ratio, MONTHS_IN_YEAR};
use serde::{Deserialize, Serialize};

/// Amount of a ledger row for one period, with its share of sales and its
/// value per kilogram sold. All values are unrounded.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct DerivedMetric {
    pub amount: f64,
    pub percent_of_sales: f64,
    pub per_kg: f64,
}

impl DerivedMetric {
    pub fn from_parts(amount: f64, sales: f64, volume: f64) -> Self {
        Self {
            amount,
            percent_of_sales: safe_ratio(amount, sales) * 100.0,
            per_kg: safe_ratio(amount, volume),
        }
    }
}

pub fn derive_metrics_with(resolver: &CellResolver<'_>, row: usize, period: &Period) -> DerivedMetric {
    let schema = resolver.schema();
    let amount = resolver.compute_cell_value(row, period);
    let sales = resolver.compute_cell_value(schema.sales_row, period);
    let volume = resolver.compute_cell_value(schema.volume_row, period);
    DerivedMetric::from_parts(amount, sales, volume)
}

pub fn derive_metrics(table: &DataTable, row: usize, period: &Period) -> DerivedMetric {
    let schema = RowSchema::default();
    derive_metrics_with(&CellResolver::new(table, &schema), row, period)
}

/// Percentage change from `previous` to `current`, relative to `|previous|`.
///
/// `None` when there is no baseline; render it as "N/A", never as 0%.
pub fn variance(current: f64, previous: f64) -> Option<f64> {
    if previous == 0.0 || !previous.is_finite() || !current.is_finite() {
        return None;
    }
    Some((current - previous) / previous.abs() * 100.0)
}

/// One column of a row as shown in the comparison table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeriodComparison {
    pub period_key: String,
    pub label: String,
    pub metric: DerivedMetric,
    pub vs_previous: Option<f64>,
    pub vs_base: Option<f64>,
    pub vs_prior_year: Option<f64>,
    pub vs_budget: Option<f64>,
}

pub fn compare_periods(resolver: &CellResolver<'_>, periods: &PeriodSet, row: usize) -> Vec<PeriodComparison> {
    let metrics: Vec<DerivedMetric> = periods
        .iter()
        .map(|p| derive_metrics_with(resolver, row, p))
        .collect();

    let amount_at = |index: Option<usize>| index.map(|i| metrics[i].amount);

    periods
        .iter()
        .enumerate()
        .map(|(i, period)| {
            let current = metrics[i].amount;
            let against = |baseline: Option<f64>| baseline.and_then(|b| variance(current, b));

            let base = if i == periods.base_index() {
                None
            } else {
                Some(metrics[periods.base_index()].amount)
            };

            PeriodComparison {
                period_key: period_key(period),
                label: period.label(),
                metric: metrics[i],
                vs_previous: against(amount_at(periods.previous(i))),
                vs_base: against(base),
                vs_prior_year: against(amount_at(periods.yoy_counterpart(i))),
                vs_budget: against(amount_at(periods.budget_counterpart(i))),
            }
        })
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RunRateInput {
    pub actual_to_date: f64,
    pub months_elapsed: u32,
    /// Explicit full-year budget, when the data source carries one.
    pub full_year_budget: Option<f64>,
    /// Budget for the elapsed months only.
    pub period_budget: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum CatchUp {
    OnTrack,
    PerMonth { amount: f64 },
    /// The year is over; the whole gap would have to be closed at once.
    NoMonthsRemaining { gap: f64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RunRateProjection {
    pub current_run_rate: f64,
    pub required_run_rate: f64,
    pub is_on_track: bool,
    pub months_remaining: u32,
    pub catch_up: CatchUp,
}

/// Annualises year-to-date actuals and compares them with the full-year
/// target. `tolerance` is the share of the target that still counts as on
/// track (0.85 by default).
pub fn project_run_rate(input: &RunRateInput, tolerance: f64) -> RunRateProjection {
    let elapsed = input.months_elapsed.min(MONTHS_IN_YEAR);
    let annualise = |value: f64| safe_ratio(value * MONTHS_IN_YEAR as f64, elapsed as f64);

    let current_run_rate = annualise(input.actual_to_date);
    let required_run_rate = input
        .full_year_budget
        .unwrap_or_else(|| annualise(input.period_budget));
    let is_on_track = current_run_rate >= required_run_rate * tolerance;
    let remaining = months_remaining(elapsed);

    let catch_up = if is_on_track {
        CatchUp::OnTrack
    } else {
        let gap = required_run_rate - input.actual_to_date;
        if remaining == 0 {
            CatchUp::NoMonthsRemaining { gap }
        } else {
            CatchUp::PerMonth {
                amount: gap / remaining as f64,
            }
        }
    };

    RunRateProjection {
        current_run_rate,
        required_run_rate,
        is_on_track,
        months_remaining: remaining,
        catch_up,
    }
}

/// Builds the run-rate input for `row` from the table: actuals for months
/// `1..=months_elapsed`, the full-year budget when the stored cells cover the
/// whole year (directly or through halves, quarters or months), and the
/// year-to-date budget. Months without their own cell take an even share of
/// the stored quarter, half-year or year around them.
pub fn run_rate_for_row(
    resolver: &CellResolver<'_>,
    row: usize,
    year: i32,
    months_elapsed: u32,
) -> RunRateInput {
    let elapsed = months_elapsed.min(MONTHS_IN_YEAR);
    let to_date: Vec<u32> = (1..=elapsed).collect();

    RunRateInput {
        actual_to_date: resolver.prorated_months(row, year, PeriodType::Actual, &to_date),
        months_elapsed: elapsed,
        full_year_budget: resolver.resolve_complete_span(
            row,
            year,
            &PeriodSpan::Year,
            PeriodType::Budget,
        ),
        period_budget: resolver.prorated_months(row, year, PeriodType::Budget, &to_date),
    }
}
