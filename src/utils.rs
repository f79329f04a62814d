use crate::error::{KpiError, Result};
use chrono::Month;

pub const MONTHS_IN_YEAR: u32 = 12;

pub fn validate_month(month: u32) -> Result<()> {
    if !(1..=MONTHS_IN_YEAR).contains(&month) {
        return Err(KpiError::InvalidMonth(month));
    }
    Ok(())
}

/// Full English month name ("January") for a 1-based month number.
pub fn month_name(month: u32) -> Result<&'static str> {
    validate_month(month)?;
    let parsed = Month::try_from(month as u8).map_err(|_| KpiError::InvalidMonth(month))?;
    Ok(parsed.name())
}

/// Parses "January", "jan", "JANUARY" etc. into a 1-based month number.
pub fn parse_month_name(label: &str) -> Option<u32> {
    label
        .trim()
        .parse::<Month>()
        .ok()
        .map(|m| m.number_from_month())
}

/// Months of a quarter; empty for an invalid quarter number.
pub fn quarter_months(quarter: u8) -> Vec<u32> {
    if !(1..=4).contains(&quarter) {
        return Vec::new();
    }
    let first = (quarter as u32 - 1) * 3 + 1;
    (first..first + 3).collect()
}

pub fn half_year_months(half: u8) -> Vec<u32> {
    if !(1..=2).contains(&half) {
        return Vec::new();
    }
    let first = (half as u32 - 1) * 6 + 1;
    (first..first + 6).collect()
}

pub fn full_year_months() -> Vec<u32> {
    (1..=MONTHS_IN_YEAR).collect()
}

pub fn months_remaining(months_elapsed: u32) -> u32 {
    MONTHS_IN_YEAR - months_elapsed.min(MONTHS_IN_YEAR)
}

/// `numerator / denominator`, or `0.0` when the denominator is zero or the
/// result is not finite.
pub fn safe_ratio(numerator: f64, denominator: f64) -> f64 {
    if denominator == 0.0 {
        return 0.0;
    }
    let ratio = numerator / denominator;
    if ratio.is_finite() {
        ratio
    } else {
        0.0
    }
}

pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Sample standard deviation (n - 1 denominator). Zero for fewer than two values.
pub fn sample_std_dev(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let avg = mean(values);
    let sum_sq: f64 = values.iter().map(|v| (v - avg).powi(2)).sum();
    (sum_sq / (values.len() - 1) as f64).sqrt()
}
