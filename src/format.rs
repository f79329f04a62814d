//! Presentation formatting. The calculators return unrounded floats; rounding
//! happens only here.

use num_format::{Locale, ToFormattedString};

pub const NOT_AVAILABLE: &str = "N/A";

/// One decimal place, e.g. `15.0%`.
pub fn format_percent(value: f64) -> String {
    format!("{:.1}%", value)
}

/// Signed one-decimal percentage, or `N/A` when there is no baseline.
pub fn format_variance(value: Option<f64>) -> String {
    match value {
        Some(v) if v.is_finite() => format!("{:+.1}%", v),
        _ => NOT_AVAILABLE.to_string(),
    }
}

/// A fraction (0.256) rendered as a percentage (25.6%).
pub fn format_share(fraction: f64) -> String {
    format_percent(fraction * 100.0)
}

/// Amount in millions with two decimals, e.g. `1.25M`.
pub fn format_millions(amount: f64) -> String {
    format!("{:.2}M", amount / 1_000_000.0)
}

/// Whole number with thousands separators, e.g. `1,234,568`.
pub fn format_total(amount: f64) -> String {
    if !amount.is_finite() {
        return NOT_AVAILABLE.to_string();
    }
    let rounded = amount.round() as i64;
    let digits = rounded.unsigned_abs().to_formatted_string(&Locale::en);
    if rounded < 0 {
        format!("-{}", digits)
    } else {
        digits
    }
}

pub fn format_per_kg(value: f64) -> String {
    format!("{:.2}", value)
}

/// CSS class for a variance cell. Absent variances stay neutral.
pub fn variance_class(value: Option<f64>) -> &'static str {
    match value {
        Some(v) if v > 0.0 => "positive",
        Some(v) if v < 0.0 => "negative",
        _ => "neutral",
    }
}
