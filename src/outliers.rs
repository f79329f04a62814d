use crate::customers::CustomerTable;
use crate::metrics::variance;
use crate::schema::AnalyticsThresholds;
use crate::utils::{mean, safe_ratio, sample_std_dev};
use log::debug;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OutlierTier {
    /// z above the extreme threshold; surfaced regardless of size.
    Extreme,
    /// z above the material threshold and a material share of the total.
    Material,
    /// z above the material threshold and a very large growth rate, regardless of size.
    Emerging,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Outlier {
    pub name: String,
    pub previous: f64,
    pub current: f64,
    /// Year-over-year growth in percent.
    pub growth_rate: f64,
    pub z_score: f64,
    /// Larger of the customer's share of the previous and current totals.
    pub share: f64,
    pub tier: OutlierTier,
    pub priority: f64,
}

/// Assigns at most one tier. Checked in order Extreme, Material, Emerging.
pub fn classify_outlier(
    z_score: f64,
    share: f64,
    growth_rate: f64,
    thresholds: &AnalyticsThresholds,
) -> Option<OutlierTier> {
    if z_score > thresholds.extreme_z {
        Some(OutlierTier::Extreme)
    } else if z_score > thresholds.material_z && share >= thresholds.materiality_share {
        Some(OutlierTier::Material)
    } else if z_score > thresholds.material_z && growth_rate.abs() > thresholds.emerging_rate_pct {
        Some(OutlierTier::Emerging)
    } else {
        None
    }
}

fn priority(tier: OutlierTier, z_score: f64, share: f64, growth_rate: f64) -> f64 {
    match tier {
        OutlierTier::Extreme | OutlierTier::Material => z_score * share * 100.0,
        OutlierTier::Emerging => z_score * growth_rate.abs() / 100.0,
    }
}

/// Flags customers whose year-over-year growth is unusual relative to the
/// rest of the book. Only customers with a non-zero prior value take part.
///
/// Extreme outliers are listed first, then by priority score; the list is
/// capped at `thresholds.outlier_display_cap`.
pub fn detect_outliers(
    table: &CustomerTable,
    previous_index: usize,
    current_index: usize,
    thresholds: &AnalyticsThresholds,
) -> Vec<Outlier> {
    let candidates: Vec<(&str, f64, f64, f64)> = table
        .active()
        .filter_map(|r| {
            let previous = r.value_at(previous_index);
            let current = r.value_at(current_index);
            variance(current, previous).map(|rate| (r.name.as_str(), previous, current, rate))
        })
        .collect();

    let rates: Vec<f64> = candidates.iter().map(|c| c.3).collect();
    let avg = mean(&rates);
    let std_dev = sample_std_dev(&rates);
    if std_dev == 0.0 {
        debug!(
            "Skipping outlier detection: {} growth rates with no spread",
            rates.len()
        );
        return Vec::new();
    }

    let total_previous = table.total_at(previous_index);
    let total_current = table.total_at(current_index);

    let mut outliers: Vec<Outlier> = candidates
        .into_iter()
        .filter_map(|(name, previous, current, growth_rate)| {
            let z_score = (growth_rate - avg).abs() / std_dev;
            let share = safe_ratio(previous, total_previous).max(safe_ratio(current, total_current));
            let tier = classify_outlier(z_score, share, growth_rate, thresholds)?;
            Some(Outlier {
                name: name.to_string(),
                previous,
                current,
                growth_rate,
                z_score,
                share,
                tier,
                priority: priority(tier, z_score, share, growth_rate),
            })
        })
        .collect();

    outliers.sort_by(|a, b| {
        let a_extreme = a.tier == OutlierTier::Extreme;
        let b_extreme = b.tier == OutlierTier::Extreme;
        b_extreme
            .cmp(&a_extreme)
            .then_with(|| b.priority.partial_cmp(&a.priority).unwrap_or(Ordering::Equal))
            .then_with(|| a.name.cmp(&b.name))
    });
    outliers.truncate(thresholds.outlier_display_cap);
    outliers
}
