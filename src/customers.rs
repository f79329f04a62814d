use crate::error::{KpiError, Result};
use crate::metrics::variance;
use crate::schema::AnalyticsThresholds;
use crate::utils::safe_ratio;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashSet};

/// Appended to a customer name when several source names were merged into it.
pub const MERGE_MARKER: char = '*';

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CustomerRecord {
    pub name: String,
    /// One value per configured period, aligned by index with the period list.
    pub raw_values: Vec<f64>,
}

impl CustomerRecord {
    pub fn new(name: impl Into<String>, raw_values: Vec<f64>) -> Self {
        Self {
            name: name.into(),
            raw_values,
        }
    }

    pub fn value_at(&self, index: usize) -> f64 {
        self.raw_values
            .get(index)
            .copied()
            .filter(|v| v.is_finite())
            .unwrap_or(0.0)
    }

    pub fn is_all_zero(&self) -> bool {
        self.raw_values.iter().all(|v| *v == 0.0 || !v.is_finite())
    }
}

/// Customer (or product) records for one measure, aligned to a period list.
#[derive(Debug, Clone, PartialEq)]
pub struct CustomerTable {
    period_count: usize,
    records: Vec<CustomerRecord>,
}

impl CustomerTable {
    pub fn new(period_count: usize, records: Vec<CustomerRecord>) -> Result<Self> {
        let mut table = Self {
            period_count,
            records: Vec::with_capacity(records.len()),
        };
        for record in records {
            table.push(record)?;
        }
        Ok(table)
    }

    pub fn push(&mut self, record: CustomerRecord) -> Result<()> {
        if record.raw_values.len() != self.period_count {
            return Err(KpiError::MisalignedRecord {
                name: record.name,
                expected: self.period_count,
                actual: record.raw_values.len(),
            });
        }
        self.records.push(record);
        Ok(())
    }

    pub fn period_count(&self) -> usize {
        self.period_count
    }

    pub fn records(&self) -> &[CustomerRecord] {
        &self.records
    }

    /// Records with at least one non-zero value; the only ones analytics see.
    pub fn active(&self) -> impl Iterator<Item = &CustomerRecord> + '_ {
        self.records.iter().filter(|r| !r.is_all_zero())
    }

    pub fn total_at(&self, index: usize) -> f64 {
        self.active().map(|r| r.value_at(index)).sum()
    }
}

/// Case-insensitive, trimmed name with any trailing merge marker removed.
pub fn normalize_name(name: &str) -> String {
    name.trim()
        .trim_end_matches(MERGE_MARKER)
        .trim()
        .to_lowercase()
}

fn by_value_desc(a: &CustomerShare, b: &CustomerShare) -> Ordering {
    b.value
        .partial_cmp(&a.value)
        .unwrap_or(Ordering::Equal)
        .then_with(|| a.name.cmp(&b.name))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConcentrationRisk {
    Low,
    Medium,
    High,
    Critical,
}

impl ConcentrationRisk {
    pub fn classify(top1_share: f64, top3_share: f64) -> Self {
        if top1_share > 0.5 {
            ConcentrationRisk::Critical
        } else if top1_share > 0.3 || top3_share > 0.7 {
            ConcentrationRisk::High
        } else if top1_share > 0.2 || top3_share > 0.5 {
            ConcentrationRisk::Medium
        } else {
            ConcentrationRisk::Low
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CustomerShare {
    pub name: String,
    pub value: f64,
    pub share: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConcentrationSummary {
    pub total: f64,
    pub customer_count: usize,
    pub top1_share: f64,
    pub top3_share: f64,
    pub top5_share: f64,
    pub top_customers: Vec<CustomerShare>,
    pub risk: ConcentrationRisk,
}

/// Top-N shares of the period's positive total. Shares are fractions (0.6 = 60%).
pub fn concentration(table: &CustomerTable, period_index: usize) -> ConcentrationSummary {
    let mut ranked: Vec<CustomerShare> = table
        .active()
        .map(|r| CustomerShare {
            name: r.name.clone(),
            value: r.value_at(period_index),
            share: 0.0,
        })
        .filter(|c| c.value > 0.0)
        .collect();
    ranked.sort_by(by_value_desc);

    let total: f64 = ranked.iter().map(|c| c.value).sum();
    for customer in &mut ranked {
        customer.share = safe_ratio(customer.value, total);
    }

    let top_share = |n: usize| ranked.iter().take(n).map(|c| c.share).sum::<f64>().min(1.0);
    let top1_share = top_share(1);
    let top3_share = top_share(3);
    let top5_share = top_share(5);

    ConcentrationSummary {
        total,
        customer_count: ranked.len(),
        top1_share,
        top3_share,
        top5_share,
        risk: ConcentrationRisk::classify(top1_share, top3_share),
        top_customers: ranked.into_iter().take(5).collect(),
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetentionSummary {
    pub retained: Vec<String>,
    pub lost: Vec<String>,
    pub new_customers: Vec<String>,
    pub previous_count: usize,
    pub current_count: usize,
    pub retention_rate: f64,
    pub churn_rate: f64,
}

/// Unique customers by normalised name, keeping the first spelling seen.
fn unique_names<'a>(names: impl IntoIterator<Item = &'a str>) -> BTreeMap<String, String> {
    let mut unique = BTreeMap::new();
    for name in names {
        unique
            .entry(normalize_name(name))
            .or_insert_with(|| name.trim().to_string());
    }
    unique
}

/// Partitions two customer lists into retained, lost and new customers.
pub fn partition_customers(previous: &[&str], current: &[&str]) -> RetentionSummary {
    let prev = unique_names(previous.iter().copied());
    let cur = unique_names(current.iter().copied());

    let retained: Vec<String> = prev
        .iter()
        .filter(|(key, _)| cur.contains_key(*key))
        .map(|(_, name)| name.clone())
        .collect();
    let lost: Vec<String> = prev
        .iter()
        .filter(|(key, _)| !cur.contains_key(*key))
        .map(|(_, name)| name.clone())
        .collect();
    let new_customers: Vec<String> = cur
        .iter()
        .filter(|(key, _)| !prev.contains_key(*key))
        .map(|(_, name)| name.clone())
        .collect();

    let previous_count = prev.len() as f64;
    RetentionSummary {
        retention_rate: safe_ratio(retained.len() as f64, previous_count),
        churn_rate: safe_ratio(lost.len() as f64, previous_count),
        previous_count: prev.len(),
        current_count: cur.len(),
        retained,
        lost,
        new_customers,
    }
}

/// Retention between two columns; a customer is present when its value is non-zero.
pub fn retention(table: &CustomerTable, previous_index: usize, current_index: usize) -> RetentionSummary {
    partition_customers(
        &present_names(table, previous_index),
        &present_names(table, current_index),
    )
}

fn present_names(table: &CustomerTable, index: usize) -> Vec<&str> {
    table
        .active()
        .filter(|r| r.value_at(index) != 0.0)
        .map(|r| r.name.as_str())
        .collect()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecliningCustomer {
    pub name: String,
    pub previous: f64,
    pub current: f64,
    /// Fractional change, e.g. -0.45 for a 45% decline.
    pub change: f64,
}

/// Customers whose decline falls strictly inside the at-risk band
/// (between 30% and 90% down by default). Worst decline first.
pub fn declining_customers(
    table: &CustomerTable,
    previous_index: usize,
    current_index: usize,
    thresholds: &AnalyticsThresholds,
) -> Vec<DecliningCustomer> {
    let mut declining: Vec<DecliningCustomer> = table
        .active()
        .filter_map(|r| {
            let previous = r.value_at(previous_index);
            if previous <= 0.0 {
                return None;
            }
            let current = r.value_at(current_index);
            let change = (current - previous) / previous;
            (change > thresholds.decline_lower && change < thresholds.decline_upper).then(|| {
                DecliningCustomer {
                    name: r.name.clone(),
                    previous,
                    current,
                    change,
                }
            })
        })
        .collect();

    declining.sort_by(|a, b| {
        a.change
            .partial_cmp(&b.change)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.name.cmp(&b.name))
    });
    declining
}

/// One customer's actual and budget figures for the base year.
///
/// Volumes come from the customer volume table, which is kept in metric tons
/// (the ledger volume row is in kg). `min_volume` is compared against them
/// directly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CustomerPerformance {
    pub name: String,
    pub volume_actual: f64,
    pub volume_budget: f64,
    pub amount_actual: f64,
    pub amount_budget: f64,
}

/// Joins a volume table and an amount table by normalised customer name.
pub fn join_performance(
    volume: &CustomerTable,
    amount: &CustomerTable,
    actual_index: usize,
    budget_index: usize,
) -> Vec<CustomerPerformance> {
    let mut joined: BTreeMap<String, CustomerPerformance> = BTreeMap::new();

    for record in volume.active() {
        let perf = performance_entry(&mut joined, &record.name);
        perf.volume_actual += record.value_at(actual_index);
        perf.volume_budget += record.value_at(budget_index);
    }
    for record in amount.active() {
        let perf = performance_entry(&mut joined, &record.name);
        perf.amount_actual += record.value_at(actual_index);
        perf.amount_budget += record.value_at(budget_index);
    }

    joined.into_values().collect()
}

fn performance_entry<'a>(
    joined: &'a mut BTreeMap<String, CustomerPerformance>,
    name: &str,
) -> &'a mut CustomerPerformance {
    joined
        .entry(normalize_name(name))
        .or_insert_with(|| CustomerPerformance {
            name: name.trim().to_string(),
            volume_actual: 0.0,
            volume_budget: 0.0,
            amount_actual: 0.0,
            amount_budget: 0.0,
        })
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdvantageFinding {
    pub name: String,
    pub volume_share: f64,
    pub volume_vs_budget: f64,
    pub amount_vs_budget: f64,
    /// `volume_vs_budget - amount_vs_budget`, in percentage points.
    pub gap_pp: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AdvantageSummary {
    /// Volume beat budget by more than amount did: price realisation lagging.
    pub volume_advantage: Vec<AdvantageFinding>,
    /// Amount beat budget by more than volume did: price realisation ahead.
    pub sales_advantage: Vec<AdvantageFinding>,
}

/// Volume vs sales advantage lists, gated on materiality so small customers
/// with volatile percentages stay out.
///
/// A customer qualifies when its share of positive volume is at least
/// `materiality_share`, its volume (tons) is at least `min_volume`, and the
/// gap between volume and amount variance exceeds `advantage_gap_pp`.
pub fn advantage_analysis(
    performance: &[CustomerPerformance],
    thresholds: &AnalyticsThresholds,
) -> AdvantageSummary {
    let total_volume: f64 = performance
        .iter()
        .map(|p| p.volume_actual)
        .filter(|v| *v > 0.0)
        .sum();

    let mut summary = AdvantageSummary::default();

    for perf in performance {
        let volume_share = safe_ratio(perf.volume_actual, total_volume);
        if volume_share < thresholds.materiality_share
            || perf.volume_actual.abs() < thresholds.min_volume
        {
            continue;
        }

        let (Some(volume_vs_budget), Some(amount_vs_budget)) = (
            variance(perf.volume_actual, perf.volume_budget),
            variance(perf.amount_actual, perf.amount_budget),
        ) else {
            continue;
        };

        let gap_pp = volume_vs_budget - amount_vs_budget;
        let finding = AdvantageFinding {
            name: perf.name.clone(),
            volume_share,
            volume_vs_budget,
            amount_vs_budget,
            gap_pp,
        };

        if gap_pp > thresholds.advantage_gap_pp {
            summary.volume_advantage.push(finding);
        } else if gap_pp < -thresholds.advantage_gap_pp {
            summary.sales_advantage.push(finding);
        }
    }

    let by_gap = |a: &AdvantageFinding, b: &AdvantageFinding| {
        b.gap_pp
            .abs()
            .partial_cmp(&a.gap_pp.abs())
            .unwrap_or(Ordering::Equal)
    };
    summary.volume_advantage.sort_by(by_gap);
    summary.sales_advantage.sort_by(by_gap);
    summary
}

/// Distinct normalised names across the table, for diagnostics.
pub fn distinct_customers(table: &CustomerTable) -> HashSet<String> {
    table.active().map(|r| normalize_name(&r.name)).collect()
}
