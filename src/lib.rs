//! # Sales KPI Engine
//!
//! Derived sales metrics over a sparse period/row ledger table, customer
//! analytics over period-aligned customer tables, and self-contained report
//! assembly.
//!
//! ## Core Concepts
//!
//! - **Periods**: ordered comparison columns (`{year}-{month-or-range}-{type}`),
//!   one of which is the base period
//! - **Cells**: raw ledger values keyed by row index and period; quarters,
//!   halves, years and custom ranges resolve to the sum of their months
//! - **Derived metrics**: amount, percent of sales and value per kg for any row
//!   and period, plus variances that are `None` (not zero) without a baseline
//! - **Customer insights**: concentration, retention, declining customers,
//!   z-score outliers and volume-vs-sales advantage
//!
//! ## Example
//!
//! ```rust,ignore
//! use sales_kpi_engine::*;
//!
//! let config = DashboardConfig::new(
//!     "Food Packaging",
//!     vec![
//!         Period::full_year(2024, PeriodType::Actual),
//!         Period::full_year(2025, PeriodType::Actual),
//!         Period::full_year(2025, PeriodType::Budget),
//!     ],
//!     1,
//! );
//!
//! let mut table = DataTable::new("Food Packaging");
//! table.insert_month(SALES_ROW, 2025, 1, PeriodType::Actual, 1_000_000.0);
//! table.insert_month(VOLUME_ROW, 2025, 1, PeriodType::Actual, 50_000.0);
//!
//! let report = process_dashboard(&config, &table).unwrap();
//! let html = HtmlExporter::new(&report).render();
//! ```

pub mod customers;
pub mod engine;
pub mod error;
pub mod format;
pub mod ingestion;
pub mod ledger;
pub mod metrics;
pub mod outliers;
pub mod overrides;
pub mod palette;
pub mod pvm;
pub mod report;
pub mod schema;
pub mod utils;

pub use customers::*;
pub use engine::{compute_cell_value, CellKey, CellResolver, DataTable};
pub use error::{KpiError, Result};
pub use ingestion::*;
pub use ledger::{LedgerRow, RowKind, RowSchema, GROSS_PROFIT_ROW, NET_PROFIT_ROW, SALES_ROW, VOLUME_ROW};
pub use metrics::*;
pub use outliers::{classify_outlier, detect_outliers, Outlier, OutlierTier};
pub use overrides::*;
pub use palette::{palette_for, Palette, PeriodClass};
pub use pvm::{price_volume_mix, pvm_for_period, MixEffect, PvmBasis, PvmResult, PvmTotals};
pub use report::{
    BarSeries, ChartSnapshot, GaugeSeries, HtmlExporter, KpiReport, ReportColumn, ReportRow,
    TrendPoint, TrendSeries,
};
pub use schema::*;

use log::{debug, info};
use serde::{Deserialize, Serialize};

/// Customer findings for the base period, compared against its prior-year
/// column (or the column to its left when no prior year is configured).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CustomerInsights {
    pub base_period_key: String,
    /// `None` when the base period has nothing to compare against.
    pub comparison_period_key: Option<String>,
    pub concentration: ConcentrationSummary,
    /// Concentration of the amount table, when one was supplied.
    pub amount_concentration: Option<ConcentrationSummary>,
    pub retention: Option<RetentionSummary>,
    pub declining: Vec<DecliningCustomer>,
    pub outliers: Vec<Outlier>,
    /// Needs both tables and a budget column for the base period.
    pub advantage: Option<AdvantageSummary>,
}

pub struct DashboardProcessor;

impl DashboardProcessor {
    pub fn build_report(config: &DashboardConfig, table: &DataTable) -> Result<KpiReport> {
        config.thresholds.validate()?;
        let schema = config.row_schema();
        schema.validate()?;
        let periods = config.period_set()?;

        info!(
            "Building KPI report for division: {} (base period {})",
            config.division,
            period_key(periods.base())
        );
        debug!(
            "Configuration contains {} periods, {} rows; table holds {} cells",
            periods.len(),
            config.rows.len(),
            table.len()
        );

        let resolver = CellResolver::new(table, &schema);
        Ok(report::build_report(
            &resolver,
            &periods,
            &config.rows,
            &config.division,
        ))
    }

    /// Runs the customer analytics on the base period. `volume` drives
    /// concentration, retention, declining customers and outliers; `amount`
    /// adds amount concentration and the advantage analysis.
    pub fn analyze_customers(
        config: &DashboardConfig,
        volume: &CustomerTable,
        amount: Option<&CustomerTable>,
    ) -> Result<CustomerInsights> {
        config.thresholds.validate()?;
        let periods = config.period_set()?;
        check_alignment("volume", volume, &periods)?;
        if let Some(amount) = amount {
            check_alignment("amount", amount, &periods)?;
        }

        let volume = config.merge_rules.apply(volume)?;
        let amount = amount.map(|t| config.merge_rules.apply(t)).transpose()?;
        let thresholds = &config.thresholds;

        let base = periods.base_index();
        let comparison = periods
            .yoy_counterpart(base)
            .or_else(|| periods.previous(base));

        info!(
            "Analyzing {} customers for division: {}",
            distinct_customers(&volume).len(),
            config.division
        );

        let (retention, declining, outliers) = match comparison {
            Some(prev) => (
                Some(retention(&volume, prev, base)),
                declining_customers(&volume, prev, base, thresholds),
                detect_outliers(&volume, prev, base, thresholds),
            ),
            None => (None, Vec::new(), Vec::new()),
        };

        let advantage = match (&amount, periods.budget_counterpart(base)) {
            (Some(amount), Some(budget)) => {
                let performance = join_performance(&volume, amount, base, budget);
                Some(advantage_analysis(&performance, thresholds))
            }
            _ => None,
        };

        debug!(
            "Customer insights: {} declining, {} outliers, comparison column {:?}",
            declining.len(),
            outliers.len(),
            comparison
        );

        Ok(CustomerInsights {
            base_period_key: period_key(periods.base()),
            comparison_period_key: comparison.and_then(|i| periods.get(i)).map(period_key),
            concentration: concentration(&volume, base),
            amount_concentration: amount.as_ref().map(|t| concentration(t, base)),
            retention,
            declining,
            outliers,
            advantage,
        })
    }

    /// Year-to-date run rate of `row` for the base period's year.
    pub fn run_rate(
        config: &DashboardConfig,
        table: &DataTable,
        row: usize,
        months_elapsed: u32,
    ) -> Result<RunRateProjection> {
        config.thresholds.validate()?;
        let periods = config.period_set()?;
        let schema = config.row_schema();
        if let RowKind::Ratio { .. } = schema.kind(row) {
            return Err(KpiError::NotAFlowRow(row));
        }
        let resolver = CellResolver::new(table, &schema);

        let year = periods.base().year;
        let input = run_rate_for_row(&resolver, row, year, months_elapsed);
        let projection = project_run_rate(&input, config.thresholds.on_track_tolerance);

        info!(
            "Run rate for {} row {} ({}): {:.0} vs required {:.0}, on track: {}",
            config.division,
            row,
            year,
            projection.current_run_rate,
            projection.required_run_rate,
            projection.is_on_track
        );
        Ok(projection)
    }
}

pub fn process_dashboard(config: &DashboardConfig, table: &DataTable) -> Result<KpiReport> {
    DashboardProcessor::build_report(config, table)
}

pub fn analyze_customers(
    config: &DashboardConfig,
    volume: &CustomerTable,
    amount: Option<&CustomerTable>,
) -> Result<CustomerInsights> {
    DashboardProcessor::analyze_customers(config, volume, amount)
}

fn check_alignment(name: &str, table: &CustomerTable, periods: &PeriodSet) -> Result<()> {
    if table.period_count() != periods.len() {
        return Err(KpiError::MisalignedRecord {
            name: format!("{} table", name),
            expected: periods.len(),
            actual: table.period_count(),
        });
    }
    Ok(())
}
