use crate::customers::{CustomerRecord, CustomerTable};
use crate::engine::{CellKey, CellResolver, DataTable};
use crate::ledger::RowSchema;
use crate::error::Result;
use crate::schema::{PeriodSet, PeriodSpan, PeriodType};
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// One ledger value as delivered by the data source.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawCellRow {
    pub row_index: usize,
    pub year: i32,
    /// Month name, quarter ("Q1"), half ("HY1") or "Year". Missing means the full year.
    #[serde(default)]
    pub month: Option<String>,
    pub period_type: String,
    #[serde(default)]
    pub value: Option<f64>,
}

/// One customer (or product) value as delivered by the data source.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawCustomerRow {
    pub customer: String,
    pub year: i32,
    #[serde(default)]
    pub month: Option<String>,
    pub period_type: String,
    #[serde(default)]
    pub value: Option<f64>,
}

fn parse_period(month: Option<&str>, period_type: &str) -> Result<(PeriodSpan, PeriodType)> {
    let span = PeriodSpan::from_label(month.unwrap_or(""))?;
    let period_type = period_type.parse::<PeriodType>()?;
    Ok((span, period_type))
}

/// Builds a division table. Rows with unreadable periods are skipped with a
/// warning; null values contribute nothing; duplicate cells are summed.
pub fn build_data_table(division: &str, rows: &[RawCellRow]) -> DataTable {
    let mut table = DataTable::new(division);
    let mut skipped = 0usize;

    for row in rows {
        let (span, period_type) = match parse_period(row.month.as_deref(), &row.period_type) {
            Ok(parsed) => parsed,
            Err(e) => {
                warn!("Skipping row {} for {}: {}", row.row_index, row.year, e);
                skipped += 1;
                continue;
            }
        };

        let Some(value) = row.value.filter(|v| v.is_finite()) else {
            continue;
        };

        table.add(row.row_index, CellKey::new(row.year, &span, period_type), value);
    }

    debug!(
        "Built data table for {}: {} cells from {} rows ({} skipped)",
        division,
        table.len(),
        rows.len(),
        skipped
    );
    table
}

/// Aggregates customer rows into records aligned with `periods`.
///
/// Each customer's rows are resolved like ledger cells: a row stored for a
/// period's exact window wins over finer rows inside it, and coarser windows
/// fall back to summing halves, quarters and months.
pub fn build_customer_table(periods: &PeriodSet, rows: &[RawCustomerRow]) -> Result<CustomerTable> {
    let mut cells = DataTable::new("customers");
    let mut order: Vec<String> = Vec::new();
    let mut slots: HashMap<String, usize> = HashMap::new();

    for row in rows {
        let (span, period_type) = match parse_period(row.month.as_deref(), &row.period_type) {
            Ok(parsed) => parsed,
            Err(e) => {
                warn!("Skipping customer row for '{}': {}", row.customer, e);
                continue;
            }
        };
        let Some(value) = row.value.filter(|v| v.is_finite()) else {
            continue;
        };

        let name = row.customer.trim().to_string();
        let slot = *slots.entry(name.clone()).or_insert_with(|| {
            order.push(name);
            order.len() - 1
        });
        cells.add(slot, CellKey::new(row.year, &span, period_type), value);
    }

    // Slots are not ledger rows; every one resolves as a plain flow.
    let schema = RowSchema {
        rows: Vec::new(),
        ..RowSchema::default()
    };
    let resolver = CellResolver::new(&cells, &schema);

    let records = order
        .into_iter()
        .enumerate()
        .map(|(slot, name)| {
            let values = periods
                .iter()
                .map(|period| resolver.compute_cell_value(slot, period))
                .collect();
            CustomerRecord::new(name, values)
        })
        .collect();

    CustomerTable::new(periods.len(), records)
}
