use crate::ledger::{RowKind, RowSchema};
use crate::schema::{Period, PeriodSpan, PeriodType};
use crate::utils::safe_ratio;
use log::trace;
use std::collections::BTreeMap;

/// Address of one stored value inside a row: `(year, span label, type)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CellKey {
    pub year: i32,
    pub label: String,
    pub period_type: PeriodType,
}

impl CellKey {
    pub fn new(year: i32, span: &PeriodSpan, period_type: PeriodType) -> Self {
        Self {
            year,
            label: span.label(),
            period_type,
        }
    }

    pub fn month(year: i32, month: u32, period_type: PeriodType) -> Self {
        Self::new(year, &PeriodSpan::Month { month }, period_type)
    }
}

/// Raw per-row, per-period values for one division.
///
/// Values are normally stored per month. Pre-aggregated values stored under a
/// quarter, half-year or year label are honoured as well.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DataTable {
    pub division: String,
    cells: BTreeMap<usize, BTreeMap<CellKey, f64>>,
}

impl DataTable {
    pub fn new(division: impl Into<String>) -> Self {
        Self {
            division: division.into(),
            cells: BTreeMap::new(),
        }
    }

    /// Sets a value, replacing anything already stored under the same key.
    pub fn insert(&mut self, row: usize, key: CellKey, value: f64) {
        self.cells.entry(row).or_default().insert(key, value);
    }

    /// Adds to whatever is stored under the key.
    pub fn add(&mut self, row: usize, key: CellKey, value: f64) {
        *self.cells.entry(row).or_default().entry(key).or_insert(0.0) += value;
    }

    pub fn insert_month(
        &mut self,
        row: usize,
        year: i32,
        month: u32,
        period_type: PeriodType,
        value: f64,
    ) {
        self.insert(row, CellKey::month(year, month, period_type), value);
    }

    pub fn get(&self, row: usize, key: &CellKey) -> Option<f64> {
        self.cells.get(&row).and_then(|r| r.get(key)).copied()
    }

    pub fn rows(&self) -> impl Iterator<Item = usize> + '_ {
        self.cells.keys().copied()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.values().all(|r| r.is_empty())
    }

    pub fn len(&self) -> usize {
        self.cells.values().map(|r| r.len()).sum()
    }
}

/// Resolves `(row, period)` cells to numbers. Missing data is zero.
pub struct CellResolver<'a> {
    table: &'a DataTable,
    schema: &'a RowSchema,
}

impl<'a> CellResolver<'a> {
    pub fn new(table: &'a DataTable, schema: &'a RowSchema) -> Self {
        Self { table, schema }
    }

    pub fn schema(&self) -> &RowSchema {
        self.schema
    }

    pub fn lookup_exact(
        &self,
        row: usize,
        year: i32,
        span: &PeriodSpan,
        period_type: PeriodType,
    ) -> Option<f64> {
        self.table
            .get(row, &CellKey::new(year, span, period_type))
            .filter(|v| v.is_finite())
    }

    /// Sum of the stored monthly values for the given months.
    pub fn sum_months(&self, row: usize, year: i32, period_type: PeriodType, months: &[u32]) -> f64 {
        months
            .iter()
            .map(|&month| {
                self.lookup_exact(row, year, &PeriodSpan::Month { month }, period_type)
                    .unwrap_or(0.0)
            })
            .sum()
    }

    /// Value of a calendar window: the stored cell, else the sum of whatever
    /// sub-windows resolve (year to halves to quarters to months). `None`
    /// when nothing at or below the window is stored.
    pub fn resolve_span(
        &self,
        row: usize,
        year: i32,
        span: &PeriodSpan,
        period_type: PeriodType,
    ) -> Option<f64> {
        if let Some(value) = self.lookup_exact(row, year, span, period_type) {
            return Some(value);
        }
        let parts: Vec<f64> = sub_spans(span)
            .iter()
            .filter_map(|part| self.resolve_span(row, year, part, period_type))
            .collect();
        (!parts.is_empty()).then(|| parts.iter().sum())
    }

    /// Like [`Self::resolve_span`], but every sub-window must be covered.
    pub fn resolve_complete_span(
        &self,
        row: usize,
        year: i32,
        span: &PeriodSpan,
        period_type: PeriodType,
    ) -> Option<f64> {
        if let Some(value) = self.lookup_exact(row, year, span, period_type) {
            return Some(value);
        }
        let parts = sub_spans(span);
        if parts.is_empty() {
            return None;
        }
        parts
            .iter()
            .map(|part| self.resolve_complete_span(row, year, part, period_type))
            .sum()
    }

    /// Sum over `months`, each taken from its own cell or, failing that, as an
    /// even share of the stored quarter, half-year or year containing it.
    pub fn prorated_months(
        &self,
        row: usize,
        year: i32,
        period_type: PeriodType,
        months: &[u32],
    ) -> f64 {
        months
            .iter()
            .map(|&month| self.month_share(row, year, period_type, month).unwrap_or(0.0))
            .sum()
    }

    fn month_share(&self, row: usize, year: i32, period_type: PeriodType, month: u32) -> Option<f64> {
        let quarter = u8::try_from(month.saturating_sub(1) / 3 + 1).ok()?;
        let half = if quarter <= 2 { 1 } else { 2 };
        [
            (PeriodSpan::Month { month }, 1.0),
            (PeriodSpan::Quarter { quarter }, 3.0),
            (PeriodSpan::HalfYear { half }, 6.0),
            (PeriodSpan::Year, 12.0),
        ]
        .iter()
        .find_map(|(span, parts)| {
            self.lookup_exact(row, year, span, period_type)
                .map(|value| value / parts)
        })
    }

    pub fn compute_cell_value(&self, row: usize, period: &Period) -> f64 {
        if self.table.is_empty() {
            return 0.0;
        }

        match self.schema.kind(row) {
            RowKind::Flow => self.resolve_flow(row, period),
            RowKind::Ratio {
                numerator,
                denominator,
                scale,
            } => {
                if !period.is_custom_range() {
                    if let Some(value) =
                        self.lookup_exact(row, period.year, &period.span, period.period_type)
                    {
                        return value;
                    }
                }
                let num = self.resolve_flow(numerator, period);
                let den = self.resolve_flow(denominator, period);
                safe_ratio(num, den) * scale
            }
        }
    }

    fn resolve_flow(&self, row: usize, period: &Period) -> f64 {
        if period.is_custom_range() {
            return self.sum_months(
                row,
                period.year,
                period.period_type,
                &period.span.months(),
            );
        }

        match self.resolve_span(row, period.year, &period.span, period.period_type) {
            Some(value) => value,
            None => {
                trace!(
                    "No value for row {} in {}, treating as zero",
                    row,
                    period.key()
                );
                0.0
            }
        }
    }
}

fn sub_spans(span: &PeriodSpan) -> Vec<PeriodSpan> {
    match span {
        PeriodSpan::Year => vec![
            PeriodSpan::HalfYear { half: 1 },
            PeriodSpan::HalfYear { half: 2 },
        ],
        PeriodSpan::HalfYear { half } if (1..=2).contains(half) => vec![
            PeriodSpan::Quarter { quarter: half * 2 - 1 },
            PeriodSpan::Quarter { quarter: half * 2 },
        ],
        PeriodSpan::Quarter { .. } => span
            .months()
            .into_iter()
            .map(|month| PeriodSpan::Month { month })
            .collect(),
        _ => Vec::new(),
    }
}

/// Resolves a cell against the default row schema.
pub fn compute_cell_value(table: &DataTable, row: usize, period: &Period) -> f64 {
    let schema = RowSchema::default();
    CellResolver::new(table, &schema).compute_cell_value(row, period)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::SALES_ROW;

    fn sample_table() -> DataTable {
        let mut table = DataTable::new("FP");
        for month in 1..=12 {
            table.insert_month(SALES_ROW, 2025, month, PeriodType::Actual, 100.0 * month as f64);
            table.insert_month(19, 2025, month, PeriodType::Actual, 10.0 * month as f64);
        }
        table
    }

    #[test]
    fn test_single_month_lookup() {
        let table = sample_table();
        let period = Period::month(2025, 4, PeriodType::Actual);
        assert_eq!(compute_cell_value(&table, SALES_ROW, &period), 400.0);
    }

    #[test]
    fn test_missing_values_are_zero() {
        let table = sample_table();
        let period = Period::month(2025, 4, PeriodType::Budget);
        assert_eq!(compute_cell_value(&table, SALES_ROW, &period), 0.0);
        let period = Period::month(2025, 4, PeriodType::Actual);
        assert_eq!(compute_cell_value(&table, 31, &period), 0.0);
    }

    #[test]
    fn test_empty_table_is_zero() {
        let table = DataTable::default();
        let period = Period::full_year(2025, PeriodType::Actual);
        assert_eq!(compute_cell_value(&table, SALES_ROW, &period), 0.0);
    }

    #[test]
    fn test_quarter_sums_months() {
        let table = sample_table();
        let period = Period::quarter(2025, 2, PeriodType::Actual);
        assert_eq!(compute_cell_value(&table, SALES_ROW, &period), 400.0 + 500.0 + 600.0);
    }

    #[test]
    fn test_stored_aggregate_takes_precedence() {
        let mut table = sample_table();
        table.insert(
            SALES_ROW,
            CellKey::new(2025, &PeriodSpan::Year, PeriodType::Budget),
            12_000.0,
        );
        let period = Period::full_year(2025, PeriodType::Budget);
        assert_eq!(compute_cell_value(&table, SALES_ROW, &period), 12_000.0);
    }

    #[test]
    fn test_custom_range_sums_constituent_months() {
        let table = sample_table();
        let period = Period::custom(2025, "CUSTOM_JAN_FEB", vec![1, 2], "Jan-Feb", PeriodType::Actual);
        assert_eq!(compute_cell_value(&table, SALES_ROW, &period), 300.0);
    }

    #[test]
    fn test_ratio_rows_are_rederived() {
        let mut table = sample_table();
        for month in 1..=12 {
            // Stored monthly margins must not be summed for aggregates.
            table.insert_month(20, 2025, month, PeriodType::Actual, 10.0);
        }
        let quarter = Period::quarter(2025, 1, PeriodType::Actual);
        let value = compute_cell_value(&table, 20, &quarter);
        assert!((value - 10.0).abs() < 1e-9, "got {}", value);

        let custom = Period::custom(2025, "R1", vec![1, 2, 3], "Q1 custom", PeriodType::Actual);
        assert!((compute_cell_value(&table, 20, &custom) - 10.0).abs() < 1e-9);
    }

    #[test]
    fn test_half_year_resolution() {
        let table = sample_table();
        let first = Period::half_year(2025, 1, PeriodType::Actual);
        let second = Period::half_year(2025, 2, PeriodType::Actual);
        assert_eq!(compute_cell_value(&table, SALES_ROW, &first), 2_100.0);
        assert_eq!(compute_cell_value(&table, SALES_ROW, &second), 5_700.0);

        let mut table = DataTable::new("FP");
        table.insert(
            SALES_ROW,
            CellKey::new(2025, &PeriodSpan::HalfYear { half: 2 }, PeriodType::Budget),
            900.0,
        );
        let period = Period::half_year(2025, 2, PeriodType::Budget);
        assert_eq!(compute_cell_value(&table, SALES_ROW, &period), 900.0);
    }

    #[test]
    fn test_year_falls_back_to_stored_quarters_and_halves() {
        let mut table = DataTable::new("FP");
        table.insert(
            SALES_ROW,
            CellKey::new(2025, &PeriodSpan::HalfYear { half: 1 }, PeriodType::Budget),
            600.0,
        );
        for quarter in 3..=4 {
            table.insert(
                SALES_ROW,
                CellKey::new(2025, &PeriodSpan::Quarter { quarter }, PeriodType::Budget),
                350.0,
            );
        }
        // A month inside a stored quarter is not counted twice.
        table.insert_month(SALES_ROW, 2025, 7, PeriodType::Budget, 99.0);

        let year = Period::full_year(2025, PeriodType::Budget);
        assert_eq!(compute_cell_value(&table, SALES_ROW, &year), 1_300.0);
        let h2 = Period::half_year(2025, 2, PeriodType::Budget);
        assert_eq!(compute_cell_value(&table, SALES_ROW, &h2), 700.0);

        let schema = RowSchema::default();
        let resolver = CellResolver::new(&table, &schema);
        assert_eq!(
            resolver.resolve_complete_span(SALES_ROW, 2025, &PeriodSpan::Year, PeriodType::Budget),
            Some(1_300.0)
        );
        assert_eq!(
            resolver.resolve_span(SALES_ROW, 2025, &PeriodSpan::Year, PeriodType::Actual),
            None
        );
        let to_date = resolver.prorated_months(SALES_ROW, 2025, PeriodType::Budget, &[1, 7, 8]);
        assert!((to_date - (100.0 + 99.0 + 350.0 / 3.0)).abs() < 1e-9);
    }

    #[test]
    fn test_add_accumulates() {
        let mut table = DataTable::new("FP");
        let key = CellKey::month(2025, 1, PeriodType::Actual);
        table.add(SALES_ROW, key.clone(), 5.0);
        table.add(SALES_ROW, key.clone(), 7.0);
        assert_eq!(table.get(SALES_ROW, &key), Some(12.0));
        assert_eq!(table.len(), 1);
    }
}
