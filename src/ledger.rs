use crate::error::{KpiError, Result};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

pub const SALES_ROW: usize = 3;
pub const VOLUME_ROW: usize = 7;
pub const GROSS_PROFIT_ROW: usize = 19;
pub const NET_PROFIT_ROW: usize = 54;

/// How a ledger row behaves when a period spans several months.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, JsonSchema)]
#[serde(tag = "kind", rename_all = "PascalCase")]
pub enum RowKind {
    #[schemars(description = "Activity over time (sales, volume, expenses). Months are summed.")]
    Flow,

    #[schemars(
        description = "Computed row such as a margin percentage. Re-derived as numerator / denominator * scale from the aggregated source rows."
    )]
    Ratio {
        numerator: usize,
        denominator: usize,
        scale: f64,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, JsonSchema)]
pub struct LedgerRow {
    pub index: usize,
    pub label: String,
    pub kind: RowKind,
}

impl LedgerRow {
    pub fn flow(index: usize, label: &str) -> Self {
        Self {
            index,
            label: label.to_string(),
            kind: RowKind::Flow,
        }
    }

    pub fn ratio(index: usize, label: &str, numerator: usize, denominator: usize, scale: f64) -> Self {
        Self {
            index,
            label: label.to_string(),
            kind: RowKind::Ratio {
                numerator,
                denominator,
                scale,
            },
        }
    }
}

/// The agreed mapping from row index to ledger line.
///
/// Row indices are stable identifiers shared with the data source. Rows not
/// listed here are still resolvable and behave as [`RowKind::Flow`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, JsonSchema)]
pub struct RowSchema {
    pub sales_row: usize,
    pub volume_row: usize,
    /// Row charted as the profit trend.
    #[serde(default = "default_net_profit_row")]
    pub net_profit_row: usize,
    pub rows: Vec<LedgerRow>,
}

fn default_net_profit_row() -> usize {
    NET_PROFIT_ROW
}

impl Default for RowSchema {
    fn default() -> Self {
        Self {
            sales_row: SALES_ROW,
            volume_row: VOLUME_ROW,
            net_profit_row: NET_PROFIT_ROW,
            rows: vec![
                LedgerRow::flow(SALES_ROW, "Sales"),
                LedgerRow::flow(5, "Material"),
                LedgerRow::flow(6, "Material Margin"),
                LedgerRow::flow(VOLUME_ROW, "Sales Volume (kg)"),
                LedgerRow::flow(14, "Cost of Sales"),
                LedgerRow::flow(GROSS_PROFIT_ROW, "Gross Profit"),
                LedgerRow::ratio(20, "Gross Profit %", GROSS_PROFIT_ROW, SALES_ROW, 100.0),
                LedgerRow::flow(31, "Selling Expenses"),
                LedgerRow::flow(38, "Administration Expenses"),
                LedgerRow::flow(52, "Total Operating Expenses"),
                LedgerRow::flow(NET_PROFIT_ROW, "Net Profit"),
                LedgerRow::ratio(55, "Net Profit %", NET_PROFIT_ROW, SALES_ROW, 100.0),
                LedgerRow::flow(56, "EBITDA"),
            ],
        }
    }
}

impl RowSchema {
    pub fn row(&self, index: usize) -> Option<&LedgerRow> {
        self.rows.iter().find(|r| r.index == index)
    }

    pub fn label(&self, index: usize) -> String {
        self.row(index)
            .map(|r| r.label.clone())
            .unwrap_or_else(|| format!("Row {}", index))
    }

    pub fn kind(&self, index: usize) -> RowKind {
        self.row(index)
            .map(|r| r.kind.clone())
            .unwrap_or(RowKind::Flow)
    }

    pub fn display_rows(&self) -> Vec<usize> {
        self.rows.iter().map(|r| r.index).collect()
    }

    /// Ratio rows must point at declared flow rows, so re-derivation never recurses.
    pub fn validate(&self) -> Result<()> {
        for row in &self.rows {
            if let RowKind::Ratio {
                numerator,
                denominator,
                ..
            } = row.kind
            {
                for source in [numerator, denominator] {
                    match self.row(source) {
                        Some(LedgerRow {
                            kind: RowKind::Flow,
                            ..
                        }) => {}
                        _ => return Err(KpiError::UnknownRow(source)),
                    }
                }
            }
        }
        Ok(())
    }
}
