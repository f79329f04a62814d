use crate::error::{KpiError, Result};
use crate::ledger::RowSchema;
use crate::overrides::CustomerMergeRules;
use crate::utils::{full_year_months, half_year_months, parse_month_name, quarter_months, validate_month};
use chrono::Month;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

#[derive(
    Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord, JsonSchema,
)]
#[serde(rename_all = "PascalCase")]
pub enum PeriodType {
    #[schemars(description = "Booked results taken from the ledger")]
    Actual,

    #[schemars(description = "Approved budget figures for the period")]
    Budget,

    #[schemars(description = "Estimate mixing actual months with projected remainder")]
    Estimate,

    #[schemars(description = "Forward-looking forecast")]
    Forecast,
}

impl PeriodType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PeriodType::Actual => "Actual",
            PeriodType::Budget => "Budget",
            PeriodType::Estimate => "Estimate",
            PeriodType::Forecast => "Forecast",
        }
    }
}

impl fmt::Display for PeriodType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PeriodType {
    type Err = KpiError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "actual" => Ok(PeriodType::Actual),
            "budget" => Ok(PeriodType::Budget),
            "estimate" => Ok(PeriodType::Estimate),
            "forecast" | "fcst" => Ok(PeriodType::Forecast),
            _ => Err(KpiError::UnknownPeriodType(s.to_string())),
        }
    }
}

/// The time window a period covers inside its year.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq, Hash, JsonSchema)]
#[serde(tag = "kind", rename_all = "PascalCase")]
pub enum PeriodSpan {
    #[schemars(description = "A single calendar month (1 = January)")]
    Month { month: u32 },

    #[schemars(description = "Calendar quarter Q1-Q4")]
    Quarter { quarter: u8 },

    #[schemars(description = "Half year HY1 (Jan-Jun) or HY2 (Jul-Dec)")]
    HalfYear { half: u8 },

    #[default]
    #[schemars(description = "The full year. Used when no month is given.")]
    Year,

    #[schemars(
        description = "User-defined range of months identified by an opaque id. The id, not the display name, takes part in the period key."
    )]
    Custom { id: String, months: Vec<u32> },
}

impl PeriodSpan {
    /// The month segment of the canonical period key.
    pub fn label(&self) -> String {
        match self {
            PeriodSpan::Month { month } => u8::try_from(*month)
                .ok()
                .and_then(|m| Month::try_from(m).ok())
                .map(|m| m.name().to_string())
                .unwrap_or_else(|| format!("M{}", month)),
            PeriodSpan::Quarter { quarter } => format!("Q{}", quarter),
            PeriodSpan::HalfYear { half } => format!("HY{}", half),
            PeriodSpan::Year => "Year".to_string(),
            PeriodSpan::Custom { id, .. } => id.clone(),
        }
    }

    /// Parses a non-custom label as produced by [`PeriodSpan::label`].
    /// An empty label means the full year.
    pub fn from_label(label: &str) -> Result<Self> {
        let trimmed = label.trim();
        let upper = trimmed.to_ascii_uppercase();

        let span = match upper.as_str() {
            "" | "YEAR" | "FY" => PeriodSpan::Year,
            "Q1" | "Q2" | "Q3" | "Q4" => PeriodSpan::Quarter {
                quarter: upper[1..].parse().unwrap_or(1),
            },
            "HY1" | "HY2" => PeriodSpan::HalfYear {
                half: upper[2..].parse().unwrap_or(1),
            },
            _ => match parse_month_name(trimmed) {
                Some(month) => PeriodSpan::Month { month },
                None => return Err(KpiError::UnknownPeriodLabel(label.to_string())),
            },
        };

        Ok(span)
    }

    /// Calendar months (1-based) covered by this span, ascending.
    pub fn months(&self) -> Vec<u32> {
        match self {
            PeriodSpan::Month { month } => vec![*month],
            PeriodSpan::Quarter { quarter } => quarter_months(*quarter),
            PeriodSpan::HalfYear { half } => half_year_months(*half),
            PeriodSpan::Year => full_year_months(),
            PeriodSpan::Custom { months, .. } => {
                let mut sorted = months.clone();
                sorted.sort_unstable();
                sorted.dedup();
                sorted
            }
        }
    }

    pub fn is_single_month(&self) -> bool {
        self.months().len() == 1
    }

    pub fn is_custom(&self) -> bool {
        matches!(self, PeriodSpan::Custom { .. })
    }

    /// True when both spans cover the same calendar months. Custom ranges
    /// match by months, not by id.
    pub fn same_window(&self, other: &PeriodSpan) -> bool {
        match (self, other) {
            (PeriodSpan::Custom { .. }, _) | (_, PeriodSpan::Custom { .. }) => {
                self.months() == other.months()
            }
            _ => self == other,
        }
    }

    pub fn validate(&self) -> Result<()> {
        match self {
            PeriodSpan::Month { month } => validate_month(*month),
            PeriodSpan::Quarter { quarter } => {
                if (1..=4).contains(quarter) {
                    Ok(())
                } else {
                    Err(KpiError::InvalidQuarter(*quarter))
                }
            }
            PeriodSpan::HalfYear { half } => {
                if (1..=2).contains(half) {
                    Ok(())
                } else {
                    Err(KpiError::InvalidHalfYear(*half))
                }
            }
            PeriodSpan::Year => Ok(()),
            PeriodSpan::Custom { id, months } => {
                if id.trim().is_empty() {
                    return Err(KpiError::InvalidCustomRange {
                        id: id.clone(),
                        details: "range id must not be empty".to_string(),
                    });
                }
                if PeriodSpan::from_label(id).is_ok() {
                    return Err(KpiError::InvalidCustomRange {
                        id: id.clone(),
                        details: "range id collides with a reserved month/quarter/year label"
                            .to_string(),
                    });
                }
                if months.is_empty() {
                    return Err(KpiError::InvalidCustomRange {
                        id: id.clone(),
                        details: "range must contain at least one month".to_string(),
                    });
                }
                for month in months {
                    validate_month(*month).map_err(|_| KpiError::InvalidCustomRange {
                        id: id.clone(),
                        details: format!("month {} is outside 1-12", month),
                    })?;
                }
                Ok(())
            }
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, JsonSchema)]
pub struct Period {
    #[schemars(description = "Calendar year of the period")]
    pub year: i32,

    #[serde(default)]
    #[schemars(description = "Window within the year. Defaults to the full year.")]
    pub span: PeriodSpan,

    #[schemars(description = "Scenario: Actual, Budget, Estimate or Forecast")]
    pub period_type: PeriodType,

    #[serde(default)]
    #[schemars(description = "Label shown for custom ranges")]
    pub display_name: Option<String>,

    #[serde(default)]
    #[schemars(description = "Optional palette tag overriding the default colour")]
    pub custom_color: Option<String>,
}

impl Period {
    pub fn new(year: i32, span: PeriodSpan, period_type: PeriodType) -> Self {
        Self {
            year,
            span,
            period_type,
            display_name: None,
            custom_color: None,
        }
    }

    pub fn month(year: i32, month: u32, period_type: PeriodType) -> Self {
        Self::new(year, PeriodSpan::Month { month }, period_type)
    }

    pub fn quarter(year: i32, quarter: u8, period_type: PeriodType) -> Self {
        Self::new(year, PeriodSpan::Quarter { quarter }, period_type)
    }

    pub fn half_year(year: i32, half: u8, period_type: PeriodType) -> Self {
        Self::new(year, PeriodSpan::HalfYear { half }, period_type)
    }

    pub fn full_year(year: i32, period_type: PeriodType) -> Self {
        Self::new(year, PeriodSpan::Year, period_type)
    }

    pub fn custom(
        year: i32,
        id: impl Into<String>,
        months: Vec<u32>,
        display_name: impl Into<String>,
        period_type: PeriodType,
    ) -> Self {
        Self {
            year,
            span: PeriodSpan::Custom {
                id: id.into(),
                months,
            },
            period_type,
            display_name: Some(display_name.into()),
            custom_color: None,
        }
    }

    pub fn with_color(mut self, tag: impl Into<String>) -> Self {
        self.custom_color = Some(tag.into());
        self
    }

    pub fn is_custom_range(&self) -> bool {
        self.span.is_custom()
    }

    pub fn key(&self) -> String {
        period_key(self)
    }

    /// Human-readable column heading.
    pub fn label(&self) -> String {
        match (&self.span, &self.display_name) {
            (PeriodSpan::Custom { .. }, Some(name)) => {
                format!("{} {} {}", self.year, name, self.period_type)
            }
            (PeriodSpan::Year, _) => format!("{} {}", self.year, self.period_type),
            (span, _) => format!("{} {} {}", self.year, span.label(), self.period_type),
        }
    }
}

/// Canonical `{year}-{month-or-customRangeId}-{type}` key.
pub fn period_key(period: &Period) -> String {
    format!(
        "{}-{}-{}",
        period.year,
        period.span.label(),
        period.period_type
    )
}

/// Validated, ordered list of comparison periods with a designated base period.
///
/// Order is significant: it drives left-to-right display and the meaning of
/// "previous period".
#[derive(Debug, Clone, PartialEq)]
pub struct PeriodSet {
    periods: Vec<Period>,
    base_index: usize,
}

impl PeriodSet {
    pub fn new(periods: Vec<Period>, base_index: usize) -> Result<Self> {
        if base_index >= periods.len() {
            return Err(KpiError::BasePeriodOutOfRange {
                index: base_index,
                len: periods.len(),
            });
        }

        let mut seen = HashSet::new();
        for period in &periods {
            period.span.validate()?;
            let key = period_key(period);
            if !seen.insert(key.clone()) {
                return Err(KpiError::DuplicatePeriod(key));
            }
        }

        Ok(Self {
            periods,
            base_index,
        })
    }

    pub fn periods(&self) -> &[Period] {
        &self.periods
    }

    pub fn len(&self) -> usize {
        self.periods.len()
    }

    pub fn is_empty(&self) -> bool {
        self.periods.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Period> {
        self.periods.get(index)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Period> {
        self.periods.iter()
    }

    pub fn base_index(&self) -> usize {
        self.base_index
    }

    pub fn base(&self) -> &Period {
        &self.periods[self.base_index]
    }

    pub fn keys(&self) -> Vec<String> {
        self.periods.iter().map(period_key).collect()
    }

    pub fn position(&self, key: &str) -> Option<usize> {
        self.periods.iter().position(|p| period_key(p) == key)
    }

    /// Index of the column immediately to the left, if any.
    pub fn previous(&self, index: usize) -> Option<usize> {
        if index == 0 || index >= self.periods.len() {
            None
        } else {
            Some(index - 1)
        }
    }

    /// Same window and scenario one year earlier.
    pub fn yoy_counterpart(&self, index: usize) -> Option<usize> {
        let target = self.periods.get(index)?;
        self.periods.iter().position(|p| {
            p.year == target.year - 1
                && p.period_type == target.period_type
                && p.span.same_window(&target.span)
        })
    }

    /// Budget column for the same year and window.
    pub fn budget_counterpart(&self, index: usize) -> Option<usize> {
        let target = self.periods.get(index)?;
        if target.period_type == PeriodType::Budget {
            return None;
        }
        self.periods.iter().position(|p| {
            p.year == target.year
                && p.period_type == PeriodType::Budget
                && p.span.same_window(&target.span)
        })
    }
}

/// Tunable constants for the customer analytics and run-rate checks.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, JsonSchema)]
#[serde(default)]
pub struct AnalyticsThresholds {
    #[schemars(description = "Run-rate counts as on track at or above this share of the target")]
    pub on_track_tolerance: f64,

    #[schemars(description = "Minimum share of total (0.02 = 2%) for material customers")]
    pub materiality_share: f64,

    #[schemars(description = "Minimum absolute customer volume for advantage analysis, in metric tons (the unit of the customer volume table)")]
    pub min_volume: f64,

    #[schemars(description = "Percentage-point gap between volume and amount vs budget")]
    pub advantage_gap_pp: f64,

    #[schemars(description = "Lower (exclusive) bound of the declining band, e.g. -0.9")]
    pub decline_lower: f64,

    #[schemars(description = "Upper (exclusive) bound of the declining band, e.g. -0.3")]
    pub decline_upper: f64,

    pub material_z: f64,

    pub extreme_z: f64,

    #[schemars(description = "Absolute YoY growth in percent above which an outlier is emerging")]
    pub emerging_rate_pct: f64,

    pub outlier_display_cap: usize,
}

impl Default for AnalyticsThresholds {
    fn default() -> Self {
        Self {
            on_track_tolerance: 0.85,
            materiality_share: 0.02,
            min_volume: 10.0,
            advantage_gap_pp: 10.0,
            decline_lower: -0.9,
            decline_upper: -0.3,
            material_z: 2.0,
            extreme_z: 3.0,
            emerging_rate_pct: 200.0,
            outlier_display_cap: 10,
        }
    }
}

impl AnalyticsThresholds {
    pub fn validate(&self) -> Result<()> {
        let invalid = |name: &str, value: f64, details: &str| KpiError::InvalidThreshold {
            name: name.to_string(),
            value,
            details: details.to_string(),
        };

        if !(self.on_track_tolerance > 0.0 && self.on_track_tolerance <= 1.0) {
            return Err(invalid(
                "on_track_tolerance",
                self.on_track_tolerance,
                "must be in (0, 1]",
            ));
        }
        if !(0.0..=1.0).contains(&self.materiality_share) {
            return Err(invalid(
                "materiality_share",
                self.materiality_share,
                "must be in [0, 1]",
            ));
        }
        if self.min_volume < 0.0 {
            return Err(invalid("min_volume", self.min_volume, "must be non-negative"));
        }
        if self.advantage_gap_pp < 0.0 {
            return Err(invalid(
                "advantage_gap_pp",
                self.advantage_gap_pp,
                "must be non-negative",
            ));
        }
        if !(self.decline_lower < self.decline_upper && self.decline_upper <= 0.0) {
            return Err(invalid(
                "decline_lower",
                self.decline_lower,
                "must be below decline_upper, which must not be positive",
            ));
        }
        if !(self.material_z > 0.0 && self.material_z <= self.extreme_z) {
            return Err(invalid(
                "material_z",
                self.material_z,
                "must be positive and not above extreme_z",
            ));
        }
        Ok(())
    }
}

fn default_rows() -> Vec<usize> {
    RowSchema::default().display_rows()
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct DashboardConfig {
    #[schemars(description = "Business division the data table belongs to")]
    pub division: String,

    #[schemars(description = "Ordered comparison periods, left to right")]
    pub periods: Vec<Period>,

    #[serde(default)]
    #[schemars(description = "Index into `periods` of the base period")]
    pub base_period_index: usize,

    #[serde(default = "default_rows")]
    #[schemars(description = "Ledger row indices shown in the report, top to bottom")]
    pub rows: Vec<usize>,

    #[serde(default)]
    #[schemars(description = "Override for the canonical row-index table")]
    pub row_schema: Option<RowSchema>,

    #[serde(default)]
    pub thresholds: AnalyticsThresholds,

    #[serde(default)]
    #[schemars(description = "Customer merge/rename/exclude rules applied before customer analytics")]
    pub merge_rules: CustomerMergeRules,
}

impl DashboardConfig {
    pub fn new(division: impl Into<String>, periods: Vec<Period>, base_period_index: usize) -> Self {
        Self {
            division: division.into(),
            periods,
            base_period_index,
            rows: default_rows(),
            row_schema: None,
            thresholds: AnalyticsThresholds::default(),
            merge_rules: CustomerMergeRules::default(),
        }
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn period_set(&self) -> Result<PeriodSet> {
        PeriodSet::new(self.periods.clone(), self.base_period_index)
    }

    pub fn row_schema(&self) -> RowSchema {
        self.row_schema.clone().unwrap_or_default()
    }

    pub fn generate_json_schema() -> schemars::schema::RootSchema {
        schemars::schema_for!(DashboardConfig)
    }

    pub fn schema_as_json() -> std::result::Result<String, serde_json::Error> {
        let schema = Self::generate_json_schema();
        serde_json::to_string_pretty(&schema)
    }
}
