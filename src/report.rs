//! Report assembly.
//!
//! Everything in a [`KpiReport`] is copied from calculator output
//! ([`compare_periods`], [`pvm_for_period`], the customer analytics). Chart
//! series and the HTML export only format those values; they never
//! recompute a metric.

use crate::engine::CellResolver;
use crate::error::Result;
use crate::format::{
    format_millions, format_per_kg, format_percent, format_share, format_total, format_variance,
    variance_class, NOT_AVAILABLE,
};
use crate::metrics::{compare_periods, PeriodComparison};
use crate::palette::{palette_for, Palette};
use crate::pvm::{pvm_for_period, PvmBasis, PvmResult};
use crate::schema::{period_key, PeriodSet, PeriodType};
use crate::utils::safe_ratio;
use crate::CustomerInsights;
use log::{debug, warn};
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReportColumn {
    pub key: String,
    pub label: String,
    pub period_type: PeriodType,
    pub is_base: bool,
    pub palette: Palette,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReportRow {
    pub row_index: usize,
    pub label: String,
    /// One cell per column, in column order.
    pub cells: Vec<PeriodComparison>,
}

/// Sales amount per column, coloured by column palette.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BarSeries {
    pub title: String,
    pub labels: Vec<String>,
    pub values: Vec<f64>,
    pub colors: Vec<String>,
    /// Change against the column to the left; `None` renders as "N/A".
    pub variances: Vec<Option<f64>>,
}

/// Base-period sales against the matching budget column.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GaugeSeries {
    pub title: String,
    pub actual: f64,
    pub target: f64,
    /// `actual / target` in percent; `None` for a zero target.
    pub attainment: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrendPoint {
    pub label: String,
    pub amount: f64,
    pub percent_of_sales: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrendSeries {
    pub title: String,
    pub points: Vec<TrendPoint>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct KpiReport {
    pub division: String,
    pub base_period_key: String,
    pub columns: Vec<ReportColumn>,
    pub rows: Vec<ReportRow>,
    pub sales_chart: BarSeries,
    pub gauge: Option<GaugeSeries>,
    pub trend: TrendSeries,
    pub pvm: Option<PvmResult>,
    pub insights: Option<CustomerInsights>,
}

impl KpiReport {
    pub fn with_insights(mut self, insights: CustomerInsights) -> Self {
        self.insights = Some(insights);
        self
    }

    pub fn row(&self, row_index: usize) -> Option<&ReportRow> {
        self.rows.iter().find(|r| r.row_index == row_index)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

fn report_row(resolver: &CellResolver<'_>, periods: &PeriodSet, row_index: usize) -> ReportRow {
    ReportRow {
        row_index,
        label: resolver.schema().label(row_index),
        cells: compare_periods(resolver, periods, row_index),
    }
}

fn bar_series(title: &str, columns: &[ReportColumn], sales: &ReportRow) -> BarSeries {
    BarSeries {
        title: title.to_string(),
        labels: columns.iter().map(|c| c.label.clone()).collect(),
        values: sales.cells.iter().map(|c| c.metric.amount).collect(),
        colors: columns.iter().map(|c| c.palette.primary.to_string()).collect(),
        variances: sales.cells.iter().map(|c| c.vs_previous).collect(),
    }
}

fn gauge_series(periods: &PeriodSet, sales: &ReportRow) -> Option<GaugeSeries> {
    let base = periods.base_index();
    let budget = periods.budget_counterpart(base)?;
    let actual = sales.cells.get(base)?.metric.amount;
    let target = sales.cells.get(budget)?.metric.amount;

    Some(GaugeSeries {
        title: format!("{} vs Budget", sales.label),
        actual,
        target,
        attainment: (target != 0.0).then(|| safe_ratio(actual, target) * 100.0),
    })
}

fn trend_series(trend_row: &ReportRow) -> TrendSeries {
    TrendSeries {
        title: format!("{} Trend", trend_row.label),
        points: trend_row
            .cells
            .iter()
            .map(|c| TrendPoint {
                label: c.label.clone(),
                amount: c.metric.amount,
                percent_of_sales: c.metric.percent_of_sales,
            })
            .collect(),
    }
}

/// Assembles the comparison table and chart series for `rows`.
///
/// The schema's sales row always feeds the bar chart and gauge and its
/// `net_profit_row` feeds the trend, whether or not either is among the
/// displayed rows.
pub fn build_report(
    resolver: &CellResolver<'_>,
    periods: &PeriodSet,
    rows: &[usize],
    division: &str,
) -> KpiReport {
    let schema = resolver.schema();

    let columns: Vec<ReportColumn> = periods
        .iter()
        .enumerate()
        .map(|(i, period)| ReportColumn {
            key: period_key(period),
            label: period.label(),
            period_type: period.period_type,
            is_base: i == periods.base_index(),
            palette: palette_for(period),
        })
        .collect();

    let table_rows: Vec<ReportRow> = rows
        .iter()
        .map(|&row| report_row(resolver, periods, row))
        .collect();

    let lookup = |row: usize| {
        table_rows
            .iter()
            .find(|r| r.row_index == row)
            .cloned()
            .unwrap_or_else(|| report_row(resolver, periods, row))
    };
    let sales = lookup(schema.sales_row);
    let net_profit = lookup(schema.net_profit_row);

    debug!(
        "Assembled {} rows x {} columns for {}",
        table_rows.len(),
        columns.len(),
        division
    );

    KpiReport {
        division: division.to_string(),
        base_period_key: period_key(periods.base()),
        sales_chart: bar_series(&format!("{} by Period", sales.label), &columns, &sales),
        gauge: gauge_series(periods, &sales),
        trend: trend_series(&net_profit),
        pvm: pvm_for_period(resolver, periods, periods.base_index()),
        columns,
        rows: table_rows,
        insights: None,
    }
}

/// A rendered chart image handed to the exporter by the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChartSnapshot {
    pub title: String,
    /// `data:image/...;base64,...` URI.
    pub data_uri: String,
}

impl ChartSnapshot {
    pub fn new(title: impl Into<String>, data_uri: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            data_uri: data_uri.into(),
        }
    }

    /// Only inline images keep the export self-contained.
    pub fn is_embeddable(&self) -> bool {
        self.data_uri.starts_with("data:image/")
    }
}

pub fn escape_html(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            _ => escaped.push(ch),
        }
    }
    escaped
}

const REPORT_CSS: &str = "\
body{font-family:Segoe UI,Helvetica,Arial,sans-serif;margin:24px;color:#1a1a1a;background:#fafafa}
h1{font-size:22px;margin-bottom:4px}
h2{font-size:17px;margin-top:28px;border-bottom:1px solid #ddd;padding-bottom:4px}
.meta{color:#555;font-size:13px}
table{border-collapse:collapse;width:100%;font-size:13px;background:#fff}
th,td{border:1px solid #e0e0e0;padding:6px 8px;text-align:right}
th.row-label,td.row-label{text-align:left;font-weight:600}
th.base{outline:2px solid #1a1a1a}
.sub{display:block;color:#666;font-size:11px}
.positive{color:#2e7d32}
.negative{color:#c62828}
.neutral{color:#757575}
figure{margin:16px 0}
figure img{max-width:100%}
ul{padding-left:20px}
";

/// Renders a [`KpiReport`] as one standalone HTML document: inline styles,
/// inline chart images, no external references.
pub struct HtmlExporter<'a> {
    report: &'a KpiReport,
    title: String,
    charts: Vec<ChartSnapshot>,
}

impl<'a> HtmlExporter<'a> {
    pub fn new(report: &'a KpiReport) -> Self {
        Self {
            report,
            title: format!("{} KPI Report", report.division),
            charts: Vec::new(),
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    /// Adds a chart image. Snapshots that are not inline images are dropped.
    pub fn with_chart(mut self, snapshot: ChartSnapshot) -> Self {
        if snapshot.is_embeddable() {
            self.charts.push(snapshot);
        } else {
            warn!(
                "Dropping chart '{}': only data:image URIs can be embedded",
                snapshot.title
            );
        }
        self
    }

    pub fn render(&self) -> String {
        let mut html = String::new();
        html.push_str("<!DOCTYPE html>\n<html lang=\"en\">\n<head>\n<meta charset=\"utf-8\">\n");
        html.push_str(&format!("<title>{}</title>\n", escape_html(&self.title)));
        html.push_str(&format!("<style>\n{}</style>\n</head>\n<body>\n", REPORT_CSS));
        html.push_str(&format!("<h1>{}</h1>\n", escape_html(&self.title)));
        html.push_str(&format!(
            "<p class=\"meta\">Division: {} &middot; Base period: {}</p>\n",
            escape_html(&self.report.division),
            escape_html(&self.base_label())
        ));

        self.render_table(&mut html);
        self.render_charts(&mut html);
        self.render_pvm(&mut html);
        if let Some(insights) = &self.report.insights {
            render_insights(&mut html, insights);
        }

        html.push_str("</body>\n</html>\n");
        html
    }

    fn base_label(&self) -> String {
        self.report
            .columns
            .iter()
            .find(|c| c.is_base)
            .map(|c| c.label.clone())
            .unwrap_or_else(|| self.report.base_period_key.clone())
    }

    fn render_table(&self, html: &mut String) {
        html.push_str("<h2>Comparison</h2>\n<table>\n<thead><tr><th class=\"row-label\">Line</th>");
        for column in &self.report.columns {
            html.push_str(&format!(
                "<th{} style=\"background:{};color:{}\">{}</th>",
                if column.is_base { " class=\"base\"" } else { "" },
                column.palette.primary,
                column.palette.text,
                escape_html(&column.label)
            ));
        }
        html.push_str("</tr></thead>\n<tbody>\n");

        for row in &self.report.rows {
            html.push_str(&format!(
                "<tr><td class=\"row-label\">{}</td>",
                escape_html(&row.label)
            ));
            for (cell, column) in row.cells.iter().zip(&self.report.columns) {
                let comparison = if column.is_base {
                    "<span class=\"sub\">Base</span>".to_string()
                } else {
                    format!(
                        "<span class=\"sub {}\">vs base {}</span>",
                        variance_class(cell.vs_base),
                        format_variance(cell.vs_base)
                    )
                };
                html.push_str(&format!(
                    "<td style=\"background:{}\">{}<span class=\"sub\">{} of sales &middot; {}/kg</span>{}</td>",
                    column.palette.light,
                    format_total(cell.metric.amount),
                    format_percent(cell.metric.percent_of_sales),
                    format_per_kg(cell.metric.per_kg),
                    comparison
                ));
            }
            html.push_str("</tr>\n");
        }
        html.push_str("</tbody>\n</table>\n");
    }

    fn render_charts(&self, html: &mut String) {
        let report = self.report;
        html.push_str("<h2>Charts</h2>\n");

        for chart in &self.charts {
            html.push_str(&format!(
                "<figure><img src=\"{}\" alt=\"{}\"><figcaption>{}</figcaption></figure>\n",
                escape_html(&chart.data_uri),
                escape_html(&chart.title),
                escape_html(&chart.title)
            ));
        }

        let bar = &report.sales_chart;
        html.push_str(&format!("<h3>{}</h3>\n<ul>\n", escape_html(&bar.title)));
        for ((label, value), change) in bar.labels.iter().zip(&bar.values).zip(&bar.variances) {
            html.push_str(&format!(
                "<li>{}: {} <span class=\"{}\">({})</span></li>\n",
                escape_html(label),
                format_millions(*value),
                variance_class(*change),
                format_variance(*change)
            ));
        }
        html.push_str("</ul>\n");

        if let Some(gauge) = &report.gauge {
            let attainment = gauge
                .attainment
                .map(format_percent)
                .unwrap_or_else(|| NOT_AVAILABLE.to_string());
            html.push_str(&format!(
                "<h3>{}</h3>\n<p>{} of {} ({})</p>\n",
                escape_html(&gauge.title),
                format_total(gauge.actual),
                format_total(gauge.target),
                attainment
            ));
        }

        html.push_str(&format!("<h3>{}</h3>\n<ul>\n", escape_html(&report.trend.title)));
        for point in &report.trend.points {
            html.push_str(&format!(
                "<li>{}: {} ({} of sales)</li>\n",
                escape_html(&point.label),
                format_total(point.amount),
                format_percent(point.percent_of_sales)
            ));
        }
        html.push_str("</ul>\n");
    }

    fn render_pvm(&self, html: &mut String) {
        let Some(pvm) = &self.report.pvm else {
            return;
        };
        let basis = match pvm.basis {
            PvmBasis::PriorYear => "prior year",
            PvmBasis::Budget => "budget",
        };
        html.push_str(&format!(
            "<h2>Price / Volume / Mix (vs {})</h2>\n<ul>\n",
            basis
        ));
        html.push_str(&format!(
            "<li>Average price per ton: {} vs {}</li>\n",
            format_total(pvm.avg_price_current),
            format_total(pvm.avg_price_base)
        ));
        html.push_str(&format!(
            "<li>Price effect: <span class=\"{}\">{}</span></li>\n",
            variance_class(pvm.price_effect),
            format_variance(pvm.price_effect)
        ));
        html.push_str(&format!(
            "<li>Volume effect: <span class=\"{}\">{}</span></li>\n",
            variance_class(pvm.volume_effect),
            format_variance(pvm.volume_effect)
        ));
        html.push_str(&format!(
            "<li>Mix effect: {} (product detail unavailable)</li>\n</ul>\n",
            NOT_AVAILABLE
        ));
    }
}

fn render_insights(html: &mut String, insights: &CustomerInsights) {
    html.push_str("<h2>Customer Insights</h2>\n");

    let concentration = &insights.concentration;
    html.push_str(&format!(
        "<p>{} active customers. Concentration risk: <strong>{:?}</strong> (top 1: {}, top 3: {}, top 5: {})</p>\n<ol>\n",
        concentration.customer_count,
        concentration.risk,
        format_share(concentration.top1_share),
        format_share(concentration.top3_share),
        format_share(concentration.top5_share)
    ));
    for customer in &concentration.top_customers {
        html.push_str(&format!(
            "<li>{}: {} ({})</li>\n",
            escape_html(&customer.name),
            format_total(customer.value),
            format_share(customer.share)
        ));
    }
    html.push_str("</ol>\n");

    if let Some(retention) = &insights.retention {
        html.push_str(&format!(
            "<p>Retention {} &middot; churn {} &middot; {} retained, {} lost, {} new</p>\n",
            format_share(retention.retention_rate),
            format_share(retention.churn_rate),
            retention.retained.len(),
            retention.lost.len(),
            retention.new_customers.len()
        ));
    }

    if !insights.declining.is_empty() {
        html.push_str("<h3>Declining customers</h3>\n<ul>\n");
        for customer in &insights.declining {
            html.push_str(&format!(
                "<li>{}: {} to {} <span class=\"negative\">({})</span></li>\n",
                escape_html(&customer.name),
                format_total(customer.previous),
                format_total(customer.current),
                format_share(customer.change)
            ));
        }
        html.push_str("</ul>\n");
    }

    if !insights.outliers.is_empty() {
        html.push_str("<h3>Outliers</h3>\n<ul>\n");
        for outlier in &insights.outliers {
            html.push_str(&format!(
                "<li>{:?}: {} growth {} (z {:.1})</li>\n",
                outlier.tier,
                escape_html(&outlier.name),
                format_variance(Some(outlier.growth_rate)),
                outlier.z_score
            ));
        }
        html.push_str("</ul>\n");
    }

    if let Some(advantage) = &insights.advantage {
        for (title, findings) in [
            ("Volume advantage", &advantage.volume_advantage),
            ("Sales advantage", &advantage.sales_advantage),
        ] {
            if findings.is_empty() {
                continue;
            }
            html.push_str(&format!("<h3>{}</h3>\n<ul>\n", title));
            for finding in findings {
                html.push_str(&format!(
                    "<li>{}: volume {} vs sales {} ({:+.1} pp)</li>\n",
                    escape_html(&finding.name),
                    format_variance(Some(finding.volume_vs_budget)),
                    format_variance(Some(finding.amount_vs_budget)),
                    finding.gap_pp
                ));
            }
            html.push_str("</ul>\n");
        }
    }
}
