use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use sales_kpi_engine::*;
use std::collections::HashSet;

const LEDGER_CSV: &str = "\
row_index,year,month,period_type,value
3,2024,January,Actual,300000
3,2024,February,Actual,300000
3,2024,March,Actual,300000
7,2024,January,Actual,150000
7,2024,February,Actual,150000
7,2024,March,Actual,150000
3,2025,January,Actual,330000
3,2025,February,Actual,330000
3,2025,March,Actual,330000
7,2025,January,Actual,150000
7,2025,February,Actual,150000
7,2025,March,Actual,150000
54,2025,January,Actual,33000
54,2025,February,Actual,33000
54,2025,March,Actual,33000
3,2025,Q1,Budget,1100000
7,2025,Q1,Budget,500000
3,2025,Smarch,Actual,999999
31,2025,January,Actual,
";

const CUSTOMER_CSV: &str = "\
customer,year,month,period_type,value
Acme Ltd,2024,January,Actual,200
Acme Ltd,2024,February,Actual,200
ACME LIMITED,2025,January,Actual,150
Acme Ltd,2025,February,Actual,250
Beta Foods,2024,March,Actual,300
Beta Foods,2025,March,Actual,120
Corex,2024,January,Actual,100
Delta Pack,2025,February,Actual,80
Acme Ltd,2025,Q1,Budget,380
";

fn read_csv<T: serde::de::DeserializeOwned>(data: &str) -> anyhow::Result<Vec<T>> {
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_reader(data.as_bytes());
    let mut rows = Vec::new();
    for record in reader.deserialize() {
        rows.push(record?);
    }
    Ok(rows)
}

fn q1_config() -> DashboardConfig {
    DashboardConfig::new(
        "Food Packaging",
        vec![
            Period::quarter(2024, 1, PeriodType::Actual),
            Period::quarter(2025, 1, PeriodType::Actual),
            Period::quarter(2025, 1, PeriodType::Budget),
            Period::custom(2025, "R1", vec![1, 2], "Jan-Feb", PeriodType::Actual).with_color("gold"),
        ],
        1,
    )
}

fn approx(actual: f64, expected: f64) -> bool {
    (actual - expected).abs() < 1e-6
}

#[test]
fn test_full_pipeline_from_csv() -> anyhow::Result<()> {
    let rows: Vec<RawCellRow> = read_csv(LEDGER_CSV)?;
    let table = build_data_table("Food Packaging", &rows);
    let config = q1_config();

    let report = process_dashboard(&config, &table)?;

    let labels: Vec<&str> = report.columns.iter().map(|c| c.label.as_str()).collect();
    assert_eq!(
        labels,
        vec![
            "2024 Q1 Actual",
            "2025 Q1 Actual",
            "2025 Q1 Budget",
            "2025 Jan-Feb Actual"
        ]
    );
    assert_eq!(report.columns[3].key, "2025-R1-Actual");
    assert_eq!(report.columns[3].palette.primary, "#f9a825");

    let sales = report.row(SALES_ROW).expect("sales row is displayed");
    let amounts: Vec<f64> = sales.cells.iter().map(|c| c.metric.amount).collect();
    assert_eq!(amounts, vec![900_000.0, 990_000.0, 1_100_000.0, 660_000.0]);

    let base = &sales.cells[1];
    assert!(approx(base.metric.percent_of_sales, 100.0));
    assert!(approx(base.metric.per_kg, 2.2));
    assert!(approx(base.vs_prior_year.unwrap(), 10.0));
    assert!(approx(base.vs_budget.unwrap(), -10.0));
    assert_eq!(base.vs_base, None);
    assert_eq!(sales.cells[3].vs_prior_year, None);
    assert!(approx(sales.cells[3].vs_previous.unwrap(), -40.0));

    let net = report.row(NET_PROFIT_ROW).expect("net profit row is displayed");
    assert!(approx(net.cells[1].metric.percent_of_sales, 10.0));
    assert!(approx(report.trend.points[1].percent_of_sales, 10.0));

    let selling = report.row(31).expect("selling expenses row is displayed");
    assert!(selling.cells.iter().all(|c| c.metric.amount == 0.0));

    let gauge = report.gauge.as_ref().expect("base has a budget column");
    assert!(approx(gauge.attainment.unwrap(), 90.0));

    let pvm = report.pvm.expect("prior year is available");
    assert_eq!(pvm.basis, PvmBasis::PriorYear);
    assert!(approx(pvm.avg_price_current, 2_200.0));
    assert!(approx(pvm.price_effect.unwrap(), 10.0));
    assert!(approx(pvm.volume_effect.unwrap(), 0.0));
    assert!(!pvm.mix_effect.is_available());

    println!("{}", report.to_json()?);
    Ok(())
}

#[test]
fn test_customer_insights_from_csv() -> anyhow::Result<()> {
    let config = q1_config();
    let periods = config.period_set()?;
    let rows: Vec<RawCustomerRow> = read_csv(CUSTOMER_CSV)?;
    let volume = build_customer_table(&periods, &rows)?;

    assert_eq!(volume.period_count(), 4);

    let mut config = config;
    config.merge_rules = CustomerMergeRules::from_json(
        r#"{"rules":[{"action":"merge","sources":["Acme Ltd","Acme Limited"],"target_name":"Acme"}]}"#,
    )?;

    let insights = analyze_customers(&config, &volume, None)?;
    assert_eq!(insights.comparison_period_key.as_deref(), Some("2024-Q1-Actual"));

    // 2025 Q1: Acme* 400, Beta 120, Delta 80
    let concentration = &insights.concentration;
    assert_eq!(concentration.customer_count, 3);
    assert_eq!(concentration.top_customers[0].name, "Acme*");
    assert!(approx(concentration.top1_share, 400.0 / 600.0));
    assert_eq!(concentration.risk, ConcentrationRisk::Critical);

    let retention = insights.retention.as_ref().expect("prior year configured");
    assert_eq!(retention.lost, vec!["Corex".to_string()]);
    assert_eq!(retention.new_customers, vec!["Delta Pack".to_string()]);
    assert_eq!(retention.retained.len(), 2);
    assert!(approx(retention.retention_rate, 2.0 / 3.0));

    assert_eq!(insights.declining.len(), 1);
    assert_eq!(insights.declining[0].name, "Beta Foods");
    assert!(approx(insights.declining[0].change, -0.6));
    assert!(insights.advantage.is_none());
    Ok(())
}

#[test]
fn test_worked_example_scenarios() {
    let metric = DerivedMetric::from_parts(150_000.0, 1_000_000.0, 50_000.0);
    assert!(approx(metric.percent_of_sales, 15.0));
    assert!(approx(metric.per_kg, 3.0));

    assert!(approx(variance(80.0, 100.0).unwrap(), -20.0));
    assert_eq!(variance(120.0, 0.0), None);
    assert!(approx(variance(0.0, 250.0).unwrap(), -100.0));

    let table = CustomerTable::new(
        1,
        vec![
            CustomerRecord::new("A", vec![600.0]),
            CustomerRecord::new("B", vec![300.0]),
            CustomerRecord::new("C", vec![100.0]),
        ],
    )
    .unwrap();
    let summary = concentration(&table, 0);
    assert!(approx(summary.top1_share, 0.6));
    assert!(approx(summary.top3_share, 1.0));

    let retention = partition_customers(&["A", "B", "C"], &["a ", "B*", "D"]);
    assert_eq!(retention.retained, vec!["A".to_string(), "B".to_string()]);
    assert_eq!(retention.lost, vec!["C".to_string()]);
    assert_eq!(retention.new_customers, vec!["D".to_string()]);
    assert!(approx(retention.retention_rate, 2.0 / 3.0));
}

#[test]
fn test_zero_sales_gives_zero_percent() {
    let mut rng = StdRng::seed_from_u64(7);
    let mut table = DataTable::new("FP");
    for month in 1..=12 {
        table.insert_month(NET_PROFIT_ROW, 2025, month, PeriodType::Actual, rng.gen_range(-1e6..1e6));
        table.insert_month(VOLUME_ROW, 2025, month, PeriodType::Actual, rng.gen_range(0.0..1e5));
    }
    for month in 1..=12 {
        let metric = derive_metrics(&table, NET_PROFIT_ROW, &Period::month(2025, month, PeriodType::Actual));
        assert_eq!(metric.percent_of_sales, 0.0);
        assert!(metric.per_kg.is_finite());
    }
}

fn random_table(rng: &mut StdRng, customers: usize, periods: usize) -> CustomerTable {
    let records = (0..customers)
        .map(|i| {
            let values = (0..periods)
                .map(|_| {
                    if rng.gen_bool(0.2) {
                        0.0
                    } else if rng.gen_bool(0.05) {
                        rng.gen_range(5_000.0..50_000.0)
                    } else {
                        rng.gen_range(1.0..1_000.0)
                    }
                })
                .collect();
            CustomerRecord::new(format!("Customer {}", i), values)
        })
        .collect();
    CustomerTable::new(periods, records).unwrap()
}

#[test]
fn test_concentration_shares_are_monotonic() {
    let mut rng = StdRng::seed_from_u64(42);
    for _ in 0..200 {
        let count = rng.gen_range(0..30);
        let table = random_table(&mut rng, count, 1);
        let summary = concentration(&table, 0);
        assert!(summary.top1_share <= summary.top3_share + 1e-12);
        assert!(summary.top3_share <= summary.top5_share + 1e-12);
        assert!(summary.top5_share <= 1.0);
        assert!(summary.top_customers.len() <= 5);
    }
}

#[test]
fn test_retention_partition_is_complete() {
    let mut rng = StdRng::seed_from_u64(1234);
    for _ in 0..200 {
        let count = rng.gen_range(0..40);
        let table = random_table(&mut rng, count, 2);
        let summary = retention(&table, 0, 1);
        assert_eq!(summary.retained.len() + summary.lost.len(), summary.previous_count);
        assert_eq!(
            summary.retained.len() + summary.new_customers.len(),
            summary.current_count
        );
        if summary.previous_count > 0 {
            assert!(approx(summary.retention_rate + summary.churn_rate, 1.0));
        } else {
            assert_eq!(summary.retention_rate, 0.0);
        }
    }
}

#[test]
fn test_outlier_tiers_are_exclusive() {
    let thresholds = AnalyticsThresholds::default();
    let mut rng = StdRng::seed_from_u64(99);
    let mut seen = 0;

    for _ in 0..300 {
        let count = rng.gen_range(3..60);
        let table = random_table(&mut rng, count, 2);
        let outliers = detect_outliers(&table, 0, 1, &thresholds);
        assert!(outliers.len() <= thresholds.outlier_display_cap);

        let names: HashSet<&str> = outliers.iter().map(|o| o.name.as_str()).collect();
        assert_eq!(names.len(), outliers.len());

        for outlier in &outliers {
            seen += 1;
            assert_eq!(
                classify_outlier(outlier.z_score, outlier.share, outlier.growth_rate, &thresholds),
                Some(outlier.tier)
            );
            match outlier.tier {
                OutlierTier::Extreme => assert!(outlier.z_score > thresholds.extreme_z),
                OutlierTier::Material => {
                    assert!(outlier.z_score > thresholds.material_z);
                    assert!(outlier.z_score <= thresholds.extreme_z);
                    assert!(outlier.share >= thresholds.materiality_share);
                }
                OutlierTier::Emerging => {
                    assert!(outlier.z_score > thresholds.material_z);
                    assert!(outlier.z_score <= thresholds.extreme_z);
                    assert!(outlier.share < thresholds.materiality_share);
                    assert!(outlier.growth_rate.abs() > thresholds.emerging_rate_pct);
                }
            }
        }
    }
    assert!(seen > 0, "random tables should produce some outliers");
}

#[test]
fn test_period_keys_are_distinct() {
    let mut keys = HashSet::new();
    let types = [
        PeriodType::Actual,
        PeriodType::Budget,
        PeriodType::Estimate,
        PeriodType::Forecast,
    ];
    for year in 2023..=2025 {
        for period_type in types {
            let mut spans: Vec<PeriodSpan> = (1..=12).map(|month| PeriodSpan::Month { month }).collect();
            spans.extend((1..=4).map(|quarter| PeriodSpan::Quarter { quarter }));
            spans.extend((1..=2).map(|half| PeriodSpan::HalfYear { half }));
            spans.push(PeriodSpan::Year);
            spans.push(PeriodSpan::Custom {
                id: "R1".to_string(),
                months: vec![1, 2],
            });

            for span in spans {
                let period = Period::new(year, span, period_type);
                assert_eq!(period_key(&period), period_key(&period.clone()));
                assert!(keys.insert(period_key(&period)), "duplicate key {}", period.key());
            }
        }
    }
    assert_eq!(keys.len(), 3 * 4 * 20);
}

#[test]
fn test_run_rate_scenarios() -> anyhow::Result<()> {
    let mut table = DataTable::new("FP");
    table.insert(
        SALES_ROW,
        CellKey::new(2025, &PeriodSpan::Year, PeriodType::Budget),
        1_200.0,
    );
    for month in 1..=6 {
        table.insert_month(SALES_ROW, 2025, month, PeriodType::Actual, 95.0);
    }
    let config = DashboardConfig::new("FP", vec![Period::full_year(2025, PeriodType::Actual)], 0);

    let on_track = DashboardProcessor::run_rate(&config, &table, SALES_ROW, 6)?;
    assert!(approx(on_track.current_run_rate, 1_140.0));
    assert!(on_track.is_on_track);
    assert_eq!(on_track.catch_up, CatchUp::OnTrack);

    let year_end = project_run_rate(
        &RunRateInput {
            actual_to_date: 900.0,
            months_elapsed: 12,
            full_year_budget: Some(1_200.0),
            period_budget: 1_200.0,
        },
        0.85,
    );
    assert!(!year_end.is_on_track);
    assert_eq!(year_end.catch_up, CatchUp::NoMonthsRemaining { gap: 300.0 });
    Ok(())
}

#[test]
fn test_config_json_and_schema() -> anyhow::Result<()> {
    let config = DashboardConfig::from_json(
        r#"{
            "division": "Industrial",
            "periods": [
                {"year": 2024, "period_type": "Actual"},
                {"year": 2025, "span": {"kind": "Quarter", "quarter": 2}, "period_type": "Budget"}
            ],
            "base_period_index": 1,
            "thresholds": {"min_volume": 25.0}
        }"#,
    )?;

    assert_eq!(config.periods[0].span, PeriodSpan::Year);
    assert_eq!(config.rows, RowSchema::default().display_rows());
    assert_eq!(config.thresholds.min_volume, 25.0);
    assert_eq!(config.thresholds.on_track_tolerance, 0.85);
    assert!(config.merge_rules.rules.is_empty());
    assert_eq!(config.period_set()?.keys()[1], "2025-Q2-Budget");

    let restored = DashboardConfig::from_json(&config.to_json()?)?;
    assert_eq!(restored.periods, config.periods);

    let schema = DashboardConfig::schema_as_json()?;
    assert!(schema.contains("periods"));
    assert!(schema.contains("thresholds"));
    assert!(schema.contains("merge_rules"));
    Ok(())
}

#[test]
fn test_duplicate_periods_rejected() {
    let config = DashboardConfig::new(
        "FP",
        vec![
            Period::month(2025, 1, PeriodType::Actual),
            Period::month(2025, 1, PeriodType::Actual),
        ],
        0,
    );
    assert!(matches!(
        process_dashboard(&config, &DataTable::new("FP")),
        Err(KpiError::DuplicatePeriod(key)) if key == "2025-January-Actual"
    ));
}

#[test]
fn test_html_export_renders_missing_baselines_as_na() -> anyhow::Result<()> {
    let rows: Vec<RawCellRow> = read_csv(LEDGER_CSV)?;
    let table = build_data_table("Food Packaging", &rows);
    let config = q1_config();

    let periods = config.period_set()?;
    let customer_rows: Vec<RawCustomerRow> = read_csv(CUSTOMER_CSV)?;
    let volume = build_customer_table(&periods, &customer_rows)?;

    let report = process_dashboard(&config, &table)?
        .with_insights(analyze_customers(&config, &volume, None)?);

    let html = HtmlExporter::new(&report)
        .with_title("Q1 Review <draft>")
        .with_chart(ChartSnapshot::new("Sales", "data:image/png;base64,iVBORw0KGgo="))
        .render();

    assert!(html.contains("<title>Q1 Review &lt;draft&gt;</title>"));
    assert!(html.contains("data:image/png;base64,iVBORw0KGgo="));
    assert!(html.contains("990,000"));
    assert!(html.contains("N/A"));
    assert!(html.contains("Customer Insights"));
    assert!(html.contains("Beta Foods"));
    assert!(!html.contains("NaN"));
    assert!(!html.contains("<script"));
    assert!(!html.contains("<link"));
    Ok(())
}
