use canopy_pipeline::aggregator::quadratic_mean_diameter;
use canopy_pipeline::finance::{internal_rate_of_return, IrrOutcome};
use canopy_pipeline::schedule::{auto_event_years, QMD_BANDS};
use canopy_pipeline::stages::{run_aggregate_stage, run_all, run_validate_stage, Stage};
use canopy_pipeline::*;
use chrono::NaiveDate;
use indexmap::IndexMap;
use std::fs;
use std::path::Path;

const TREESUM_CSV: &str = "\
TractName,StandID,StandAcres,CruiseDate,CruiseType,Size_BAF,PlotNum,PlotID,Species,DBH,MerchHt,TopDIB,TreeClass,Defect,Age
Pine Flat,1,25,2024-02-10,Point,10,1,1-1, lp ,8.2,40,4,1,0,14
Pine Flat,1,25,2/10/2024,Point,10,1,1-1,lp,10.4,48,4,1,5,14
Pine Flat,1,25,2024-02-10,Point,10,2,1-2,sp,12.1,55,5,1,0,14
Pine Flat,2,40,2024-02-11,Point,10,1,2-1,LP,6.5,30,3,2,0,
Pine Flat,2,40,not a date,Point,10,1,2-1,lp,7.9,35,9,1,110,
";

fn write(dir: &Path, name: &str, contents: &str) -> std::path::PathBuf {
    let path = dir.join(name);
    fs::write(&path, contents).unwrap();
    path
}

fn report_config() -> ReportConfig {
    ReportConfig {
        owner_name: "Owner".to_string(),
        tract_name: "Pine Flat".to_string(),
        discount_rate: 0.05,
        current_year: 2025,
        generated_on: NaiveDate::from_ymd_opt(2025, 3, 1).unwrap(),
    }
}

fn simple_contract() -> ImportContract {
    let mapping: IndexMap<String, String> = [("stand_id", "StandID"), ("dbh_in", "DBH"), ("acres", "StandAcres")]
        .iter()
        .map(|(a, b)| (a.to_string(), b.to_string()))
        .collect();
    ImportContract {
        required_columns: vec!["StandID".to_string()],
        normalization: NormalizationFlags::default(),
        mapping_to_canopy: mapping,
    }
}

#[test]
fn test_calibration_resolution_example() {
    let factors: CalibrationFactorSet =
        serde_json::from_str(r#"{"LP": {"ba_factor": 1.1}}"#).unwrap();
    assert_eq!(factors.factor(&CalibrationGroup::parse("SP"), FactorName::BasalArea), 1.0);
    assert_eq!(factors.factor(&CalibrationGroup::parse("LP"), FactorName::BasalArea), 1.1);
}

#[test]
fn test_plot_and_point_reference_values() {
    let rows: Vec<Vec<&str>> = (0..10).map(|_| vec!["A", "10"]).collect();
    let row_refs: Vec<&[&str]> = rows.iter().map(|r| r.as_slice()).collect();
    let plot_table = Table::from_rows(&["stand_id", "dbh_in"], &row_refs);

    let plot = aggregate(
        &plot_table,
        &CruiseConfig::new(CruiseType::Plot, 0.1),
        &AggregationOptions::default(),
    )
    .unwrap();
    assert!((plot[0].tpa_live.unwrap() - 100.0).abs() < 1e-9);
    assert!((plot[0].ba_sqft_ac.unwrap() - 218.166).abs() < 0.001);

    let point_table = Table::from_rows(&["stand_id", "dbh_in"], &[&["A", "10"]]);
    let point = aggregate(
        &point_table,
        &CruiseConfig::new(CruiseType::Point, 10.0),
        &AggregationOptions::default(),
    )
    .unwrap();
    assert!((point[0].tpa_live.unwrap() - 18.33).abs() < 0.01);
    assert_eq!(point[0].ba_sqft_ac, Some(10.0));
    let qmd = quadratic_mean_diameter(10.0, 1).unwrap();
    assert!((point[0].qmd_in.unwrap() - qmd).abs() < 1e-12);
}

#[test]
fn test_neutral_calibration_matches_no_calibration_bit_for_bit() {
    let table = Table::from_rows(&["stand_id", "dbh_in", "species_code"], &[&["7", "11.3", "LP"]]);
    let cruise = CruiseConfig::new(CruiseType::Plot, 0.2);

    let plain = aggregate(&table, &cruise, &AggregationOptions::default()).unwrap();
    let lp = CalibrationGroup::parse("LP");
    let neutral = AggregationOptions {
        calibration: CalibrationFactorSet::new()
            .with_factor(&lp, FactorName::BasalArea, 1.0)
            .with_factor(&lp, FactorName::Qmd, 1.0)
            .with_factor(&lp, FactorName::Tpa, 1.0),
        group_column: Some("species_code".to_string()),
    };
    let calibrated = aggregate(&table, &cruise, &neutral).unwrap();

    assert_eq!(plain[0].tpa_live.unwrap().to_bits(), calibrated[0].tpa_live.unwrap().to_bits());
    assert_eq!(plain[0].ba_sqft_ac.unwrap().to_bits(), calibrated[0].ba_sqft_ac.unwrap().to_bits());
    assert_eq!(plain[0].qmd_in.unwrap().to_bits(), calibrated[0].qmd_in.unwrap().to_bits());
}

#[test]
fn test_schedule_and_finance_properties() {
    for age in [None, Some(0.0), Some(15.0), Some(21.5), Some(33.0), Some(80.0)] {
        let years = auto_event_years(age, 2025);
        assert!(years.first_thin < years.second_thin && years.second_thin < years.final_harvest);
    }

    for (_, split) in QMD_BANDS {
        assert!((split.sum() - 1.0).abs() < 1e-9);
    }

    assert_eq!(internal_rate_of_return(&[0.0; 5]), IrrOutcome::NoSolution);
    assert_eq!(internal_rate_of_return(&[5.0, 1.0, 3.0]), IrrOutcome::NoSolution);
}

#[test]
fn test_missing_stand_id_yields_single_error() {
    let raw = Table::from_rows(&["StandAcres", "DBH"], &[&["10", "8"], &["10", "9"]]);
    let output = validate_table(&raw, &simple_contract());

    assert_eq!(output.report.errors.len(), 1);
    assert!(output.report.errors[0].contains("StandID"));
    assert!(output.report.stands_detected.is_empty());
    // Absent source columns are remapped as missing, not errors.
    assert!(output.canonical.column("stand_id").unwrap().all(|c| c.is_none()));
}

#[test]
fn test_in_memory_run_with_default_contract() {
    let raw = Table::from_reader(TREESUM_CSV.as_bytes()).unwrap();
    let inputs = PipelineInputs {
        contract: ImportContract::default_treesum(),
        cruise: CruiseConfig::new(CruiseType::Point, 10.0),
        calibration: CalibrationFactorSet::new(),
        group_column: Some("species_code".to_string()),
        prices: PriceSheet {
            pulp: 9.0,
            cns: 18.0,
            saw: 27.0,
            export: 40.0,
            logging_cost_per_ton_pulp: 12.0,
            ..PriceSheet::default()
        },
        supplied_events: None,
        report: report_config(),
    };

    let outcome = CanopyPipeline::run(&raw, &inputs);
    let diagnostics = outcome.diagnostics();
    assert!(diagnostics.iter().any(|d| d.contains("TopDIB > DBH")));
    assert!(diagnostics.iter().any(|d| d.contains("Defect values outside")));

    let PipelineOutcome::Completed(bundle) = outcome else {
        panic!("run should complete: {:?}", diagnostics);
    };
    assert_eq!(bundle.validation.report.stands_detected, vec!["1", "2"]);
    assert_eq!(bundle.validation.normalized.get(4, 3), None);
    assert_eq!(bundle.validation.normalized.get(1, 3), Some("2024-02-10"));

    let stand_1 = &bundle.stands[0];
    assert_eq!(stand_1.trees_observed, 3);
    assert_eq!(stand_1.age, Some(14.0));
    assert_eq!(stand_1.calibration_group, CalibrationGroup::parse("LP"));
    assert_eq!(bundle.stands[1].age, None);

    // Stand 1 (age 14) and stand 2 (unknown age) land in different years.
    assert_eq!(bundle.report.schedule.detail.len(), 6);
    assert!(bundle.report.schedule.events.len() > 3);
    assert_eq!(
        bundle.report.cashflows.entries.len(),
        bundle.report.event_records.len()
    );
}

#[test]
fn test_file_stages_end_to_end() {
    let dir = tempfile::tempdir().unwrap();
    let tree = write(dir.path(), "treesum.csv", TREESUM_CSV);
    let prices = write(
        dir.path(),
        "prices.json",
        r#"{"pulp": 9, "cns": 18, "saw": 27, "export": 40, "trucking_rate_per_ton": 2, "consulting_fee_pct": 8}"#,
    );
    let calibration = write(dir.path(), "calibration.json", r#"{"LP": {"ba_factor": oops}}"#);
    let prefix = dir.path().join("job").to_string_lossy().to_string();

    let config = RunConfig {
        tree_table: tree,
        contract: None,
        prices,
        output_prefix: prefix.clone(),
        cruise_type: "Point".to_string(),
        size_value: 10.0,
        discount_rate_pct: 6.0,
        owner_name: "Owner".to_string(),
        tract_name: "Pine Flat".to_string(),
        calibration: Some(calibration),
        group_column: Some("species_code".to_string()),
        events: None,
        current_year: Some(2025),
    };

    let reports = run_all(&config);
    assert_eq!(reports.len(), 3);
    assert!(reports.iter().all(|r| r.succeeded), "{:?}", reports);

    // Malformed calibration is tolerated but reported.
    assert!(reports[1]
        .diagnostics
        .iter()
        .any(|d| d.starts_with("WARNING: calibration factors is malformed")));

    let paths = ArtifactPaths::new(prefix);
    for path in [
        paths.normalized(),
        paths.canonical(),
        paths.import_report(),
        paths.stand_summary(),
        paths.events(),
        paths.cashflows(),
        paths.financial_summary(),
        paths.chart_series(),
    ] {
        assert!(path.exists(), "missing {}", path.display());
    }

    let stands = canopy_pipeline::ingestion::read_stand_summaries(&paths.stand_summary()).unwrap();
    assert_eq!(stands.len(), 2);
    assert_eq!(stands[0].stand_id, "1");

    let summary: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(paths.financial_summary()).unwrap()).unwrap();
    assert_eq!(summary["tract_name"], "Pine Flat");
    assert_eq!(summary["discount_rate"], 0.06);
    assert!(summary["npv"].as_f64().unwrap() > 0.0);
    assert_eq!(summary["irr"]["status"], "no_solution");

    let charts: ChartSet =
        serde_json::from_str(&fs::read_to_string(paths.chart_series()).unwrap()).unwrap();
    assert_eq!(charts.product_mix.points.len(), 4);
    assert_eq!(charts.basal_area_by_stand.points.len(), 2);
}

#[test]
fn test_supplied_events_run() {
    let dir = tempfile::tempdir().unwrap();
    let tree = write(dir.path(), "treesum.csv", TREESUM_CSV);
    let prices = write(dir.path(), "prices.json", r#"{"pulp": 10, "saw": 30, "logging_cost_per_ton_saw": 50}"#);
    let calibration = write(dir.path(), "calibration.json", r#"{"ALL": {"pulp_factor": 2.0}}"#);
    let events = write(
        dir.path(),
        "events.csv",
        "event,year,pulp_t,cns_t,saw_t,export_t\nfirst_thin,2025,100,0,0,0\nfinal,2030,0,0,200,0\n",
    );
    let prefix = dir.path().join("job").to_string_lossy().to_string();

    let config = RunConfig {
        tree_table: tree,
        contract: None,
        prices,
        output_prefix: prefix.clone(),
        cruise_type: "Point".to_string(),
        size_value: 10.0,
        discount_rate_pct: 0.0,
        owner_name: "Owner".to_string(),
        tract_name: "Tract".to_string(),
        calibration: Some(calibration),
        group_column: None,
        events: Some(events),
        current_year: Some(2025),
    };

    let reports = run_all(&config);
    assert!(reports.iter().all(|r| r.succeeded), "{:?}", reports);

    let paths = ArtifactPaths::new(prefix);
    let cashflows = fs::read_to_string(paths.cashflows()).unwrap();
    let mut lines = cashflows.lines();
    assert_eq!(lines.next(), Some("year,gross,net,years_from_now"));
    // 100 t pulp doubled by the global factor at $10.
    assert_eq!(lines.next(), Some("2025,2000.0,2000.0,0"));
    // 200 t saw at $30 gross, $50/t logging.
    assert_eq!(lines.next(), Some("2030,6000.0,-4000.0,5"));

    let summary: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(paths.financial_summary()).unwrap()).unwrap();
    assert_eq!(summary["schedule_mode"], "supplied");
    assert_eq!(summary["npv"], -2000.0);
    assert_eq!(summary["irr"]["status"], "rate");
}

#[test]
fn test_fatal_validation_stops_run() {
    let dir = tempfile::tempdir().unwrap();
    let tree = write(dir.path(), "treesum.csv", "StandID,StandAcres,DBH\n1,0,8\n");
    let contract = write(
        dir.path(),
        "contract.json",
        r#"{"required_columns": ["StandID", "StandAcres"], "mapping_to_canopy": {"stand_id": "StandID"}}"#,
    );
    let paths = ArtifactPaths::new(dir.path().join("job").to_string_lossy().to_string());

    let report = run_validate_stage(&tree, Some(&contract), &paths);
    assert_eq!(report.stage, Stage::Validate);
    assert!(!report.succeeded);
    assert!(report.render().contains("StandAcres must be > 0"));
    assert!(paths.import_report().exists());

    let aggregate_report = run_aggregate_stage(
        &paths.canonical(),
        "Plot",
        0.1,
        None,
        None,
        &paths,
    );
    // The canonical table has no dbh_in column.
    assert!(!aggregate_report.succeeded);
    assert!(aggregate_report.render().contains("dbh_in"));
}
