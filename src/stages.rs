//! File-based stage boundary.
//!
//! Each stage reads explicit input paths, writes its artifacts under an output
//! prefix, and reports a binary outcome plus diagnostic text that an invoking
//! service can show verbatim on failure.

use crate::aggregator::{aggregate, AggregationOptions, CruiseConfig};
use crate::calibration::CalibrationFactorSet;
use crate::error::{CanopyError, Result};
use crate::finance::FinancialSummary;
use crate::ingestion::{
    load_contract, load_tolerant, read_stand_summaries, write_json, write_records,
};
use crate::report::{build_report, ReportBundle, ReportConfig, ReportMetadata};
use crate::schedule::events_from_table;
use crate::schema::{ImportContract, PriceSheet, RunConfig};
use crate::table::Table;
use crate::utils::{current_year, today};
use crate::validator::validate_table;
use log::{error, info};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Validate,
    Aggregate,
    Report,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Validate => f.write_str("Validator"),
            Stage::Aggregate => f.write_str("Aggregator"),
            Stage::Report => f.write_str("Report builder"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageReport {
    pub stage: Stage,
    pub succeeded: bool,
    pub diagnostics: Vec<String>,
    pub artifacts: Vec<PathBuf>,
}

impl StageReport {
    fn new(stage: Stage) -> Self {
        Self {
            stage,
            succeeded: true,
            diagnostics: Vec::new(),
            artifacts: Vec::new(),
        }
    }

    fn fail(mut self, err: &CanopyError) -> Self {
        error!("{} failed: {}", self.stage, err);
        self.succeeded = false;
        self.diagnostics.push(format!("ERROR: {}", err));
        self
    }

    fn note(&mut self, line: impl Into<String>) {
        self.diagnostics.push(line.into());
    }

    fn saved(&mut self, path: PathBuf) {
        self.note(format!("Saved: {}", path.display()));
        self.artifacts.push(path);
    }

    pub fn render(&self) -> String {
        self.diagnostics.join("\n")
    }
}

/// Artifact locations for one job, all derived from an output prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactPaths {
    prefix: String,
}

impl ArtifactPaths {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    fn with_suffix(&self, suffix: &str) -> PathBuf {
        PathBuf::from(format!("{}_{}", self.prefix, suffix))
    }

    pub fn normalized(&self) -> PathBuf {
        self.with_suffix("treesum_normalized.csv")
    }

    pub fn canonical(&self) -> PathBuf {
        self.with_suffix("canopy_treelevel.csv")
    }

    pub fn import_report(&self) -> PathBuf {
        self.with_suffix("import_report.json")
    }

    pub fn stand_summary(&self) -> PathBuf {
        self.with_suffix("stand_summary.csv")
    }

    pub fn events(&self) -> PathBuf {
        self.with_suffix("events.csv")
    }

    pub fn cashflows(&self) -> PathBuf {
        self.with_suffix("cashflows.csv")
    }

    pub fn financial_summary(&self) -> PathBuf {
        self.with_suffix("financial_summary.json")
    }

    pub fn chart_series(&self) -> PathBuf {
        self.with_suffix("chart_series.json")
    }
}

/// Stage 1: normalize, validate and remap a raw TreeSum CSV.
/// Artifacts are written even when the report holds fatal errors.
pub fn run_validate_stage(
    tree_table: &Path,
    contract: Option<&Path>,
    paths: &ArtifactPaths,
) -> StageReport {
    let mut report = StageReport::new(Stage::Validate);
    match validate_files(tree_table, contract, paths, &mut report) {
        Ok(()) => report,
        Err(e) => report.fail(&e),
    }
}

fn validate_files(
    tree_table: &Path,
    contract: Option<&Path>,
    paths: &ArtifactPaths,
    report: &mut StageReport,
) -> Result<()> {
    let contract = match contract {
        Some(path) => load_contract(path)?,
        None => {
            report.note("Using bundled TreeSum import contract");
            ImportContract::default_treesum()
        }
    };
    let raw = Table::from_csv_path(tree_table)?;
    let output = validate_table(&raw, &contract);

    report.note(serde_json::to_string_pretty(&output.report)?);

    output.normalized.to_csv_path(&paths.normalized())?;
    report.saved(paths.normalized());
    output.canonical.to_csv_path(&paths.canonical())?;
    report.saved(paths.canonical());
    write_json(&paths.import_report(), &output.report)?;
    report.saved(paths.import_report());

    if output.report.is_fatal() {
        return Err(CanopyError::ValidationFailed(output.report.errors.len()));
    }
    Ok(())
}

/// Stage 2: aggregate a canonical tree-level CSV into stand summaries.
pub fn run_aggregate_stage(
    canonical: &Path,
    cruise_type: &str,
    size_value: f64,
    calibration: Option<&Path>,
    group_column: Option<&str>,
    paths: &ArtifactPaths,
) -> StageReport {
    let mut report = StageReport::new(Stage::Aggregate);
    let result = CruiseConfig::parse(cruise_type, size_value).and_then(|cruise| {
        aggregate_files(canonical, &cruise, calibration, group_column, paths, &mut report)
    });
    match result {
        Ok(()) => report,
        Err(e) => report.fail(&e),
    }
}

fn aggregate_files(
    canonical: &Path,
    cruise: &CruiseConfig,
    calibration: Option<&Path>,
    group_column: Option<&str>,
    paths: &ArtifactPaths,
    report: &mut StageReport,
) -> Result<()> {
    let factors = load_tolerant::<CalibrationFactorSet>("calibration factors", calibration);
    if let Some(reason) = factors.fallback_reason {
        report.note(format!("WARNING: {}", reason));
    }

    let table = Table::from_csv_path(canonical)?;
    let options = AggregationOptions {
        calibration: factors.document,
        group_column: group_column.map(str::to_string),
    };
    let stands = aggregate(&table, cruise, &options)?;

    write_records(&paths.stand_summary(), &stands)?;
    report.saved(paths.stand_summary());
    Ok(())
}

#[derive(Debug, Clone)]
pub struct ReportStageInputs<'a> {
    pub stand_summary: &'a Path,
    pub prices: &'a Path,
    pub events: Option<&'a Path>,
    pub calibration: Option<&'a Path>,
    pub config: ReportConfig,
}

/// Stage 3: schedule, cashflows, financial summary and chart series.
pub fn run_report_stage(inputs: &ReportStageInputs<'_>, paths: &ArtifactPaths) -> StageReport {
    let mut report = StageReport::new(Stage::Report);
    match report_files(inputs, paths, &mut report) {
        Ok(()) => report,
        Err(e) => report.fail(&e),
    }
}

fn report_files(
    inputs: &ReportStageInputs<'_>,
    paths: &ArtifactPaths,
    report: &mut StageReport,
) -> Result<()> {
    let stands = read_stand_summaries(inputs.stand_summary)?;

    let prices = load_tolerant::<PriceSheet>("price sheet", Some(inputs.prices));
    let factors = load_tolerant::<CalibrationFactorSet>("calibration factors", inputs.calibration);
    for reason in [&prices.fallback_reason, &factors.fallback_reason]
        .into_iter()
        .flatten()
    {
        report.note(format!("WARNING: {}", reason));
    }

    let supplied = match inputs.events {
        Some(path) => Some(events_from_table(&Table::from_csv_path(path)?)?),
        None => None,
    };

    let bundle = build_report(
        &stands,
        &inputs.config,
        &prices.document,
        &factors.document,
        supplied,
    );
    for line in bundle.summary_lines() {
        report.note(line);
    }

    write_records(&paths.events(), &bundle.event_records)?;
    report.saved(paths.events());
    write_records(&paths.cashflows(), &bundle.cashflows.entries)?;
    report.saved(paths.cashflows());
    write_json(&paths.financial_summary(), &FinancialSummaryDocument::from_bundle(&bundle))?;
    report.saved(paths.financial_summary());
    write_json(&paths.chart_series(), &bundle.charts)?;
    report.saved(paths.chart_series());
    Ok(())
}

#[derive(Debug, Serialize)]
struct FinancialSummaryDocument<'a> {
    #[serde(flatten)]
    metadata: &'a ReportMetadata,
    #[serde(flatten)]
    summary: &'a FinancialSummary,
}

impl<'a> FinancialSummaryDocument<'a> {
    fn from_bundle(bundle: &'a ReportBundle) -> Self {
        Self {
            metadata: &bundle.metadata,
            summary: &bundle.cashflows.summary,
        }
    }
}

/// Runs all three stages from a [`RunConfig`], halting at the first failure.
pub fn run_all(config: &RunConfig) -> Vec<StageReport> {
    let paths = ArtifactPaths::new(config.output_prefix.clone());
    let mut reports = Vec::with_capacity(3);

    info!("Stage 1/3: validating {}", config.tree_table.display());
    let validate = run_validate_stage(&config.tree_table, config.contract.as_deref(), &paths);
    let ok = validate.succeeded;
    reports.push(validate);
    if !ok {
        return reports;
    }

    info!("Stage 2/3: aggregating stands");
    let aggregate = run_aggregate_stage(
        &paths.canonical(),
        &config.cruise_type,
        config.size_value,
        config.calibration.as_deref(),
        config.group_column.as_deref(),
        &paths,
    );
    let ok = aggregate.succeeded;
    reports.push(aggregate);
    if !ok {
        return reports;
    }

    info!("Stage 3/3: building report");
    let stand_summary = paths.stand_summary();
    let inputs = ReportStageInputs {
        stand_summary: &stand_summary,
        prices: &config.prices,
        events: config.events.as_deref(),
        calibration: config.calibration.as_deref(),
        config: ReportConfig {
            owner_name: config.owner_name.clone(),
            tract_name: config.tract_name.clone(),
            discount_rate: config.discount_rate_pct / 100.0,
            current_year: config.current_year.unwrap_or_else(current_year),
            generated_on: today(),
        },
    };
    reports.push(run_report_stage(&inputs, &paths));
    reports
}
