//! # Canopy Pipeline
//!
//! A library for turning raw timber-cruise tree tallies into a stand-level
//! inventory summary and a discounted harvest cashflow projection.
//!
//! ## Core Concepts
//!
//! - **Import contract**: which raw columns must exist, how they are cleaned, and
//!   how they map onto canonical tree-level names
//! - **Stand summary**: per-stand TPA, basal area and QMD from Plot or Point
//!   cruise expansion, with calibration factors applied
//! - **Calibration factors**: multipliers keyed by group (usually species) with a
//!   reserved `ALL` fallback, resolving to 1.0 when nothing matches
//! - **Harvest schedule**: thinning and final-harvest events either derived from
//!   the stands or supplied externally, valued into cashflows, NPV and IRR
//!
//! The run is three stages, each able to halt it: validation (any fatal
//! finding), aggregation (bad cruise configuration or stand ids), and the
//! financial report, which always completes once it has stands.
//!
//! ## Example
//!
//! ```rust,ignore
//! use canopy_pipeline::*;
//!
//! let raw = Table::from_csv_path("treesum.csv".as_ref())?;
//! let inputs = PipelineInputs {
//!     contract: ImportContract::default_treesum(),
//!     cruise: CruiseConfig::new(CruiseType::Point, 10.0),
//!     calibration: CalibrationFactorSet::new(),
//!     group_column: Some("species_code".to_string()),
//!     prices: PriceSheet { pulp: 9.0, saw: 27.0, ..Default::default() },
//!     supplied_events: None,
//!     report: ReportConfig {
//!         owner_name: "Owner".to_string(),
//!         tract_name: "Tract".to_string(),
//!         discount_rate: 0.05,
//!         current_year: 2025,
//!         generated_on: chrono::NaiveDate::from_ymd_opt(2025, 1, 1).unwrap(),
//!     },
//! };
//!
//! match CanopyPipeline::run(&raw, &inputs) {
//!     PipelineOutcome::Completed(bundle) => println!("NPV {}", bundle.report.cashflows.summary.npv),
//!     other => eprintln!("{:?}", other.diagnostics()),
//! }
//! ```

pub mod aggregator;
pub mod calibration;
pub mod error;
pub mod finance;
pub mod ingestion;
pub mod report;
pub mod schedule;
pub mod schema;
pub mod stages;
pub mod table;
pub mod utils;
pub mod validator;

pub use aggregator::{
    aggregate, AggregationOptions, CruiseConfig, CruiseType, StandMetrics, StandSummary,
};
pub use calibration::{CalibrationFactorSet, CalibrationGroup, FactorName, ALL_GROUP_KEY};
pub use error::{CanopyError, Result};
pub use finance::{CashflowAnalysis, CashflowEntry, FinancialSummary, IrrOutcome};
pub use report::{build_report, ChartSeries, ChartSet, ReportBundle, ReportConfig};
pub use schedule::{EventType, HarvestEvent, ProductSplit, ProductTons, Schedule};
pub use schema::*;
pub use stages::{ArtifactPaths, Stage, StageReport};
pub use table::Table;
pub use validator::{validate_table, ValidationOutput, ValidationReport};

use log::{debug, info};

/// Everything a run needs besides the raw table.
#[derive(Debug, Clone)]
pub struct PipelineInputs {
    pub contract: ImportContract,
    pub cruise: CruiseConfig,
    pub calibration: CalibrationFactorSet,
    pub group_column: Option<String>,
    pub prices: PriceSheet,
    pub supplied_events: Option<Vec<HarvestEvent>>,
    pub report: ReportConfig,
}

/// Artifacts of a run that reached the end.
#[derive(Debug, Clone)]
pub struct RunBundle {
    pub validation: ValidationOutput,
    pub stands: Vec<StandSummary>,
    pub report: ReportBundle,
}

/// Terminal state of the validate -> aggregate -> report machine.
#[derive(Debug, Clone)]
pub enum PipelineOutcome {
    ValidationFailed(ValidationReport),
    AggregationFailed {
        validation: ValidationReport,
        error: String,
    },
    Completed(Box<RunBundle>),
}

impl PipelineOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, PipelineOutcome::Completed(_))
    }

    /// Every error and warning the run produced, in stage order.
    pub fn diagnostics(&self) -> Vec<String> {
        let validation = match self {
            PipelineOutcome::ValidationFailed(report) => report,
            PipelineOutcome::AggregationFailed { validation, .. } => validation,
            PipelineOutcome::Completed(bundle) => &bundle.validation.report,
        };

        let mut lines: Vec<String> = validation
            .errors
            .iter()
            .map(|e| format!("ERROR: {}", e))
            .chain(validation.warnings.iter().map(|w| format!("WARNING: {}", w)))
            .collect();
        if let PipelineOutcome::AggregationFailed { error, .. } = self {
            lines.push(format!("ERROR: {}", error));
        }
        lines
    }
}

pub struct CanopyPipeline;

impl CanopyPipeline {
    pub fn run(raw: &Table, inputs: &PipelineInputs) -> PipelineOutcome {
        info!(
            "Running canopy pipeline on {} raw rows for tract '{}'",
            raw.len(),
            inputs.report.tract_name
        );

        let validation = validate_table(raw, &inputs.contract);
        if validation.report.is_fatal() {
            return PipelineOutcome::ValidationFailed(validation.report);
        }

        let options = AggregationOptions {
            calibration: inputs.calibration.clone(),
            group_column: inputs.group_column.clone(),
        };
        let stands = match aggregate(&validation.canonical, &inputs.cruise, &options) {
            Ok(stands) => stands,
            Err(e) => {
                return PipelineOutcome::AggregationFailed {
                    validation: validation.report,
                    error: e.to_string(),
                }
            }
        };
        debug!("Aggregation produced {} stand summaries", stands.len());

        let report = build_report(
            &stands,
            &inputs.report,
            &inputs.prices,
            &inputs.calibration,
            inputs.supplied_events.clone(),
        );

        PipelineOutcome::Completed(Box::new(RunBundle {
            validation,
            stands,
            report,
        }))
    }
}
