use crate::aggregator::StandSummary;
use crate::calibration::CalibrationFactorSet;
use crate::finance::{analyze_cashflows, gross_revenue, CashflowAnalysis};
use crate::schedule::{auto_schedule, supplied_schedule, HarvestEvent, Schedule};
use crate::schema::{PriceSheet, Product};
use chrono::NaiveDate;
use log::info;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScheduleMode {
    /// Events derived from the stand summaries.
    Auto,
    /// Events taken from an externally supplied table.
    Supplied,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReportConfig {
    pub owner_name: String,
    pub tract_name: String,
    /// Fraction, e.g. 0.05.
    pub discount_rate: f64,
    pub current_year: i32,
    pub generated_on: NaiveDate,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportMetadata {
    pub owner_name: String,
    pub tract_name: String,
    pub generated_on: NaiveDate,
    pub current_year: i32,
    pub schedule_mode: ScheduleMode,
}

/// One row of the reported event schedule, flattened for tabular output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
    pub event: String,
    pub year: i32,
    pub pulp_t: f64,
    pub cns_t: f64,
    pub saw_t: f64,
    pub export_t: f64,
    pub gross: f64,
}

impl EventRecord {
    pub fn from_event(event: &HarvestEvent, prices: &PriceSheet) -> Self {
        Self {
            event: event.event_type.to_string(),
            year: event.year,
            pulp_t: event.tons.pulp,
            cns_t: event.tons.cns,
            saw_t: event.tons.saw,
            export_t: event.tons.export,
            gross: gross_revenue(&event.tons, prices),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChartPoint {
    pub label: String,
    pub value: f64,
}

/// A labelled numeric series handed to whatever renders the charts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChartSeries {
    pub title: String,
    pub unit: String,
    pub points: Vec<ChartPoint>,
}

impl ChartSeries {
    fn new(title: &str, unit: &str, points: Vec<ChartPoint>) -> Self {
        Self {
            title: title.to_string(),
            unit: unit.to_string(),
            points,
        }
    }

    pub fn total(&self) -> f64 {
        self.points.iter().map(|p| p.value).sum()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChartSet {
    pub product_mix: ChartSeries,
    pub basal_area_by_stand: ChartSeries,
    pub gross_by_event_year: ChartSeries,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportBundle {
    pub metadata: ReportMetadata,
    pub stands: Vec<StandSummary>,
    pub schedule: Schedule,
    pub event_records: Vec<EventRecord>,
    pub cashflows: CashflowAnalysis,
    pub charts: ChartSet,
}

impl ReportBundle {
    /// Human-readable digest of the financial result.
    pub fn summary_lines(&self) -> Vec<String> {
        let summary = &self.cashflows.summary;
        let mut lines = vec![
            format!(
                "Report for {} (owner: {}), generated {}",
                self.metadata.tract_name, self.metadata.owner_name, self.metadata.generated_on
            ),
            format!(
                "{} stands, {} scheduled events ({:?} schedule)",
                self.stands.len(),
                self.event_records.len(),
                self.metadata.schedule_mode
            ),
            format!("Discount rate: {:.1}%", summary.discount_rate * 100.0),
            format!("NPV (net): ${:.0}", summary.npv),
            format!("IRR: {}", summary.irr),
        ];
        for record in &self.event_records {
            lines.push(format!(
                "  {} {}: pulp {:.0} t, cns {:.0} t, saw {:.0} t, export {:.0} t, gross ${:.0}",
                record.event,
                record.year,
                record.pulp_t,
                record.cns_t,
                record.saw_t,
                record.export_t,
                record.gross
            ));
        }
        lines
    }
}

pub fn chart_series(
    stands: &[StandSummary],
    events: &[HarvestEvent],
    prices: &PriceSheet,
) -> ChartSet {
    let product_mix = Product::ALL
        .iter()
        .map(|p| ChartPoint {
            label: p.to_string(),
            value: events.iter().map(|e| e.tons.get(*p)).sum(),
        })
        .collect();

    let basal_area = stands
        .iter()
        .map(|s| ChartPoint {
            label: s.stand_id.clone(),
            value: s.ba_sqft_ac.unwrap_or(0.0),
        })
        .collect();

    let gross = events
        .iter()
        .map(|e| ChartPoint {
            label: e.year.to_string(),
            value: gross_revenue(&e.tons, prices),
        })
        .collect();

    ChartSet {
        product_mix: ChartSeries::new("Market Exposure", "tons", product_mix),
        basal_area_by_stand: ChartSeries::new("Basal Area by Stand", "sqft/ac", basal_area),
        gross_by_event_year: ChartSeries::new("Harvest Timeline (Gross)", "USD", gross),
    }
}

/// Builds the schedule, cashflows and chart series for a tract.
///
/// When `supplied_events` is `Some`, those events are used (with global
/// product factors) and the stands only feed the basal-area chart.
pub fn build_report(
    stands: &[StandSummary],
    config: &ReportConfig,
    prices: &PriceSheet,
    calibration: &CalibrationFactorSet,
    supplied_events: Option<Vec<HarvestEvent>>,
) -> ReportBundle {
    let (schedule, schedule_mode) = match supplied_events {
        Some(events) => (supplied_schedule(events, calibration), ScheduleMode::Supplied),
        None => (
            auto_schedule(stands, config.current_year, calibration),
            ScheduleMode::Auto,
        ),
    };

    let event_records: Vec<EventRecord> = schedule
        .events
        .iter()
        .map(|e| EventRecord::from_event(e, prices))
        .collect();
    let cashflows = analyze_cashflows(
        &schedule.events,
        prices,
        config.discount_rate,
        config.current_year,
    );
    let charts = chart_series(stands, &schedule.events, prices);

    info!(
        "Built report for tract '{}' with {} events",
        config.tract_name,
        event_records.len()
    );

    ReportBundle {
        metadata: ReportMetadata {
            owner_name: config.owner_name.clone(),
            tract_name: config.tract_name.clone(),
            generated_on: config.generated_on,
            current_year: config.current_year,
            schedule_mode,
        },
        stands: stands.to_vec(),
        schedule,
        event_records,
        cashflows,
        charts,
    }
}
