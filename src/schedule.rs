use crate::aggregator::StandSummary;
use crate::calibration::{CalibrationFactorSet, CalibrationGroup, FactorName};
use crate::error::{CanopyError, Result};
use crate::schema::Product;
use crate::table::Table;
use crate::utils::{clamp, parse_number, round_half_even};
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::ops::AddAssign;

/// Stand ages at which the auto-scheduler places each event.
pub const FIRST_THIN_AGE: f64 = 15.0;
pub const SECOND_THIN_AGE: f64 = 21.0;
pub const FINAL_HARVEST_AGE: f64 = 30.0;

/// Years from now used when a stand's age is unknown.
pub const UNKNOWN_AGE_OFFSETS: (i32, i32, i32) = (2, 8, 15);
/// Bound on how far an event can be placed from the current year.
pub const MAX_EVENT_OFFSET_YEARS: f64 = 1_000.0;
/// Calendar years accepted in a supplied schedule.
pub const SUPPLIED_YEAR_RANGE: (i32, i32) = (1000, 9999);

pub const FIRST_THIN_REMOVAL: f64 = 0.28;
pub const SECOND_THIN_REMOVAL: f64 = 0.33;
/// Green tons recovered per square foot of basal area removed, per acre.
pub const YIELD_PER_BA: f64 = 0.12;
pub const FINAL_TONS_PER_BA: f64 = 1.2;
pub const FINAL_TONS_PER_ACRE_BOUNDS: (f64, f64) = (60.0, 150.0);

/// QMD assumed for a stand without one.
pub const DEFAULT_QMD_IN: f64 = 7.0;

/// Unit label for schedule rows that are tract-level totals.
pub const TRACT_UNIT: &str = "tract";
/// Event label for supplied rows that carry none.
pub const UNLABELED_EVENT: &str = "scheduled";

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum EventType {
    FirstThin,
    SecondThin,
    Final,
    /// A label from a supplied schedule that is not one of the standard events.
    Other(String),
}

impl EventType {
    pub fn as_str(&self) -> &str {
        match self {
            EventType::FirstThin => "first_thin",
            EventType::SecondThin => "second_thin",
            EventType::Final => "final",
            EventType::Other(label) => label,
        }
    }
}

impl From<String> for EventType {
    fn from(label: String) -> Self {
        match label.trim() {
            "first_thin" => EventType::FirstThin,
            "second_thin" => EventType::SecondThin,
            "final" => EventType::Final,
            other => EventType::Other(other.to_string()),
        }
    }
}

impl From<EventType> for String {
    fn from(event: EventType) -> Self {
        event.as_str().to_string()
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Tons per product.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ProductTons {
    pub pulp: f64,
    pub cns: f64,
    pub saw: f64,
    pub export: f64,
}

impl ProductTons {
    pub fn get(&self, product: Product) -> f64 {
        match product {
            Product::Pulp => self.pulp,
            Product::Cns => self.cns,
            Product::Saw => self.saw,
            Product::Export => self.export,
        }
    }

    pub fn get_mut(&mut self, product: Product) -> &mut f64 {
        match product {
            Product::Pulp => &mut self.pulp,
            Product::Cns => &mut self.cns,
            Product::Saw => &mut self.saw,
            Product::Export => &mut self.export,
        }
    }

    pub fn total(&self) -> f64 {
        Product::ALL.iter().map(|p| self.get(*p)).sum()
    }

    /// Multiplies each product independently by `factor(product)`.
    pub fn scaled<F>(mut self, factor: F) -> Self
    where
        F: Fn(Product) -> f64,
    {
        for product in Product::ALL {
            *self.get_mut(product) *= factor(product);
        }
        self
    }
}

impl AddAssign for ProductTons {
    fn add_assign(&mut self, other: Self) {
        for product in Product::ALL {
            *self.get_mut(product) += other.get(product);
        }
    }
}

/// Fractions of harvested tons going to each product. Sums to 1.0.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ProductSplit {
    pub pulp: f64,
    pub cns: f64,
    pub saw: f64,
    pub export: f64,
}

impl ProductSplit {
    pub const fn new(pulp: f64, cns: f64, saw: f64, export: f64) -> Self {
        Self {
            pulp,
            cns,
            saw,
            export,
        }
    }

    pub fn sum(&self) -> f64 {
        self.pulp + self.cns + self.saw + self.export
    }

    pub fn allocate(&self, total_tons: f64) -> ProductTons {
        ProductTons {
            pulp: total_tons * self.pulp,
            cns: total_tons * self.cns,
            saw: total_tons * self.saw,
            export: total_tons * self.export,
        }
    }
}

/// Product mix by QMD band: below 6", 6-8", 8-10", 10" and up.
pub const QMD_BANDS: [(f64, ProductSplit); 4] = [
    (6.0, ProductSplit::new(0.9, 0.1, 0.0, 0.0)),
    (8.0, ProductSplit::new(0.5, 0.4, 0.1, 0.0)),
    (10.0, ProductSplit::new(0.3, 0.4, 0.3, 0.0)),
    (f64::INFINITY, ProductSplit::new(0.2, 0.3, 0.4, 0.1)),
];

pub fn product_split_from_qmd(qmd_in: Option<f64>) -> ProductSplit {
    let qmd = qmd_in.filter(|q| q.is_finite()).unwrap_or(DEFAULT_QMD_IN);
    QMD_BANDS
        .iter()
        .find(|(upper, _)| qmd < *upper)
        .map(|(_, split)| *split)
        .unwrap_or(QMD_BANDS[QMD_BANDS.len() - 1].1)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventYears {
    pub first_thin: i32,
    pub second_thin: i32,
    pub final_harvest: i32,
}

/// Calendar years of the three standard events. Always strictly increasing.
pub fn auto_event_years(age: Option<f64>, current_year: i32) -> EventYears {
    let Some(age) = age.filter(|a| a.is_finite()) else {
        let (first, second, last) = UNKNOWN_AGE_OFFSETS;
        return EventYears {
            first_thin: current_year + first,
            second_thin: current_year + second,
            final_harvest: current_year + last,
        };
    };

    let at_age = |target: f64| {
        let offset = (target - age).clamp(-MAX_EVENT_OFFSET_YEARS, MAX_EVENT_OFFSET_YEARS);
        current_year.saturating_add(round_half_even(offset))
    };

    let first_thin = current_year.max(at_age(FIRST_THIN_AGE));
    let second_thin = (first_thin + 1).max(at_age(SECOND_THIN_AGE));
    let final_harvest = (second_thin + 1).max(at_age(FINAL_HARVEST_AGE));

    EventYears {
        first_thin,
        second_thin,
        final_harvest,
    }
}

/// Estimated total tons removed by one event on one stand.
pub fn estimate_tons(ba_sqft_ac: Option<f64>, acres: Option<f64>, event: &EventType) -> f64 {
    let (Some(ba), Some(acres)) = (ba_sqft_ac, acres) else {
        return 0.0;
    };
    if !(ba > 0.0 && acres > 0.0) {
        return 0.0;
    }

    match event {
        EventType::FirstThin => ba * FIRST_THIN_REMOVAL * YIELD_PER_BA * acres,
        EventType::SecondThin => ba * SECOND_THIN_REMOVAL * YIELD_PER_BA * acres,
        _ => {
            let (lower, upper) = FINAL_TONS_PER_ACRE_BOUNDS;
            clamp(ba * FINAL_TONS_PER_BA, lower, upper) * acres
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HarvestEvent {
    /// Stand id for per-stand rows, [`TRACT_UNIT`] for tract totals.
    pub unit: String,
    pub event_type: EventType,
    pub year: i32,
    pub tons: ProductTons,
}

/// Generates the three standard events for one stand, with product tons
/// scaled by the stand's calibration group.
pub fn stand_events(
    stand: &StandSummary,
    current_year: i32,
    calibration: &CalibrationFactorSet,
) -> Vec<HarvestEvent> {
    let years = auto_event_years(stand.age, current_year);
    let split = product_split_from_qmd(stand.qmd_in);
    let group: &CalibrationGroup = &stand.calibration_group;

    [
        (EventType::FirstThin, years.first_thin),
        (EventType::SecondThin, years.second_thin),
        (EventType::Final, years.final_harvest),
    ]
    .into_iter()
    .map(|(event_type, year)| {
        let total = estimate_tons(stand.ba_sqft_ac, stand.acres, &event_type);
        let tons = split
            .allocate(total)
            .scaled(|p| calibration.factor(group, FactorName::ProductTons(p)));
        HarvestEvent {
            unit: stand.stand_id.clone(),
            event_type,
            year,
            tons,
        }
    })
    .collect()
}

/// Sums events sharing an (event type, year) into tract-level rows,
/// ordered by year and then event.
pub fn tract_totals(events: &[HarvestEvent]) -> Vec<HarvestEvent> {
    let mut totals: BTreeMap<(i32, EventType), ProductTons> = BTreeMap::new();
    for event in events {
        *totals
            .entry((event.year, event.event_type.clone()))
            .or_default() += event.tons;
    }

    totals
        .into_iter()
        .map(|((year, event_type), tons)| HarvestEvent {
            unit: TRACT_UNIT.to_string(),
            event_type,
            year,
            tons,
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Schedule {
    /// Per-stand rows. Empty for supplied schedules.
    pub detail: Vec<HarvestEvent>,
    /// The reported schedule.
    pub events: Vec<HarvestEvent>,
}

/// Derives a harvest schedule from stand summaries.
pub fn auto_schedule(
    stands: &[StandSummary],
    current_year: i32,
    calibration: &CalibrationFactorSet,
) -> Schedule {
    let detail: Vec<HarvestEvent> = stands
        .iter()
        .flat_map(|stand| stand_events(stand, current_year, calibration))
        .collect();
    for event in &detail {
        debug!(
            "Stand {} {} in {}: {:.1} t",
            event.unit,
            event.event_type,
            event.year,
            event.tons.total()
        );
    }

    let events = tract_totals(&detail);
    info!(
        "Auto-scheduled {} stand events into {} tract events",
        detail.len(),
        events.len()
    );
    Schedule { detail, events }
}

/// Uses a supplied schedule verbatim apart from the global product factors
/// (group `ALL` only; supplied rows carry no calibration group).
pub fn supplied_schedule(
    supplied: Vec<HarvestEvent>,
    calibration: &CalibrationFactorSet,
) -> Schedule {
    let events: Vec<HarvestEvent> = supplied
        .into_iter()
        .map(|mut event| {
            event.tons = event.tons.scaled(|p| {
                calibration.factor(&CalibrationGroup::All, FactorName::ProductTons(p))
            });
            event
        })
        .collect();
    info!("Using {} supplied harvest events", events.len());
    Schedule {
        detail: Vec::new(),
        events,
    }
}

/// Reads a supplied event table: `year` is required on every row,
/// `event`, `stand_id` and `<product>_t` columns are optional (missing tons are 0).
pub fn events_from_table(table: &Table) -> Result<Vec<HarvestEvent>> {
    let year_idx = table
        .column_index("year")
        .ok_or_else(|| CanopyError::MissingColumn("year".to_string()))?;
    let event_idx = table.column_index("event");
    let unit_idx = table.column_index("stand_id");
    let product_idx: Vec<(Product, Option<usize>)> = Product::ALL
        .iter()
        .map(|p| (*p, table.column_index(&p.tons_column())))
        .collect();

    let mut events = Vec::with_capacity(table.len());
    for row in 0..table.len() {
        let raw_year = table.get(row, year_idx);
        let year = raw_year
            .and_then(parse_number)
            .map(|y| y.trunc() as i32)
            .ok_or_else(|| CanopyError::InvalidEventRow {
                row: row + 1,
                details: format!("year '{}' is not a number", raw_year.unwrap_or_default()),
            })?;
        let (first_year, last_year) = SUPPLIED_YEAR_RANGE;
        if !(first_year..=last_year).contains(&year) {
            return Err(CanopyError::InvalidEventRow {
                row: row + 1,
                details: format!(
                    "year {} is outside {}-{}",
                    year, first_year, last_year
                ),
            });
        }

        let mut tons = ProductTons::default();
        for (product, idx) in &product_idx {
            if let Some(value) = idx.and_then(|i| table.get(row, i)) {
                *tons.get_mut(*product) =
                    parse_number(value).ok_or_else(|| CanopyError::InvalidEventRow {
                        row: row + 1,
                        details: format!("{} '{}' is not a number", product.tons_column(), value),
                    })?;
            }
        }

        events.push(HarvestEvent {
            unit: unit_idx
                .and_then(|i| table.get(row, i))
                .unwrap_or(TRACT_UNIT)
                .to_string(),
            event_type: event_idx
                .and_then(|i| table.get(row, i))
                .unwrap_or(UNLABELED_EVENT)
                .to_string()
                .into(),
            year,
            tons,
        });
    }
    Ok(events)
}
