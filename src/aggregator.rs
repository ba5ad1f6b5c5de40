use crate::calibration::{CalibrationFactorSet, CalibrationGroup, FactorName};
use crate::error::{CanopyError, Result};
use crate::table::Table;
use crate::utils::{compare_stand_ids, parse_number};
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::f64::consts::PI;
use std::fmt;
use std::str::FromStr;

pub const STAND_ID: &str = "stand_id";
pub const DBH_IN: &str = "dbh_in";
pub const ACRES: &str = "acres";
pub const AGE: &str = "age";

/// Basal area in square feet of a tree with a 1 inch diameter (pi / 576).
pub const FOREST_FACTOR: f64 = 0.005454;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CruiseType {
    /// Fixed-area plots; the size value is the plot area in acres.
    Plot,
    /// Variable-radius points; the size value is the basal area factor.
    Point,
}

impl FromStr for CruiseType {
    type Err = CanopyError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "Plot" => Ok(CruiseType::Plot),
            "Point" => Ok(CruiseType::Point),
            other => Err(CanopyError::UnrecognizedCruiseType(other.to_string())),
        }
    }
}

impl fmt::Display for CruiseType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CruiseType::Plot => f.write_str("Plot"),
            CruiseType::Point => f.write_str("Point"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CruiseConfig {
    pub cruise_type: CruiseType,
    /// Plot size (acres) or BAF, depending on `cruise_type`.
    pub size_value: f64,
}

impl CruiseConfig {
    pub fn new(cruise_type: CruiseType, size_value: f64) -> Self {
        Self {
            cruise_type,
            size_value,
        }
    }

    /// Parses the cruise type from text, as supplied by an invoker.
    pub fn parse(cruise_type: &str, size_value: f64) -> Result<Self> {
        Ok(Self::new(cruise_type.parse()?, size_value))
    }

    fn checked_size(&self) -> Result<f64> {
        if self.size_value.is_finite() && self.size_value > 0.0 {
            return Ok(self.size_value);
        }
        Err(CanopyError::InvalidCruiseSize {
            cruise_type: self.cruise_type.to_string(),
            what: match self.cruise_type {
                CruiseType::Plot => "plot size (acres)",
                CruiseType::Point => "BAF",
            },
            value: self.size_value,
        })
    }
}

#[derive(Debug, Clone, Default)]
pub struct AggregationOptions {
    pub calibration: CalibrationFactorSet,
    /// Canonical column whose value selects a stand's calibration group.
    pub group_column: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StandSummary {
    pub stand_id: String,
    #[serde(default)]
    pub acres: Option<f64>,
    #[serde(default)]
    pub trees_observed: usize,
    #[serde(default)]
    pub tpa_live: Option<f64>,
    #[serde(default)]
    pub ba_sqft_ac: Option<f64>,
    #[serde(default)]
    pub qmd_in: Option<f64>,
    #[serde(default = "default_group")]
    pub calibration_group: CalibrationGroup,
    #[serde(default)]
    pub age: Option<f64>,
}

fn default_group() -> CalibrationGroup {
    CalibrationGroup::All
}

/// Raw, uncalibrated stand metrics.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StandMetrics {
    pub tpa_live: f64,
    pub ba_sqft_ac: f64,
    pub qmd_in: Option<f64>,
}

/// Computes expansion math for one stand's diameters.
/// Missing diameters count as observed trees but add nothing to the sums.
pub fn stand_metrics(dbh_in: &[Option<f64>], cruise: &CruiseConfig) -> Result<StandMetrics> {
    let size = cruise.checked_size()?;
    let trees_observed = dbh_in.len();
    let diameters = dbh_in.iter().flatten();

    let (tpa_live, ba_sqft_ac) = match cruise.cruise_type {
        CruiseType::Plot => {
            let expansion_factor = 1.0 / size;
            let tpa = trees_observed as f64 * expansion_factor;
            let ba: f64 = diameters.map(|d| PI * d * d / 144.0).sum::<f64>() * expansion_factor;
            (tpa, ba)
        }
        CruiseType::Point => {
            // Each tallied tree stands for BAF / (its own basal area) trees per acre.
            let tpa: f64 = diameters
                .filter(|&&d| d > 0.0)
                .map(|d| size / (FOREST_FACTOR * d * d))
                .sum();
            (tpa, size * trees_observed as f64)
        }
    };

    Ok(StandMetrics {
        tpa_live,
        ba_sqft_ac,
        qmd_in: quadratic_mean_diameter(ba_sqft_ac, trees_observed),
    })
}

/// QMD from basal area per acre and the observed tree count.
pub fn quadratic_mean_diameter(ba_sqft_ac: f64, trees_observed: usize) -> Option<f64> {
    if trees_observed == 0 {
        return None;
    }
    Some((ba_sqft_ac * 144.0 / (FOREST_FACTOR * trees_observed as f64)).sqrt())
}

/// Groups canonical tree rows by stand and computes calibrated per-stand metrics.
/// Output is ordered by stand id.
pub fn aggregate(
    canonical: &Table,
    cruise: &CruiseConfig,
    options: &AggregationOptions,
) -> Result<Vec<StandSummary>> {
    let stand_idx = canonical
        .column_index(STAND_ID)
        .ok_or(CanopyError::MissingStandIdColumn)?;
    let dbh_idx = canonical
        .column_index(DBH_IN)
        .ok_or_else(|| CanopyError::MissingColumn(DBH_IN.to_string()))?;
    cruise.checked_size()?;

    let acres_idx = canonical.column_index(ACRES);
    let age_idx = canonical.column_index(AGE);
    let group_idx = options
        .group_column
        .as_deref()
        .and_then(|name| canonical.column_index(name));

    let unassigned = canonical
        .rows()
        .iter()
        .filter(|row| row[stand_idx].is_none())
        .count();
    if unassigned > 0 {
        return Err(CanopyError::MissingStandId { rows: unassigned });
    }

    let mut positions: HashMap<&str, usize> = HashMap::new();
    let mut stand_ids: Vec<&str> = Vec::new();
    let mut groups: Vec<Vec<usize>> = Vec::new();
    for (row_idx, row) in canonical.rows().iter().enumerate() {
        let sid = row[stand_idx].as_deref().unwrap_or_default();
        let pos = *positions.entry(sid).or_insert_with(|| {
            stand_ids.push(sid);
            groups.push(Vec::new());
            stand_ids.len() - 1
        });
        groups[pos].push(row_idx);
    }

    let mut order: Vec<usize> = (0..stand_ids.len()).collect();
    order.sort_by(|&a, &b| compare_stand_ids(stand_ids[a], stand_ids[b]));

    let mut summaries = Vec::with_capacity(order.len());
    for pos in order {
        let rows = &groups[pos];
        let stand_id = stand_ids[pos];

        let dbh: Vec<Option<f64>> = rows
            .iter()
            .map(|&r| canonical.get(r, dbh_idx).and_then(parse_number))
            .collect();
        let metrics = stand_metrics(&dbh, cruise)?;

        let calibration_group = first_present(canonical, rows, group_idx)
            .map(CalibrationGroup::parse)
            .unwrap_or(CalibrationGroup::All);

        let factors = &options.calibration;
        let summary = StandSummary {
            stand_id: stand_id.to_string(),
            acres: first_present(canonical, rows, acres_idx).and_then(parse_number),
            trees_observed: rows.len(),
            tpa_live: Some(metrics.tpa_live * factors.factor(&calibration_group, FactorName::Tpa)),
            ba_sqft_ac: Some(
                metrics.ba_sqft_ac * factors.factor(&calibration_group, FactorName::BasalArea),
            ),
            qmd_in: metrics
                .qmd_in
                .map(|q| q * factors.factor(&calibration_group, FactorName::Qmd)),
            calibration_group,
            age: first_present(canonical, rows, age_idx).and_then(parse_number),
        };

        debug!(
            "Stand {}: {} trees, TPA {:.1}, BA {:.1}, QMD {:.2}, group {}",
            summary.stand_id,
            summary.trees_observed,
            summary.tpa_live.unwrap_or(f64::NAN),
            summary.ba_sqft_ac.unwrap_or(f64::NAN),
            summary.qmd_in.unwrap_or(f64::NAN),
            summary.calibration_group
        );
        summaries.push(summary);
    }

    info!(
        "Aggregated {} tree rows into {} stands ({} cruise, size {})",
        canonical.len(),
        summaries.len(),
        cruise.cruise_type,
        cruise.size_value
    );

    Ok(summaries)
}

fn first_present<'a>(table: &'a Table, rows: &[usize], col: Option<usize>) -> Option<&'a str> {
    let col = col?;
    rows.iter().find_map(|&r| table.get(r, col))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn canonical(rows: &[&[&str]]) -> Table {
        Table::from_rows(&["stand_id", "acres", "dbh_in", "species_code"], rows)
    }

    #[test]
    fn test_plot_expansion() {
        const TREE: &[&str] = &["1", "20", "10", "LP"];
        let table = canonical(&[TREE; 10]);
        let cruise = CruiseConfig::new(CruiseType::Plot, 0.1);

        let stands = aggregate(&table, &cruise, &AggregationOptions::default()).unwrap();
        assert_eq!(stands.len(), 1);
        let stand = &stands[0];
        assert_eq!(stand.trees_observed, 10);
        assert!((stand.tpa_live.unwrap() - 100.0).abs() < 1e-9);
        assert!((stand.ba_sqft_ac.unwrap() - 218.166).abs() < 0.001);
        assert_eq!(stand.acres, Some(20.0));
        assert_eq!(stand.calibration_group, CalibrationGroup::All);
    }

    #[test]
    fn test_point_expansion() {
        let table = canonical(&[&["1", "5", "10", "LP"]]);
        let cruise = CruiseConfig::new(CruiseType::Point, 10.0);

        let stands = aggregate(&table, &cruise, &AggregationOptions::default()).unwrap();
        let stand = &stands[0];
        assert!((stand.tpa_live.unwrap() - 18.335).abs() < 0.01);
        assert_eq!(stand.ba_sqft_ac, Some(10.0));
    }

    #[test]
    fn test_qmd_recomputes_from_uncalibrated_outputs() {
        let table = canonical(&[
            &["1", "5", "8", "LP"],
            &["1", "5", "12", "LP"],
            &["1", "5", "14.5", "LP"],
        ]);
        for cruise in [
            CruiseConfig::new(CruiseType::Plot, 0.2),
            CruiseConfig::new(CruiseType::Point, 10.0),
        ] {
            let stand = &aggregate(&table, &cruise, &AggregationOptions::default()).unwrap()[0];
            let again =
                quadratic_mean_diameter(stand.ba_sqft_ac.unwrap(), stand.trees_observed).unwrap();
            assert!((again - stand.qmd_in.unwrap()).abs() < 1e-9);
        }
    }

    #[test]
    fn test_calibration_applied_per_group() {
        let table = canonical(&[&["1", "5", "10", "LP"], &["2", "5", "10", "SP"]]);
        let cruise = CruiseConfig::new(CruiseType::Point, 10.0);
        let options = AggregationOptions {
            calibration: CalibrationFactorSet::new()
                .with_factor(&CalibrationGroup::parse("LP"), FactorName::BasalArea, 1.1)
                .with_factor(&CalibrationGroup::All, FactorName::Qmd, 2.0),
            group_column: Some("species_code".to_string()),
        };

        let plain = aggregate(&table, &cruise, &AggregationOptions::default()).unwrap();
        let stands = aggregate(&table, &cruise, &options).unwrap();

        assert_eq!(stands[0].calibration_group, CalibrationGroup::parse("LP"));
        assert!((stands[0].ba_sqft_ac.unwrap() - 11.0).abs() < 1e-9);
        assert_eq!(stands[1].ba_sqft_ac, Some(10.0));
        assert!((stands[1].qmd_in.unwrap() - 2.0 * plain[1].qmd_in.unwrap()).abs() < 1e-9);
        assert_eq!(stands[0].tpa_live, plain[0].tpa_live);
    }

    #[test]
    fn test_stands_sorted_and_partitioned() {
        let table = canonical(&[
            &["10", "5", "10", ""],
            &["2", "5", "10", ""],
            &["10", "5", "10", ""],
            &["1", "5", "10", ""],
        ]);
        let cruise = CruiseConfig::new(CruiseType::Plot, 0.1);
        let stands = aggregate(&table, &cruise, &AggregationOptions::default()).unwrap();

        let ids: Vec<&str> = stands.iter().map(|s| s.stand_id.as_str()).collect();
        assert_eq!(ids, vec!["1", "2", "10"]);
        let total: usize = stands.iter().map(|s| s.trees_observed).sum();
        assert_eq!(total, table.len());
    }

    #[test]
    fn test_fatal_conditions() {
        let table = canonical(&[&["1", "5", "10", "LP"]]);
        let defaults = AggregationOptions::default();

        let no_stand = Table::from_rows(&["dbh_in"], &[&["10"]]);
        assert!(matches!(
            aggregate(&no_stand, &CruiseConfig::new(CruiseType::Plot, 0.1), &defaults),
            Err(CanopyError::MissingStandIdColumn)
        ));
        assert!(matches!(
            aggregate(&table, &CruiseConfig::new(CruiseType::Plot, 0.0), &defaults),
            Err(CanopyError::InvalidCruiseSize { .. })
        ));
        assert!(matches!(
            aggregate(&table, &CruiseConfig::new(CruiseType::Point, -10.0), &defaults),
            Err(CanopyError::InvalidCruiseSize { .. })
        ));
        assert!(matches!(
            CruiseConfig::parse("Strip", 0.1),
            Err(CanopyError::UnrecognizedCruiseType(_))
        ));

        let orphan = canonical(&[&["", "5", "10", "LP"]]);
        assert!(matches!(
            aggregate(&orphan, &CruiseConfig::new(CruiseType::Plot, 0.1), &defaults),
            Err(CanopyError::MissingStandId { rows: 1 })
        ));
    }
}
