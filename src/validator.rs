use crate::schema::ImportContract;
use crate::table::Table;
use crate::utils::{canonical_date_text, compare_stand_ids};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

pub const STAND_ID_COLUMN: &str = "StandID";
pub const STAND_ACRES_COLUMN: &str = "StandAcres";
pub const DBH_COLUMN: &str = "DBH";
pub const TOP_DIB_COLUMN: &str = "TopDIB";
pub const DEFECT_COLUMN: &str = "Defect";
pub const CRUISE_TYPE_COLUMN: &str = "CruiseType";

const DBH_RANGE_IN: (f64, f64) = (1.0, 60.0);
const DEFECT_RANGE_PCT: (f64, f64) = (0.0, 100.0);
const RECOGNIZED_CRUISE_TYPES: [&str; 2] = ["Plot", "Point"];

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub rows: usize,
    pub columns: Vec<String>,
    /// Fatal findings. Any entry halts the run before aggregation.
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    pub stands_detected: Vec<String>,
}

impl ValidationReport {
    pub fn is_fatal(&self) -> bool {
        !self.errors.is_empty()
    }
}

/// Stage 1 output: the cleaned table in its original shape, the canonical
/// remapped table, and the findings.
#[derive(Debug, Clone)]
pub struct ValidationOutput {
    pub normalized: Table,
    pub canonical: Table,
    pub report: ValidationReport,
}

/// Normalizes, validates and remaps a raw tree table.
pub fn validate_table(raw: &Table, contract: &ImportContract) -> ValidationOutput {
    let normalized = normalize(raw, contract);
    let report = validate(&normalized, contract);
    let canonical = remap(&normalized, contract);

    info!(
        "Validated {} rows across {} stands: {} error(s), {} warning(s)",
        report.rows,
        report.stands_detected.len(),
        report.errors.len(),
        report.warnings.len()
    );
    for error in &report.errors {
        warn!("Validation error: {}", error);
    }
    for warning in &report.warnings {
        debug!("Validation warning: {}", warning);
    }

    ValidationOutput {
        normalized,
        canonical,
        report,
    }
}

pub fn normalize(raw: &Table, contract: &ImportContract) -> Table {
    let mut table = raw.clone();
    let flags = &contract.normalization;

    if flags.strip_whitespace {
        table.map_cells(|value| {
            let trimmed = value.trim();
            if trimmed.is_empty() {
                None
            } else {
                Some(trimmed.to_string())
            }
        });
    }

    if flags.upper_species_codes {
        table.map_column(&flags.species_column, |value| Some(value.to_uppercase()));
    }

    if table.has_column(&flags.date_column) {
        let mut unparsable = 0usize;
        table.map_column(&flags.date_column, |value| {
            let parsed = canonical_date_text(value);
            if parsed.is_none() {
                unparsable += 1;
            }
            parsed
        });
        if unparsable > 0 {
            debug!(
                "{} {} value(s) could not be parsed and are now missing",
                unparsable, flags.date_column
            );
        }
    }

    table
}

pub fn validate(table: &Table, contract: &ImportContract) -> ValidationReport {
    let mut errors = Vec::new();
    let mut warnings = Vec::new();

    for required in &contract.required_columns {
        if !table.has_column(required) {
            errors.push(format!("Missing required column: {}", required));
        }
    }

    for column in [STAND_ACRES_COLUMN, DBH_COLUMN, TOP_DIB_COLUMN, DEFECT_COLUMN] {
        let bad = table.non_numeric_count(column);
        if bad > 0 {
            warnings.push(format!(
                "{} has {} non-numeric value(s); they are treated as missing",
                column, bad
            ));
        }
    }

    if let Some(acres) = table.numeric_column(STAND_ACRES_COLUMN) {
        let bad = acres.iter().flatten().filter(|&&a| a <= 0.0).count();
        if bad > 0 {
            errors.push(format!("StandAcres must be > 0 ({} row(s) violate)", bad));
        }
    }

    let dbh = table.numeric_column(DBH_COLUMN);
    if let Some(dbh) = &dbh {
        let (lo, hi) = DBH_RANGE_IN;
        let bad = dbh.iter().flatten().filter(|&&d| d < lo || d > hi).count();
        if bad > 0 {
            warnings.push(format!(
                "Some DBH values are outside {}–{} inches ({} row(s))",
                lo, hi, bad
            ));
        }
    }

    if let (Some(dbh), Some(top)) = (&dbh, table.numeric_column(TOP_DIB_COLUMN)) {
        let bad = dbh
            .iter()
            .zip(top.iter())
            .filter(|(d, t)| matches!((d, t), (Some(d), Some(t)) if t > d))
            .count();
        if bad > 0 {
            warnings.push(format!("Some TopDIB > DBH rows found ({} row(s))", bad));
        }
    }

    if let Some(defect) = table.numeric_column(DEFECT_COLUMN) {
        let (lo, hi) = DEFECT_RANGE_PCT;
        let bad = defect.iter().flatten().filter(|&&d| d < lo || d > hi).count();
        if bad > 0 {
            warnings.push(format!(
                "Some Defect values outside {}–{}% ({} row(s))",
                lo, hi, bad
            ));
        }
    }

    if let Some(cruise_types) = table.column(CRUISE_TYPE_COLUMN) {
        let bad = cruise_types
            .filter(|c| !matches!(c, Some(v) if RECOGNIZED_CRUISE_TYPES.contains(v)))
            .count();
        if bad > 0 {
            warnings.push(format!(
                "CruiseType contains values other than 'Plot' or 'Point' ({} row(s))",
                bad
            ));
        }
    }

    ValidationReport {
        rows: table.len(),
        columns: table.columns().to_vec(),
        errors,
        warnings,
        stands_detected: detect_stands(table),
    }
}

fn detect_stands(table: &Table) -> Vec<String> {
    let Some(ids) = table.column(STAND_ID_COLUMN) else {
        return Vec::new();
    };
    let distinct: BTreeSet<&str> = ids.flatten().collect();
    let mut stands: Vec<String> = distinct.into_iter().map(str::to_string).collect();
    stands.sort_by(|a, b| compare_stand_ids(a, b));
    stands
}

/// Projects the normalized table onto canonical column names.
/// A mapped source column that does not exist yields an all-missing column.
pub fn remap(table: &Table, contract: &ImportContract) -> Table {
    let mapping: Vec<(&String, Option<usize>)> = contract
        .mapping_to_canopy
        .iter()
        .map(|(dst, src)| (dst, table.column_index(src)))
        .collect();

    for (dst, src_idx) in &mapping {
        if src_idx.is_none() {
            debug!("Canonical column '{}' has no source column; filled with missing", dst);
        }
    }

    let mut canonical = Table::new(mapping.iter().map(|(dst, _)| (*dst).clone()).collect());
    for row in table.rows() {
        canonical.push_row(
            mapping
                .iter()
                .map(|(_, src_idx)| src_idx.and_then(|i| row[i].clone()))
                .collect(),
        );
    }
    canonical
}
