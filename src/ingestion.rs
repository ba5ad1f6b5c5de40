//! Reading pipeline inputs and writing artifacts.
//!
//! Two parsing policies apply. The import contract is strict: a contract that
//! cannot be read or parsed fails stage 1. Calibration factors and price sheets
//! are tolerant: [`load_tolerant`] substitutes the document's `Default` (empty
//! factors, zero prices) and hands back the reason so the caller can surface it
//! as a diagnostic.

use crate::aggregator::StandSummary;
use crate::error::{CanopyError, Result};
use crate::schema::ImportContract;
use log::warn;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::Path;

/// A document loaded under the tolerant policy.
#[derive(Debug, Clone, PartialEq)]
pub struct Tolerant<T> {
    pub document: T,
    /// Why the default was substituted, if it was.
    pub fallback_reason: Option<String>,
}

impl<T> Tolerant<T> {
    pub fn used_fallback(&self) -> bool {
        self.fallback_reason.is_some()
    }
}

pub fn parse_tolerant<T: DeserializeOwned + Default>(label: &str, text: &str) -> Tolerant<T> {
    match serde_json::from_str(text) {
        Ok(document) => Tolerant {
            document,
            fallback_reason: None,
        },
        Err(e) => {
            let reason = format!("{} is malformed ({}); using defaults", label, e);
            warn!("{}", reason);
            Tolerant {
                document: T::default(),
                fallback_reason: Some(reason),
            }
        }
    }
}

/// Loads an optional JSON document, falling back to `T::default()` when it is
/// absent, unreadable, or malformed. Absence alone is not reported.
pub fn load_tolerant<T: DeserializeOwned + Default>(label: &str, path: Option<&Path>) -> Tolerant<T> {
    let Some(path) = path else {
        return Tolerant {
            document: T::default(),
            fallback_reason: None,
        };
    };

    match std::fs::read_to_string(path) {
        Ok(text) => parse_tolerant(label, &text),
        Err(e) => {
            let reason = format!(
                "{} at {} could not be read ({}); using defaults",
                label,
                path.display(),
                e
            );
            warn!("{}", reason);
            Tolerant {
                document: T::default(),
                fallback_reason: Some(reason),
            }
        }
    }
}

pub fn load_contract(path: &Path) -> Result<ImportContract> {
    let text = std::fs::read_to_string(path)?;
    serde_json::from_str(&text)
        .map_err(|e| CanopyError::InvalidContract(format!("{}: {}", path.display(), e)))
}

pub fn read_records<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>> {
    let mut reader = csv::Reader::from_path(path)?;
    let mut records = Vec::new();
    for record in reader.deserialize() {
        records.push(record?);
    }
    Ok(records)
}

pub fn write_records<T: Serialize>(path: &Path, records: &[T]) -> Result<()> {
    let mut writer = csv::Writer::from_path(path)?;
    for record in records {
        writer.serialize(record)?;
    }
    writer.flush()?;
    Ok(())
}

pub fn read_stand_summaries(path: &Path) -> Result<Vec<StandSummary>> {
    read_records(path)
}

pub fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value)?;
    std::fs::write(path, json)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calibration::{CalibrationFactorSet, CalibrationGroup, FactorName};
    use crate::schema::PriceSheet;

    #[test]
    fn test_malformed_calibration_degrades_to_empty() {
        let loaded: Tolerant<CalibrationFactorSet> =
            parse_tolerant("calibration", r#"{"LP": {"ba_factor": "high"}}"#);
        assert!(loaded.used_fallback());
        assert!(loaded.document.is_empty());
        assert_eq!(
            loaded.document.factor(&CalibrationGroup::parse("LP"), FactorName::BasalArea),
            1.0
        );
    }

    #[test]
    fn test_malformed_prices_degrade_to_zero() {
        let loaded: Tolerant<PriceSheet> = parse_tolerant("prices", "not json");
        assert!(loaded.used_fallback());
        assert_eq!(loaded.document, PriceSheet::default());

        let ok: Tolerant<PriceSheet> = parse_tolerant("prices", r#"{"saw": 25}"#);
        assert!(!ok.used_fallback());
        assert_eq!(ok.document.saw, 25.0);
    }

    #[test]
    fn test_absent_document_is_silent_default() {
        let loaded: Tolerant<CalibrationFactorSet> = load_tolerant("calibration", None);
        assert!(!loaded.used_fallback());
        assert!(loaded.document.is_empty());

        let missing: Tolerant<PriceSheet> =
            load_tolerant("prices", Some(Path::new("/nonexistent/prices.json")));
        assert!(missing.used_fallback());
    }
}
