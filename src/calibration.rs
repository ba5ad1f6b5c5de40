//! Calibration factors.
//!
//! A calibration document maps a group key to a set of named multipliers:
//!
//! ```json
//! { "ALL": { "ba_factor": 1.02 }, "LP": { "ba_factor": 1.1, "saw_factor": 0.9 } }
//! ```
//!
//! Group keys are an enumerated space: [`CalibrationGroup::All`] is the reserved
//! universal fallback (serialized as [`ALL_GROUP_KEY`]) and every other key is a
//! [`CalibrationGroup::Named`] group, typically a species code. A lookup tries
//! the exact group, then `ALL`, then settles on 1.0, so resolution always
//! terminates with a finite multiplier.

use crate::schema::Product;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Reserved key of the universal fallback group.
pub const ALL_GROUP_KEY: &str = "ALL";

/// Multiplier used when neither the group nor `ALL` defines a factor.
pub const NEUTRAL_FACTOR: f64 = 1.0;

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum CalibrationGroup {
    All,
    Named(String),
}

impl CalibrationGroup {
    pub fn parse(key: &str) -> Self {
        if key == ALL_GROUP_KEY {
            CalibrationGroup::All
        } else {
            CalibrationGroup::Named(key.to_string())
        }
    }

    pub fn key(&self) -> &str {
        match self {
            CalibrationGroup::All => ALL_GROUP_KEY,
            CalibrationGroup::Named(name) => name,
        }
    }
}

impl fmt::Display for CalibrationGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

impl Serialize for CalibrationGroup {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.key())
    }
}

impl<'de> Deserialize<'de> for CalibrationGroup {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let key = String::deserialize(deserializer)?;
        Ok(CalibrationGroup::parse(&key))
    }
}

/// Names of the multipliers the pipeline looks up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FactorName {
    BasalArea,
    Qmd,
    Tpa,
    ProductTons(Product),
}

impl FactorName {
    pub fn key(&self) -> String {
        match self {
            FactorName::BasalArea => "ba_factor".to_string(),
            FactorName::Qmd => "qmd_factor".to_string(),
            FactorName::Tpa => "tpa_factor".to_string(),
            FactorName::ProductTons(product) => format!("{}_factor", product.as_str()),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct CalibrationFactorSet {
    groups: BTreeMap<String, BTreeMap<String, f64>>,
}

impl CalibrationFactorSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    pub fn with_factor(mut self, group: &CalibrationGroup, name: FactorName, value: f64) -> Self {
        self.insert(group, name, value);
        self
    }

    pub fn insert(&mut self, group: &CalibrationGroup, name: FactorName, value: f64) {
        self.groups
            .entry(group.key().to_string())
            .or_default()
            .insert(name.key(), value);
    }

    /// Resolves a factor: exact group, then `ALL`, then 1.0.
    pub fn factor(&self, group: &CalibrationGroup, name: FactorName) -> f64 {
        self.factor_by_key(group.key(), &name.key())
    }

    /// Raw-key variant of [`factor`](Self::factor) for documents with custom factor names.
    pub fn factor_by_key(&self, group: &str, name: &str) -> f64 {
        self.lookup(group, name)
            .or_else(|| self.lookup(ALL_GROUP_KEY, name))
            .unwrap_or(NEUTRAL_FACTOR)
    }

    fn lookup(&self, group: &str, name: &str) -> Option<f64> {
        self.groups
            .get(group)
            .and_then(|factors| factors.get(name))
            .copied()
            .filter(|v| v.is_finite())
    }

    pub fn generate_json_schema() -> schemars::schema::RootSchema {
        schemars::schema_for!(CalibrationFactorSet)
    }
}
