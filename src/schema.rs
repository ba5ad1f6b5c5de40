use indexmap::IndexMap;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Timber products a harvest is sold into.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, JsonSchema,
)]
#[serde(rename_all = "snake_case")]
pub enum Product {
    #[schemars(description = "Pulpwood, the smallest merchantable product")]
    Pulp,

    #[schemars(description = "Chip-n-saw, small sawtimber")]
    Cns,

    #[schemars(description = "Sawtimber")]
    Saw,

    #[schemars(description = "Export-grade logs")]
    Export,
}

impl Product {
    pub const ALL: [Product; 4] = [Product::Pulp, Product::Cns, Product::Saw, Product::Export];

    pub fn as_str(&self) -> &'static str {
        match self {
            Product::Pulp => "pulp",
            Product::Cns => "cns",
            Product::Saw => "saw",
            Product::Export => "export",
        }
    }

    /// Column name used for this product's tons in event tables (e.g. `pulp_t`).
    pub fn tons_column(&self) -> String {
        format!("{}_t", self.as_str())
    }
}

impl fmt::Display for Product {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, JsonSchema)]
pub struct NormalizationFlags {
    #[serde(default)]
    #[schemars(description = "Trim leading/trailing whitespace from every text cell")]
    pub strip_whitespace: bool,

    #[serde(default)]
    #[schemars(description = "Uppercase the species code column")]
    pub upper_species_codes: bool,

    #[serde(default = "default_species_column")]
    #[schemars(description = "Source column holding species codes (default 'Species')")]
    pub species_column: String,

    #[serde(default = "default_date_column")]
    #[schemars(description = "Source column holding the cruise date (default 'CruiseDate')")]
    pub date_column: String,
}

impl Default for NormalizationFlags {
    fn default() -> Self {
        Self {
            strip_whitespace: false,
            upper_species_codes: false,
            species_column: default_species_column(),
            date_column: default_date_column(),
        }
    }
}

fn default_species_column() -> String {
    "Species".to_string()
}

fn default_date_column() -> String {
    "CruiseDate".to_string()
}

/// Describes what a raw TreeSum table must contain and how it maps onto the
/// canonical tree-level layout.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, JsonSchema)]
pub struct ImportContract {
    #[schemars(description = "Columns that must be present in the raw table. Each absence is a fatal error.")]
    pub required_columns: Vec<String>,

    #[serde(default)]
    #[schemars(description = "Cleaning applied before validation")]
    pub normalization: NormalizationFlags,

    #[serde(default)]
    #[schemars(
        description = "Canonical column name -> source column name, in canonical column order. Source columns absent from the raw table become missing values."
    )]
    pub mapping_to_canopy: IndexMap<String, String>,
}

impl ImportContract {
    /// The contract bundled for FAC-style TreeSum exports.
    pub fn default_treesum() -> Self {
        let required_columns = [
            "TractName",
            "StandID",
            "StandAcres",
            "CruiseDate",
            "CruiseType",
            "Size_BAF",
            "PlotNum",
            "PlotID",
            "Species",
            "DBH",
            "MerchHt",
            "TopDIB",
            "TreeClass",
        ]
        .iter()
        .map(|c| c.to_string())
        .collect();

        let mapping_to_canopy = [
            ("tract_name", "TractName"),
            ("stand_id", "StandID"),
            ("acres", "StandAcres"),
            ("cruise_date", "CruiseDate"),
            ("cruise_type", "CruiseType"),
            ("size_baf", "Size_BAF"),
            ("plot_num", "PlotNum"),
            ("plot_id", "PlotID"),
            ("species_code", "Species"),
            ("dbh_in", "DBH"),
            ("merch_ht_ft", "MerchHt"),
            ("top_dib_in", "TopDIB"),
            ("tree_class", "TreeClass"),
            ("defect_pct", "Defect"),
            ("age", "Age"),
        ]
        .iter()
        .map(|(dst, src)| (dst.to_string(), src.to_string()))
        .collect();

        Self {
            required_columns,
            normalization: NormalizationFlags {
                strip_whitespace: true,
                upper_species_codes: true,
                ..NormalizationFlags::default()
            },
            mapping_to_canopy,
        }
    }

    pub fn generate_json_schema() -> schemars::schema::RootSchema {
        schemars::schema_for!(ImportContract)
    }
}

/// Unit prices and harvest costs. Every field defaults to zero.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, JsonSchema)]
#[serde(default)]
pub struct PriceSheet {
    #[schemars(description = "Stumpage price per ton of pulpwood")]
    pub pulp: f64,
    #[schemars(description = "Stumpage price per ton of chip-n-saw")]
    pub cns: f64,
    #[schemars(description = "Stumpage price per ton of sawtimber")]
    pub saw: f64,
    #[schemars(description = "Stumpage price per ton of export logs")]
    pub export: f64,

    pub logging_cost_per_ton_pulp: f64,
    pub logging_cost_per_ton_cns: f64,
    pub logging_cost_per_ton_saw: f64,
    pub logging_cost_per_ton_export: f64,

    #[schemars(description = "Flat trucking cost applied to every ton regardless of product")]
    pub trucking_rate_per_ton: f64,

    #[schemars(description = "Consulting fee as a percentage of gross revenue (5 = 5%)")]
    pub consulting_fee_pct: f64,
}

impl PriceSheet {
    pub fn unit_price(&self, product: Product) -> f64 {
        match product {
            Product::Pulp => self.pulp,
            Product::Cns => self.cns,
            Product::Saw => self.saw,
            Product::Export => self.export,
        }
    }

    pub fn logging_cost_per_ton(&self, product: Product) -> f64 {
        match product {
            Product::Pulp => self.logging_cost_per_ton_pulp,
            Product::Cns => self.logging_cost_per_ton_cns,
            Product::Saw => self.logging_cost_per_ton_saw,
            Product::Export => self.logging_cost_per_ton_export,
        }
    }

    pub fn generate_json_schema() -> schemars::schema::RootSchema {
        schemars::schema_for!(PriceSheet)
    }
}

/// Everything needed to run all three stages for one job.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct RunConfig {
    #[schemars(description = "Raw TreeSum CSV")]
    pub tree_table: PathBuf,

    #[serde(default)]
    #[schemars(description = "Import contract JSON. The bundled TreeSum contract is used when absent.")]
    pub contract: Option<PathBuf>,

    #[schemars(description = "Price sheet JSON")]
    pub prices: PathBuf,

    #[schemars(description = "Prefix for every output artifact, e.g. 'out/job42'")]
    pub output_prefix: String,

    #[schemars(description = "'Plot' or 'Point'")]
    pub cruise_type: String,

    #[schemars(description = "Plot size in acres for Plot cruises, BAF for Point cruises")]
    pub size_value: f64,

    #[serde(default = "default_discount_pct")]
    #[schemars(description = "Discount rate in percent (5 = 5%)")]
    pub discount_rate_pct: f64,

    #[serde(default = "default_owner")]
    pub owner_name: String,

    #[serde(default = "default_tract")]
    pub tract_name: String,

    #[serde(default)]
    #[schemars(description = "Calibration factor JSON")]
    pub calibration: Option<PathBuf>,

    #[serde(default)]
    #[schemars(description = "Canonical column used to pick each stand's calibration group")]
    pub group_column: Option<String>,

    #[serde(default)]
    #[schemars(description = "Externally supplied harvest events CSV; disables auto-scheduling")]
    pub events: Option<PathBuf>,

    #[serde(default)]
    #[schemars(description = "Overrides the current calendar year used for scheduling and discounting")]
    pub current_year: Option<i32>,
}

fn default_discount_pct() -> f64 {
    5.0
}

fn default_owner() -> String {
    "Owner".to_string()
}

fn default_tract() -> String {
    "Tract".to_string()
}

impl RunConfig {
    pub fn generate_json_schema() -> schemars::schema::RootSchema {
        schemars::schema_for!(RunConfig)
    }

    /// Replaces the configured current year when an override is given.
    pub fn with_current_year(mut self, year: Option<i32>) -> Self {
        if year.is_some() {
            self.current_year = year;
        }
        self
    }

    pub fn schema_as_json() -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(&Self::generate_json_schema())
    }
}
