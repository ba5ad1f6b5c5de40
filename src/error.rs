use thiserror::Error;

#[derive(Error, Debug)]
pub enum CanopyError {
    #[error("Missing required column: {0}")]
    MissingColumn(String),

    #[error("Missing stand_id column")]
    MissingStandIdColumn,

    #[error("{rows} row(s) have no stand_id value; every tree must belong to a stand")]
    MissingStandId { rows: usize },

    #[error("Need a positive {what} for {cruise_type} cruises (got {value})")]
    InvalidCruiseSize {
        cruise_type: String,
        what: &'static str,
        value: f64,
    },

    #[error("CruiseType must be Plot or Point (got '{0}')")]
    UnrecognizedCruiseType(String),

    #[error("Validation failed with {0} fatal error(s)")]
    ValidationFailed(usize),

    #[error("Invalid event row {row}: {details}")]
    InvalidEventRow { row: usize, details: String },

    #[error("Invalid import contract: {0}")]
    InvalidContract(String),

    #[error("CSV error: {0}")]
    CsvError(#[from] csv::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, CanopyError>;
