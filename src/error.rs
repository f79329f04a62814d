use thiserror::Error;

#[derive(Error, Debug)]
pub enum KpiError {
    #[error("Duplicate period '{0}': every configured period must be unique")]
    DuplicatePeriod(String),

    #[error("Invalid month {0}: must be between 1 and 12")]
    InvalidMonth(u32),

    #[error("Invalid quarter {0}: must be between 1 and 4")]
    InvalidQuarter(u8),

    #[error("Invalid half-year {0}: must be 1 or 2")]
    InvalidHalfYear(u8),

    #[error("Custom range '{id}' is invalid: {details}")]
    InvalidCustomRange { id: String, details: String },

    #[error("Unrecognised period label: {0}")]
    UnknownPeriodLabel(String),

    #[error("Unrecognised period type: {0}")]
    UnknownPeriodType(String),

    #[error("Base period index {index} is out of range for {len} configured periods")]
    BasePeriodOutOfRange { index: usize, len: usize },

    #[error("Record '{name}' has {actual} values but {expected} periods are configured")]
    MisalignedRecord {
        name: String,
        expected: usize,
        actual: usize,
    },

    #[error("Invalid threshold {name} = {value}: {details}")]
    InvalidThreshold {
        name: String,
        value: f64,
        details: String,
    },

    #[error("Unknown ledger row {0}")]
    UnknownRow(usize),

    #[error("Row {0} is a ratio row and cannot be projected as a run rate")]
    NotAFlowRow(usize),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, KpiError>;
