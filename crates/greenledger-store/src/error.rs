use greenledger_core::{ReportingPeriod, RequirementId};
use thiserror::Error;

/// Failures of a single non-blocking ledger operation.
#[derive(Debug, Error, PartialEq)]
pub enum LedgerError {
    /// Another commit holds the shard for this key.
    #[error("ledger key ({requirement}, {period}) is locked by a concurrent commit")]
    Conflict {
        requirement: RequirementId,
        period: ReportingPeriod,
    },
}

/// Persistence and conversion failures.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("missing or mistyped column: {0}")]
    Schema(String),

    #[error("invalid value in column {column}: {value}")]
    InvalidValue { column: &'static str, value: String },

    #[error("no results for query")]
    NoResults,

    #[cfg(feature = "duckdb")]
    #[error("duckdb error: {0}")]
    DuckDb(#[from] ::duckdb::Error),

    #[cfg(feature = "duckdb")]
    #[error("parquet error: {0}")]
    Parquet(#[from] parquet::errors::ParquetError),

    #[error("arrow error: {0}")]
    Arrow(#[from] arrow::error::ArrowError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
