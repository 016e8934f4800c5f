//! Error taxonomy for a single ingestion run.
//!
//! - [`FetchError`] - object store unreachable, object missing or unreadable
//! - [`ParseError`] - malformed CSV or a non-numeric value in a required column
//! - [`WarehouseError`] - anything the warehouse client reports
//! - [`PipelineError`] - which step of the run failed, wrapping the above

use thiserror::Error;

/// Top-level error for one run of the pipeline.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("fetch failed: {0}")]
    Fetch(#[from] FetchError),

    #[error("parse failed: {0}")]
    Parse(#[from] ParseError),

    #[error("log write failed: {0}")]
    LogWrite(#[source] WarehouseError),

    #[error("result write failed: {0}")]
    ResultWrite(#[source] WarehouseError),
}

/// Object store errors.
#[derive(Error, Debug)]
pub enum FetchError {
    #[error("object gs://{bucket}/{name} not found")]
    NotFound { bucket: String, name: String },

    #[error("reading gs://{bucket}/{name}: {message}")]
    Io {
        bucket: String,
        name: String,
        message: String,
    },

    #[error("object gs://{bucket}/{name} is not valid UTF-8 text")]
    Decode { bucket: String, name: String },
}

/// CSV parsing and numeric coercion errors. Any of these aborts the whole file.
#[derive(Error, Debug)]
pub enum ParseError {
    #[error("malformed CSV at line {line}: {source}")]
    Csv {
        line: u64,
        #[source]
        source: csv::Error,
    },

    #[error("line {line} has {found} fields, at least {required} required")]
    MissingColumns {
        line: u64,
        found: usize,
        required: usize,
    },

    #[error("line {line}: column {column} ({name}) is not numeric: {value:?}")]
    NotNumeric {
        line: u64,
        column: usize,
        name: &'static str,
        value: String,
    },
}

/// Warehouse client errors.
#[derive(Error, Debug)]
pub enum WarehouseError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("warehouse API returned {status}: {message}")]
    Api { status: u16, message: String },

    #[error("{count} row(s) rejected by {table}: {first}")]
    InsertRejected {
        table: String,
        count: usize,
        first: String,
    },

    #[error("load job {job_id} failed: {message}")]
    Job { job_id: String, message: String },

    #[error("load job {job_id} did not complete within {seconds}s")]
    Timeout { job_id: String, seconds: u64 },

    #[error("could not obtain access token: {0}")]
    Auth(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Arrow error: {0}")]
    Arrow(#[from] arrow::error::ArrowError),

    #[error("Parquet error: {0}")]
    Parquet(#[from] parquet::errors::ParquetError),
}

pub type Result<T, E = PipelineError> = std::result::Result<T, E>;
