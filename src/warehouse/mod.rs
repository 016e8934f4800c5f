//! Data warehouse access plus the two writers built on it:
//! [`log::write_log`] appends one processing-log row per run and
//! [`results::write_results`] bulk-loads the per-customer aggregate.

use arrow::record_batch::RecordBatch;
use async_trait::async_trait;
use chrono::Utc;
use parquet::{arrow::ArrowWriter, basic::Compression, file::properties::WriterProperties};
use std::{io::Write, time::Duration};
use tokio::time::Instant;
use tracing::debug;

use crate::{config::TableRef, error::WarehouseError};

pub mod bigquery;
pub mod local;
pub mod log;
pub mod results;

pub use bigquery::BigQueryWarehouse;
pub use local::LocalWarehouse;

/// A row the warehouse refused during a streaming insert.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InsertError {
    /// Position of the row in the submitted batch.
    pub index: usize,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    Append,
}

impl WriteMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            WriteMode::Append => "WRITE_APPEND",
        }
    }
}

/// Schema changes a load job may apply to its destination table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchemaUpdate {
    AllowFieldAddition,
}

impl SchemaUpdate {
    pub fn as_str(&self) -> &'static str {
        match self {
            SchemaUpdate::AllowFieldAddition => "ALLOW_FIELD_ADDITION",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadOptions {
    pub write_mode: WriteMode,
    pub schema_updates: Vec<SchemaUpdate>,
}

impl LoadOptions {
    /// Append-only load that tolerates new columns on the destination.
    pub fn append_allow_field_addition() -> Self {
        Self {
            write_mode: WriteMode::Append,
            schema_updates: vec![SchemaUpdate::AllowFieldAddition],
        }
    }
}

/// Handle on a submitted load job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadJob {
    pub project_id: String,
    pub job_id: String,
    pub location: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Pending,
    Running,
    Done,
}

#[async_trait]
pub trait Warehouse: Send + Sync {
    /// Streaming insert. An empty vector means every row was accepted.
    async fn insert_rows(
        &self,
        table: &TableRef,
        rows: Vec<serde_json::Value>,
    ) -> Result<Vec<InsertError>, WarehouseError>;

    /// Submit `batch` as a load job into `table`.
    async fn bulk_load(
        &self,
        table: &TableRef,
        batch: RecordBatch,
        options: &LoadOptions,
    ) -> Result<LoadJob, WarehouseError>;

    /// Current state of `job`. A job that finished with errors is reported as
    /// [`WarehouseError::Job`].
    async fn job_state(&self, job: &LoadJob) -> Result<JobState, WarehouseError>;

    /// Block until `job` is done, polling every `poll`, failing after `timeout`.
    async fn await_completion(
        &self,
        job: &LoadJob,
        poll: Duration,
        timeout: Duration,
    ) -> Result<(), WarehouseError> {
        let deadline = Instant::now() + timeout;
        loop {
            let state = self.job_state(job).await?;
            debug!(job_id = %job.job_id, ?state, "load job state");
            if state == JobState::Done {
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(WarehouseError::Timeout {
                    job_id: job.job_id.clone(),
                    seconds: timeout.as_secs(),
                });
            }
            tokio::time::sleep(poll).await;
        }
    }
}

/// Job id unique across processes: `<prefix>_<table>_<micros>_<random hex>`.
pub(crate) fn new_job_id(prefix: &str, table: &TableRef) -> String {
    format!(
        "{prefix}_{}_{}_{:016x}",
        table.table_id,
        Utc::now().timestamp_micros(),
        rand::random::<u64>()
    )
}

/// Encode `batch` as a single SNAPPY-compressed Parquet file into `writer`.
pub(crate) fn write_parquet<W: Write + Send>(
    writer: W,
    batch: &RecordBatch,
) -> Result<(), WarehouseError> {
    let props = WriterProperties::builder()
        .set_compression(Compression::SNAPPY)
        .build();
    let mut writer = ArrowWriter::try_new(writer, batch.schema(), Some(props))?;
    writer.write(batch)?;
    writer.close()?;
    Ok(())
}
