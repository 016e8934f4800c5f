use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{error, info};

use super::Warehouse;
use crate::{config::TableRef, error::WarehouseError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunStatus {
    Success,
    Error,
}

/// One row of the processing log; exactly one is written per run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessingLogEntry {
    pub file_name: String,
    pub processed_at: DateTime<Utc>,
    pub source_bucket: String,
    pub total_rows: u64,
    pub distinct_customers: u64,
    pub status: RunStatus,
    pub error_message: Option<String>,
}

impl ProcessingLogEntry {
    pub fn success(
        file_name: &str,
        source_bucket: &str,
        total_rows: usize,
        distinct_customers: usize,
    ) -> Self {
        Self {
            file_name: file_name.to_string(),
            processed_at: Utc::now(),
            source_bucket: source_bucket.to_string(),
            total_rows: total_rows as u64,
            distinct_customers: distinct_customers as u64,
            status: RunStatus::Success,
            error_message: None,
        }
    }

    /// Failed runs are logged with zero counts.
    pub fn error(file_name: &str, source_bucket: &str, message: impl Into<String>) -> Self {
        Self {
            file_name: file_name.to_string(),
            processed_at: Utc::now(),
            source_bucket: source_bucket.to_string(),
            total_rows: 0,
            distinct_customers: 0,
            status: RunStatus::Error,
            error_message: Some(message.into()),
        }
    }
}

/// Append `entry` to the log table. Any rejected row fails the call.
#[tracing::instrument(level = "debug", skip_all, fields(table = %table, file = %entry.file_name))]
pub async fn write_log(
    warehouse: &dyn Warehouse,
    table: &TableRef,
    entry: &ProcessingLogEntry,
) -> Result<(), WarehouseError> {
    let row = serde_json::to_value(entry)?;
    let errors = warehouse.insert_rows(table, vec![row]).await?;

    if let Some(first) = errors.first() {
        error!(%table, errors = ?errors, "log insert rejected");
        return Err(WarehouseError::InsertRejected {
            table: table.to_string(),
            count: errors.len(),
            first: first.message.clone(),
        });
    }

    info!(file = %entry.file_name, status = ?entry.status, "processing log saved");
    Ok(())
}
