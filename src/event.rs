use serde::{Deserialize, Serialize};

use crate::process::CustomerAggregate;

/// Object-created notification. Extra fields of the storage payload are ignored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageEvent {
    pub bucket: String,
    pub name: String,
}

impl StorageEvent {
    pub fn is_csv(&self) -> bool {
        self.name.ends_with(".csv")
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableNames {
    pub logs: String,
    pub results: String,
}

/// Returned after the log entry and the results have been persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SuccessSummary {
    pub total_customers: usize,
    pub file_processed: String,
    pub total_rows: usize,
    pub distinct_customers: usize,
    pub persisted: bool,
    pub project: String,
    pub dataset: String,
    pub tables: TableNames,
    pub sample_customers: Vec<CustomerAggregate>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorSummary {
    pub error: String,
    pub file: String,
    pub bucket: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Skipped {
    pub error: String,
}

/// Outcome of handling one [`StorageEvent`], serialized without a tag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PipelineResponse {
    Success(SuccessSummary),
    Failure(ErrorSummary),
    Skipped(Skipped),
}

impl PipelineResponse {
    pub fn not_csv() -> Self {
        PipelineResponse::Skipped(Skipped {
            error: "not a CSV file".into(),
        })
    }

    pub fn is_success(&self) -> bool {
        matches!(self, PipelineResponse::Success(_))
    }
}
