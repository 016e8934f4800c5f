//! Handles one object-created notification end to end:
//! fetch → aggregate → log(SUCCESS) → persist results.
//!
//! Any failure is caught here once, followed by a best-effort log(ERROR) whose own
//! failure is only reported through tracing.

use std::sync::Arc;
use tracing::{error, info, warn};

use crate::{
    config::Config,
    error::PipelineError,
    event::{ErrorSummary, PipelineResponse, StorageEvent, SuccessSummary, TableNames},
    process::process_client_renta_data,
    store::ObjectStore,
    warehouse::{
        log::{write_log, ProcessingLogEntry},
        results::write_results,
        Warehouse,
    },
};

/// Number of aggregates echoed back in a success response.
pub const SAMPLE_SIZE: usize = 5;

pub struct Pipeline {
    store: Arc<dyn ObjectStore>,
    warehouse: Arc<dyn Warehouse>,
    config: Config,
}

impl Pipeline {
    pub fn new(store: Arc<dyn ObjectStore>, warehouse: Arc<dyn Warehouse>, config: Config) -> Self {
        Self {
            store,
            warehouse,
            config,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    #[tracing::instrument(level = "info", skip_all, fields(bucket = %event.bucket, file = %event.name))]
    pub async fn handle(&self, event: &StorageEvent) -> PipelineResponse {
        info!("processing income file");

        if !event.is_csv() {
            warn!("not a CSV file, skipping");
            return PipelineResponse::not_csv();
        }

        match self.run(event).await {
            Ok(summary) => {
                info!(
                    customers = summary.total_customers,
                    rows = summary.total_rows,
                    "processing complete"
                );
                PipelineResponse::Success(summary)
            }
            Err(err) => {
                error!(error = %err, "processing failed");
                self.log_failure(event, &err).await;
                PipelineResponse::Failure(ErrorSummary {
                    error: err.to_string(),
                    file: event.name.clone(),
                    bucket: event.bucket.clone(),
                })
            }
        }
    }

    async fn run(&self, event: &StorageEvent) -> Result<SuccessSummary, PipelineError> {
        let wh = &self.config.warehouse;

        let content = self.store.fetch_text(&event.bucket, &event.name).await?;
        info!(chars = content.len(), "file downloaded");

        let aggregation = process_client_renta_data(&content)?;

        let entry = ProcessingLogEntry::success(
            &event.name,
            &event.bucket,
            aggregation.total_rows,
            aggregation.distinct_customers,
        );
        write_log(self.warehouse.as_ref(), &wh.log_table_ref(), &entry)
            .await
            .map_err(PipelineError::LogWrite)?;

        write_results(
            self.warehouse.as_ref(),
            &wh.results_table_ref(),
            &event.name,
            &aggregation.customers,
            &self.config.runtime,
        )
        .await
        .map_err(PipelineError::ResultWrite)?;

        Ok(SuccessSummary {
            total_customers: aggregation.customers.len(),
            file_processed: event.name.clone(),
            total_rows: aggregation.total_rows,
            distinct_customers: aggregation.distinct_customers,
            persisted: true,
            project: wh.project_id.clone(),
            dataset: wh.dataset_id.clone(),
            tables: TableNames {
                logs: wh.log_table_ref().to_string(),
                results: wh.results_table_ref().to_string(),
            },
            sample_customers: aggregation
                .customers
                .iter()
                .take(SAMPLE_SIZE)
                .copied()
                .collect(),
        })
    }

    /// Record the failure in the log table. Never fails: a rejected or failed
    /// insert is reported and dropped so `err` stays the reported cause.
    async fn log_failure(&self, event: &StorageEvent, err: &PipelineError) {
        let entry = ProcessingLogEntry::error(&event.name, &event.bucket, err.to_string());
        let table = self.config.warehouse.log_table_ref();
        match write_log(self.warehouse.as_ref(), &table, &entry).await {
            Ok(()) => info!("error log saved"),
            Err(log_err) => error!(error = %log_err, "failed to save error log"),
        }
    }
}
