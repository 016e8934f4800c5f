//! BigQuery REST v2 client covering streaming inserts and load jobs.

use arrow::record_batch::RecordBatch;
use async_trait::async_trait;
use google_cloud_auth::{project::Config as AuthConfig, token::DefaultTokenSourceProvider};
use google_cloud_token::{TokenSource, TokenSourceProvider};
use reqwest::{header, Client, Response};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::{new_job_id, write_parquet, InsertError, JobState, LoadJob, LoadOptions, Warehouse};
use crate::{config::TableRef, error::WarehouseError};

const API_BASE: &str = "https://bigquery.googleapis.com/bigquery/v2";
const UPLOAD_BASE: &str = "https://bigquery.googleapis.com/upload/bigquery/v2";
const MULTIPART_BOUNDARY: &str = "renta_ingest_load_boundary";
const SCOPES: [&str; 1] = ["https://www.googleapis.com/auth/bigquery"];

pub struct BigQueryWarehouse {
    http: Client,
    location: String,
    tokens: Arc<dyn TokenSource>,
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct InsertAllResponse {
    #[serde(default)]
    insert_errors: Vec<RowErrors>,
}

#[derive(Deserialize)]
struct RowErrors {
    index: usize,
    #[serde(default)]
    errors: Vec<ErrorProto>,
}

#[derive(Deserialize, Debug, Clone)]
struct ErrorProto {
    #[serde(default)]
    reason: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

impl ErrorProto {
    fn describe(&self) -> String {
        match (&self.reason, &self.message) {
            (Some(r), Some(m)) => format!("{r}: {m}"),
            (None, Some(m)) => m.clone(),
            (Some(r), None) => r.clone(),
            (None, None) => "unknown error".into(),
        }
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct JobResource {
    job_reference: JobReference,
    #[serde(default)]
    status: Option<JobStatus>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct JobReference {
    job_id: String,
    #[serde(default)]
    location: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct JobStatus {
    state: String,
    #[serde(default)]
    error_result: Option<ErrorProto>,
}

#[derive(Deserialize)]
struct ApiErrorBody {
    error: ApiErrorDetail,
}

#[derive(Deserialize)]
struct ApiErrorDetail {
    message: String,
}

impl BigQueryWarehouse {
    /// Authenticates with Application Default Credentials, the same chain the
    /// storage client uses.
    pub async fn new(location: impl Into<String>) -> Result<Self, WarehouseError> {
        let provider = DefaultTokenSourceProvider::new(AuthConfig::default().with_scopes(&SCOPES))
            .await
            .map_err(|e| WarehouseError::Auth(e.to_string()))?;
        Ok(Self {
            http: Client::new(),
            location: location.into(),
            tokens: provider.token_source(),
        })
    }

    /// `Authorization` header value (`Bearer ...`); the token source caches and refreshes.
    async fn authorization(&self) -> Result<String, WarehouseError> {
        self.tokens
            .token()
            .await
            .map_err(|e| WarehouseError::Auth(e.to_string()))
    }
}

/// Map a non-2xx response to [`WarehouseError::Api`].
async fn check(resp: Response) -> Result<Response, WarehouseError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    let message = serde_json::from_str::<ApiErrorBody>(&body)
        .map(|b| b.error.message)
        .unwrap_or(body);
    Err(WarehouseError::Api {
        status: status.as_u16(),
        message,
    })
}

fn load_job_config(
    table: &TableRef,
    job_id: &str,
    location: &str,
    options: &LoadOptions,
) -> serde_json::Value {
    json!({
        "jobReference": {
            "projectId": table.project_id,
            "jobId": job_id,
            "location": location,
        },
        "configuration": {
            "load": {
                "destinationTable": {
                    "projectId": table.project_id,
                    "datasetId": table.dataset_id,
                    "tableId": table.table_id,
                },
                "sourceFormat": "PARQUET",
                "writeDisposition": options.write_mode.as_str(),
                "schemaUpdateOptions": options
                    .schema_updates
                    .iter()
                    .map(|u| u.as_str())
                    .collect::<Vec<_>>(),
            }
        }
    })
}

/// `multipart/related` body: JSON job metadata followed by the media bytes.
fn multipart_related(boundary: &str, metadata: &[u8], media: &[u8]) -> Vec<u8> {
    let mut body = Vec::with_capacity(metadata.len() + media.len() + 256);
    body.extend_from_slice(format!("--{boundary}\r\n").as_bytes());
    body.extend_from_slice(b"Content-Type: application/json; charset=UTF-8\r\n\r\n");
    body.extend_from_slice(metadata);
    body.extend_from_slice(format!("\r\n--{boundary}\r\n").as_bytes());
    body.extend_from_slice(b"Content-Type: application/octet-stream\r\n\r\n");
    body.extend_from_slice(media);
    body.extend_from_slice(format!("\r\n--{boundary}--\r\n").as_bytes());
    body
}

#[async_trait]
impl Warehouse for BigQueryWarehouse {
    async fn insert_rows(
        &self,
        table: &TableRef,
        rows: Vec<serde_json::Value>,
    ) -> Result<Vec<InsertError>, WarehouseError> {
        let url = format!(
            "{API_BASE}/projects/{}/datasets/{}/tables/{}/insertAll",
            table.project_id, table.dataset_id, table.table_id
        );
        let body = json!({
            "rows": rows.into_iter().map(|r| json!({ "json": r })).collect::<Vec<_>>(),
        });

        let auth = self.authorization().await?;
        let resp = self
            .http
            .post(&url)
            .header(header::AUTHORIZATION, auth)
            .json(&body)
            .send()
            .await?;
        let parsed: InsertAllResponse = check(resp).await?.json().await?;

        Ok(parsed
            .insert_errors
            .into_iter()
            .map(|e| InsertError {
                index: e.index,
                message: e
                    .errors
                    .iter()
                    .map(ErrorProto::describe)
                    .collect::<Vec<_>>()
                    .join("; "),
            })
            .collect())
    }

    async fn bulk_load(
        &self,
        table: &TableRef,
        batch: RecordBatch,
        options: &LoadOptions,
    ) -> Result<LoadJob, WarehouseError> {
        let mut parquet = Vec::new();
        write_parquet(&mut parquet, &batch)?;

        let job_id = new_job_id("renta", table);
        let config = load_job_config(table, &job_id, &self.location, options);
        let metadata = serde_json::to_vec(&config)?;
        let body = multipart_related(MULTIPART_BOUNDARY, &metadata, &parquet);

        debug!(
            %table,
            job_id = %job_id,
            rows = batch.num_rows(),
            bytes = parquet.len(),
            "submitting load job"
        );

        let url = format!(
            "{UPLOAD_BASE}/projects/{}/jobs?uploadType=multipart",
            table.project_id
        );
        let auth = self.authorization().await?;
        let resp = self
            .http
            .post(&url)
            .header(header::AUTHORIZATION, auth)
            .header(
                header::CONTENT_TYPE,
                format!("multipart/related; boundary={MULTIPART_BOUNDARY}"),
            )
            .body(body)
            .send()
            .await?;
        let job: JobResource = check(resp).await?.json().await?;

        info!(%table, job_id = %job.job_reference.job_id, "load job submitted");
        Ok(LoadJob {
            project_id: table.project_id.clone(),
            job_id: job.job_reference.job_id,
            location: job
                .job_reference
                .location
                .or_else(|| Some(self.location.clone())),
        })
    }

    async fn job_state(&self, job: &LoadJob) -> Result<JobState, WarehouseError> {
        let mut url = format!(
            "{API_BASE}/projects/{}/jobs/{}",
            job.project_id, job.job_id
        );
        if let Some(loc) = &job.location {
            url.push_str(&format!("?location={loc}"));
        }

        let auth = self.authorization().await?;
        let resp = self
            .http
            .get(&url)
            .header(header::AUTHORIZATION, auth)
            .send()
            .await?;
        let resource: JobResource = check(resp).await?.json().await?;
        job_state_of(job, resource)
    }
}

/// `DONE` with an `errorResult` is a failed load; a missing status is still pending.
fn job_state_of(job: &LoadJob, resource: JobResource) -> Result<JobState, WarehouseError> {
    let Some(status) = resource.status else {
        return Ok(JobState::Pending);
    };
    match status.state.as_str() {
        "DONE" => match status.error_result {
            Some(err) => {
                warn!(job_id = %job.job_id, error = %err.describe(), "load job failed");
                Err(WarehouseError::Job {
                    job_id: job.job_id.clone(),
                    message: err.describe(),
                })
            }
            None => Ok(JobState::Done),
        },
        "RUNNING" => Ok(JobState::Running),
        _ => Ok(JobState::Pending),
    }
}
