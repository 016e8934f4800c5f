use async_trait::async_trait;
use google_cloud_storage::{
    client::{Client, ClientConfig},
    http::{
        objects::{download::Range, get::GetObjectRequest},
        Error as GcsError,
    },
};
use tracing::{debug, info};

use super::{decode_utf8, ObjectStore};
use crate::error::FetchError;

/// Google Cloud Storage backed [`ObjectStore`] using Application Default Credentials.
pub struct GcsObjectStore {
    client: Client,
}

impl GcsObjectStore {
    pub async fn new() -> anyhow::Result<Self> {
        let config = ClientConfig::default().with_auth().await?;
        Ok(Self {
            client: Client::new(config),
        })
    }
}

#[async_trait]
impl ObjectStore for GcsObjectStore {
    async fn fetch_text(&self, bucket: &str, name: &str) -> Result<String, FetchError> {
        let request = GetObjectRequest {
            bucket: bucket.to_string(),
            object: name.to_string(),
            ..Default::default()
        };
        debug!(bucket, name, "downloading object");

        let bytes = self
            .client
            .download_object(&request, &Range::default())
            .await
            .map_err(|e| match e {
                GcsError::Response(ref resp) if resp.code == 404 => FetchError::NotFound {
                    bucket: bucket.to_string(),
                    name: name.to_string(),
                },
                other => FetchError::Io {
                    bucket: bucket.to_string(),
                    name: name.to_string(),
                    message: other.to_string(),
                },
            })?;

        info!(bucket, name, bytes = bytes.len(), "downloaded object");
        decode_utf8(bucket, name, bytes)
    }
}
