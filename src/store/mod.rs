//! Object store access: fetch an uploaded object as text.

use async_trait::async_trait;

use crate::error::FetchError;

pub mod gcs;
pub mod local;

pub use gcs::GcsObjectStore;
pub use local::LocalObjectStore;

#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Download `name` from `bucket` and decode it as UTF-8.
    async fn fetch_text(&self, bucket: &str, name: &str) -> Result<String, FetchError>;
}

pub(crate) fn decode_utf8(bucket: &str, name: &str, bytes: Vec<u8>) -> Result<String, FetchError> {
    String::from_utf8(bytes).map_err(|_| FetchError::Decode {
        bucket: bucket.to_string(),
        name: name.to_string(),
    })
}
