use async_trait::async_trait;
use std::{io::ErrorKind, path::PathBuf};
use tokio::fs;

use super::{decode_utf8, ObjectStore};
use crate::error::FetchError;

/// Reads objects from `<root>/<bucket>/<name>` on the local filesystem.
pub struct LocalObjectStore {
    root: PathBuf,
}

impl LocalObjectStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn object_path(&self, bucket: &str, name: &str) -> PathBuf {
        self.root.join(bucket).join(name)
    }
}

#[async_trait]
impl ObjectStore for LocalObjectStore {
    async fn fetch_text(&self, bucket: &str, name: &str) -> Result<String, FetchError> {
        let path = self.object_path(bucket, name);
        let bytes = fs::read(&path).await.map_err(|e| match e.kind() {
            ErrorKind::NotFound => FetchError::NotFound {
                bucket: bucket.to_string(),
                name: name.to_string(),
            },
            _ => FetchError::Io {
                bucket: bucket.to_string(),
                name: name.to_string(),
                message: format!("{}: {}", path.display(), e),
            },
        })?;
        decode_utf8(bucket, name, bytes)
    }
}
