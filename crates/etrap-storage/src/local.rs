//! Directory-backed object store for tests and S3-less deployments.

use std::path::{Path, PathBuf};

use async_trait::async_trait;

use crate::{ObjectStore, StorageError};

pub struct LocalObjectStore {
    root: PathBuf,
    bucket: String,
}

impl LocalObjectStore {
    pub fn new(root: impl Into<PathBuf>, bucket: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            bucket: bucket.into(),
        }
    }

    fn path_for(&self, key: &str) -> PathBuf {
        key.split('/').fold(self.root.join(&self.bucket), |path, part| path.join(part))
    }
}

#[async_trait]
impl ObjectStore for LocalObjectStore {
    fn bucket(&self) -> &str {
        &self.bucket
    }

    async fn put_object(
        &self,
        key: &str,
        body: Vec<u8>,
        _content_type: &str,
    ) -> Result<(), StorageError> {
        let path = self.path_for(key);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, body).await?;
        Ok(())
    }

    async fn get_object(&self, key: &str) -> Result<Vec<u8>, StorageError> {
        let path = self.path_for(key);
        match tokio::fs::read(&path).await {
            Ok(body) => Ok(body),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                Err(StorageError::NotFound { key: key.to_string() })
            }
            Err(err) => Err(err.into()),
        }
    }
}

impl LocalObjectStore {
    /// Filesystem location of an object, for diagnostics.
    pub fn object_path(&self, key: &str) -> PathBuf {
        self.path_for(key)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}
