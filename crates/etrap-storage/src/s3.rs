//! S3 backend.

use async_trait::async_trait;
use rusoto_core::{ByteStream, Region, RusotoError};
use rusoto_s3::{
    CreateBucketConfiguration, CreateBucketRequest, GetObjectError, GetObjectRequest,
    HeadBucketRequest, PutObjectRequest, S3Client, S3,
};
use tokio::io::AsyncReadExt;

use crate::{ObjectStore, StorageError};

pub struct S3ObjectStore {
    client: S3Client,
    bucket: String,
}

impl S3ObjectStore {
    /// Credentials come from the usual SDK chain (environment, profile,
    /// instance role).
    pub fn new(bucket: impl Into<String>, region: Region) -> Self {
        Self {
            client: S3Client::new(region),
            bucket: bucket.into(),
        }
    }

    /// Create the bucket when it does not exist yet. Outside `us-east-1`
    /// the region must be named explicitly in the location constraint.
    pub async fn ensure_bucket(&self, region: &Region) -> Result<(), StorageError> {
        let probe = self
            .client
            .head_bucket(HeadBucketRequest {
                bucket: self.bucket.clone(),
                ..Default::default()
            })
            .await;
        if probe.is_ok() {
            tracing::info!(bucket = %self.bucket, "using existing bucket");
            return Ok(());
        }

        let create_bucket_configuration = match region {
            Region::UsEast1 => None,
            other => Some(CreateBucketConfiguration {
                location_constraint: Some(other.name().to_string()),
            }),
        };
        self.client
            .create_bucket(CreateBucketRequest {
                bucket: self.bucket.clone(),
                create_bucket_configuration,
                ..Default::default()
            })
            .await
            .map_err(|err| StorageError::Backend(err.to_string()))?;
        tracing::info!(bucket = %self.bucket, "created bucket");
        Ok(())
    }
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    fn bucket(&self) -> &str {
        &self.bucket
    }

    async fn put_object(
        &self,
        key: &str,
        body: Vec<u8>,
        content_type: &str,
    ) -> Result<(), StorageError> {
        self.client
            .put_object(PutObjectRequest {
                bucket: self.bucket.clone(),
                key: key.to_string(),
                body: Some(ByteStream::from(body)),
                content_type: Some(content_type.to_string()),
                ..Default::default()
            })
            .await
            .map_err(|err| StorageError::Backend(err.to_string()))?;
        Ok(())
    }

    async fn get_object(&self, key: &str) -> Result<Vec<u8>, StorageError> {
        let output = self
            .client
            .get_object(GetObjectRequest {
                bucket: self.bucket.clone(),
                key: key.to_string(),
                ..Default::default()
            })
            .await
            .map_err(|err| match err {
                RusotoError::Service(GetObjectError::NoSuchKey(_)) => {
                    StorageError::NotFound { key: key.to_string() }
                }
                other => StorageError::Backend(other.to_string()),
            })?;

        let mut body = Vec::new();
        if let Some(stream) = output.body {
            stream.into_async_read().read_to_end(&mut body).await?;
        }
        Ok(body)
    }
}
