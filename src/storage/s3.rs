//! Amazon S3 storage backend
//!
//! Objects are written to the configured bucket with the archive checksum
//! recorded as `sha256-checksum` metadata. Credentials come from the ambient
//! AWS environment (env vars, instance profile, etc.).

use std::sync::Arc;

use async_trait::async_trait;
use object_store::aws::AmazonS3Builder;
use object_store::ObjectStore;

use super::{
    delete_ignoring_missing, put_with_checksum, read_checksum, stream_object, ObjectStream,
    Storage, StorageOperation,
};
use crate::crd::AmazonS3Config;
use crate::Result;

const CHECKSUM_METADATA_KEY: &str = "sha256-checksum";

/// Storage backend for an Amazon S3 bucket.
pub struct AmazonS3Storage {
    store: Arc<dyn ObjectStore>,
}

impl AmazonS3Storage {
    /// Builds a client for the configured bucket and region.
    pub fn new(config: &AmazonS3Config) -> Result<Self> {
        let store = AmazonS3Builder::from_env()
            .with_bucket_name(&config.bucket)
            .with_region(&config.region)
            .build()?;

        Ok(Self {
            store: Arc::new(store),
        })
    }

    #[cfg(test)]
    pub(crate) fn from_store(store: Arc<dyn ObjectStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Storage for AmazonS3Storage {
    async fn delete_object(&self, op: &StorageOperation) -> Result<()> {
        delete_ignoring_missing(&self.store, op).await
    }

    async fn get_object(&self, op: &StorageOperation) -> Result<ObjectStream> {
        stream_object(&self.store, op).await
    }

    async fn get_object_checksum(&self, op: &mut StorageOperation) -> Result<()> {
        read_checksum(&self.store, CHECKSUM_METADATA_KEY, op).await
    }

    async fn put_object(&self, op: &StorageOperation) -> Result<()> {
        put_with_checksum(&self.store, CHECKSUM_METADATA_KEY, op).await
    }
}
