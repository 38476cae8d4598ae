//! Google Cloud Storage backend
//!
//! The archive checksum is stored as `sha256-checksum` custom metadata and
//! the content type is set by extension (`application/zip` or
//! `application/x-tar`). Credentials come from Application Default
//! Credentials in the ambient environment.

use std::sync::Arc;

use async_trait::async_trait;
use object_store::gcp::GoogleCloudStorageBuilder;
use object_store::ObjectStore;

use super::{
    delete_ignoring_missing, put_with_checksum, read_checksum, stream_object, ObjectStream,
    Storage, StorageOperation,
};
use crate::crd::GoogleCloudStorageConfig;
use crate::Result;

const CHECKSUM_METADATA_KEY: &str = "sha256-checksum";

/// Storage backend for a Google Cloud Storage bucket.
pub struct GoogleCloudStorage {
    store: Arc<dyn ObjectStore>,
}

impl GoogleCloudStorage {
    /// Builds a client for the configured bucket.
    pub fn new(config: &GoogleCloudStorageConfig) -> Result<Self> {
        let store = GoogleCloudStorageBuilder::from_env()
            .with_bucket_name(&config.bucket)
            .build()?;

        Ok(Self {
            store: Arc::new(store),
        })
    }
}

#[async_trait]
impl Storage for GoogleCloudStorage {
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
