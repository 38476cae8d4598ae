//! Azure Blob Storage backend
//!
//! Each module gets its own container (named after the module); the blob
//! path inside the container is the bare file name. The archive checksum is
//! recorded as `Checksum` metadata. The container itself is provisioned out
//! of band - Kerrareg only reads and writes blobs.

use std::sync::Arc;

use async_trait::async_trait;
use object_store::azure::MicrosoftAzureBuilder;
use object_store::ObjectStore;

use super::{
    delete_ignoring_missing, put_with_checksum, read_checksum, stream_object, ObjectStream,
    Storage, StorageOperation,
};
use crate::crd::AzureStorageConfig;
use crate::Result;

const CHECKSUM_METADATA_KEY: &str = "Checksum";

/// Storage backend for an Azure Blob Storage account.
pub struct AzureBlobStorage {
    store: Arc<dyn ObjectStore>,
}

impl AzureBlobStorage {
    /// Builds a client for the configured storage account, scoped to the
    /// module's container.
    pub fn new(config: &AzureStorageConfig, container: &str) -> Result<Self> {
        let mut builder = MicrosoftAzureBuilder::from_env()
            .with_account(&config.account_name)
            .with_container_name(container);
        if !config.account_url.is_empty() {
            builder = builder.with_endpoint(config.account_url.clone());
        }

        Ok(Self {
            store: Arc::new(builder.build()?),
        })
    }
}

#[async_trait]
impl Storage for AzureBlobStorage {
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
