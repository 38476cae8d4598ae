//! Local filesystem storage backend
//!
//! The filesystem has no metadata channel, so the checksum is computed by
//! hashing the file bytes on read. Paths are taken as absolute filesystem
//! paths derived from the configured directory.

use std::sync::Arc;

use async_trait::async_trait;
use object_store::local::LocalFileSystem;
use object_store::ObjectStore;

use super::{
    delete_ignoring_missing, hash_object, stream_object, ObjectStream, Storage, StorageOperation,
};
use crate::Result;

/// Storage backend for a local directory tree.
pub struct FileSystem {
    store: Arc<dyn ObjectStore>,
}

impl FileSystem {
    /// Builds a filesystem store rooted at `/`, so operation paths are
    /// absolute paths.
    pub fn new() -> Self {
        Self {
            store: Arc::new(LocalFileSystem::new()),
        }
    }
}

impl Default for FileSystem {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Storage for FileSystem {
    async fn delete_object(&self, op: &StorageOperation) -> Result<()> {
        delete_ignoring_missing(&self.store, op).await
    }

    async fn get_object(&self, op: &StorageOperation) -> Result<ObjectStream> {
        stream_object(&self.store, op).await
    }

    async fn get_object_checksum(&self, op: &mut StorageOperation) -> Result<()> {
        match hash_object(&self.store, op).await? {
            Some(checksum) => {
                op.object_checksum = Some(checksum);
                op.file_exists = true;
            }
            None => op.file_exists = false,
        }
        Ok(())
    }

    async fn put_object(&self, op: &StorageOperation) -> Result<()> {
        let bytes = op
            .file_bytes
            .clone()
            .ok_or_else(|| crate::Error::config("put operation is missing the archive bytes"))?;

        // LocalFileSystem creates the module directory as needed
        self.store
            .put(
                &object_store::path::Path::from(op.file_path.as_str()),
                bytes.into(),
            )
            .await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::github::checksum_base64_sha256;
    use crate::storage::StorageMethod;
    use bytes::Bytes;

    #[tokio::test]
    async fn checksum_is_computed_on_read() {
        let dir = tempfile::tempdir().unwrap();
        let path = format!("{}/vpc/a.zip", dir.path().display());

        let storage = FileSystem::new();
        let body = Bytes::from_static(b"module archive");
        let expected = checksum_base64_sha256(&body);

        let put = StorageOperation::new(StorageMethod::Put, path.clone())
            .with_archive(body, expected.clone());
        storage.put_object(&put).await.unwrap();

        let mut get = StorageOperation::new(StorageMethod::Get, path.clone());
        storage.get_object_checksum(&mut get).await.unwrap();
        assert!(get.file_exists);
        assert_eq!(get.object_checksum, Some(expected));

        let delete = StorageOperation::new(StorageMethod::Delete, path.clone());
        storage.delete_object(&delete).await.unwrap();

        let mut gone = StorageOperation::new(StorageMethod::Get, path);
        storage.get_object_checksum(&mut gone).await.unwrap();
        assert!(!gone.file_exists);
    }
}
