//! Storage abstraction for Version archives
//!
//! A Version owns exactly one archive key in exactly one backend. All four
//! backends (Amazon S3, Azure Blob, Google Cloud Storage, local filesystem)
//! implement the same four-method [`Storage`] trait and are instantiated on
//! demand per reconcile - clients are cheap to build and take credentials
//! from the ambient environment, so no long-lived singletons are shared
//! between workers.

mod azure;
mod filesystem;
mod gcs;
mod s3;

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use object_store::path::Path;
use object_store::{Attribute, Attributes, GetOptions, ObjectStore, PutOptions};

#[cfg(test)]
use mockall::automock;

use crate::crd::StorageConfig;
use crate::github::checksum_base64_sha256;
use crate::{Error, Result};

pub use azure::AzureBlobStorage;
pub use filesystem::FileSystem;
pub use gcs::GoogleCloudStorage;
pub use s3::AmazonS3Storage;

/// A streaming read of an archive from a backend.
pub type ObjectStream = BoxStream<'static, object_store::Result<Bytes>>;

/// The storage method a [`StorageOperation`] was constructed for.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StorageMethod {
    /// Read the object (or its checksum).
    Get,
    /// Remove the object.
    Delete,
    /// Upload the object.
    Put,
}

/// Carrier for one storage call. Constructed per reconcile step.
#[derive(Clone, Debug)]
pub struct StorageOperation {
    /// The method this operation was built for.
    pub method: StorageMethod,
    /// The object's path within the backend.
    pub file_path: String,
    /// The archive bytes, present for Put operations.
    pub file_bytes: Option<Bytes>,
    /// The base64-encoded SHA256 checksum of the fetched archive.
    pub archive_checksum: Option<String>,
    /// The checksum reported by the backend, filled by `get_object_checksum`.
    pub object_checksum: Option<String>,
    /// Whether the backend reported the object as present, filled by
    /// `get_object_checksum`.
    pub file_exists: bool,
}

impl StorageOperation {
    /// Creates an operation for `method` against `file_path`.
    pub fn new(method: StorageMethod, file_path: impl Into<String>) -> Self {
        Self {
            method,
            file_path: file_path.into(),
            file_bytes: None,
            archive_checksum: None,
            object_checksum: None,
            file_exists: false,
        }
    }

    /// Attaches the archive bytes and their checksum for a Put.
    pub fn with_archive(mut self, bytes: Bytes, checksum: impl Into<String>) -> Self {
        self.file_bytes = Some(bytes);
        self.archive_checksum = Some(checksum.into());
        self
    }
}

/// The common interface every backend implements.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait Storage: Send + Sync {
    /// Removes `op.file_path` from the backend. A missing object is treated
    /// as success so deletes stay idempotent across retries.
    async fn delete_object(&self, op: &StorageOperation) -> Result<()>;

    /// Returns a byte stream of the object for the HTTP download path.
    async fn get_object(&self, op: &StorageOperation) -> Result<ObjectStream>;

    /// Looks up the stored checksum, filling `op.object_checksum` and
    /// `op.file_exists`. A missing object yields `file_exists = false` rather
    /// than an error.
    async fn get_object_checksum(&self, op: &mut StorageOperation) -> Result<()>;

    /// Uploads `op.file_bytes` at `op.file_path`, recording
    /// `op.archive_checksum` alongside the object.
    async fn put_object(&self, op: &StorageOperation) -> Result<()>;
}

/// Builds the backend selected by `config`, or fails fast when none is
/// populated. `module_name` scopes backends that namespace objects per
/// module (the Azure container).
pub fn storage_for(config: &StorageConfig, module_name: &str) -> Result<Box<dyn Storage>> {
    if let Some(s3) = &config.s3 {
        return Ok(Box::new(AmazonS3Storage::new(s3)?));
    }
    if let Some(azure) = &config.azure_storage {
        return Ok(Box::new(AzureBlobStorage::new(azure, module_name)?));
    }
    if let Some(gcs) = &config.gcs {
        return Ok(Box::new(GoogleCloudStorage::new(gcs)?));
    }
    if config.file_system.is_some() {
        return Ok(Box::new(FileSystem::new()));
    }

    Err(Error::config(
        "at least one StorageConfig must be configured",
    ))
}

/// Derives the backend path for a Version's archive.
///
/// - S3 with a user-supplied key: `{key}/{moduleName}/{fileName}`
/// - Filesystem with a user-supplied directory: `{dir}/{moduleName}/{fileName}`
/// - Azure: `{fileName}` (the module name is the container)
/// - Otherwise: `{moduleName}/{fileName}`
pub fn derive_file_path(config: &StorageConfig, module_name: &str, file_name: &str) -> String {
    if let Some(s3) = &config.s3 {
        if let Some(key) = &s3.key {
            return format!(
                "{}/{}/{}",
                trim_trailing_slash(key),
                module_name,
                file_name
            );
        }
    }

    if let Some(fs) = &config.file_system {
        if let Some(dir) = &fs.directory_path {
            return format!(
                "{}/{}/{}",
                trim_trailing_slash(dir),
                module_name,
                file_name
            );
        }
    }

    if config.azure_storage.is_some() {
        return file_name.to_string();
    }

    format!("{module_name}/{file_name}")
}

/// Removes a single trailing slash (or backslash) from the string.
pub fn trim_trailing_slash(s: &str) -> &str {
    s.strip_suffix(['/', '\\']).unwrap_or(s)
}

/// Content type by archive extension, shared by the cloud Puts and the
/// registry download responses.
pub fn content_type_for(file_path: &str) -> &'static str {
    if file_path.ends_with(".zip") {
        "application/zip"
    } else {
        "application/x-tar"
    }
}

// -----------------------------------------------------------------------------
// Shared object_store plumbing for the cloud backends
// -----------------------------------------------------------------------------
// The cloud backends record the archive checksum as object metadata under a
// backend-specific key and read it back from the object's attributes.

pub(crate) async fn put_with_checksum(
    store: &Arc<dyn ObjectStore>,
    checksum_key: &'static str,
    op: &StorageOperation,
) -> Result<()> {
    let bytes = op
        .file_bytes
        .clone()
        .ok_or_else(|| Error::config("put operation is missing the archive bytes"))?;
    let checksum = op
        .archive_checksum
        .clone()
        .ok_or_else(|| Error::config("put operation is missing the archive checksum"))?;

    let mut attributes = Attributes::new();
    attributes.insert(Attribute::Metadata(checksum_key.into()), checksum.into());
    attributes.insert(
        Attribute::ContentType,
        content_type_for(&op.file_path).into(),
    );

    store
        .put_opts(
            &Path::from(op.file_path.as_str()),
            bytes.into(),
            PutOptions {
                attributes,
                ..Default::default()
            },
        )
        .await?;

    Ok(())
}

pub(crate) async fn read_checksum(
    store: &Arc<dyn ObjectStore>,
    checksum_key: &'static str,
    op: &mut StorageOperation,
) -> Result<()> {
    let options = GetOptions {
        head: true,
        ..Default::default()
    };

    match store
        .get_opts(&Path::from(op.file_path.as_str()), options)
        .await
    {
        Ok(result) => {
            op.object_checksum = result
                .attributes
                .get(&Attribute::Metadata(checksum_key.into()))
                .map(|value| value.to_string());
            op.file_exists = true;
            Ok(())
        }
        Err(object_store::Error::NotFound { .. }) => {
            op.file_exists = false;
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

pub(crate) async fn stream_object(
    store: &Arc<dyn ObjectStore>,
    op: &StorageOperation,
) -> Result<ObjectStream> {
    let result = store.get(&Path::from(op.file_path.as_str())).await?;
    Ok(result.into_stream())
}

pub(crate) async fn delete_ignoring_missing(
    store: &Arc<dyn ObjectStore>,
    op: &StorageOperation,
) -> Result<()> {
    match store.delete(&Path::from(op.file_path.as_str())).await {
        Ok(()) | Err(object_store::Error::NotFound { .. }) => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// Hashes the full object and returns the base64 SHA256 checksum, for
/// backends without native checksum metadata.
pub(crate) async fn hash_object(
    store: &Arc<dyn ObjectStore>,
    op: &StorageOperation,
) -> Result<Option<String>> {
    match store.get(&Path::from(op.file_path.as_str())).await {
        Ok(result) => {
            let bytes = result.bytes().await?;
            Ok(Some(checksum_base64_sha256(&bytes)))
        }
        Err(object_store::Error::NotFound { .. }) => Ok(None),
        Err(e) => Err(e.into()),
    }
}
