//! Shared configuration types embedded in the Kerrareg CRDs
//!
//! These types appear in more than one kind: a `ModuleConfig` lives on a
//! Depot entry, on a Module spec, and is copied by value onto each Version's
//! `moduleConfigRef` so the Version reconciler can run without chasing
//! pointers back to its parent.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Configuration settings for a Module and for each Version created from it.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ModuleConfig {
    /// The file format of the module archive. One of `zip` or `tar`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_format: Option<String>,

    /// GitHub client configuration.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub github_client_config: Option<GithubClientConfig>,

    /// When true, enforces that the archive checksum always matches the value
    /// recorded on the Version's status and in the destination storage.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub immutable: Option<bool>,

    /// The name of the module. If omitted, the name of the Module resource is
    /// used in its place.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// The main terraform or tofu provider required for this module.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub provider: String,

    /// Owner of the GitHub repository.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub repo_owner: String,

    /// The full URL of the GitHub repository.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repo_url: Option<String>,

    /// External storage configuration.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_config: Option<StorageConfig>,

    /// A comma separated list of version constraints such as `1.2.1`,
    /// `>= 1.0.0, < 2.0.0`, or `~> 1.0.0, != 1.0.2`. Only respected by the
    /// Depot controller.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub version_constraints: String,

    /// When set to N > 0, the Module controller keeps only the N highest
    /// versions and rewrites `spec.versions` to that slice.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version_history_limit: Option<i64>,
}

/// GitHub client configuration settings.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GithubClientConfig {
    /// Whether the GitHub client used to download modules authenticates as a
    /// GitHub App. Strongly recommended to avoid API rate limiting. When
    /// enabled, the resource's namespace must contain a Secret named
    /// `kerrareg-github-application-secret` with `githubAppID`,
    /// `githubInstallID`, and `githubPrivateKey` (base64-encoded PEM) fields.
    #[serde(default)]
    pub use_authenticated_client: bool,
}

/// Configuration settings reserved for the Provider kind.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ProviderConfig {
    /// The name of the provider.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

/// StorageConfig holds details about how to store a Version. Exactly one
/// backend should be populated; the storage factory fails when none is.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StorageConfig {
    /// Azure Blob Storage settings.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub azure_storage: Option<AzureStorageConfig>,

    /// Local filesystem settings.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_system: Option<FileSystemConfig>,

    /// Amazon S3 settings.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub s3: Option<AmazonS3Config>,

    /// Google Cloud Storage settings.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gcs: Option<GoogleCloudStorageConfig>,
}

/// Settings for storing Versions in an Amazon S3 bucket.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AmazonS3Config {
    /// The S3 bucket name.
    pub bucket: String,

    /// An optional key prefix, e.g. `my/bucket/prefix`. The object name
    /// itself is generated by the Module controller.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,

    /// The AWS region for the bucket.
    pub region: String,
}

/// Settings for storing Versions in Azure Blob Storage.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AzureStorageConfig {
    /// The Azure Storage Account name.
    pub account_name: String,

    /// The Azure Storage Account URL.
    pub account_url: String,

    /// The Azure subscription ID where the Storage Account is located.
    #[serde(rename = "subscriptionID")]
    pub subscription_id: String,

    /// The Azure Resource Group where the Storage Account is located.
    pub resource_group: String,
}

/// Settings for storing Versions in a Google Cloud Storage bucket.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GoogleCloudStorageConfig {
    /// The GCS bucket name.
    pub bucket: String,
}

/// Settings for storing Versions on a local filesystem.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FileSystemConfig {
    /// The directory path where Versions will be stored.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub directory_path: Option<String>,
}

impl StorageConfig {
    /// Returns true when no backend is configured.
    pub fn is_empty(&self) -> bool {
        self.azure_storage.is_none()
            && self.file_system.is_none()
            && self.s3.is_none()
            && self.gcs.is_none()
    }
}
