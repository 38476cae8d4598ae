//! Custom Resource Definitions for Kerrareg
//!
//! All kinds live in group `kerrareg.io`, version `v1alpha1`, and are
//! namespaced. The `Provider` kind is reserved; only its config type exists.

mod depot;
mod module;
mod types;
mod version;

pub use depot::{Depot, DepotSpec, GlobalConfig};
pub use module::{Module, ModuleSpec, ModuleStatus, ModuleVersion};
pub use types::{
    AmazonS3Config, AzureStorageConfig, FileSystemConfig, GithubClientConfig,
    GoogleCloudStorageConfig, ModuleConfig, ProviderConfig, StorageConfig,
};
pub use version::{Version, VersionSpec, VersionStatus};
