//! Depot Custom Resource Definition
//!
//! A Depot is the user-facing curator: it turns a list of upstream sources
//! plus version constraints into concrete Module objects, refreshing on a
//! polling interval to pick up new upstream releases.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::types::{GithubClientConfig, ModuleConfig, StorageConfig};

/// Specification for a Depot
#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "kerrareg.io",
    version = "v1alpha1",
    kind = "Depot",
    plural = "depots",
    namespaced,
    printcolumn = r#"{"name":"Modules","type":"string","jsonPath":".spec.moduleConfigs[*].name"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct DepotSpec {
    /// Configuration applied to every module that is part of this Depot
    /// unless the module config overrides it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub global: Option<GlobalConfig>,

    /// The modules curated by this Depot.
    pub module_configs: Vec<ModuleConfig>,

    /// When set, the Depot re-resolves its constraints against upstream
    /// releases on this interval.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub polling_interval_minutes: Option<u64>,
}

/// Defaults inherited by every module config in the Depot.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GlobalConfig {
    /// Default GitHub client configuration.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub github_client_config: Option<GithubClientConfig>,

    /// Default module configuration (file format, immutability).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub module_config: Option<ModuleConfig>,

    /// Default storage configuration.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_config: Option<StorageConfig>,
}
