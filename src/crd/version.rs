//! Version Custom Resource Definition
//!
//! A Version pins one concrete archive of a Module at a specific upstream
//! ref. It is created by the Module controller and carries a finalizer so
//! that the stored archive is deleted before the object disappears.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::types::{ModuleConfig, ProviderConfig};

/// Specification for a Version
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "kerrareg.io",
    version = "v1alpha1",
    kind = "Version",
    plural = "versions",
    namespaced,
    status = "VersionStatus",
    printcolumn = r#"{"name":"Type","type":"string","jsonPath":".spec.type"}"#,
    printcolumn = r#"{"name":"FileName","type":"string","jsonPath":".spec.fileName"}"#,
    printcolumn = r#"{"name":"Synced","type":"boolean","jsonPath":".status.synced"}"#,
    printcolumn = r#"{"name":"Checksum","type":"string","jsonPath":".status.checksum"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct VersionSpec {
    /// The name of the archive file with its extension. For a Module this
    /// must end in `.zip` or `.tar` since terraform/tofu only support those
    /// archive types. Stable once assigned.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,

    /// A flag to force the version to synchronize. The controller resets it
    /// to false after a successful pass.
    #[serde(default)]
    pub force_sync: bool,

    /// The module configuration, copied by value from the parent Module.
    /// Mutually exclusive with `providerConfigRef`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub module_config_ref: Option<ModuleConfig>,

    /// The provider configuration. Mutually exclusive with `moduleConfigRef`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider_config_ref: Option<ProviderConfig>,

    /// The type of resource. Either `Module` or `Provider`.
    #[serde(rename = "type", default, skip_serializing_if = "String::is_empty")]
    pub type_: String,

    /// The version of the Module or Provider.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub version: String,
}

/// Status for a Version
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct VersionStatus {
    /// The SHA256 checksum of the archive as a base64 encoded string.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,

    /// Whether the Version has been successfully reconciled. Authoritative:
    /// true means storage holds an object whose checksum matches `checksum`.
    #[serde(default)]
    pub synced: bool,

    /// Human-readable reconciliation status. Advisory only.
    #[serde(default)]
    pub sync_status: String,
}
