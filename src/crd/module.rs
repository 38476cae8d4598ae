//! Module Custom Resource Definition
//!
//! A Module represents one upstream module repository together with the list
//! of versions that should be mirrored. The Module controller materialises a
//! child Version object for every entry in `spec.versions`.

use std::collections::BTreeMap;

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::types::ModuleConfig;

/// Specification for a Module
#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "kerrareg.io",
    version = "v1alpha1",
    kind = "Module",
    plural = "modules",
    namespaced,
    status = "ModuleStatus",
    printcolumn = r#"{"name":"LatestVersion","type":"string","jsonPath":".status.latestVersion"}"#,
    printcolumn = r#"{"name":"Provider","type":"string","jsonPath":".spec.moduleConfig.provider"}"#,
    printcolumn = r#"{"name":"Source","type":"string","jsonPath":".spec.moduleConfig.repoUrl"}"#,
    printcolumn = r#"{"name":"Synced","type":"boolean","jsonPath":".status.synced"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct ModuleSpec {
    /// A flag to force the module to synchronize. The controller resets it to
    /// false after a successful pass.
    #[serde(default)]
    pub force_sync: bool,

    /// Configuration copied onto every Version created for this Module.
    pub module_config: ModuleConfig,

    /// The versions of the module, as semantic version tags such as `v1.0.0`
    /// or `1.0.0`. Leading `v` characters are trimmed before the versions are
    /// exposed through the registry protocol.
    pub versions: Vec<ModuleVersion>,
}

/// One version entry of a Module, and the shape stored in
/// `status.moduleVersionRefs` once the controller has assigned a filename.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ModuleVersion {
    /// The generated filename including its file extension.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,

    /// The name of the child Version object.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,

    /// Whether the child Version has synced.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub synced: bool,

    /// The version of the module.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub version: String,
}

impl ModuleVersion {
    /// A bare spec entry carrying only the version string.
    pub fn entry(version: impl Into<String>) -> Self {
        Self {
            version: version.into(),
            ..Default::default()
        }
    }
}

/// Status for a Module
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ModuleStatus {
    /// The latest available version of the module.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latest_version: Option<String>,

    /// Whether the module has synced to its desired state.
    #[serde(default)]
    pub synced: bool,

    /// Human-readable reconciliation status.
    #[serde(default)]
    pub sync_status: String,

    /// The version refs created by the controller, keyed by the user-facing
    /// version string.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub module_version_refs: BTreeMap<String, ModuleVersion>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spec_entries_serialize_only_their_version() {
        let entry = ModuleVersion::entry("v1.2.0");
        let json = serde_json::to_value(&entry).unwrap();
        assert_eq!(json, serde_json::json!({"version": "v1.2.0"}));
    }

    #[test]
    fn refs_serialize_name_and_file_name() {
        let reference = ModuleVersion {
            file_name: Some("0192f0c1.zip".into()),
            name: "vpc-1.2.0".into(),
            synced: true,
            version: String::new(),
        };

        let json = serde_json::to_value(&reference).unwrap();
        assert_eq!(json["fileName"], "0192f0c1.zip");
        assert_eq!(json["name"], "vpc-1.2.0");
        assert_eq!(json["synced"], true);
        assert!(json.get("version").is_none());
    }

    #[test]
    fn status_refs_are_keyed_by_version_string() {
        let mut status = ModuleStatus::default();
        status.module_version_refs.insert(
            "v1.0.0".into(),
            ModuleVersion {
                name: "vpc-1.0.0".into(),
                ..Default::default()
            },
        );

        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json["moduleVersionRefs"]["v1.0.0"]["name"], "vpc-1.0.0");
    }
}
