//! Module controller
//!
//! Owns the set of Version children for one Module: creates a child per
//! entry in `spec.versions` with a freshly generated filename, updates
//! children whose desired spec drifted, tracks `status.latestVersion`,
//! enforces `versionHistoryLimit`, and prunes children whose version left the
//! spec. Version-level churn is deliberately not watched - reacting to every
//! child event would only cause reconcile storms, and the Version controller
//! owns that half of the pipeline.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use kube::api::{Api, DeleteParams, ListParams, PostParams};
use kube::runtime::controller::Action;
use kube::{Resource, ResourceExt};
use tracing::{debug, error, info, instrument, warn};

use crate::crd::{Module, ModuleConfig, ModuleVersion, Version, VersionSpec};
use crate::retry::{update_on_conflict, update_status_on_conflict};
use crate::versions::{latest_version, sanitize_version, versions_to_keep};
use crate::{Error, Result, LABEL_MODULE, LABEL_NAMESPACE, VERSION_TYPE_MODULE};

use super::Context;

const ERROR_REQUEUE: Duration = Duration::from_secs(30);

/// Reconcile a Module resource
#[instrument(skip(module, ctx), fields(module = %module.name_any()))]
pub async fn reconcile(module: Arc<Module>, ctx: Arc<Context>) -> Result<Action> {
    let module_object_name = module.name_any();
    let namespace = module.namespace().unwrap_or_default();
    debug!("reconciling module");

    let modules: Api<Module> = Api::namespaced(ctx.client.clone(), &namespace);
    let versions: Api<Version> = Api::namespaced(ctx.client.clone(), &namespace);

    // versionHistoryLimit trims the spec itself; everything below works on
    // the kept slice so pruning and refs agree with what will be persisted
    let kept = match module.spec.module_config.version_history_limit {
        Some(limit) if limit > 0 => versions_to_keep(&module.spec.versions, limit),
        _ => module.spec.versions.clone(),
    };

    let module_name = resolved_module_name(&module);
    let mut refs: BTreeMap<String, ModuleVersion> = BTreeMap::new();

    for entry in &kept {
        let sanitized = sanitize_version(&entry.version);
        let version_name = format!("{module_name}-{sanitized}");

        match versions.get_opt(&version_name).await? {
            None => {
                debug!(version = %entry.version, "version not found: creating");

                let file_name = generate_file_name(&module.spec.module_config)?;
                let desired = version_for_module(
                    &module,
                    &module_name,
                    &version_name,
                    &namespace,
                    &file_name,
                    &entry.version,
                );

                match versions.create(&PostParams::default(), &desired).await {
                    Ok(_) => {}
                    // Another worker created it first; its spec is
                    // reconciled on the next pass
                    Err(kube::Error::Api(ae)) if ae.code == 409 => {
                        debug!(version = %entry.version, "version already exists, skipping create");
                    }
                    Err(e) => return Err(e.into()),
                }

                refs.insert(
                    entry.version.clone(),
                    ModuleVersion {
                        file_name: Some(file_name),
                        name: version_name,
                        synced: false,
                        version: String::new(),
                    },
                );
            }
            Some(existing) => {
                debug!(version = %entry.version, "version found: reconciling its config");

                // The filename is stable for the lifetime of the child
                let file_name = existing
                    .spec
                    .file_name
                    .clone()
                    .unwrap_or(generate_file_name(&module.spec.module_config)?);

                let desired = version_for_module(
                    &module,
                    &module_name,
                    &version_name,
                    &namespace,
                    &file_name,
                    &entry.version,
                );

                if existing.spec != desired.spec {
                    let desired_spec = desired.spec.clone();
                    update_on_conflict(&versions, &version_name, |current| {
                        current.spec = desired_spec.clone();
                    })
                    .await?;
                }

                refs.insert(
                    entry.version.clone(),
                    ModuleVersion {
                        file_name: Some(file_name),
                        name: version_name,
                        synced: existing.status.as_ref().map(|s| s.synced).unwrap_or(false),
                        version: String::new(),
                    },
                );
            }
        }
    }

    let latest = latest_version(&kept);
    if latest.is_none() && !kept.is_empty() {
        return Err(Error::version(
            "no entry in spec.versions parses as a semantic version",
        ));
    }

    // Rewrite the spec when the history limit trimmed it or a force-sync
    // kick needs to be acknowledged
    if kept.len() != module.spec.versions.len() || module.spec.force_sync {
        let kept_spec = kept.clone();
        update_on_conflict(&modules, &module_object_name, |current| {
            current.spec.versions = kept_spec.clone();
            current.spec.force_sync = false;
        })
        .await?;
    }

    // Single end-of-reconcile status write keeps the refs map from ever
    // being stranded half-built
    update_status_on_conflict(&modules, &module_object_name, |current| {
        let mut status = current.status.clone().unwrap_or_default();
        status.module_version_refs = refs.clone();
        status.latest_version = latest.clone();
        status.synced = true;
        status.sync_status = "Successfully synced module".to_string();
        current.status = Some(status);
    })
    .await?;

    reconcile_version_removals(&versions, &module_object_name, &namespace, &kept).await?;

    info!("successfully reconciled module");
    Ok(Action::await_change())
}

/// Error policy for the Module controller
pub fn error_policy(module: Arc<Module>, error: &Error, _ctx: Arc<Context>) -> Action {
    error!(error = %error, module = %module.name_any(), "module reconciliation failed");
    Action::requeue(ERROR_REQUEUE)
}

/// Deletes child Versions whose version string no longer appears in the
/// Module's spec. The child's finalizer then runs a storage delete before
/// the API removes the object.
async fn reconcile_version_removals(
    versions: &Api<Version>,
    module_object_name: &str,
    namespace: &str,
    kept: &[ModuleVersion],
) -> Result<()> {
    let selector = format!(
        "{LABEL_MODULE}={module_object_name},{LABEL_NAMESPACE}={namespace}"
    );
    let children = versions
        .list(&ListParams::default().labels(&selector))
        .await?;

    for child in children {
        let in_spec = kept.iter().any(|entry| entry.version == child.spec.version);
        if !in_spec {
            let child_name = child.name_any();
            warn!(version = %child.spec.version, child = %child_name, "deleting removed module version");
            versions.delete(&child_name, &DeleteParams::default()).await?;
        }
    }

    Ok(())
}

/// The module name used for storage paths and child naming:
/// `moduleConfig.name` when set, else the Module object's name.
pub fn resolved_module_name(module: &Module) -> String {
    module
        .spec
        .module_config
        .name
        .clone()
        .unwrap_or_else(|| module.name_any())
}

/// Generates a fresh `{uuidv7}.{fileFormat}` archive filename.
pub fn generate_file_name(config: &ModuleConfig) -> Result<String> {
    let format = config
        .file_format
        .as_deref()
        .ok_or_else(|| Error::config("moduleConfig.fileFormat must be set"))?;
    if format != "zip" && format != "tar" {
        return Err(Error::config(format!(
            "moduleConfig.fileFormat must be one of 'zip' or 'tar', got '{format}'"
        )));
    }

    Ok(format!("{}.{}", uuid::Uuid::now_v7(), format))
}

/// Builds the desired child Version for a spec entry, labelled back to its
/// parent and controller-owned by the Module. The module config is embedded
/// by value so the Version reconciler can run from its own spec.
fn version_for_module(
    module: &Module,
    module_name: &str,
    version_name: &str,
    namespace: &str,
    file_name: &str,
    version: &str,
) -> Version {
    let mut config = module.spec.module_config.clone();
    config.name = Some(module_name.to_string());

    let mut child = Version::new(
        version_name,
        VersionSpec {
            file_name: Some(file_name.to_string()),
            force_sync: false,
            module_config_ref: Some(config),
            provider_config_ref: None,
            type_: VERSION_TYPE_MODULE.to_string(),
            version: version.to_string(),
        },
    );

    child.metadata.namespace = Some(namespace.to_string());
    child.metadata.labels = Some(
        [
            (LABEL_MODULE.to_string(), module.name_any()),
            (LABEL_NAMESPACE.to_string(), namespace.to_string()),
        ]
        .into(),
    );
    // The owner reference ensures children are garbage collected with their
    // Module even if pruning never ran
    child.metadata.owner_references = module.controller_owner_ref(&()).map(|oref| vec![oref]);

    child
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::ModuleSpec;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

    fn sample_module(name: &str, config_name: Option<&str>) -> Module {
        Module {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some("ns".to_string()),
                uid: Some("uid-1".to_string()),
                ..Default::default()
            },
            spec: ModuleSpec {
                force_sync: false,
                module_config: ModuleConfig {
                    file_format: Some("zip".into()),
                    name: config_name.map(Into::into),
                    repo_owner: "acme".into(),
                    ..Default::default()
                },
                versions: vec![ModuleVersion::entry("v1.0.0")],
            },
            status: None,
        }
    }

    #[test]
    fn module_name_prefers_the_config_name() {
        assert_eq!(
            resolved_module_name(&sample_module("obj", Some("vpc"))),
            "vpc"
        );
        assert_eq!(resolved_module_name(&sample_module("obj", None)), "obj");
    }

    #[test]
    fn file_names_are_uuid_with_the_configured_extension() {
        let config = ModuleConfig {
            file_format: Some("zip".into()),
            ..Default::default()
        };

        let name = generate_file_name(&config).unwrap();
        assert!(name.ends_with(".zip"));
        assert!(uuid::Uuid::parse_str(name.trim_end_matches(".zip")).is_ok());

        // Filenames are unique per call; stability comes from persisting them
        assert_ne!(name, generate_file_name(&config).unwrap());
    }

    #[test]
    fn file_name_generation_validates_the_format() {
        let missing = ModuleConfig::default();
        assert!(generate_file_name(&missing).unwrap_err().is_config());

        let bad = ModuleConfig {
            file_format: Some("rar".into()),
            ..Default::default()
        };
        assert!(generate_file_name(&bad).unwrap_err().is_config());
    }

    #[test]
    fn desired_child_carries_labels_owner_and_embedded_config() {
        let module = sample_module("obj", Some("vpc"));
        let child = version_for_module(&module, "vpc", "vpc-1.0.0", "ns", "abc.zip", "v1.0.0");

        assert_eq!(child.name_any(), "vpc-1.0.0");
        assert_eq!(child.namespace().as_deref(), Some("ns"));

        let labels = child.metadata.labels.as_ref().unwrap();
        assert_eq!(labels.get(LABEL_MODULE).map(String::as_str), Some("obj"));
        assert_eq!(labels.get(LABEL_NAMESPACE).map(String::as_str), Some("ns"));

        assert_eq!(child.spec.type_, VERSION_TYPE_MODULE);
        assert_eq!(child.spec.version, "v1.0.0");
        assert_eq!(child.spec.file_name.as_deref(), Some("abc.zip"));

        let config = child.spec.module_config_ref.as_ref().unwrap();
        assert_eq!(config.name.as_deref(), Some("vpc"));
        assert_eq!(config.repo_owner, "acme");

        let owners = child.metadata.owner_references.as_ref().unwrap();
        assert_eq!(owners.len(), 1);
        assert_eq!(owners[0].kind, "Module");
        assert_eq!(owners[0].controller, Some(true));
    }

    #[test]
    fn child_names_sanitize_the_version() {
        let module = sample_module("obj", None);
        let sanitized = sanitize_version(&module.spec.versions[0].version);
        assert_eq!(
            format!("{}-{}", resolved_module_name(&module), sanitized),
            "obj-1.0.0"
        );
    }
}
