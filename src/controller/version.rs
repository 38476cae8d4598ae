//! Version controller
//!
//! Owns one archive's lifecycle in storage. A reconcile fetches the upstream
//! archive for the Version's ref, hashes it, and publishes it into the
//! configured backend, tolerating concurrent writers, partial uploads, and
//! conflicts on the cluster API. A finalizer guarantees the stored archive
//! is deleted before the object disappears.
//!
//! Workers for this controller are capped low: each in-flight reconcile may
//! hold a whole archive in memory and spends upstream API rate budget.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use kube::api::Api;
use kube::ResourceExt;
use kube::runtime::controller::Action;
use tracing::{debug, error, info, instrument, warn};

use crate::crd::{Module, ModuleConfig, StorageConfig, Version, VersionStatus};
use crate::github::{create_github_client, get_github_application_secret, ArchiveFormat};
use crate::retry::{update_on_conflict, update_status_on_conflict};
use crate::storage::{
    derive_file_path, storage_for, Storage, StorageMethod, StorageOperation,
};
use crate::{Error, Result, KERRAREG_FINALIZER, LABEL_MODULE, LABEL_NAMESPACE};

use super::Context;

const ERROR_REQUEUE: Duration = Duration::from_secs(30);
/// Short delay after adding the finalizer so the next pass observes a stable
/// object with the finalizer persisted.
const FINALIZER_REQUEUE: Duration = Duration::from_secs(1);
/// Delay while waiting for the Module controller's half of the handshake.
const HANDSHAKE_REQUEUE: Duration = Duration::from_secs(10);

const SYNC_OK: &str = "Successfully synced version";

/// Reconcile a Version resource
#[instrument(skip(version, ctx), fields(version = %version.name_any()))]
pub async fn reconcile(version: Arc<Version>, ctx: Arc<Context>) -> Result<Action> {
    let name = version.name_any();
    let namespace = version.namespace().unwrap_or_default();
    let versions: Api<Version> = Api::namespaced(ctx.client.clone(), &namespace);

    // Finalizer protocol runs before anything else
    if version.metadata.deletion_timestamp.is_some() {
        if has_finalizer(&version) {
            return finalize(&versions, &version).await;
        }
        return Ok(Action::await_change());
    }

    if !has_finalizer(&version) {
        update_on_conflict(&versions, &name, |current| {
            let finalizers = current.metadata.finalizers.get_or_insert_with(Vec::new);
            if !finalizers.iter().any(|f| f == KERRAREG_FINALIZER) {
                finalizers.push(KERRAREG_FINALIZER.to_string());
            }
        })
        .await?;
        return Ok(Action::requeue(FINALIZER_REQUEUE));
    }

    info!(version = %version.spec.version, "version found: starting reconciliation");

    if version.spec.module_config_ref.is_some() && version.spec.provider_config_ref.is_some() {
        record_sync_failure(
            &versions,
            &name,
            "Only one of 'moduleConfigRef' or 'providerConfigRef' can be provided: Both are defined",
        )
        .await?;
        return Ok(Action::await_change());
    }

    if version.spec.module_config_ref.is_none() {
        // The Provider kind is reserved; nothing to materialise yet
        record_sync_failure(&versions, &name, "Version has no moduleConfigRef").await?;
        return Ok(Action::await_change());
    }

    // Resolve the parent Module through the labels stamped at creation and
    // copy its config; the re-read picks up config changes on the parent
    let Some((parent_name, parent_namespace)) = parent_labels(&version) else {
        record_sync_failure(&versions, &name, "Version is missing its module labels").await?;
        return Ok(Action::await_change());
    };

    let modules: Api<Module> = Api::namespaced(ctx.client.clone(), &parent_namespace);
    let Some(module) = modules.get_opt(&parent_name).await? else {
        debug!(module = %parent_name, "parent module not found, waiting");
        return Ok(Action::requeue(HANDSHAKE_REQUEUE));
    };

    let module_name = module
        .spec
        .module_config
        .name
        .clone()
        .unwrap_or_else(|| parent_name.clone());
    let mut module_config = module.spec.module_config.clone();
    module_config.name = Some(module_name.clone());

    // The Module controller assigns the filename; until its status carries
    // one for this version the handshake is incomplete
    let status_ref = module
        .status
        .as_ref()
        .and_then(|s| s.module_version_refs.get(&version.spec.version));
    let Some(file_name) = version
        .spec
        .file_name
        .clone()
        .or_else(|| status_ref.and_then(|r| r.file_name.clone()))
    else {
        debug!("module has not assigned a filename yet, waiting");
        return Ok(Action::requeue(HANDSHAKE_REQUEUE));
    };
    if status_ref.is_none() {
        debug!("module status does not carry this version yet, waiting");
        return Ok(Action::requeue(HANDSHAKE_REQUEUE));
    }

    let Some(storage_config) = module_config
        .storage_config
        .clone()
        .filter(|config| !config.is_empty())
    else {
        record_sync_failure(&versions, &name, "at least one StorageConfig must be configured")
            .await?;
        return Ok(Action::await_change());
    };

    // Fetch the archive and hash it
    let archive = fetch_archive(&ctx, &namespace, &module_config, &file_name, &version).await;
    let (file_bytes, archive_checksum) = match archive {
        Ok(fetched) => fetched,
        Err(e) if e.is_config() => {
            record_sync_failure(&versions, &name, &e.to_string()).await?;
            return Ok(Action::await_change());
        }
        Err(e) => {
            warn!(error = %e, "failed to retrieve archive");
            record_sync_failure(&versions, &name, &format!("Failed to retrieve archive: {e}"))
                .await?;
            return Ok(Action::requeue(ERROR_REQUEUE));
        }
    };

    let status_checksum = version.status.as_ref().and_then(|s| s.checksum.clone());

    // Immutability gate: never overwrite storage once a checksum is pinned
    if let Some(message) =
        immutability_violation(&module_config, status_checksum.as_deref(), &archive_checksum)
    {
        error!(
            checksum = %archive_checksum,
            "checksum mismatch on immutable version"
        );
        record_sync_failure(&versions, &name, &message).await?;
        return Err(Error::ImmutableChecksum(message));
    }

    let storage = storage_for(&storage_config, &module_name)?;
    let file_path = derive_file_path(&storage_config, &module_name, &file_name);

    let uploaded = ensure_archive_stored(
        storage.as_ref(),
        status_checksum.as_deref(),
        &file_path,
        file_bytes,
        &archive_checksum,
    )
    .await?;
    if uploaded {
        info!(path = %file_path, "successfully put version in storage");
    } else {
        debug!(path = %file_path, "stored object already matches, skipping upload");
    }

    // Persist spec (filename, embedded config, force-sync acknowledgement)
    let desired_config = Some(module_config);
    let spec_changed = version.spec.file_name.as_deref() != Some(file_name.as_str())
        || version.spec.module_config_ref != desired_config
        || version.spec.force_sync;
    if spec_changed {
        let file_name = file_name.clone();
        update_on_conflict(&versions, &name, |current| {
            current.spec.file_name = Some(file_name.clone());
            current.spec.module_config_ref = desired_config.clone();
            current.spec.force_sync = false;
        })
        .await?;
    }

    // Persist status; skipped when already settled so a no-op reconcile
    // produces no new watch event
    let desired_status = VersionStatus {
        checksum: Some(archive_checksum.clone()),
        synced: true,
        sync_status: SYNC_OK.to_string(),
    };
    if version.status.as_ref() != Some(&desired_status) {
        update_status_on_conflict(&versions, &name, |current| {
            current.status = Some(desired_status.clone());
        })
        .await?;
    }

    info!(version = %version.spec.version, "successfully synced version");
    Ok(Action::await_change())
}

/// Error policy for the Version controller
pub fn error_policy(version: Arc<Version>, error: &Error, _ctx: Arc<Context>) -> Action {
    error!(error = %error, version = %version.name_any(), "version reconciliation failed");
    Action::requeue(ERROR_REQUEUE)
}

fn has_finalizer(version: &Version) -> bool {
    version
        .metadata
        .finalizers
        .as_ref()
        .map(|f| f.iter().any(|name| name == KERRAREG_FINALIZER))
        .unwrap_or(false)
}

/// Runs the storage delete and releases the finalizer. Failures propagate so
/// the framework retries; the API only drops the object once the finalizer
/// is gone.
async fn finalize(versions: &Api<Version>, version: &Version) -> Result<Action> {
    let name = version.name_any();

    if let Some((storage_config, op)) = deletion_target(version) {
        let storage = storage_for(&storage_config, &deletion_module_name(version))?;
        storage.delete_object(&op).await?;
        info!(path = %op.file_path, "deleted stored archive for version");
    } else {
        // Never synced far enough to own a key; nothing to delete
        debug!("version has no storage footprint, releasing finalizer");
    }

    update_on_conflict(versions, &name, |current| {
        if let Some(finalizers) = current.metadata.finalizers.as_mut() {
            finalizers.retain(|f| f != KERRAREG_FINALIZER);
        }
    })
    .await?;

    Ok(Action::await_change())
}

/// Builds the Delete operation for a deleting Version, or None when the
/// object never acquired a filename and storage config.
fn deletion_target(version: &Version) -> Option<(StorageConfig, StorageOperation)> {
    let config = version.spec.module_config_ref.as_ref()?;
    let storage_config = config.storage_config.clone().filter(|c| !c.is_empty())?;
    let file_name = version.spec.file_name.as_ref()?;

    let module_name = deletion_module_name(version);
    let file_path = derive_file_path(&storage_config, &module_name, file_name);
    Some((
        storage_config,
        StorageOperation::new(StorageMethod::Delete, file_path),
    ))
}

fn deletion_module_name(version: &Version) -> String {
    version
        .spec
        .module_config_ref
        .as_ref()
        .and_then(|c| c.name.clone())
        .or_else(|| version.labels().get(LABEL_MODULE).cloned())
        .unwrap_or_default()
}

fn parent_labels(version: &Version) -> Option<(String, String)> {
    let labels = version.labels();
    let module = labels.get(LABEL_MODULE)?.clone();
    let namespace = labels.get(LABEL_NAMESPACE)?.clone();
    Some((module, namespace))
}

async fn fetch_archive(
    ctx: &Context,
    namespace: &str,
    module_config: &ModuleConfig,
    file_name: &str,
    version: &Version,
) -> Result<(Bytes, String)> {
    let use_authenticated = module_config
        .github_client_config
        .as_ref()
        .map(|c| c.use_authenticated_client)
        .unwrap_or(false);

    let github = if use_authenticated {
        let app_config = get_github_application_secret(&ctx.client, namespace).await?;
        let client = create_github_client(true, Some(&app_config)).await?;
        debug!("created authenticated github client");
        client
    } else {
        create_github_client(false, None).await?
    };

    let repo_name = module_config
        .name
        .as_deref()
        .ok_or_else(|| Error::config("moduleConfigRef.name must be set"))?;

    github
        .get_module_archive(
            &module_config.repo_owner,
            repo_name,
            ArchiveFormat::from_file_name(file_name),
            &version.spec.version,
        )
        .await
}

/// Returns the immutability-violation status message when the gate trips:
/// the config is immutable, a checksum is already pinned on status, and the
/// freshly fetched archive hashes differently.
fn immutability_violation(
    config: &ModuleConfig,
    status_checksum: Option<&str>,
    archive_checksum: &str,
) -> Option<String> {
    let immutable = config.immutable.unwrap_or(false);
    match status_checksum {
        Some(pinned) if immutable && pinned != archive_checksum => Some(format!(
            "Version is marked immutable: archive checksum doesn't match spec: got '{archive_checksum}'"
        )),
        _ => None,
    }
}

/// Decides whether storage needs a Put and performs it.
///
/// A Version that never synced uploads unconditionally. Otherwise the backend
/// is asked for the stored checksum first: a missing object or a checksum
/// that differs from the pinned one (a partial or torn write) re-uploads;
/// a matching object is a no-op. Returns whether an upload happened.
async fn ensure_archive_stored(
    storage: &dyn Storage,
    status_checksum: Option<&str>,
    file_path: &str,
    file_bytes: Bytes,
    archive_checksum: &str,
) -> Result<bool> {
    let needs_put = match status_checksum {
        None => true,
        Some(pinned) => {
            let mut probe = StorageOperation::new(StorageMethod::Get, file_path);
            storage.get_object_checksum(&mut probe).await?;
            !probe.file_exists || probe.object_checksum.as_deref() != Some(pinned)
        }
    };

    if !needs_put {
        return Ok(false);
    }

    let put = StorageOperation::new(StorageMethod::Put, file_path)
        .with_archive(file_bytes, archive_checksum);
    storage.put_object(&put).await?;
    Ok(true)
}

async fn record_sync_failure(versions: &Api<Version>, name: &str, message: &str) -> Result<()> {
    warn!(status = %message, "recording sync failure");
    update_status_on_conflict(versions, name, |current| {
        let mut status = current.status.clone().unwrap_or_default();
        status.synced = false;
        status.sync_status = message.to_string();
        current.status = Some(status);
    })
    .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::{
        AmazonS3Config, FileSystemConfig, StorageConfig, VersionSpec,
    };
    use crate::storage::MockStorage;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

    fn immutable_config() -> ModuleConfig {
        ModuleConfig {
            immutable: Some(true),
            ..Default::default()
        }
    }

    fn sample_version(file_name: Option<&str>, config: Option<ModuleConfig>) -> Version {
        Version {
            metadata: ObjectMeta {
                name: Some("vpc-1.0.0".to_string()),
                namespace: Some("ns".to_string()),
                labels: Some(
                    [
                        (LABEL_MODULE.to_string(), "vpc".to_string()),
                        (LABEL_NAMESPACE.to_string(), "ns".to_string()),
                    ]
                    .into(),
                ),
                ..Default::default()
            },
            spec: VersionSpec {
                file_name: file_name.map(Into::into),
                module_config_ref: config,
                version: "1.0.0".to_string(),
                ..Default::default()
            },
            status: None,
        }
    }

    #[test]
    fn immutability_gate_trips_only_on_a_pinned_mismatch() {
        let config = immutable_config();

        // Never synced: no pinned checksum, no violation
        assert!(immutability_violation(&config, None, "B=").is_none());

        // Synced and unchanged
        assert!(immutability_violation(&config, Some("A="), "A=").is_none());

        // Synced, drifted, immutable
        let message = immutability_violation(&config, Some("A="), "B=").unwrap();
        assert!(message.contains("Version is marked immutable"));
        assert!(message.contains("'B='"));

        // Mutable versions may drift freely
        let mutable = ModuleConfig::default();
        assert!(immutability_violation(&mutable, Some("A="), "B=").is_none());
    }

    #[tokio::test]
    async fn first_sync_always_uploads() {
        let mut storage = MockStorage::new();
        storage.expect_get_object_checksum().never();
        storage
            .expect_put_object()
            .withf(|op| {
                op.file_path == "vpc/a.zip"
                    && op.archive_checksum.as_deref() == Some("CHK=")
                    && op.file_bytes.is_some()
            })
            .once()
            .returning(|_| Ok(()));

        let uploaded = ensure_archive_stored(
            &storage,
            None,
            "vpc/a.zip",
            Bytes::from_static(b"archive"),
            "CHK=",
        )
        .await
        .unwrap();
        assert!(uploaded);
    }

    #[tokio::test]
    async fn matching_stored_checksum_is_a_no_op() {
        let mut storage = MockStorage::new();
        storage
            .expect_get_object_checksum()
            .once()
            .returning(|op| {
                op.file_exists = true;
                op.object_checksum = Some("CHK=".to_string());
                Ok(())
            });
        storage.expect_put_object().never();

        let uploaded = ensure_archive_stored(
            &storage,
            Some("CHK="),
            "vpc/a.zip",
            Bytes::from_static(b"archive"),
            "CHK=",
        )
        .await
        .unwrap();
        assert!(!uploaded);
    }

    #[tokio::test]
    async fn missing_or_torn_objects_are_reuploaded() {
        // Missing object
        let mut storage = MockStorage::new();
        storage
            .expect_get_object_checksum()
            .once()
            .returning(|op| {
                op.file_exists = false;
                Ok(())
            });
        storage.expect_put_object().once().returning(|_| Ok(()));

        let uploaded = ensure_archive_stored(
            &storage,
            Some("CHK="),
            "vpc/a.zip",
            Bytes::from_static(b"archive"),
            "CHK=",
        )
        .await
        .unwrap();
        assert!(uploaded);

        // Torn write: stored checksum differs from the pinned one
        let mut storage = MockStorage::new();
        storage
            .expect_get_object_checksum()
            .once()
            .returning(|op| {
                op.file_exists = true;
                op.object_checksum = Some("TORN=".to_string());
                Ok(())
            });
        storage.expect_put_object().once().returning(|_| Ok(()));

        let uploaded = ensure_archive_stored(
            &storage,
            Some("CHK="),
            "vpc/a.zip",
            Bytes::from_static(b"archive"),
            "CHK=",
        )
        .await
        .unwrap();
        assert!(uploaded);
    }

    #[test]
    fn deletion_operation_derives_the_stored_path() {
        let config = ModuleConfig {
            name: Some("vpc".into()),
            storage_config: Some(StorageConfig {
                s3: Some(AmazonS3Config {
                    bucket: "b".into(),
                    key: None,
                    region: "us-west-2".into(),
                }),
                ..Default::default()
            }),
            ..Default::default()
        };

        let version = sample_version(Some("a.zip"), Some(config));
        let (storage_config, op) = deletion_target(&version).unwrap();
        assert!(storage_config.s3.is_some());
        assert_eq!(op.method, StorageMethod::Delete);
        assert_eq!(op.file_path, "vpc/a.zip");
    }

    #[test]
    fn versions_without_a_footprint_have_nothing_to_delete() {
        // No config at all
        assert!(deletion_target(&sample_version(Some("a.zip"), None)).is_none());

        // Config but no filename assigned yet
        let config = ModuleConfig {
            storage_config: Some(StorageConfig {
                file_system: Some(FileSystemConfig {
                    directory_path: Some("/var/kerrareg".into()),
                }),
                ..Default::default()
            }),
            ..Default::default()
        };
        assert!(deletion_target(&sample_version(None, Some(config.clone()))).is_none());

        // Config with an empty storage section
        let empty = ModuleConfig {
            storage_config: Some(StorageConfig::default()),
            ..Default::default()
        };
        assert!(deletion_target(&sample_version(Some("a.zip"), Some(empty))).is_none());
    }

    #[test]
    fn parent_labels_resolve_from_metadata() {
        let version = sample_version(Some("a.zip"), None);
        let (module, namespace) = parent_labels(&version).unwrap();
        assert_eq!(module, "vpc");
        assert_eq!(namespace, "ns");

        let mut unlabelled = sample_version(None, None);
        unlabelled.metadata.labels = None;
        assert!(parent_labels(&unlabelled).is_none());
    }

    #[test]
    fn finalizer_detection_matches_the_kerrareg_finalizer() {
        let mut version = sample_version(None, None);
        assert!(!has_finalizer(&version));

        version.metadata.finalizers = Some(vec!["other.io/finalizer".to_string()]);
        assert!(!has_finalizer(&version));

        version
            .metadata
            .finalizers
            .as_mut()
            .unwrap()
            .push(KERRAREG_FINALIZER.to_string());
        assert!(has_finalizer(&version));
    }
}
