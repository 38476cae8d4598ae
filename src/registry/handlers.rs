//! Registry protocol handlers
//!
//! The protocol surface is small: service discovery, a version listing, a
//! download-URL redirect (204 + `X-Terraform-Get`), and one streaming
//! download endpoint per storage backend. Download endpoints verify that the
//! stored object's checksum still equals the `fileChecksum` the redirect was
//! minted with; a drifted archive is a hard 500, never a silent serve.

use axum::body::Body;
use axum::extract::{Path, Query, State};
use axum::http::header::CONTENT_TYPE;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use kube::api::Api;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::crd::{
    AmazonS3Config, AzureStorageConfig, GoogleCloudStorageConfig, Module, ModuleVersion, Version,
};
use crate::storage::{
    content_type_for, AmazonS3Storage, AzureBlobStorage, FileSystem, GoogleCloudStorage, Storage,
    StorageMethod, StorageOperation,
};

use super::auth::client_from_headers;
use super::{ApiError, RegistryState};

/// Base path of the modules protocol, advertised by service discovery.
pub const MODULES_V1_PREFIX: &str = "/kerrareg/modules/v1/";

/// Body of `/.well-known/terraform.json`.
#[derive(Debug, Serialize, Deserialize)]
pub struct ServiceDiscoveryResponse {
    /// Path prefix of the modules protocol.
    #[serde(rename = "modules.v1")]
    pub modules_v1: String,
}

/// Body of the versions listing endpoint.
#[derive(Debug, Serialize, Deserialize)]
pub struct ModuleVersionsResponse {
    /// The single module whose versions are listed.
    pub modules: Vec<ModuleVersions>,
}

/// One module's version list.
#[derive(Debug, Serialize, Deserialize)]
pub struct ModuleVersions {
    /// The declared versions of the module.
    pub versions: Vec<ModuleVersion>,
}

#[derive(Debug, Default, Deserialize)]
pub(super) struct ChecksumQuery {
    #[serde(default, rename = "fileChecksum")]
    file_checksum: String,
}

/// `GET /.well-known/terraform.json`
pub(super) async fn service_discovery() -> Json<ServiceDiscoveryResponse> {
    Json(ServiceDiscoveryResponse {
        modules_v1: MODULES_V1_PREFIX.to_string(),
    })
}

/// `GET /kerrareg/modules/v1/{namespace}/{name}/{system}/versions`
pub(super) async fn get_module_versions(
    State(state): State<RegistryState>,
    Path((namespace, name, _system)): Path<(String, String, String)>,
    headers: HeaderMap,
) -> Result<Json<ModuleVersionsResponse>, ApiError> {
    let client = client_from_headers(&headers, state.use_bearer_token).await?;
    let modules: Api<Module> = Api::namespaced(client, &namespace);
    let module = modules.get(&name).await?;

    Ok(Json(ModuleVersionsResponse {
        modules: vec![ModuleVersions {
            versions: module.spec.versions,
        }],
    }))
}

/// `GET /kerrareg/modules/v1/{namespace}/{name}/{system}/{version}/download`
///
/// Answers 204 with an `X-Terraform-Get` header pointing at the matching
/// backend download endpoint, carrying the pinned checksum as a query
/// parameter.
pub(super) async fn get_download_module_url(
    State(state): State<RegistryState>,
    Path((namespace, name, _system, version)): Path<(String, String, String, String)>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let client = client_from_headers(&headers, state.use_bearer_token).await?;
    let versions: Api<Version> = Api::namespaced(client, &namespace);

    let version_name = format!("{name}-{version}");
    let module_version = versions.get(&version_name).await?;

    let download_path = download_path(&module_version)?;
    let checksum = module_version
        .status
        .as_ref()
        .and_then(|s| s.checksum.clone())
        .ok_or_else(|| {
            ApiError::Internal(format!("version '{version_name}' has no checksum yet"))
        })?;

    let target = format!(
        "{MODULES_V1_PREFIX}download/{download_path}?fileChecksum={}",
        escape(&checksum)
    );
    debug!(version = %version_name, target = %target, "minted download url");

    Ok((
        StatusCode::NO_CONTENT,
        [("X-Terraform-Get", target)],
    )
        .into_response())
}

/// Builds the backend-specific segment of the download URL for a Version.
fn download_path(version: &Version) -> Result<String, ApiError> {
    let config = version
        .spec
        .module_config_ref
        .as_ref()
        .ok_or_else(|| ApiError::Internal("version has no moduleConfigRef".to_string()))?;
    let storage = config
        .storage_config
        .as_ref()
        .ok_or_else(|| ApiError::Internal("version has no storage config".to_string()))?;
    let module_name = config
        .name
        .clone()
        .ok_or_else(|| ApiError::Internal("version has no module name".to_string()))?;
    let file_name = version
        .spec
        .file_name
        .clone()
        .ok_or_else(|| ApiError::Internal("version has no file name".to_string()))?;

    if let Some(azure) = &storage.azure_storage {
        return Ok(format!(
            "azure/{}/{}/{}/{}/{}/{}",
            azure.subscription_id,
            azure.resource_group,
            azure.account_name,
            escape(&azure.account_url),
            module_name,
            file_name
        ));
    }

    if let Some(fs) = &storage.file_system {
        let directory = fs.directory_path.clone().unwrap_or_default();
        return Ok(format!(
            "fileSystem/{}/{}/{}",
            escape(&directory),
            module_name,
            file_name
        ));
    }

    if let Some(s3) = &storage.s3 {
        return Ok(format!(
            "s3/{}/{}/{}/{}",
            s3.bucket, s3.region, module_name, file_name
        ));
    }

    if let Some(gcs) = &storage.gcs {
        return Ok(format!(
            "gcs/{}/{}/{}",
            gcs.bucket, module_name, file_name
        ));
    }

    Err(ApiError::Internal(
        "version has no configured storage backend".to_string(),
    ))
}

/// `GET …/download/s3/{bucket}/{region}/{name}/{fileName}`
pub(super) async fn serve_module_from_s3(
    Path((bucket, region, name, file_name)): Path<(String, String, String, String)>,
    Query(query): Query<ChecksumQuery>,
) -> Result<Response, ApiError> {
    let storage = AmazonS3Storage::new(&AmazonS3Config {
        bucket,
        key: None,
        region,
    })?;

    let file_path = format!("{name}/{file_name}");
    stream_checked(&storage, &file_path, &query.file_checksum).await
}

/// `GET …/download/azure/{subID}/{rg}/{account}/{accountUrl}/{name}/{fileName}`
pub(super) async fn serve_module_from_azure(
    Path((subscription_id, resource_group, account_name, account_url, name, file_name)): Path<(
        String,
        String,
        String,
        String,
        String,
        String,
    )>,
    Query(query): Query<ChecksumQuery>,
) -> Result<Response, ApiError> {
    let config = AzureStorageConfig {
        account_name,
        account_url,
        subscription_id,
        resource_group,
    };
    let storage = AzureBlobStorage::new(&config, &name)?;

    // The module name is the container; the blob path is the bare file name
    stream_checked(&storage, &file_name, &query.file_checksum).await
}

/// `GET …/download/gcs/{bucket}/{name}/{fileName}`
pub(super) async fn serve_module_from_gcs(
    Path((bucket, name, file_name)): Path<(String, String, String)>,
    Query(query): Query<ChecksumQuery>,
) -> Result<Response, ApiError> {
    let storage = GoogleCloudStorage::new(&GoogleCloudStorageConfig { bucket })?;

    let file_path = format!("{name}/{file_name}");
    stream_checked(&storage, &file_path, &query.file_checksum).await
}

/// `GET …/download/fileSystem/{directory}/{name}/{fileName}`
pub(super) async fn serve_module_from_filesystem(
    Path((directory, name, file_name)): Path<(String, String, String)>,
    Query(query): Query<ChecksumQuery>,
) -> Result<Response, ApiError> {
    let storage = FileSystem::new();

    let file_path = format!(
        "{}/{}/{}",
        crate::storage::trim_trailing_slash(&directory),
        name,
        file_name
    );
    stream_checked(&storage, &file_path, &query.file_checksum).await
}

/// Validates the stored object's checksum against the expected one and, when
/// it matches, streams the archive with the right content type. A mismatch is
/// a 500 - the archive drifted since the redirect was minted.
async fn stream_checked(
    storage: &dyn Storage,
    file_path: &str,
    expected_checksum: &str,
) -> Result<Response, ApiError> {
    let mut probe = StorageOperation::new(StorageMethod::Get, file_path);
    storage.get_object_checksum(&mut probe).await?;

    if !probe.file_exists {
        return Err(ApiError::Internal(format!(
            "stored object '{file_path}' does not exist"
        )));
    }

    if let Some(stored) = &probe.object_checksum {
        if stored != expected_checksum {
            return Err(ApiError::Internal(format!(
                "checksum mismatch for '{file_path}': want '{expected_checksum}', stored '{stored}'"
            )));
        }
    }

    let stream = storage.get_object(&probe).await?;

    Ok((
        StatusCode::OK,
        [(CONTENT_TYPE, content_type_for(file_path))],
        Body::from_stream(stream),
    )
        .into_response())
}

fn escape(raw: &str) -> String {
    url::form_urlencoded::byte_serialize(raw.as_bytes()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::{FileSystemConfig, ModuleConfig, StorageConfig, VersionSpec, VersionStatus};
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

    fn version_with_storage(storage: StorageConfig) -> Version {
        Version {
            metadata: ObjectMeta {
                name: Some("vpc-1.0.0".to_string()),
                ..Default::default()
            },
            spec: VersionSpec {
                file_name: Some("abc.zip".to_string()),
                module_config_ref: Some(ModuleConfig {
                    name: Some("vpc".to_string()),
                    storage_config: Some(storage),
                    ..Default::default()
                }),
                version: "1.0.0".to_string(),
                ..Default::default()
            },
            status: Some(VersionStatus {
                checksum: Some("CHK+/=".to_string()),
                synced: true,
                sync_status: String::new(),
            }),
        }
    }

    #[test]
    fn s3_download_path_has_bucket_region_name_file() {
        let version = version_with_storage(StorageConfig {
            s3: Some(AmazonS3Config {
                bucket: "b".into(),
                key: None,
                region: "us-west-2".into(),
            }),
            ..Default::default()
        });

        assert_eq!(
            download_path(&version).unwrap(),
            "s3/b/us-west-2/vpc/abc.zip"
        );
    }

    #[test]
    fn azure_download_path_escapes_the_account_url() {
        let version = version_with_storage(StorageConfig {
            azure_storage: Some(AzureStorageConfig {
                account_name: "acct".into(),
                account_url: "https://acct.blob.core.windows.net".into(),
                subscription_id: "sub".into(),
                resource_group: "rg".into(),
            }),
            ..Default::default()
        });

        let path = download_path(&version).unwrap();
        assert!(path.starts_with("azure/sub/rg/acct/"));
        assert!(path.ends_with("/vpc/abc.zip"));
        assert!(path.contains("https%3A%2F%2F"));
    }

    #[test]
    fn filesystem_download_path_escapes_the_directory() {
        let version = version_with_storage(StorageConfig {
            file_system: Some(FileSystemConfig {
                directory_path: Some("/var/kerrareg".into()),
            }),
            ..Default::default()
        });

        assert_eq!(
            download_path(&version).unwrap(),
            "fileSystem/%2Fvar%2Fkerrareg/vpc/abc.zip"
        );
    }

    #[test]
    fn gcs_download_path_has_bucket_name_file() {
        let version = version_with_storage(StorageConfig {
            gcs: Some(GoogleCloudStorageConfig { bucket: "b".into() }),
            ..Default::default()
        });

        assert_eq!(download_path(&version).unwrap(), "gcs/b/vpc/abc.zip");
    }

    #[test]
    fn checksum_escaping_covers_base64_characters() {
        assert_eq!(escape("a+b/c="), "a%2Bb%2Fc%3D");
    }

    #[test]
    fn versions_response_shape_matches_the_protocol() {
        let response = ModuleVersionsResponse {
            modules: vec![ModuleVersions {
                versions: vec![ModuleVersion::entry("1.0.0")],
            }],
        };

        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["modules"][0]["versions"][0]["version"], "1.0.0");
    }

    #[test]
    fn service_discovery_advertises_the_modules_prefix() {
        let body = ServiceDiscoveryResponse {
            modules_v1: MODULES_V1_PREFIX.to_string(),
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["modules.v1"], "/kerrareg/modules/v1/");
    }
}
