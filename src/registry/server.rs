//! Registry HTTP server wiring

use std::net::SocketAddr;

use axum::routing::get;
use axum::Router;
use tracing::info;

use super::handlers;

/// Configuration for the registry service.
#[derive(Clone, Debug)]
pub struct RegistryConfig {
    /// Listen address.
    pub addr: SocketAddr,
    /// When true the Authorization header carries a raw bearer token and the
    /// service's own in-cluster TLS settings are used for cluster reads;
    /// otherwise the header carries a base64-encoded kubeconfig.
    pub use_bearer_token: bool,
    /// TLS certificate path; plain HTTP when unset.
    pub tls_cert: Option<String>,
    /// TLS private key path.
    pub tls_key: Option<String>,
}

/// Shared handler state.
#[derive(Clone, Copy, Debug)]
pub struct RegistryState {
    /// See [`RegistryConfig::use_bearer_token`].
    pub use_bearer_token: bool,
}

/// Builds the registry protocol router.
pub fn router(state: RegistryState) -> Router {
    Router::new()
        .route(
            "/.well-known/terraform.json",
            get(handlers::service_discovery),
        )
        .route(
            "/kerrareg/modules/v1/{namespace}/{name}/{system}/versions",
            get(handlers::get_module_versions),
        )
        .route(
            "/kerrareg/modules/v1/{namespace}/{name}/{system}/{version}/download",
            get(handlers::get_download_module_url),
        )
        .route(
            "/kerrareg/modules/v1/download/azure/{subID}/{rg}/{account}/{accountUrl}/{name}/{fileName}",
            get(handlers::serve_module_from_azure),
        )
        .route(
            "/kerrareg/modules/v1/download/fileSystem/{directory}/{name}/{fileName}",
            get(handlers::serve_module_from_filesystem),
        )
        .route(
            "/kerrareg/modules/v1/download/gcs/{bucket}/{name}/{fileName}",
            get(handlers::serve_module_from_gcs),
        )
        .route(
            "/kerrareg/modules/v1/download/s3/{bucket}/{region}/{name}/{fileName}",
            get(handlers::serve_module_from_s3),
        )
        .with_state(state)
}

/// Runs the registry service until the process is stopped.
pub async fn serve(config: RegistryConfig) -> anyhow::Result<()> {
    let state = RegistryState {
        use_bearer_token: config.use_bearer_token,
    };
    let app = router(state);

    match (&config.tls_cert, &config.tls_key) {
        (Some(cert), Some(key)) => {
            let tls = axum_server::tls_rustls::RustlsConfig::from_pem_file(cert, key)
                .await
                .map_err(|e| anyhow::anyhow!("failed to configure TLS: {e}"))?;

            info!(addr = %config.addr, "registry HTTPS server listening");
            axum_server::bind_rustls(config.addr, tls)
                .serve(app.into_make_service())
                .await?;
        }
        _ => {
            info!(addr = %config.addr, "registry HTTP server listening");
            axum_server::bind(config.addr)
                .serve(app.into_make_service())
                .await?;
        }
    }

    Ok(())
}
