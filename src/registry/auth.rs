//! Caller authentication for the registry service
//!
//! Two modes, selected by a server flag:
//! - default: the `Authorization: Bearer` value is a base64-encoded
//!   kubeconfig, decoded and used as the caller's full cluster config;
//! - bearer-token mode: the raw token is combined with the service's own
//!   in-cluster TLS settings.
//!
//! Either way the service reads cluster objects as the caller, never with
//! its own elevated credential.

use axum::http::header::AUTHORIZATION;
use axum::http::HeaderMap;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Client, Config};
use secrecy::SecretString;

use super::ApiError;

/// Builds a Kubernetes client from the request's Authorization header.
pub async fn client_from_headers(
    headers: &HeaderMap,
    use_bearer_token: bool,
) -> Result<Client, ApiError> {
    let token = extract_bearer(headers)?;

    let config = if use_bearer_token {
        let mut config = Config::incluster()
            .map_err(|e| ApiError::Internal(format!("unable to load in-cluster config: {e}")))?;
        config.auth_info.token = Some(SecretString::from(token));
        config
    } else {
        let kubeconfig_bytes = BASE64
            .decode(token)
            .map_err(|e| ApiError::Unauthorized(format!("unable to decode kubeconfig: {e}")))?;
        let kubeconfig: Kubeconfig = serde_yaml::from_slice(&kubeconfig_bytes)
            .map_err(|e| ApiError::Unauthorized(format!("unable to parse kubeconfig: {e}")))?;

        Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
            .await
            .map_err(|e| ApiError::Unauthorized(format!("unable to load kubeconfig: {e}")))?
    };

    Client::try_from(config)
        .map_err(|e| ApiError::Internal(format!("unable to build kubernetes client: {e}")))
}

/// Pulls the bearer value out of the Authorization header.
pub fn extract_bearer(headers: &HeaderMap) -> Result<String, ApiError> {
    let header = headers
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .ok_or_else(|| ApiError::Unauthorized("missing Authorization header".to_string()))?;

    Ok(header.trim_start_matches("Bearer ").to_string())
}
