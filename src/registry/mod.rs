//! Terraform module-registry protocol service
//!
//! A read-only HTTP service that answers registry protocol requests from
//! Module and Version objects in the cluster, and streams archive bytes out
//! of the storage backends. Cluster reads always use the caller's own
//! credential, passed through the `Authorization` header.

mod auth;
mod handlers;
mod server;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

pub use handlers::{
    ModuleVersions, ModuleVersionsResponse, ServiceDiscoveryResponse, MODULES_V1_PREFIX,
};
pub use server::{router, serve, RegistryConfig, RegistryState};

/// Errors surfaced by the registry handlers, mapped onto HTTP statuses.
#[derive(Debug)]
pub enum ApiError {
    /// Missing or undecodable caller credential.
    Unauthorized(String),
    /// The requested Module or Version does not exist.
    NotFound(String),
    /// Anything else, including storage checksum mismatches. The body never
    /// leaks internals.
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::Unauthorized(message) => {
                tracing::warn!(error = %message, "unauthorized request");
                (StatusCode::UNAUTHORIZED, "missing Authorization header").into_response()
            }
            ApiError::NotFound(message) => {
                tracing::debug!(error = %message, "object not found");
                (StatusCode::NOT_FOUND, "not found").into_response()
            }
            ApiError::Internal(message) => {
                tracing::error!(error = %message, "internal server error");
                (StatusCode::INTERNAL_SERVER_ERROR, "internal server error").into_response()
            }
        }
    }
}

impl From<crate::Error> for ApiError {
    fn from(err: crate::Error) -> Self {
        match err {
            crate::Error::Kube(kube::Error::Api(ae)) if ae.code == 404 => {
                ApiError::NotFound(ae.message)
            }
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl From<kube::Error> for ApiError {
    fn from(err: kube::Error) -> Self {
        ApiError::from(crate::Error::Kube(err))
    }
}
