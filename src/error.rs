//! Error types for Kerrareg

use thiserror::Error;

/// Main error type for Kerrareg operations
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Kubernetes API error
    #[error("kubernetes error: {0}")]
    Kube(#[from] kube::Error),

    /// Storage backend error
    #[error("storage error: {0}")]
    Storage(#[from] object_store::Error),

    /// Upstream HTTP error (GitHub API or archive download)
    #[error("github error: {0}")]
    Http(#[from] reqwest::Error),

    /// JWT signing error during GitHub App authentication
    #[error("jwt error: {0}")]
    Jwt(#[from] jsonwebtoken::errors::Error),

    /// Serialization/deserialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Bad object configuration that the user must fix
    #[error("configuration error: {0}")]
    Config(String),

    /// Upstream returned something other than the expected archive redirect,
    /// or the ref could not be resolved
    #[error("upstream error: {0}")]
    Upstream(String),

    /// A version string or constraint expression failed to parse
    #[error("version error: {0}")]
    Version(String),

    /// An immutable Version's archive checksum diverged from its recorded one
    #[error("{0}")]
    ImmutableChecksum(String),

    /// An optimistic-concurrency retry loop gave up after repeated conflicts
    #[error("conflict error: {0}")]
    Conflict(String),
}

impl Error {
    /// Create a configuration error with the given message
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create an upstream error with the given message
    pub fn upstream(msg: impl Into<String>) -> Self {
        Self::Upstream(msg.into())
    }

    /// Create a version-parsing error with the given message
    pub fn version(msg: impl Into<String>) -> Self {
        Self::Version(msg.into())
    }

    /// Returns true when the error is a user-configuration problem that no
    /// amount of retrying will fix.
    pub fn is_config(&self) -> bool {
        matches!(self, Self::Config(_))
    }
}
