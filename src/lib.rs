//! Kerrareg - a self-hosted Terraform/OpenTofu module registry driven by
//! Kubernetes custom resources.
//!
//! Users declare which upstream module repositories and which versions they
//! want exposed; Kerrareg mirrors those versions from GitHub into an object
//! storage backend, computes cryptographic checksums, and serves a
//! registry-protocol API that Terraform can consume.
//!
//! # Architecture
//!
//! Three controllers form a one-way desired-state pipeline:
//! - A `Depot` resolves version constraints against upstream release tags and
//!   materialises `Module` objects.
//! - A `Module` owns one child `Version` object per declared version and
//!   tracks the latest release.
//! - A `Version` fetches the upstream archive, hashes it, and publishes it
//!   into the configured storage backend.
//!
//! A separate read-only HTTP service answers Terraform module-registry
//! protocol requests from the same cluster state.
//!
//! # Modules
//!
//! - [`crd`] - Custom Resource Definitions (Depot, Module, Version)
//! - [`controller`] - reconciliation logic for the three kinds
//! - [`github`] - upstream client (archive fetch, App authentication)
//! - [`versions`] - semver sanitisation and constraint resolution
//! - [`storage`] - the storage abstraction and its four backends
//! - [`registry`] - the Terraform registry protocol HTTP service
//! - [`retry`] - conflict-aware retry helpers for cluster API writes
//! - [`error`] - error types

#![deny(missing_docs)]

pub mod controller;
pub mod crd;
pub mod error;
pub mod github;
pub mod registry;
pub mod retry;
pub mod storage;
pub mod versions;

pub use error::Error;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

// =============================================================================
// Shared constants
// =============================================================================
// Names that appear both on cluster objects and in external contracts
// (secret layout, labels, finalizers) are centralized here so the controllers
// and the registry service agree on them.

/// Finalizer placed on every Version object. The Version controller removes it
/// only after a storage delete has been attempted.
pub const KERRAREG_FINALIZER: &str = "kerrareg.io/finalizer";

/// Label on a Version naming its parent Module.
pub const LABEL_MODULE: &str = "kerrareg.io/module";

/// Label on a Version naming its parent Module's namespace.
pub const LABEL_NAMESPACE: &str = "kerrareg.io/namespace";

/// Name of the namespaced Secret holding GitHub App credentials.
pub const GITHUB_SECRET_NAME: &str = "kerrareg-github-application-secret";

/// Secret data key for the GitHub App ID (int64 as text).
pub const GITHUB_SECRET_FIELD_APP_ID: &str = "githubAppID";

/// Secret data key for the GitHub App installation ID (int64 as text).
pub const GITHUB_SECRET_FIELD_INSTALL_ID: &str = "githubInstallID";

/// Secret data key for the base64-encoded PEM of the App's RSA private key.
pub const GITHUB_SECRET_FIELD_PRIVATE_KEY: &str = "githubPrivateKey";

/// Version.spec.type value for module versions.
pub const VERSION_TYPE_MODULE: &str = "Module";

/// Version.spec.type value reserved for provider versions.
pub const VERSION_TYPE_PROVIDER: &str = "Provider";
