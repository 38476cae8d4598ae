//! Controller implementations for the Kerrareg CRDs
//!
//! Three reconcilers arranged so state flows strictly one way:
//! Depot creates Modules, Module creates Versions, Version writes storage.
//! Each reconcile is synchronous within its worker and owns every client it
//! needs - no package-level state is shared between workers.

pub mod depot;
pub mod module;
pub mod version;

use kube::Client;

/// Shared controller context.
///
/// Holds only the Kubernetes client; storage and upstream clients are built
/// per reconcile because rebinding them in shared state would race once a
/// controller runs more than one worker.
pub struct Context {
    /// Kubernetes client for API operations.
    pub client: Client,
}

impl Context {
    /// Create a new controller context with the given Kubernetes client.
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}
