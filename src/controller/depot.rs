//! Depot controller
//!
//! Translates a user's declaration ("all versions of modules X, Y, Z matching
//! these constraints") into Module objects, refreshing on the configured
//! polling interval to pick up new upstream releases. Failure against one
//! module config does not stop the others; failed modules are retried on the
//! next tick.

use std::sync::Arc;
use std::time::Duration;

use kube::api::{Api, PostParams};
use kube::runtime::controller::Action;
use kube::ResourceExt;
use tracing::{debug, error, info, instrument, warn};

use crate::crd::{Depot, GlobalConfig, Module, ModuleConfig, ModuleSpec, ModuleVersion};
use crate::github::{create_github_client, get_github_application_secret, GithubClient};
use crate::retry::update_on_conflict;
use crate::versions::{parse_constraints, resolve_constraints};
use crate::{Error, Result};

use super::Context;

const ERROR_REQUEUE: Duration = Duration::from_secs(30);

/// Reconcile a Depot resource
///
/// For each module config the reconciler fills defaults from the global
/// config, resolves the version constraints against the upstream release
/// tags, and creates or updates the corresponding Module object.
#[instrument(skip(depot, ctx), fields(depot = %depot.name_any()))]
pub async fn reconcile(depot: Arc<Depot>, ctx: Arc<Context>) -> Result<Action> {
    let namespace = depot.namespace().unwrap_or_default();
    debug!("reconciling depot");

    let mut first_error: Option<Error> = None;

    for module_config in &depot.spec.module_configs {
        let merged = merge_with_global(module_config.clone(), depot.spec.global.as_ref());

        let Some(module_name) = merged.name.clone() else {
            warn!("skipping module config without a name");
            first_error
                .get_or_insert_with(|| Error::config("depot module configs must set a name"));
            continue;
        };

        match reconcile_module_config(&ctx, &namespace, &module_name, merged).await {
            Ok(matched) => {
                info!(module = %module_name, versions = ?matched, "matched versions for module");
            }
            Err(e) => {
                // Partial success is fine; the failed module is retried on
                // the next tick
                error!(module = %module_name, error = %e, "failed to reconcile module config");
                first_error.get_or_insert(e);
            }
        }
    }

    if let Some(e) = first_error {
        return Err(e);
    }

    match depot.spec.polling_interval_minutes {
        Some(minutes) => Ok(Action::requeue(Duration::from_secs(minutes * 60))),
        None => Ok(Action::await_change()),
    }
}

/// Error policy for the Depot controller
pub fn error_policy(depot: Arc<Depot>, error: &Error, _ctx: Arc<Context>) -> Action {
    error!(error = %error, depot = %depot.name_any(), "depot reconciliation failed");
    Action::requeue(ERROR_REQUEUE)
}

async fn reconcile_module_config(
    ctx: &Context,
    namespace: &str,
    module_name: &str,
    module_config: ModuleConfig,
) -> Result<Vec<String>> {
    let github = acquire_github_client(ctx, namespace, &module_config).await?;

    let releases = github
        .list_releases(&module_config.repo_owner, module_name)
        .await?;
    let tags: Vec<String> = releases.into_iter().map(|r| r.tag_name).collect();

    let constraints = parse_constraints(&module_config.version_constraints)?;
    let matched = resolve_constraints(&constraints, &tags);

    let versions: Vec<ModuleVersion> = matched.iter().cloned().map(ModuleVersion::entry).collect();
    upsert_module(ctx, namespace, module_name, module_config, versions).await?;

    Ok(matched)
}

async fn acquire_github_client(
    ctx: &Context,
    namespace: &str,
    module_config: &ModuleConfig,
) -> Result<GithubClient> {
    let use_authenticated = module_config
        .github_client_config
        .as_ref()
        .map(|c| c.use_authenticated_client)
        .unwrap_or(false);

    if use_authenticated {
        let app_config = get_github_application_secret(&ctx.client, namespace).await?;
        create_github_client(true, Some(&app_config)).await
    } else {
        create_github_client(false, None).await
    }
}

async fn upsert_module(
    ctx: &Context,
    namespace: &str,
    module_name: &str,
    module_config: ModuleConfig,
    versions: Vec<ModuleVersion>,
) -> Result<()> {
    let modules: Api<Module> = Api::namespaced(ctx.client.clone(), namespace);

    if modules.get_opt(module_name).await?.is_none() {
        let mut module = Module::new(
            module_name,
            ModuleSpec {
                force_sync: false,
                module_config: module_config.clone(),
                versions: versions.clone(),
            },
        );
        module.metadata.namespace = Some(namespace.to_string());

        match modules.create(&PostParams::default(), &module).await {
            Ok(_) => return Ok(()),
            // Lost a create race; fall through to the update path
            Err(kube::Error::Api(ae)) if ae.code == 409 => {}
            Err(e) => return Err(e.into()),
        }
    }

    update_on_conflict(&modules, module_name, |current| {
        current.spec.module_config = module_config.clone();
        current.spec.versions = versions.clone();
    })
    .await?;

    Ok(())
}

/// Fills fields the module config leaves nil from the Depot's global config:
/// storage, GitHub auth, file format, immutability, and the repository URL.
pub fn merge_with_global(mut config: ModuleConfig, global: Option<&GlobalConfig>) -> ModuleConfig {
    if let Some(global) = global {
        if config.storage_config.is_none() {
            config.storage_config = global.storage_config.clone();
        }

        if config.github_client_config.is_none() {
            config.github_client_config = global.github_client_config.clone();
        }

        if let Some(defaults) = &global.module_config {
            if config.file_format.is_none() {
                config.file_format = defaults.file_format.clone();
            }
            if config.immutable.is_none() {
                config.immutable = defaults.immutable;
            }
        }
    }

    if config.repo_url.is_none() {
        if let Some(name) = &config.name {
            config.repo_url = Some(format!(
                "https://github.com/{}/{}",
                config.repo_owner, name
            ));
        }
    }

    config
}
