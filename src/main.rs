//! Kerrareg - Kubernetes-native Terraform/OpenTofu module registry

use std::net::SocketAddr;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use futures::StreamExt;
use kube::runtime::controller::Config as ControllerConfig;
use kube::runtime::watcher::Config as WatcherConfig;
use kube::runtime::Controller;
use kube::{Api, Client, CustomResourceExt};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use kerrareg::controller::{depot, module, version, Context};
use kerrareg::crd::{Depot, Module, Version};
use kerrareg::registry::{serve, RegistryConfig};

/// Kerrareg - CRD-driven Terraform/OpenTofu module registry
#[derive(Parser, Debug)]
#[command(name = "kerrareg", version, about, long_about = None)]
struct Cli {
    /// Generate CRD manifests and exit
    #[arg(long)]
    crd: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the three reconcilers (default mode)
    Controller(ControllerArgs),

    /// Run the registry protocol HTTP service
    Server(ServerArgs),
}

/// Controller mode arguments
#[derive(Parser, Debug)]
struct ControllerArgs {
    /// Worker count for the Version controller. Kept low because each
    /// in-flight reconcile holds a full archive in memory
    #[arg(long, default_value = "1")]
    version_concurrency: u16,
}

/// Server mode arguments
#[derive(Parser, Debug)]
struct ServerArgs {
    /// Listen address
    #[arg(long, default_value = "0.0.0.0:8443")]
    addr: SocketAddr,

    /// When true, use a bearer token instead of a base64-encoded kubeconfig
    /// to authenticate with the Kubernetes API server
    #[arg(long)]
    use_bearer_token: bool,

    /// TLS certificate path; plain HTTP when unset
    #[arg(long, requires = "tls_key")]
    tls_cert: Option<String>,

    /// TLS private key path
    #[arg(long, requires = "tls_cert")]
    tls_key: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    rustls::crypto::aws_lc_rs::default_provider()
        .install_default()
        .expect("Failed to install crypto provider");

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    if cli.crd {
        let crds = [Depot::crd(), Module::crd(), Version::crd()];
        for crd in &crds {
            let doc = serde_yaml::to_string(crd)
                .map_err(|e| anyhow::anyhow!("Failed to serialize CRD: {}", e))?;
            println!("---\n{doc}");
        }
        return Ok(());
    }

    match cli.command {
        Some(Commands::Server(args)) => run_server(args).await,
        Some(Commands::Controller(args)) => run_controllers(args).await,
        None => {
            run_controllers(ControllerArgs {
                version_concurrency: 1,
            })
            .await
        }
    }
}

/// Run the registry protocol service
async fn run_server(args: ServerArgs) -> anyhow::Result<()> {
    tracing::info!("Kerrareg registry server starting...");

    serve(RegistryConfig {
        addr: args.addr,
        use_bearer_token: args.use_bearer_token,
        tls_cert: args.tls_cert,
        tls_key: args.tls_key,
    })
    .await
}

/// Run the Depot, Module, and Version controllers
async fn run_controllers(args: ControllerArgs) -> anyhow::Result<()> {
    tracing::info!("Kerrareg controllers starting...");

    let client = Client::try_default()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to create Kubernetes client: {}", e))?;

    let ctx = Arc::new(Context::new(client.clone()));

    let depots: Api<Depot> = Api::all(client.clone());
    let modules: Api<Module> = Api::all(client.clone());
    let versions: Api<Version> = Api::all(client);

    let depot_controller = Controller::new(depots, WatcherConfig::default())
        .shutdown_on_signal()
        .run(depot::reconcile, depot::error_policy, ctx.clone())
        .for_each(|result| async move {
            match result {
                Ok(action) => tracing::debug!(?action, "depot reconciliation completed"),
                Err(e) => tracing::error!(error = ?e, "depot reconciliation error"),
            }
        });

    // The Module controller deliberately does not watch its Version
    // children: it only reacts to its own spec, and child churn belongs to
    // the Version controller
    let module_controller = Controller::new(modules, WatcherConfig::default())
        .shutdown_on_signal()
        .run(module::reconcile, module::error_policy, ctx.clone())
        .for_each(|result| async move {
            match result {
                Ok(action) => tracing::debug!(?action, "module reconciliation completed"),
                Err(e) => tracing::error!(error = ?e, "module reconciliation error"),
            }
        });

    // Archives are held in memory for the duration of a reconcile, so the
    // worker count stays in the 1-4 range
    let concurrency = args.version_concurrency.clamp(1, 4);
    let version_controller = Controller::new(versions, WatcherConfig::default())
        .with_config(ControllerConfig::default().concurrency(concurrency))
        .shutdown_on_signal()
        .run(version::reconcile, version::error_policy, ctx)
        .for_each(|result| async move {
            match result {
                Ok(action) => tracing::debug!(?action, "version reconciliation completed"),
                Err(e) => tracing::error!(error = ?e, "version reconciliation error"),
            }
        });

    tokio::join!(depot_controller, module_controller, version_controller);

    tracing::info!("Kerrareg controllers shutting down");
    Ok(())
}
