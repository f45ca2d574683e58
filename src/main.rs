//! Fleetroll operator - rolling node replacement

use std::sync::Arc;

use clap::{Parser, Subcommand};
use futures::StreamExt;
use kube::runtime::watcher::Config as WatcherConfig;
use kube::runtime::Controller;
use kube::{Api, Client, CustomResourceExt};

use fleetroll::config::ControllerConfig;
use fleetroll::controller::{
    reconcile_replacement, reconcile_rollout, replacement_error_policy, rollout_error_policy,
    Context,
};
use fleetroll::crd::{NodeReplacement, NodeRollout};
use fleetroll::telemetry::{init_telemetry, TelemetryConfig};

/// Fleetroll - replace Kubernetes nodes in controlled waves
#[derive(Parser, Debug)]
#[command(name = "fleetroll", version, about, long_about = None)]
struct Cli {
    /// Generate CRD manifests and exit
    #[arg(long)]
    crd: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the NodeRollout and NodeReplacement controllers (default mode)
    Controller(ControllerConfig),
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if cli.crd {
        let rollout = serde_yaml::to_string(&NodeRollout::crd())
            .map_err(|e| anyhow::anyhow!("Failed to serialize CRD: {}", e))?;
        let replacement = serde_yaml::to_string(&NodeReplacement::crd())
            .map_err(|e| anyhow::anyhow!("Failed to serialize CRD: {}", e))?;
        println!("{rollout}---\n{replacement}");
        return Ok(());
    }

    let config = match cli.command {
        Some(Commands::Controller(config)) => config,
        None => ControllerConfig::default(),
    };

    init_telemetry(TelemetryConfig {
        format: config.log_format,
        ..Default::default()
    })?;

    run_controller(config).await
}

/// Run both controllers until a shutdown signal arrives
async fn run_controller(config: ControllerConfig) -> anyhow::Result<()> {
    let client = Client::try_default()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to create Kubernetes client: {}", e))?;

    tracing::info!(?config, "Starting fleetroll controller");

    let ctx = Arc::new(Context::builder(client.clone()).config(config).build());

    let rollouts: Api<NodeRollout> = Api::all(client.clone());
    let replacements: Api<NodeReplacement> = Api::all(client.clone());

    // Replacement status changes wake their owning rollout
    let rollout_controller = Controller::new(rollouts, WatcherConfig::default())
        .owns(
            Api::<NodeReplacement>::all(client.clone()),
            WatcherConfig::default(),
        )
        .shutdown_on_signal()
        .run(reconcile_rollout, rollout_error_policy, ctx.clone())
        .for_each(|result| async move {
            match result {
                Ok(action) => {
                    tracing::debug!(?action, "Rollout reconciliation completed");
                }
                Err(e) => {
                    tracing::error!(error = ?e, "Rollout reconciliation error");
                }
            }
        });

    let replacement_controller = Controller::new(replacements, WatcherConfig::default())
        .shutdown_on_signal()
        .run(reconcile_replacement, replacement_error_policy, ctx.clone())
        .for_each(|result| async move {
            match result {
                Ok(action) => {
                    tracing::debug!(?action, "Replacement reconciliation completed");
                }
                Err(e) => {
                    tracing::error!(error = ?e, "Replacement reconciliation error");
                }
            }
        });

    tokio::select! {
        _ = rollout_controller => {
            tracing::info!("Rollout controller completed");
        }
        _ = replacement_controller => {
            tracing::info!("Replacement controller completed");
        }
    }

    tracing::info!("Fleetroll controller shutting down");
    Ok(())
}
