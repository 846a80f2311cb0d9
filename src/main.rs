// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0
use anyhow::Result;
use kube::Client;
use std::sync::Arc;
use tracing::info;

use mirrorlink::config::Config;
use mirrorlink::kubernetes::remote_cluster_config;
use mirrorlink::metrics::register_metrics;
use mirrorlink::mirror::RemoteClusterServiceWatcher;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt::init();

    info!("Starting mirrorlink");

    // Load configuration
    let config = Config::from_env()?;
    info!(
        "Configuration loaded: target_cluster_name={}",
        config.link.target_cluster_name
    );

    // Create the local cluster client
    let local_client = Client::try_default().await?;
    info!("Connected to local cluster");

    register_metrics(prometheus::default_registry());

    // The remote cluster is reached through a dedicated kubeconfig
    let remote_config = remote_cluster_config(&config.remote_kubeconfig_path).await?;

    let watcher = Arc::new(
        RemoteClusterServiceWatcher::new(
            config.service_mirror_namespace.clone(),
            local_client,
            remote_config,
            config.link.clone(),
            config.requeue_limit,
            config.repair_period,
            config.enable_headless_services,
        )
        .await?,
    );

    watcher.clone().start();
    info!(
        "Mirroring services from target cluster {}",
        config.link.target_cluster_name
    );

    tokio::signal::ctrl_c().await?;
    info!("Shutting down");
    watcher.stop(false);

    Ok(())
}
