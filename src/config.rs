// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0
use anyhow::{Context, Result};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use std::collections::BTreeMap;
use std::env;
use std::time::Duration;

use crate::constants::labels;
use crate::types::{Link, ProbeSpec};

/// Controller configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    /// Namespace the controller itself runs in; the gateway-probe endpoints
    /// object is created here
    pub service_mirror_namespace: String,
    /// Path to a kubeconfig granting access to the remote cluster
    pub remote_kubeconfig_path: String,
    /// How often a retryable event is requeued before giving up
    pub requeue_limit: u32,
    /// Interval between endpoint repair sweeps
    pub repair_period: Duration,
    pub enable_headless_services: bool,
    pub link: Link,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let service_mirror_namespace = env::var("SERVICE_MIRROR_NAMESPACE")
            .context("SERVICE_MIRROR_NAMESPACE environment variable not set")?;
        let remote_kubeconfig_path = env::var("REMOTE_KUBECONFIG")
            .context("REMOTE_KUBECONFIG environment variable not set")?;

        let target_cluster_name = env::var("TARGET_CLUSTER_NAME")
            .context("TARGET_CLUSTER_NAME environment variable not set")?;
        let target_cluster_domain =
            env::var("TARGET_CLUSTER_DOMAIN").unwrap_or_else(|_| "cluster.local".to_string());
        let gateway_address =
            env::var("GATEWAY_ADDRESS").context("GATEWAY_ADDRESS environment variable not set")?;
        let gateway_port: u16 = env::var("GATEWAY_PORT")
            .context("GATEWAY_PORT environment variable not set")?
            .parse()
            .context("GATEWAY_PORT is not a valid port")?;
        let gateway_identity = env::var("GATEWAY_IDENTITY").unwrap_or_default();
        let probe_port: u16 = env::var("PROBE_PORT")
            .context("PROBE_PORT environment variable not set")?
            .parse()
            .context("PROBE_PORT is not a valid port")?;

        let selector_raw = env::var("EXPORT_SELECTOR")
            .unwrap_or_else(|_| format!("{}=true", labels::DEFAULT_EXPORTED_SERVICE_SELECTOR));
        let selector = parse_selector(&selector_raw)?;

        let requeue_limit: u32 = env::var("REQUEUE_LIMIT")
            .unwrap_or_else(|_| "3".to_string())
            .parse()
            .context("REQUEUE_LIMIT is not a valid number")?;
        let repair_period_secs: u64 = env::var("REPAIR_PERIOD_SECS")
            .unwrap_or_else(|_| "60".to_string())
            .parse()
            .context("REPAIR_PERIOD_SECS is not a valid number")?;
        let enable_headless_services: bool = env::var("ENABLE_HEADLESS_SERVICES")
            .unwrap_or_else(|_| "false".to_string())
            .parse()
            .unwrap_or(false);

        Ok(Config {
            service_mirror_namespace,
            remote_kubeconfig_path,
            requeue_limit,
            repair_period: Duration::from_secs(repair_period_secs),
            enable_headless_services,
            link: Link {
                target_cluster_name,
                target_cluster_domain,
                gateway_address,
                gateway_port,
                gateway_identity,
                probe_spec: ProbeSpec { port: probe_port },
                selector,
            },
        })
    }
}

/// Parse a comma-separated list of `key=value` pairs into a label selector
fn parse_selector(raw: &str) -> Result<LabelSelector> {
    let mut match_labels = BTreeMap::new();
    for pair in raw.split(',').filter(|p| !p.trim().is_empty()) {
        let (key, value) = pair
            .split_once('=')
            .with_context(|| format!("invalid selector pair '{pair}'"))?;
        match_labels.insert(key.trim().to_string(), value.trim().to_string());
    }

    Ok(LabelSelector {
        match_labels: Some(match_labels),
        ..Default::default()
    })
}
