// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Remote cluster client configuration and connectivity checks

use crate::error::{MirrorError, Result};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::Client;
use tracing::info;

/// Build a client configuration for the linked remote cluster from a
/// kubeconfig file
pub async fn remote_cluster_config(kubeconfig_path: &str) -> Result<kube::Config> {
    let raw = std::fs::read_to_string(kubeconfig_path).map_err(|e| {
        MirrorError::Kubeconfig(format!("failed to read {kubeconfig_path}: {e}"))
    })?;
    config_from_kubeconfig(&raw).await
}

/// Build a client configuration from a kubeconfig string
pub async fn config_from_kubeconfig(kubeconfig: &str) -> Result<kube::Config> {
    let parsed: Kubeconfig = serde_yaml::from_str(kubeconfig)
        .map_err(|e| MirrorError::Kubeconfig(format!("failed to parse kubeconfig: {e}")))?;

    kube::Config::from_custom_kubeconfig(parsed, &KubeConfigOptions::default())
        .await
        .map_err(|e| MirrorError::Kubeconfig(format!("failed to create config: {e}")))
}

/// Fail fast when the remote API server cannot be reached
pub async fn check_remote_connectivity(client: &Client, cluster_name: &str) -> Result<()> {
    let version = client.apiserver_version().await.map_err(|e| {
        MirrorError::Kubeconfig(format!(
            "cannot connect to api for target cluster {cluster_name}: {e}"
        ))
    })?;

    info!(
        "Connected to target cluster {} (server version {}.{})",
        cluster_name, version.major, version.minor
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_from_kubeconfig_rejects_garbage() {
        let err = futures::executor::block_on(config_from_kubeconfig("{not yaml: ["));
        assert!(matches!(err, Err(MirrorError::Kubeconfig(_))));
    }

    #[tokio::test]
    async fn test_config_from_kubeconfig_parses_minimal_config() {
        let kubeconfig = r#"
apiVersion: v1
kind: Config
clusters:
  - name: west
    cluster:
      server: https://west.example:6443
contexts:
  - name: west
    context:
      cluster: west
      user: west-admin
current-context: west
users:
  - name: west-admin
    user:
      token: abc123
"#;

        let config = config_from_kubeconfig(kubeconfig).await.unwrap();
        assert!(config
            .cluster_url
            .to_string()
            .starts_with("https://west.example:6443"));
    }
}
