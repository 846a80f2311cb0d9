// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Periodic endpoint repair.
//!
//! Gateway addresses can change underneath us without any service event
//! firing. On every repair tick the gateway-probe endpoints and the endpoints
//! of every non-headless mirror are rewritten from a fresh resolution.

use crate::constants::{annotations, labels, CLUSTER_IP_NONE, PROBE_PORT_NAME};
use crate::error::{is_not_found, Result};
use crate::metrics::ENDPOINT_REPAIR_COUNTER;
use k8s_openapi::api::core::v1::{EndpointPort, EndpointSubset, Endpoints};
use kube::api::{ListParams, ObjectMeta, PostParams};
use std::collections::BTreeMap;
use tracing::{debug, error};

use super::gateway::resolve_gateway_address;
use super::watcher::RemoteClusterServiceWatcher;

impl RemoteClusterServiceWatcher {
    pub(super) async fn repair_endpoints(&self) -> Result<()> {
        let gateway_addresses = resolve_gateway_address(&self.link.gateway_address).await?;

        ENDPOINT_REPAIR_COUNTER
            .with_label_values(&[&self.link.target_cluster_name])
            .inc();

        // Create or update the gateway-probe endpoints.
        let gateway_mirror_name = format!("probe-gateway-{}", self.link.target_cluster_name);
        let gateway_mirror_endpoints = Endpoints {
            metadata: ObjectMeta {
                name: Some(gateway_mirror_name.clone()),
                namespace: Some(self.service_mirror_namespace.clone()),
                labels: Some(BTreeMap::from([(
                    labels::REMOTE_CLUSTER_NAME.to_string(),
                    self.link.target_cluster_name.clone(),
                )])),
                annotations: Some(BTreeMap::from([(
                    annotations::REMOTE_GATEWAY_IDENTITY.to_string(),
                    self.link.gateway_identity.clone(),
                )])),
                ..Default::default()
            },
            subsets: Some(vec![EndpointSubset {
                addresses: Some(gateway_addresses.clone()),
                ports: Some(vec![EndpointPort {
                    name: Some(PROBE_PORT_NAME.to_string()),
                    port: i32::from(self.link.probe_spec.port),
                    protocol: Some("TCP".to_string()),
                    ..Default::default()
                }]),
                ..Default::default()
            }]),
        };

        if let Err(err) = self.create_or_update_endpoints(&gateway_mirror_endpoints).await {
            error!("Failed to create/update gateway mirror endpoints: {err}");
        }

        // Repair mirror service endpoints.
        let mirror_services = match self
            .all_local_services()
            .list(&ListParams::default().labels(&self.mirror_label_selector()))
            .await
        {
            Ok(list) => list.items,
            Err(err) => {
                error!("Failed to list mirror services: {err}");
                Vec::new()
            }
        };

        for service in mirror_services {
            let namespace = service.metadata.namespace.clone().unwrap_or_default();
            let name = service.metadata.name.clone().unwrap_or_default();

            // Headless mirrors carry hostnames and nested clusterIP services;
            // replacing those with the gateway address would break them.
            if service.spec.as_ref().and_then(|s| s.cluster_ip.as_deref())
                == Some(CLUSTER_IP_NONE)
            {
                debug!("Skipped repairing Endpoints for {namespace}/{name}");
                continue;
            }

            let endpoints = match self.local_endpoints(&namespace).get(&name).await {
                Ok(ep) => ep,
                Err(err) => {
                    error!("Could not get endpoints: {err}");
                    continue;
                }
            };

            let mut updated_endpoints = endpoints;
            updated_endpoints.subsets = Some(vec![EndpointSubset {
                addresses: Some(gateway_addresses.clone()),
                ports: Some(self.endpoints_ports(&service)),
                ..Default::default()
            }]);
            updated_endpoints
                .metadata
                .annotations
                .get_or_insert_with(BTreeMap::new)
                .insert(
                    annotations::REMOTE_GATEWAY_IDENTITY.to_string(),
                    self.link.gateway_identity.clone(),
                );

            if let Err(err) = self
                .local_services(&namespace)
                .replace(&name, &PostParams::default(), &service)
                .await
            {
                error!("{err}");
                continue;
            }
            if let Err(err) = self
                .local_endpoints(&namespace)
                .replace(&name, &PostParams::default(), &updated_endpoints)
                .await
            {
                error!("{err}");
            }
        }

        Ok(())
    }

    async fn create_or_update_endpoints(&self, endpoints: &Endpoints) -> Result<()> {
        let namespace = endpoints.metadata.namespace.clone().unwrap_or_default();
        let name = endpoints.metadata.name.clone().unwrap_or_default();
        let api = self.local_endpoints(&namespace);

        match api.get(&name).await {
            Ok(_) => {
                api.replace(&name, &PostParams::default(), endpoints).await?;
            }
            Err(err) if is_not_found(&err) => {
                api.create(&PostParams::default(), endpoints).await?;
            }
            Err(err) => return Err(err.into()),
        }
        Ok(())
    }
}
