// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Headless mirroring.
//!
//! An exported headless service gets a headless mirror plus one clusterIP
//! "endpoint mirror" service per named address (hostname) in its endpoints
//! object. The headless mirror's endpoints then point each hostname at the
//! cluster IP of its endpoint mirror, preserving per-pod addressing across
//! the cluster boundary.

use crate::constants::{annotations, labels, CLUSTER_IP_NONE};
use crate::error::{is_already_exists, is_not_found, MirrorError, Result, RetryableError};
use anyhow::anyhow;
use k8s_openapi::api::core::v1::{
    EndpointAddress, EndpointSubset, Endpoints, Service, ServiceSpec,
};
use kube::api::{DeleteParams, ListParams, ObjectMeta, PostParams};
use std::collections::{BTreeMap, HashSet};
use tracing::{debug, error, info};

use super::gateway::resolve_gateway_address;
use super::service::remap_remote_service_ports;
use super::watcher::RemoteClusterServiceWatcher;

impl RemoteClusterServiceWatcher {
    /// Whether a remote service is headless with at least one named address
    /// in its endpoints object. Only such services get a headless mirror;
    /// anything else degrades to a clusterIP mirror.
    pub(super) async fn is_valid_headless_service(&self, service: &Service) -> bool {
        let cluster_ip = service.spec.as_ref().and_then(|s| s.cluster_ip.as_deref());
        if cluster_ip != Some(CLUSTER_IP_NONE) {
            return false;
        }

        let name = service.metadata.name.as_deref().unwrap_or_default();
        let namespace = service.metadata.namespace.as_deref().unwrap_or_default();
        match self.remote_endpoints(namespace).get(name).await {
            Ok(endpoints) => has_named_address(&endpoints),
            Err(err) => {
                error!("Failed to validate exported headless service {namespace}/{name}: {err}");
                false
            }
        }
    }

    /// Reconcile the headless mirror of an exported headless service against
    /// its remote endpoints: create the headless mirror endpoints if absent,
    /// otherwise rebuild them and prune endpoint mirrors whose hostname is
    /// gone.
    pub(super) async fn create_or_update_headless_endpoints(
        &self,
        exported_endpoints: &Endpoints,
    ) -> Result<()> {
        let name = exported_endpoints.metadata.name.clone().unwrap_or_default();
        let namespace = exported_endpoints
            .metadata
            .namespace
            .clone()
            .unwrap_or_default();

        let exported_service = match self.remote_services(&namespace).get(&name).await {
            Ok(svc) => svc,
            Err(err) => {
                // a service/endpoints race; a later event will self-heal
                debug!(
                    "Failed to retrieve Exported service {namespace}/{name} when updating its Headless Mirror endpoints: {err}"
                );
                return Err(MirrorError::ExportedServiceGone {
                    namespace,
                    name,
                    source: err,
                });
            }
        };

        // Without exposed ports there is nothing to mirror, and without named
        // hosts the export is handled as a clusterIP mirror.
        let has_ports = exported_service
            .spec
            .as_ref()
            .and_then(|s| s.ports.as_ref())
            .is_some_and(|p| !p.is_empty());
        if !has_ports || !self.is_valid_headless_service(&exported_service).await {
            return Ok(());
        }

        let headless_mirror_name = self.mirrored_resource_name(&name);
        let headless_mirror_endpoints = match self
            .local_endpoints(&namespace)
            .get(&headless_mirror_name)
            .await
        {
            Ok(endpoints) => endpoints,
            Err(err) if is_not_found(&err) => {
                return self
                    .create_headless_mirror_endpoints(exported_endpoints, &exported_service)
                    .await;
            }
            Err(err) => return Err(err.into()),
        };

        let resource_version = exported_endpoints
            .metadata
            .resource_version
            .clone()
            .unwrap_or_default();
        let mut endpoint_mirrors = HashSet::new();
        let mut new_subsets = Vec::new();
        for subset in exported_endpoints.subsets.iter().flatten() {
            let mut new_addresses = Vec::new();
            for address in subset.addresses.iter().flatten() {
                let Some(hostname) = address.hostname.as_deref().filter(|h| !h.is_empty()) else {
                    continue;
                };

                let endpoint_mirror_name = self.mirrored_resource_name(hostname);
                let endpoint_mirror_service = match self
                    .local_services(&namespace)
                    .get(&endpoint_mirror_name)
                    .await
                {
                    Ok(svc) => svc,
                    Err(err) if is_not_found(&err) => {
                        self.create_endpoint_mirror_service(
                            hostname,
                            &resource_version,
                            &endpoint_mirror_name,
                            &exported_service,
                        )
                        .await?
                    }
                    Err(err) => return Err(err.into()),
                };

                endpoint_mirrors.insert(endpoint_mirror_name);
                new_addresses.push(EndpointAddress {
                    hostname: Some(hostname.to_string()),
                    ip: endpoint_mirror_service
                        .spec
                        .and_then(|s| s.cluster_ip)
                        .unwrap_or_default(),
                    ..Default::default()
                });
            }

            if new_addresses.is_empty() {
                continue;
            }
            new_subsets.push(EndpointSubset {
                addresses: Some(new_addresses),
                ports: subset.ports.clone(),
                ..Default::default()
            });
        }

        // No named addresses at all: this export behaves as a clusterIP
        // mirror even though the remote service is headless.
        if new_subsets.is_empty() {
            return Ok(());
        }

        // Prune endpoint mirrors whose hostname disappeared from the remote
        // endpoints.
        let selector = format!(
            "{}={}",
            labels::MIRRORED_HEADLESS_SVC_NAME,
            headless_mirror_name
        );
        let endpoint_mirror_services = self
            .all_local_services()
            .list(&ListParams::default().labels(&selector))
            .await?;

        let mut errors: Vec<anyhow::Error> = Vec::new();
        for service in endpoint_mirror_services.items {
            let svc_name = service.metadata.name.clone().unwrap_or_default();
            if endpoint_mirrors.contains(&svc_name) {
                continue;
            }
            let svc_namespace = service.metadata.namespace.clone().unwrap_or_default();
            if let Err(err) = self
                .local_services(&svc_namespace)
                .delete(&svc_name, &DeleteParams::default())
                .await
            {
                if !is_not_found(&err) {
                    errors.push(anyhow!(
                        "error deleting Endpoint Mirror service {svc_namespace}/{svc_name}: {err}"
                    ));
                }
            }
        }
        if !errors.is_empty() {
            return Err(RetryableError::aggregate(errors).into());
        }

        let mut mirror_endpoints = headless_mirror_endpoints;
        mirror_endpoints.subsets = Some(new_subsets);
        self.local_endpoints(&namespace)
            .replace(&headless_mirror_name, &PostParams::default(), &mirror_endpoints)
            .await
            .map_err(MirrorError::retryable)?;

        Ok(())
    }

    /// First-time creation of the headless mirror's endpoints object, along
    /// with an endpoint mirror service per named address.
    async fn create_headless_mirror_endpoints(
        &self,
        exported_endpoints: &Endpoints,
        exported_service: &Service,
    ) -> Result<()> {
        let namespace = exported_service
            .metadata
            .namespace
            .clone()
            .unwrap_or_default();
        let service_name = exported_service.metadata.name.clone().unwrap_or_default();
        let exported_service_info = format!("{namespace}/{service_name}");
        let resource_version = exported_endpoints
            .metadata
            .resource_version
            .clone()
            .unwrap_or_default();

        let mut subsets_to_create = Vec::new();
        for subset in exported_endpoints.subsets.iter().flatten() {
            let mut new_addresses = Vec::new();
            for address in subset.addresses.iter().flatten() {
                let Some(hostname) = address.hostname.as_deref().filter(|h| !h.is_empty()) else {
                    continue;
                };

                let endpoint_mirror_name = self.mirrored_resource_name(hostname);
                let created = match self
                    .create_endpoint_mirror_service(
                        hostname,
                        &resource_version,
                        &endpoint_mirror_name,
                        exported_service,
                    )
                    .await
                {
                    Ok(svc) => svc,
                    Err(err) => {
                        error!(
                            "error creating Endpoint Mirror service {namespace}/{endpoint_mirror_name} for Exported Headless service {exported_service_info}: {err}"
                        );
                        continue;
                    }
                };

                new_addresses.push(EndpointAddress {
                    hostname: Some(hostname.to_string()),
                    ip: created.spec.and_then(|s| s.cluster_ip).unwrap_or_default(),
                    ..Default::default()
                });
            }

            if new_addresses.is_empty() {
                continue;
            }
            subsets_to_create.push(EndpointSubset {
                addresses: Some(new_addresses),
                ports: subset.ports.clone(),
                ..Default::default()
            });
        }

        let headless_mirror_name = self.mirrored_resource_name(&service_name);
        let mut endpoints_annotations = BTreeMap::from([(
            annotations::REMOTE_SERVICE_FQ_NAME.to_string(),
            self.remote_service_fq_name(exported_service),
        )]);
        if !self.link.gateway_identity.is_empty() {
            endpoints_annotations.insert(
                annotations::REMOTE_GATEWAY_IDENTITY.to_string(),
                self.link.gateway_identity.clone(),
            );
        }

        let headless_mirror_endpoints = Endpoints {
            metadata: ObjectMeta {
                name: Some(headless_mirror_name.clone()),
                namespace: Some(namespace.clone()),
                labels: Some(self.mirror_labels()),
                annotations: Some(endpoints_annotations),
                ..Default::default()
            },
            subsets: Some(subsets_to_create),
        };

        info!(
            "Creating a new Headless Mirror endpoints object for Headless Mirror {namespace}/{headless_mirror_name}"
        );
        if let Err(err) = self
            .local_endpoints(&namespace)
            .create(&PostParams::default(), &headless_mirror_endpoints)
            .await
        {
            // clean up after ourselves so the next attempt starts fresh
            let _ = self
                .local_services(&namespace)
                .delete(&headless_mirror_name, &DeleteParams::default())
                .await;
            return Err(MirrorError::retryable(err));
        }

        Ok(())
    }

    /// Create an endpoint mirror service (one per named address of an
    /// exported headless service) together with its endpoints object, and
    /// return it carrying its assigned cluster IP.
    pub(super) async fn create_endpoint_mirror_service(
        &self,
        endpoint_hostname: &str,
        resource_version: &str,
        endpoint_mirror_name: &str,
        exported_service: &Service,
    ) -> Result<Service> {
        let gateway_addresses = resolve_gateway_address(&self.link.gateway_address).await?;

        let namespace = exported_service
            .metadata
            .namespace
            .clone()
            .unwrap_or_default();
        let service_name = exported_service.metadata.name.clone().unwrap_or_default();
        let fq_name = format!(
            "{endpoint_hostname}.{service_name}.{namespace}.svc.{}",
            self.link.target_cluster_domain
        );

        let mut endpoint_mirror_labels = self.mirror_labels();
        endpoint_mirror_labels.insert(
            labels::MIRRORED_HEADLESS_SVC_NAME.to_string(),
            self.mirrored_resource_name(&service_name),
        );

        let service_annotations = BTreeMap::from([
            (
                // needed to detect real changes
                annotations::REMOTE_RESOURCE_VERSION.to_string(),
                resource_version.to_string(),
            ),
            (
                annotations::REMOTE_SERVICE_FQ_NAME.to_string(),
                fq_name.clone(),
            ),
        ]);

        let remote_ports = exported_service
            .spec
            .as_ref()
            .and_then(|s| s.ports.clone())
            .unwrap_or_default();
        let endpoint_mirror_service = Service {
            metadata: ObjectMeta {
                name: Some(endpoint_mirror_name.to_string()),
                namespace: Some(namespace.clone()),
                annotations: Some(service_annotations),
                labels: Some(endpoint_mirror_labels.clone()),
                ..Default::default()
            },
            spec: Some(ServiceSpec {
                ports: Some(remap_remote_service_ports(&remote_ports)),
                ..Default::default()
            }),
            ..Default::default()
        };

        let mut endpoints_annotations =
            BTreeMap::from([(annotations::REMOTE_SERVICE_FQ_NAME.to_string(), fq_name)]);
        if !self.link.gateway_identity.is_empty() {
            endpoints_annotations.insert(
                annotations::REMOTE_GATEWAY_IDENTITY.to_string(),
                self.link.gateway_identity.clone(),
            );
        }

        let endpoint_mirror_endpoints = Endpoints {
            metadata: ObjectMeta {
                name: Some(endpoint_mirror_name.to_string()),
                namespace: Some(namespace.clone()),
                labels: Some(endpoint_mirror_labels),
                annotations: Some(endpoints_annotations),
                ..Default::default()
            },
            subsets: Some(vec![EndpointSubset {
                addresses: Some(gateway_addresses),
                ports: Some(self.endpoints_ports(exported_service)),
                ..Default::default()
            }]),
        };

        info!(
            "Creating a new Endpoint Mirror service {namespace}/{endpoint_mirror_name} for Exported Headless service {namespace}/{service_name}"
        );
        let created = match self
            .local_services(&namespace)
            .create(&PostParams::default(), &endpoint_mirror_service)
            .await
        {
            Ok(svc) => svc,
            Err(err) if is_already_exists(&err) => {
                // created during an earlier attempt; fetch it for its
                // assigned cluster IP
                self.local_services(&namespace)
                    .get(endpoint_mirror_name)
                    .await
                    .map_err(MirrorError::retryable)?
            }
            Err(err) => return Err(MirrorError::retryable(err)),
        };

        info!(
            "Creating a new endpoints object for Endpoint Mirror service {namespace}/{endpoint_mirror_name}"
        );
        if let Err(err) = self
            .local_endpoints(&namespace)
            .create(&PostParams::default(), &endpoint_mirror_endpoints)
            .await
        {
            // roll back the service we just created, and retry
            let _ = self
                .local_services(&namespace)
                .delete(endpoint_mirror_name, &DeleteParams::default())
                .await;
            return Err(MirrorError::retryable(err));
        }

        Ok(created)
    }
}

/// At least one address in the endpoints carries a hostname.
pub(super) fn has_named_address(endpoints: &Endpoints) -> bool {
    endpoints.subsets.iter().flatten().any(|subset| {
        subset
            .addresses
            .iter()
            .flatten()
            .any(|addr| addr.hostname.as_deref().is_some_and(|h| !h.is_empty()))
    })
}
