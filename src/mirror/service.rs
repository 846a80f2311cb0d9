// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Service mutators: deciding what a raw service notification means, and
//! creating, updating and deleting mirror services with their endpoints.

use crate::constants::{annotations, labels, CLUSTER_IP_NONE};
use crate::error::{is_already_exists, is_not_found, MirrorError, Result, RetryableError};
use crate::kubernetes::ensure_namespace_exists;
use anyhow::anyhow;
use k8s_openapi::api::core::v1::{
    EndpointPort, EndpointSubset, Endpoints, Service, ServicePort, ServiceSpec,
};
use kube::api::{DeleteParams, ListParams, ObjectMeta, PostParams};
use std::collections::BTreeMap;
use tracing::{error, info};

use super::events::{MirrorEvent, RemoteServiceUpdate};
use super::gateway::resolve_gateway_address;
use super::watcher::RemoteClusterServiceWatcher;

impl RemoteClusterServiceWatcher {
    /// Name of the local mirror of a remote resource.
    pub(super) fn mirrored_resource_name(&self, remote_name: &str) -> String {
        format!("{}-{}", remote_name, self.link.target_cluster_name)
    }

    /// Remote name a mirrored name was derived from.
    pub(super) fn original_resource_name<'a>(&self, mirrored_name: &'a str) -> &'a str {
        let suffix = format!("-{}", self.link.target_cluster_name);
        mirrored_name
            .strip_suffix(suffix.as_str())
            .unwrap_or(mirrored_name)
    }

    pub(super) fn mirror_labels(&self) -> BTreeMap<String, String> {
        BTreeMap::from([
            (labels::MIRRORED_RESOURCE.to_string(), "true".to_string()),
            (
                labels::REMOTE_CLUSTER_NAME.to_string(),
                self.link.target_cluster_name.clone(),
            ),
        ])
    }

    /// Label selector string matching every object this link mirrors.
    pub(super) fn mirror_label_selector(&self) -> String {
        format!(
            "{}=true,{}={}",
            labels::MIRRORED_RESOURCE,
            labels::REMOTE_CLUSTER_NAME,
            self.link.target_cluster_name
        )
    }

    pub(super) fn remote_service_fq_name(&self, remote_service: &Service) -> String {
        format!(
            "{}.{}.svc.{}",
            remote_service.metadata.name.as_deref().unwrap_or_default(),
            remote_service
                .metadata
                .namespace
                .as_deref()
                .unwrap_or_default(),
            self.link.target_cluster_domain
        )
    }

    pub(super) fn mirror_annotations(&self, remote_service: &Service) -> BTreeMap<String, String> {
        let mut result = BTreeMap::from([
            (
                // needed to detect real changes
                annotations::REMOTE_RESOURCE_VERSION.to_string(),
                remote_service
                    .metadata
                    .resource_version
                    .clone()
                    .unwrap_or_default(),
            ),
            (
                annotations::REMOTE_SERVICE_FQ_NAME.to_string(),
                self.remote_service_fq_name(remote_service),
            ),
        ]);

        if let Some(value) = remote_service
            .metadata
            .annotations
            .as_ref()
            .and_then(|a| a.get(annotations::PROXY_OPAQUE_PORTS))
        {
            result.insert(annotations::PROXY_OPAQUE_PORTS.to_string(), value.clone());
        }

        result
    }

    /// Endpoint ports that bind to the mirrored service ports (same name and
    /// protocol) but send traffic to the gateway port. All remapping happens
    /// on the endpoints side; the service ports stay untouched.
    pub(super) fn endpoints_ports(&self, service: &Service) -> Vec<EndpointPort> {
        service
            .spec
            .as_ref()
            .and_then(|s| s.ports.as_ref())
            .map(|ports| {
                ports
                    .iter()
                    .map(|port| EndpointPort {
                        name: port.name.clone(),
                        protocol: port.protocol.clone(),
                        port: i32::from(self.link.gateway_port),
                        ..Default::default()
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    pub(super) fn is_exported_service(&self, service: &Service) -> bool {
        let service_labels = service.metadata.labels.clone().unwrap_or_default();
        match self.link.selector_matches(&service_labels) {
            Ok(matched) => matched,
            Err(e) => {
                error!("Invalid service selector: {e}");
                false
            }
        }
    }

    /// Common to adds and updates: after downtime, an add for a service we
    /// already mirror is simply an update.
    pub(super) async fn create_or_update_service(&self, service: &Service) -> Result<()> {
        let name = service.metadata.name.clone().unwrap_or_default();
        let namespace = service.metadata.namespace.clone().unwrap_or_default();
        let local_name = self.mirrored_resource_name(&name);

        if self.is_exported_service(service) {
            let local_service = match self.local_services(&namespace).get(&local_name).await {
                Ok(svc) => svc,
                Err(err) if is_not_found(&err) => {
                    self.queue
                        .add(MirrorEvent::RemoteServiceCreated(Box::new(service.clone())));
                    return Ok(());
                }
                Err(err) => return Err(MirrorError::retryable(err)),
            };

            let last_mirrored_version = local_service
                .metadata
                .annotations
                .as_ref()
                .and_then(|a| a.get(annotations::REMOTE_RESOURCE_VERSION));
            if last_mirrored_version.is_some()
                && last_mirrored_version != service.metadata.resource_version.as_ref()
            {
                let local_endpoints = self
                    .local_endpoints(&namespace)
                    .get(&local_name)
                    .await
                    .map_err(MirrorError::retryable)?;
                self.queue
                    .add(MirrorEvent::RemoteServiceUpdated(Box::new(
                        RemoteServiceUpdate {
                            local_service,
                            local_endpoints,
                            remote_update: service.clone(),
                        },
                    )));
            }
            return Ok(());
        }

        // Not exported (anymore). If we hold a mirror for it, tear it down.
        if let Ok(local_service) = self.local_services(&namespace).get(&local_name).await {
            if let Some(local_labels) = &local_service.metadata.labels {
                let is_mirrored = local_labels.contains_key(labels::MIRRORED_RESOURCE);
                let cluster = local_labels.get(labels::REMOTE_CLUSTER_NAME);
                if is_mirrored && cluster == Some(&self.link.target_cluster_name) {
                    self.queue
                        .add(MirrorEvent::RemoteServiceDeleted { name, namespace });
                }
            }
        }
        Ok(())
    }

    pub(super) fn handle_on_delete(&self, service: &Service) {
        let name = service.metadata.name.clone().unwrap_or_default();
        let namespace = service.metadata.namespace.clone().unwrap_or_default();
        if self.is_exported_service(service) {
            self.queue
                .add(MirrorEvent::RemoteServiceDeleted { name, namespace });
        } else {
            info!("Skipping OnDelete for service {namespace}/{name}");
        }
    }

    pub(super) async fn handle_remote_service_created(
        &self,
        remote_service: &Service,
    ) -> Result<()> {
        let gateway_addresses = resolve_gateway_address(&self.link.gateway_address).await?;

        let name = remote_service.metadata.name.clone().unwrap_or_default();
        let namespace = remote_service.metadata.namespace.clone().unwrap_or_default();
        let service_info = format!("{namespace}/{name}");
        let local_service_name = self.mirrored_resource_name(&name);

        ensure_namespace_exists(&self.local_client, &namespace, self.mirror_labels()).await?;

        let remote_ports = remote_service
            .spec
            .as_ref()
            .and_then(|s| s.ports.clone())
            .unwrap_or_default();
        let mut service_to_create = Service {
            metadata: ObjectMeta {
                name: Some(local_service_name.clone()),
                namespace: Some(namespace.clone()),
                annotations: Some(self.mirror_annotations(remote_service)),
                labels: Some(self.mirror_labels()),
                ..Default::default()
            },
            spec: Some(ServiceSpec {
                ports: Some(remap_remote_service_ports(&remote_ports)),
                ..Default::default()
            }),
            ..Default::default()
        };

        // A headless remote gets a headless mirror, and endpoints creation is
        // left to the endpoints handler.
        if self.headless_enabled && self.is_valid_headless_service(remote_service).await {
            // Headless services are not obliged to expose ports; they may
            // exist for DNS configuration only. Without ports there is
            // nothing to mirror.
            if remote_ports.is_empty() {
                self.record_mirroring_skipped(
                    remote_service,
                    "Skipped mirroring service: object spec has no exposed ports",
                )
                .await;
                info!(
                    "Skipped creating Headless Mirror for {service_info}: service object spec has no exposed ports"
                );
                return Ok(());
            }

            if let Some(spec) = service_to_create.spec.as_mut() {
                spec.cluster_ip = Some(CLUSTER_IP_NONE.to_string());
            }
            info!("Creating a new Headless Mirror service for {service_info}");
            match self
                .local_services(&namespace)
                .create(&PostParams::default(), &service_to_create)
                .await
            {
                Ok(_) => {}
                // we might have created it during an earlier attempt
                Err(err) if is_already_exists(&err) => {}
                Err(err) => return Err(MirrorError::retryable(err)),
            }
            return Ok(());
        }

        let mut endpoints_annotations = BTreeMap::from([(
            annotations::REMOTE_SERVICE_FQ_NAME.to_string(),
            self.remote_service_fq_name(remote_service),
        )]);
        if !self.link.gateway_identity.is_empty() {
            endpoints_annotations.insert(
                annotations::REMOTE_GATEWAY_IDENTITY.to_string(),
                self.link.gateway_identity.clone(),
            );
        }

        let resolved: Vec<&str> = gateway_addresses.iter().map(|a| a.ip.as_str()).collect();
        info!(
            "Resolved gateway [{:?}:{}] for {service_info}",
            resolved, self.link.gateway_port
        );

        let endpoints_to_create = Endpoints {
            metadata: ObjectMeta {
                name: Some(local_service_name.clone()),
                namespace: Some(namespace.clone()),
                labels: Some(self.mirror_labels()),
                annotations: Some(endpoints_annotations),
                ..Default::default()
            },
            subsets: Some(vec![EndpointSubset {
                addresses: Some(gateway_addresses),
                ports: Some(self.endpoints_ports(remote_service)),
                ..Default::default()
            }]),
        };

        info!("Creating a new service mirror for {service_info}");
        match self
            .local_services(&namespace)
            .create(&PostParams::default(), &service_to_create)
            .await
        {
            Ok(_) => {}
            // we might have created it during an earlier attempt
            Err(err) if is_already_exists(&err) => {}
            Err(err) => return Err(MirrorError::retryable(err)),
        }

        info!("Creating a new Endpoints for {service_info}");
        if let Err(err) = self
            .local_endpoints(&namespace)
            .create(&PostParams::default(), &endpoints_to_create)
            .await
        {
            // clean up after ourselves so the next attempt starts fresh
            let _ = self
                .local_services(&namespace)
                .delete(&local_service_name, &DeleteParams::default())
                .await;
            return Err(MirrorError::retryable(err));
        }
        Ok(())
    }

    /// Bring a mirror up to date after a remote change: new ports, a new
    /// gateway association, or a changed resource version. The endpoints are
    /// written first so that a client observing the new service version
    /// already sees refreshed endpoints.
    pub(super) async fn handle_remote_service_updated(
        &self,
        update: &RemoteServiceUpdate,
    ) -> Result<()> {
        let namespace = update
            .local_service
            .metadata
            .namespace
            .clone()
            .unwrap_or_default();
        let name = update
            .local_service
            .metadata
            .name
            .clone()
            .unwrap_or_default();
        info!("Updating mirror service {namespace}/{name}");

        let gateway_addresses = resolve_gateway_address(&self.link.gateway_address).await?;

        let mut endpoints = update.local_endpoints.clone();
        endpoints.subsets = Some(vec![EndpointSubset {
            addresses: Some(gateway_addresses),
            ports: Some(self.endpoints_ports(&update.remote_update)),
            ..Default::default()
        }]);
        endpoints
            .metadata
            .annotations
            .get_or_insert_with(BTreeMap::new)
            .insert(
                annotations::REMOTE_GATEWAY_IDENTITY.to_string(),
                self.link.gateway_identity.clone(),
            );

        self.local_endpoints(&namespace)
            .replace(&name, &PostParams::default(), &endpoints)
            .await
            .map_err(MirrorError::retryable)?;

        let mut local_service = update.local_service.clone();
        local_service.metadata.labels = Some(self.mirror_labels());
        local_service.metadata.annotations = Some(self.mirror_annotations(&update.remote_update));
        let remote_ports = update
            .remote_update
            .spec
            .as_ref()
            .and_then(|s| s.ports.clone())
            .unwrap_or_default();
        local_service
            .spec
            .get_or_insert_with(ServiceSpec::default)
            .ports = Some(remap_remote_service_ports(&remote_ports));

        self.local_services(&namespace)
            .replace(&name, &PostParams::default(), &local_service)
            .await
            .map_err(MirrorError::retryable)?;
        Ok(())
    }

    /// Delete a mirror whose remote original is going away (or is no longer
    /// exported). For a headless mirror, its endpoint-mirror services go too.
    pub(super) async fn handle_remote_service_deleted(
        &self,
        name: &str,
        namespace: &str,
    ) -> Result<()> {
        let local_service_name = self.mirrored_resource_name(name);
        let mut errors: Vec<anyhow::Error> = Vec::new();

        match self.local_services(namespace).get(&local_service_name).await {
            Ok(local_service) => {
                let headless = local_service
                    .spec
                    .as_ref()
                    .and_then(|s| s.cluster_ip.as_deref())
                    == Some(CLUSTER_IP_NONE);
                if self.headless_enabled && headless {
                    let selector = format!(
                        "{}={}",
                        labels::MIRRORED_HEADLESS_SVC_NAME,
                        local_service_name
                    );
                    match self
                        .all_local_services()
                        .list(&ListParams::default().labels(&selector))
                        .await
                    {
                        Ok(endpoint_mirrors) => {
                            for endpoint_mirror in endpoint_mirrors.items {
                                let em_namespace = endpoint_mirror
                                    .metadata
                                    .namespace
                                    .clone()
                                    .unwrap_or_default();
                                let em_name =
                                    endpoint_mirror.metadata.name.clone().unwrap_or_default();
                                if let Err(err) = self
                                    .local_services(&em_namespace)
                                    .delete(&em_name, &DeleteParams::default())
                                    .await
                                {
                                    if !is_not_found(&err) {
                                        errors.push(anyhow!(
                                            "could not delete Endpoint Mirror {em_namespace}/{em_name}: {err}"
                                        ));
                                    }
                                }
                            }
                        }
                        Err(err) => errors.push(anyhow!(
                            "could not fetch Endpoint Mirrors for Service {namespace}/{local_service_name}: {err}"
                        )),
                    }
                }
            }
            // nothing mirrored locally; the delete below is a no-op
            Err(err) if is_not_found(&err) => {}
            Err(err) => errors.push(anyhow!(
                "could not fetch Service {namespace}/{local_service_name}: {err}"
            )),
        }

        info!("Deleting mirrored service {namespace}/{local_service_name}");
        if let Err(err) = self
            .local_services(namespace)
            .delete(&local_service_name, &DeleteParams::default())
            .await
        {
            if !is_not_found(&err) {
                errors.push(anyhow!(
                    "could not delete Service {namespace}/{local_service_name}: {err}"
                ));
            }
        }

        if !errors.is_empty() {
            return Err(RetryableError::aggregate(errors).into());
        }
        info!("Successfully deleted Service {namespace}/{local_service_name}");
        Ok(())
    }
}

/// Project remote service ports for the mirror, dropping the NodePort, which
/// is meaningless on the local cluster.
pub(super) fn remap_remote_service_ports(ports: &[ServicePort]) -> Vec<ServicePort> {
    ports
        .iter()
        .map(|port| ServicePort {
            name: port.name.clone(),
            protocol: port.protocol.clone(),
            port: port.port,
            target_port: port.target_port.clone(),
            ..Default::default()
        })
        .collect()
}
