// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! The remote cluster service watcher.
//!
//! One instance is created per configured link. It subscribes to service (and
//! optionally endpoints) changes on the remote cluster, translates the raw
//! notifications into domain events, and drains them on a single worker. A
//! failed event can be requeued with backoff up to the configured limit, to
//! ride out transient API or network problems.

use crate::constants::{labels, EVENT_TYPE_SKIPPED, KUBE_SYSTEM_NAMESPACE};
use crate::error::{MirrorError, Result};
use crate::kubernetes::check_remote_connectivity;
use crate::types::Link;
use futures::StreamExt;
use k8s_openapi::api::core::v1::{Endpoints, ObjectReference, Service};
use kube::api::ObjectMeta;
use kube::runtime::events::{Event, EventType, Recorder, Reporter};
use kube::runtime::watcher;
use kube::{Api, Client};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use super::events::MirrorEvent;
use super::queue::EventQueue;

pub struct RemoteClusterServiceWatcher {
    pub(super) service_mirror_namespace: String,
    pub(super) link: Link,
    pub(super) local_client: Client,
    pub(super) remote_client: Client,
    pub(super) queue: EventQueue,
    pub(super) recorder: Recorder,
    pub(super) requeue_limit: u32,
    pub(super) repair_period: Duration,
    pub(super) headless_enabled: bool,
    pub(super) stop_tx: watch::Sender<bool>,
}

impl RemoteClusterServiceWatcher {
    /// Construct a watcher for one link. Fails fast when the remote API
    /// server is unreachable.
    pub async fn new(
        service_mirror_namespace: impl Into<String>,
        local_client: Client,
        remote_config: kube::Config,
        link: Link,
        requeue_limit: u32,
        repair_period: Duration,
        enable_headless_services: bool,
    ) -> Result<Self> {
        let cluster_name = link.target_cluster_name.clone();
        let remote_client = Client::try_from(remote_config).map_err(|e| {
            MirrorError::Kubeconfig(format!(
                "cannot initialize api for target cluster {cluster_name}: {e}"
            ))
        })?;
        check_remote_connectivity(&remote_client, &cluster_name).await?;

        let reporter = Reporter {
            controller: format!("linkerd-service-mirror-{cluster_name}"),
            instance: None,
        };
        let recorder = Recorder::new(remote_client.clone(), reporter);
        let (stop_tx, _) = watch::channel(false);

        Ok(Self {
            service_mirror_namespace: service_mirror_namespace.into(),
            link,
            local_client,
            remote_client,
            queue: EventQueue::new(),
            recorder,
            requeue_limit,
            repair_period,
            headless_enabled: enable_headless_services,
            stop_tx,
        })
    }

    /// Start the translator streams, the worker and the repair timer.
    pub fn start(self: Arc<Self>) {
        self.queue.add(MirrorEvent::OrphanedServicesGcTriggered);

        let services = Arc::clone(&self);
        tokio::spawn(async move { services.watch_remote_services().await });

        if self.headless_enabled {
            let endpoints = Arc::clone(&self);
            tokio::spawn(async move { endpoints.watch_remote_endpoints().await });
        }

        let worker = Arc::clone(&self);
        tokio::spawn(async move { worker.process_events().await });

        // populate the gateway-probe endpoints right away
        self.queue.add(MirrorEvent::RepairEndpoints);

        let repair = Arc::clone(&self);
        tokio::spawn(async move { repair.repair_timer().await });
    }

    /// Stop all tasks; with `cleanup_state` every mirrored resource is
    /// deleted before the worker exits.
    pub fn stop(&self, cleanup_state: bool) {
        let _ = self.stop_tx.send(true);
        if cleanup_state {
            self.queue.add(MirrorEvent::ClusterUnregistered);
        }
        self.queue.shut_down();
    }

    async fn watch_remote_services(self: Arc<Self>) {
        let api: Api<Service> = Api::all(self.remote_client.clone());
        let mut stream = Box::pin(watcher(api, watcher::Config::default()));
        let mut known = HashSet::new();
        let mut stop_rx = self.stop_tx.subscribe();

        loop {
            tokio::select! {
                _ = stop_rx.changed() => return,
                item = stream.next() => match item {
                    Some(Ok(event)) => self.translate_service_event(event, &mut known),
                    Some(Err(e)) => warn!("Service watch stream error: {e}"),
                    None => return,
                },
            }
        }
    }

    async fn watch_remote_endpoints(self: Arc<Self>) {
        let api: Api<Endpoints> = Api::all(self.remote_client.clone());
        let mut stream = Box::pin(watcher(api, watcher::Config::default()));
        let mut known = HashSet::new();
        let mut stop_rx = self.stop_tx.subscribe();

        loop {
            tokio::select! {
                _ = stop_rx.changed() => return,
                item = stream.next() => match item {
                    Some(Ok(event)) => self.translate_endpoints_event(event, &mut known),
                    Some(Err(e)) => warn!("Endpoints watch stream error: {e}"),
                    None => return,
                },
            }
        }
    }

    fn translate_service_event(
        &self,
        event: watcher::Event<Service>,
        known: &mut HashSet<String>,
    ) {
        match event {
            watcher::Event::Apply(svc) | watcher::Event::InitApply(svc) => {
                if known.insert(object_key(&svc.metadata)) {
                    self.queue.add(MirrorEvent::ServiceAdded(Box::new(svc)));
                } else {
                    self.queue.add(MirrorEvent::ServiceUpdated(Box::new(svc)));
                }
            }
            watcher::Event::Delete(svc) => {
                known.remove(&object_key(&svc.metadata));
                self.queue.add(MirrorEvent::ServiceDeleted(Box::new(svc)));
            }
            watcher::Event::Init | watcher::Event::InitDone => {}
        }
    }

    fn translate_endpoints_event(
        &self,
        event: watcher::Event<Endpoints>,
        known: &mut HashSet<String>,
    ) {
        match event {
            watcher::Event::Apply(ep) | watcher::Event::InitApply(ep) => {
                if !is_exported_headless_endpoints(&ep) {
                    return;
                }
                if known.insert(object_key(&ep.metadata)) {
                    self.queue.add(MirrorEvent::EndpointsAdded(Box::new(ep)));
                } else {
                    self.queue.add(MirrorEvent::EndpointsUpdated(Box::new(ep)));
                }
            }
            watcher::Event::Delete(ep) => {
                // mirror teardown is driven by the service stream
                known.remove(&object_key(&ep.metadata));
            }
            watcher::Event::Init | watcher::Event::InitDone => {}
        }
    }

    async fn repair_timer(self: Arc<Self>) {
        let mut stop_rx = self.stop_tx.subscribe();
        let mut ticker = tokio::time::interval(self.repair_period);
        // consume the immediate first tick; start() already seeded the event
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => self.queue.add(MirrorEvent::RepairEndpoints),
                _ = stop_rx.changed() => return,
            }
        }
    }

    /// The main processing loop: drain domain events and deal with retries.
    pub(super) async fn process_events(self: Arc<Self>) {
        while let Some(event) = self.queue.get().await {
            info!("Received: {event}");
            let result = self.process_event(&event).await;
            self.queue.done(&event);

            match result {
                Ok(()) => self.queue.forget(&event),
                Err(MirrorError::Retryable(err)) => {
                    let requeues = self.queue.num_requeues(&event);
                    warn!(
                        "Requeues: {requeues}, Limit: {} for event {event}",
                        self.requeue_limit
                    );
                    if requeues < self.requeue_limit && !self.queue.is_shutting_down() {
                        error!("Error processing {event} (will retry): {err}");
                        self.queue.add_rate_limited(event);
                    } else {
                        error!("Error processing {event} (giving up): {err}");
                        self.queue.forget(&event);
                    }
                }
                Err(err) => error!("Error processing {event} (will not retry): {err}"),
            }
        }
        info!("Shutting down events processor");
    }

    async fn process_event(&self, event: &MirrorEvent) -> Result<()> {
        match event {
            MirrorEvent::ServiceAdded(svc) | MirrorEvent::ServiceUpdated(svc) => {
                self.create_or_update_service(svc).await
            }
            MirrorEvent::ServiceDeleted(svc) => {
                self.handle_on_delete(svc);
                Ok(())
            }
            MirrorEvent::EndpointsAdded(ep) | MirrorEvent::EndpointsUpdated(ep) => {
                self.create_or_update_headless_endpoints(ep).await
            }
            MirrorEvent::RemoteServiceCreated(svc) => {
                self.handle_remote_service_created(svc).await
            }
            MirrorEvent::RemoteServiceUpdated(update) => {
                self.handle_remote_service_updated(update).await
            }
            MirrorEvent::RemoteServiceDeleted { name, namespace } => {
                self.handle_remote_service_deleted(name, namespace).await
            }
            MirrorEvent::ClusterUnregistered => self.cleanup_mirrored_resources().await,
            MirrorEvent::OrphanedServicesGcTriggered => self.cleanup_orphaned_services().await,
            MirrorEvent::RepairEndpoints => self.repair_endpoints().await,
        }
    }

    /// Record a `ServiceMirroringSkipped` event on the remote service.
    /// Fire-and-forget; a failed event must never break reconciliation.
    pub(super) async fn record_mirroring_skipped(&self, remote_service: &Service, note: &str) {
        let reference = ObjectReference {
            api_version: Some("v1".to_string()),
            kind: Some("Service".to_string()),
            name: remote_service.metadata.name.clone(),
            namespace: remote_service.metadata.namespace.clone(),
            uid: remote_service.metadata.uid.clone(),
            resource_version: remote_service.metadata.resource_version.clone(),
            ..Default::default()
        };
        let event = Event {
            type_: EventType::Normal,
            reason: EVENT_TYPE_SKIPPED.to_string(),
            note: Some(note.to_string()),
            action: "Mirror".to_string(),
            secondary: None,
        };
        if let Err(e) = self.recorder.publish(&event, &reference).await {
            warn!("Failed to publish {EVENT_TYPE_SKIPPED} event: {e}");
        }
    }

    pub(super) fn local_services(&self, namespace: &str) -> Api<Service> {
        Api::namespaced(self.local_client.clone(), namespace)
    }

    pub(super) fn local_endpoints(&self, namespace: &str) -> Api<Endpoints> {
        Api::namespaced(self.local_client.clone(), namespace)
    }

    pub(super) fn all_local_services(&self) -> Api<Service> {
        Api::all(self.local_client.clone())
    }

    pub(super) fn all_local_endpoints(&self) -> Api<Endpoints> {
        Api::all(self.local_client.clone())
    }

    pub(super) fn remote_services(&self, namespace: &str) -> Api<Service> {
        Api::namespaced(self.remote_client.clone(), namespace)
    }

    pub(super) fn remote_endpoints(&self, namespace: &str) -> Api<Endpoints> {
        Api::namespaced(self.remote_client.clone(), namespace)
    }
}

fn object_key(meta: &ObjectMeta) -> String {
    format!(
        "{}/{}",
        meta.namespace.as_deref().unwrap_or_default(),
        meta.name.as_deref().unwrap_or_default()
    )
}

/// An endpoints object is a candidate for headless mirroring when it lives
/// outside kube-system and is labelled both as headless and as exported.
pub(super) fn is_exported_headless_endpoints(endpoints: &Endpoints) -> bool {
    let namespace = endpoints.metadata.namespace.as_deref().unwrap_or_default();
    let name = endpoints.metadata.name.as_deref().unwrap_or_default();

    if namespace == KUBE_SYSTEM_NAMESPACE {
        return false;
    }

    let Some(ep_labels) = &endpoints.metadata.labels else {
        debug!("Skipped processing Endpoints object {namespace}/{name}: no labels");
        return false;
    };
    if !ep_labels.contains_key(labels::HEADLESS_SERVICE) {
        debug!(
            "Skipped processing Endpoints object {namespace}/{name}: missing {} label",
            labels::HEADLESS_SERVICE
        );
        return false;
    }
    if !ep_labels.contains_key(labels::DEFAULT_EXPORTED_SERVICE_SELECTOR) {
        debug!(
            "Skipped processing Endpoints object {namespace}/{name}: missing {} label",
            labels::DEFAULT_EXPORTED_SERVICE_SELECTOR
        );
        return false;
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mirror::test_support::make_watcher;
    use crate::test_utils::MockService;
    use std::collections::BTreeMap;

    fn make_endpoints(namespace: &str, labels: &[(&str, &str)]) -> Endpoints {
        Endpoints {
            metadata: ObjectMeta {
                name: Some("db".to_string()),
                namespace: Some(namespace.to_string()),
                labels: Some(
                    labels
                        .iter()
                        .map(|(k, v)| (k.to_string(), v.to_string()))
                        .collect::<BTreeMap<_, _>>(),
                ),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[test]
    fn test_exported_headless_endpoints_filter_accepts_labelled_endpoints() {
        let endpoints = make_endpoints(
            "data",
            &[
                (labels::HEADLESS_SERVICE, ""),
                (labels::DEFAULT_EXPORTED_SERVICE_SELECTOR, "true"),
            ],
        );
        assert!(is_exported_headless_endpoints(&endpoints));
    }

    #[test]
    fn test_exported_headless_endpoints_filter_skips_kube_system() {
        let endpoints = make_endpoints(
            "kube-system",
            &[
                (labels::HEADLESS_SERVICE, ""),
                (labels::DEFAULT_EXPORTED_SERVICE_SELECTOR, "true"),
            ],
        );
        assert!(!is_exported_headless_endpoints(&endpoints));
    }

    #[test]
    fn test_exported_headless_endpoints_filter_requires_headless_label() {
        let endpoints =
            make_endpoints("data", &[(labels::DEFAULT_EXPORTED_SERVICE_SELECTOR, "true")]);
        assert!(!is_exported_headless_endpoints(&endpoints));
    }

    #[test]
    fn test_exported_headless_endpoints_filter_requires_exported_label() {
        let endpoints = make_endpoints("data", &[(labels::HEADLESS_SERVICE, "")]);
        assert!(!is_exported_headless_endpoints(&endpoints));
    }

    #[tokio::test]
    async fn test_retryable_event_is_processed_at_most_limit_plus_one_times() {
        let internal_error = r#"{"kind":"Status","apiVersion":"v1","status":"Failure","message":"boom","reason":"InternalError","code":500}"#;
        // fetching the mirror fails with a non-404 error on every attempt
        let local = MockService::new().on_get(
            "/api/v1/namespaces/app/services/foo-west",
            500,
            internal_error,
        );
        let remote = MockService::new();
        let watcher = make_watcher(&local, &remote, false);

        watcher.queue.add(MirrorEvent::RemoteServiceDeleted {
            name: "foo".to_string(),
            namespace: "app".to_string(),
        });
        let worker = tokio::spawn(Arc::clone(&watcher).process_events());

        // requeue_limit is 3, so the event is attempted at most 4 times
        for _ in 0..200 {
            if local.requests_matching("GET").len() >= 4 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        watcher.queue.shut_down();
        worker.await.unwrap();

        assert_eq!(local.requests_matching("GET").len(), 4);
    }

    #[tokio::test]
    async fn test_stop_with_cleanup_enqueues_cluster_unregistered() {
        let mock = MockService::new();
        let watcher = make_watcher(&mock, &mock, false);

        watcher.stop(true);

        let event = watcher.queue.get().await.unwrap();
        assert!(matches!(event, MirrorEvent::ClusterUnregistered));
        watcher.queue.done(&event);
        assert!(watcher.queue.get().await.is_none());
    }

    #[tokio::test]
    async fn test_stop_without_cleanup_just_shuts_down() {
        let mock = MockService::new();
        let watcher = make_watcher(&mock, &mock, false);

        watcher.stop(false);

        assert!(watcher.queue.is_shutting_down());
        assert!(watcher.queue.get().await.is_none());
    }
}
