// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Domain events processed by the reconciler.
//!
//! Raw watch notifications from the remote cluster map to the `Service*` and
//! `Endpoints*` variants. The `RemoteService*` variants are decided events
//! enqueued once the raw notification has been matched against local state.
//! The remaining variants are self-triggered.

use k8s_openapi::api::core::v1::{Endpoints, Service};
use kube::api::ObjectMeta;
use std::fmt;

#[derive(Debug, Clone)]
pub enum MirrorEvent {
    /// A service appeared on the remote cluster
    ServiceAdded(Box<Service>),
    /// A service changed on the remote cluster
    ServiceUpdated(Box<Service>),
    /// A service disappeared from the remote cluster
    ServiceDeleted(Box<Service>),
    /// Endpoints of an exported headless service appeared
    EndpointsAdded(Box<Endpoints>),
    /// Endpoints of an exported headless service changed
    EndpointsUpdated(Box<Endpoints>),
    /// A remote service needs a local mirror created
    RemoteServiceCreated(Box<Service>),
    /// An already-mirrored remote service changed; the mirror and its
    /// endpoints must be brought up to date
    RemoteServiceUpdated(Box<RemoteServiceUpdate>),
    /// A remote service is gone, or is no longer exported
    RemoteServiceDeleted { name: String, namespace: String },
    /// The link is being torn down with cleanup requested
    ClusterUnregistered,
    /// Diff local mirrors against the remote cluster, deleting any mirror
    /// whose original no longer exists. Covers deletes missed while the
    /// controller was not running.
    OrphanedServicesGcTriggered,
    /// Rewrite the gateway-probe endpoints and every non-headless mirror's
    /// endpoints from freshly resolved gateway addresses
    RepairEndpoints,
}

#[derive(Debug, Clone)]
pub struct RemoteServiceUpdate {
    pub local_service: Service,
    pub local_endpoints: Endpoints,
    pub remote_update: Service,
}

/// Coalescing key for the work queue: one slot per event kind and subject.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EventKey {
    kind: &'static str,
    namespace: String,
    name: String,
}

impl EventKey {
    fn object(kind: &'static str, meta: &ObjectMeta) -> Self {
        Self {
            kind,
            namespace: meta.namespace.clone().unwrap_or_default(),
            name: meta.name.clone().unwrap_or_default(),
        }
    }

    fn named(kind: &'static str, namespace: &str, name: &str) -> Self {
        Self {
            kind,
            namespace: namespace.to_string(),
            name: name.to_string(),
        }
    }

    fn singleton(kind: &'static str) -> Self {
        Self::named(kind, "", "")
    }
}

impl MirrorEvent {
    pub fn key(&self) -> EventKey {
        match self {
            Self::ServiceAdded(s) => EventKey::object("service-added", &s.metadata),
            Self::ServiceUpdated(s) => EventKey::object("service-updated", &s.metadata),
            Self::ServiceDeleted(s) => EventKey::object("service-deleted", &s.metadata),
            Self::EndpointsAdded(e) => EventKey::object("endpoints-added", &e.metadata),
            Self::EndpointsUpdated(e) => EventKey::object("endpoints-updated", &e.metadata),
            Self::RemoteServiceCreated(s) => {
                EventKey::object("remote-service-created", &s.metadata)
            }
            Self::RemoteServiceUpdated(u) => {
                EventKey::object("remote-service-updated", &u.remote_update.metadata)
            }
            Self::RemoteServiceDeleted { name, namespace } => {
                EventKey::named("remote-service-deleted", namespace, name)
            }
            Self::ClusterUnregistered => EventKey::singleton("cluster-unregistered"),
            Self::OrphanedServicesGcTriggered => EventKey::singleton("orphaned-services-gc"),
            Self::RepairEndpoints => EventKey::singleton("repair-endpoints"),
        }
    }
}

impl fmt::Display for MirrorEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn subject(meta: &ObjectMeta) -> String {
            format!(
                "{}/{}",
                meta.namespace.as_deref().unwrap_or_default(),
                meta.name.as_deref().unwrap_or_default()
            )
        }

        match self {
            Self::ServiceAdded(s) => write!(f, "ServiceAdded {}", subject(&s.metadata)),
            Self::ServiceUpdated(s) => write!(f, "ServiceUpdated {}", subject(&s.metadata)),
            Self::ServiceDeleted(s) => write!(f, "ServiceDeleted {}", subject(&s.metadata)),
            Self::EndpointsAdded(e) => write!(f, "EndpointsAdded {}", subject(&e.metadata)),
            Self::EndpointsUpdated(e) => write!(f, "EndpointsUpdated {}", subject(&e.metadata)),
            Self::RemoteServiceCreated(s) => {
                write!(f, "RemoteServiceCreated {}", subject(&s.metadata))
            }
            Self::RemoteServiceUpdated(u) => {
                write!(f, "RemoteServiceUpdated {}", subject(&u.remote_update.metadata))
            }
            Self::RemoteServiceDeleted { name, namespace } => {
                write!(f, "RemoteServiceDeleted {namespace}/{name}")
            }
            Self::ClusterUnregistered => write!(f, "ClusterUnregistered"),
            Self::OrphanedServicesGcTriggered => write!(f, "OrphanedServicesGcTriggered"),
            Self::RepairEndpoints => write!(f, "RepairEndpoints"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_service(name: &str, namespace: &str) -> Box<Service> {
        Box::new(Service {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some(namespace.to_string()),
                ..Default::default()
            },
            ..Default::default()
        })
    }

    #[test]
    fn test_same_subject_same_kind_coalesces() {
        let first = MirrorEvent::ServiceAdded(make_service("foo", "app"));
        let second = MirrorEvent::ServiceAdded(make_service("foo", "app"));

        assert_eq!(first.key(), second.key());
    }

    #[test]
    fn test_different_kind_does_not_coalesce() {
        let added = MirrorEvent::ServiceAdded(make_service("foo", "app"));
        let updated = MirrorEvent::ServiceUpdated(make_service("foo", "app"));

        assert_ne!(added.key(), updated.key());
    }

    #[test]
    fn test_different_subject_does_not_coalesce() {
        let foo = MirrorEvent::ServiceAdded(make_service("foo", "app"));
        let bar = MirrorEvent::ServiceAdded(make_service("bar", "app"));

        assert_ne!(foo.key(), bar.key());
    }

    #[test]
    fn test_singleton_events_coalesce() {
        assert_eq!(
            MirrorEvent::RepairEndpoints.key(),
            MirrorEvent::RepairEndpoints.key()
        );
        assert_ne!(
            MirrorEvent::RepairEndpoints.key(),
            MirrorEvent::OrphanedServicesGcTriggered.key()
        );
    }

    #[test]
    fn test_display_names_the_subject() {
        let event = MirrorEvent::RemoteServiceDeleted {
            name: "foo".to_string(),
            namespace: "app".to_string(),
        };
        assert_eq!(event.to_string(), "RemoteServiceDeleted app/foo");

        let event = MirrorEvent::ServiceAdded(make_service("foo", "app"));
        assert_eq!(event.to_string(), "ServiceAdded app/foo");
    }
}
