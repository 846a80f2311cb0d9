// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Garbage collection of mirrored resources.
//!
//! Orphan GC runs at startup: deletes missed while the controller was down
//! leave mirrors behind whose originals no longer exist. Full cleanup runs
//! when the link is unregistered with cleanup requested.

use crate::error::{is_not_found, MirrorError, Result, RetryableError};
use anyhow::anyhow;
use kube::api::{DeleteParams, ListParams};
use tracing::info;

use super::watcher::RemoteClusterServiceWatcher;

impl RemoteClusterServiceWatcher {
    /// Diff every local mirror service against the remote cluster; delete the
    /// ones whose original is gone.
    pub(super) async fn cleanup_orphaned_services(&self) -> Result<()> {
        let mirror_services = self
            .all_local_services()
            .list(&ListParams::default().labels(&self.mirror_label_selector()))
            .await
            .map_err(|err| {
                MirrorError::retryable(anyhow!(
                    "failed to list services while cleaning up mirror services: {err}"
                ))
            })?;

        let mut errors: Vec<anyhow::Error> = Vec::new();
        for service in mirror_services.items {
            let namespace = service.metadata.namespace.clone().unwrap_or_default();
            let name = service.metadata.name.clone().unwrap_or_default();
            let original_name = self.original_resource_name(&name);

            match self.remote_services(&namespace).get(original_name).await {
                Ok(_) => {}
                Err(err) if is_not_found(&err) => {
                    // the original is gone, so the mirror must go too
                    match self
                        .local_services(&namespace)
                        .delete(&name, &DeleteParams::default())
                        .await
                    {
                        Ok(_) => info!(
                            "Deleted service {namespace}/{name} while cleaning up mirror services"
                        ),
                        Err(err) => errors.push(anyhow!(err)),
                    }
                }
                Err(err) => errors.push(anyhow!(err)),
            }
        }

        if !errors.is_empty() {
            return Err(RetryableError::aggregate(errors).into());
        }
        Ok(())
    }

    /// Delete everything this link ever created: all local services and
    /// endpoints carrying its mirror labels.
    pub(super) async fn cleanup_mirrored_resources(&self) -> Result<()> {
        let selector = self.mirror_label_selector();

        let services = self
            .all_local_services()
            .list(&ListParams::default().labels(&selector))
            .await
            .map_err(|err| {
                MirrorError::retryable(anyhow!(
                    "could not retrieve mirrored services that need cleaning up: {err}"
                ))
            })?;

        let mut errors: Vec<anyhow::Error> = Vec::new();
        for service in services.items {
            let namespace = service.metadata.namespace.clone().unwrap_or_default();
            let name = service.metadata.name.clone().unwrap_or_default();
            match self
                .local_services(&namespace)
                .delete(&name, &DeleteParams::default())
                .await
            {
                Ok(_) => info!("Deleted service {namespace}/{name}"),
                Err(err) if is_not_found(&err) => {}
                Err(err) => errors.push(anyhow!(
                    "could not delete service {namespace}/{name}: {err}"
                )),
            }
        }

        let endpoints = self
            .all_local_endpoints()
            .list(&ListParams::default().labels(&selector))
            .await
            .map_err(|err| {
                MirrorError::retryable(anyhow!(
                    "could not retrieve Endpoints that need cleaning up: {err}"
                ))
            })?;

        for endpoint in endpoints.items {
            let namespace = endpoint.metadata.namespace.clone().unwrap_or_default();
            let name = endpoint.metadata.name.clone().unwrap_or_default();
            match self
                .local_endpoints(&namespace)
                .delete(&name, &DeleteParams::default())
                .await
            {
                Ok(_) => info!("Deleted Endpoints {namespace}/{name}"),
                Err(err) if is_not_found(&err) => {}
                Err(err) => errors.push(anyhow!(
                    "could not delete Endpoints {namespace}/{name}: {err}"
                )),
            }
        }

        if !errors.is_empty() {
            return Err(RetryableError::aggregate(errors).into());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mirror::test_support::make_watcher;
    use crate::test_utils::{list_json, obj_json, status_ok_json, MockService};
    use k8s_openapi::api::core::v1::{Endpoints, Service};
    use kube::api::ObjectMeta;

    fn make_named(name: &str, namespace: &str) -> Service {
        Service {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some(namespace.to_string()),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    fn make_named_endpoints(name: &str, namespace: &str) -> Endpoints {
        Endpoints {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some(namespace.to_string()),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_orphan_gc_deletes_mirrors_without_originals() {
        let foo_mirror = make_named("foo-west", "app");
        let bar_mirror = make_named("bar-west", "app");
        let local = MockService::new()
            .on_get(
                "/api/v1/services",
                200,
                &list_json("ServiceList", &[&foo_mirror, &bar_mirror]),
            )
            .on_delete(
                "/api/v1/namespaces/app/services/bar-west",
                200,
                &status_ok_json(),
            );
        // only foo still exists on the remote; bar hits the default 404
        let remote = MockService::new().on_get(
            "/api/v1/namespaces/app/services/foo",
            200,
            &obj_json(&make_named("foo", "app")),
        );
        let watcher = make_watcher(&local, &remote, false);

        watcher.cleanup_orphaned_services().await.unwrap();

        let deletes = local.requests_matching("DELETE");
        assert_eq!(deletes.len(), 1);
        assert_eq!(deletes[0].path, "/api/v1/namespaces/app/services/bar-west");
    }

    #[tokio::test]
    async fn test_orphan_gc_aggregates_delete_failures_as_retryable() {
        let bar_mirror = make_named("bar-west", "app");
        // the bar-west delete hits the default 404, which is a failure here
        let local = MockService::new().on_get(
            "/api/v1/services",
            200,
            &list_json("ServiceList", &[&bar_mirror]),
        );
        let remote = MockService::new();
        let watcher = make_watcher(&local, &remote, false);

        let err = watcher.cleanup_orphaned_services().await.unwrap_err();
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_orphan_gc_is_a_no_op_when_originals_exist() {
        let foo_mirror = make_named("foo-west", "app");
        let local = MockService::new().on_get(
            "/api/v1/services",
            200,
            &list_json("ServiceList", &[&foo_mirror]),
        );
        let remote = MockService::new().on_get(
            "/api/v1/namespaces/app/services/foo",
            200,
            &obj_json(&make_named("foo", "app")),
        );
        let watcher = make_watcher(&local, &remote, false);

        watcher.cleanup_orphaned_services().await.unwrap();

        assert!(local.requests_matching("DELETE").is_empty());
    }

    #[tokio::test]
    async fn test_cleanup_mirrored_resources_deletes_services_and_endpoints() {
        let foo_mirror = make_named("foo-west", "app");
        let db_mirror = make_named("db-west", "data");
        let foo_endpoints = make_named_endpoints("foo-west", "app");
        let local = MockService::new()
            .on_get(
                "/api/v1/services",
                200,
                &list_json("ServiceList", &[&foo_mirror, &db_mirror]),
            )
            .on_get(
                "/api/v1/endpoints",
                200,
                &list_json("EndpointsList", &[&foo_endpoints]),
            )
            .on_delete("/api/v1/namespaces/app/services/foo-west", 200, &status_ok_json())
            .on_delete("/api/v1/namespaces/data/services/db-west", 200, &status_ok_json())
            .on_delete(
                "/api/v1/namespaces/app/endpoints/foo-west",
                200,
                &status_ok_json(),
            );
        let remote = MockService::new();
        let watcher = make_watcher(&local, &remote, false);

        watcher.cleanup_mirrored_resources().await.unwrap();

        let deletes = local.requests_matching("DELETE");
        let paths: Vec<&str> = deletes.iter().map(|r| r.path.as_str()).collect();
        assert_eq!(deletes.len(), 3);
        assert!(paths.contains(&"/api/v1/namespaces/app/services/foo-west"));
        assert!(paths.contains(&"/api/v1/namespaces/data/services/db-west"));
        assert!(paths.contains(&"/api/v1/namespaces/app/endpoints/foo-west"));
    }

    #[tokio::test]
    async fn test_cleanup_mirrored_resources_ignores_not_found_on_delete() {
        let foo_mirror = make_named("foo-west", "app");
        // deletes hit the default 404: already gone, not an error
        let local = MockService::new()
            .on_get(
                "/api/v1/services",
                200,
                &list_json("ServiceList", &[&foo_mirror]),
            )
            .on_get("/api/v1/endpoints", 200, &list_json("EndpointsList", &[] as &[&Endpoints]));
        let remote = MockService::new();
        let watcher = make_watcher(&local, &remote, false);

        watcher.cleanup_mirrored_resources().await.unwrap();
    }

    #[tokio::test]
    async fn test_cleanup_mirrored_resources_retryable_when_list_fails() {
        // the services list itself hits the default 404
        let local = MockService::new();
        let remote = MockService::new();
        let watcher = make_watcher(&local, &remote, false);

        let err = watcher.cleanup_mirrored_resources().await.unwrap_err();
        assert!(err.is_retryable());
    }
}
