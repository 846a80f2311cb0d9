// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Namespace management utilities

use crate::error::{is_not_found, MirrorError, Result};
use k8s_openapi::api::core::v1::Namespace;
use kube::{
    api::{ObjectMeta, PostParams},
    Api, Client,
};
use std::collections::BTreeMap;
use tracing::{debug, info};

/// Ensure a namespace exists in the cluster. A namespace created here is
/// tagged with the given labels so it is recognizable as a mirrored resource;
/// a pre-existing namespace is left untouched.
pub async fn ensure_namespace_exists(
    client: &Client,
    namespace: &str,
    labels: BTreeMap<String, String>,
) -> Result<()> {
    let namespaces: Api<Namespace> = Api::all(client.clone());

    match namespaces.get(namespace).await {
        Ok(_) => {
            debug!("Namespace {} already exists", namespace);
            Ok(())
        }
        Err(err) if is_not_found(&err) => {
            info!("Creating namespace {}", namespace);
            let ns = Namespace {
                metadata: ObjectMeta {
                    name: Some(namespace.to_string()),
                    labels: Some(labels),
                    ..Default::default()
                },
                ..Default::default()
            };
            namespaces
                .create(&PostParams::default(), &ns)
                .await
                .map_err(MirrorError::retryable)?;
            Ok(())
        }
        Err(err) => Err(MirrorError::retryable(err)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{namespace_json, MockService};

    fn mirror_labels() -> BTreeMap<String, String> {
        BTreeMap::from([
            (
                "mirror.linkerd.io/mirrored-service".to_string(),
                "true".to_string(),
            ),
            (
                "mirror.linkerd.io/cluster-name".to_string(),
                "west".to_string(),
            ),
        ])
    }

    #[tokio::test]
    async fn test_existing_namespace_is_not_recreated() {
        let mock = MockService::new().on_get("/api/v1/namespaces/app", 200, &namespace_json("app"));
        let client = mock.client();

        ensure_namespace_exists(&client, "app", mirror_labels())
            .await
            .unwrap();

        assert!(mock.requests_matching("POST").is_empty());
    }

    #[tokio::test]
    async fn test_missing_namespace_is_created_with_labels() {
        let mock = MockService::new().on_post("/api/v1/namespaces", 201, &namespace_json("app"));
        let client = mock.client();

        ensure_namespace_exists(&client, "app", mirror_labels())
            .await
            .unwrap();

        let posts = mock.requests_matching("POST");
        assert_eq!(posts.len(), 1);
        assert_eq!(
            posts[0].body["metadata"]["labels"]["mirror.linkerd.io/cluster-name"],
            "west"
        );
    }

    #[tokio::test]
    async fn test_create_failure_is_retryable() {
        // default mock response is 404, so the create itself fails too
        let mock = MockService::new();
        let client = mock.client();

        let err = ensure_namespace_exists(&client, "app", mirror_labels())
            .await
            .unwrap_err();
        assert!(err.is_retryable());
    }
}
