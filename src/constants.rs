// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

/// Labels placed on (or read from) mirrored resources. External tooling
/// depends on these, so they are wire-stable.
pub mod labels {
    /// Marks a local object as a mirror of a remote resource
    pub const MIRRORED_RESOURCE: &str = "mirror.linkerd.io/mirrored-service";
    /// Name of the cluster a mirrored resource originates from
    pub const REMOTE_CLUSTER_NAME: &str = "mirror.linkerd.io/cluster-name";
    /// Ties an endpoint-mirror service to its headless mirror
    pub const MIRRORED_HEADLESS_SVC_NAME: &str = "mirror.linkerd.io/headless-mirror-svc-name";
    /// Placed on exported services in the remote cluster; the endpoints
    /// filter checks for the presence of this key
    pub const DEFAULT_EXPORTED_SERVICE_SELECTOR: &str = "mirror.linkerd.io/exported";
    /// Placed by Kubernetes on endpoints objects of headless services
    pub const HEADLESS_SERVICE: &str = "service.kubernetes.io/headless";
}

/// Annotations placed on mirrored resources (wire-stable)
pub mod annotations {
    /// Remote resourceVersion last mirrored, used to detect real changes
    pub const REMOTE_RESOURCE_VERSION: &str = "mirror.linkerd.io/remote-resource-version";
    /// Fully qualified DNS name of the remote service
    pub const REMOTE_SERVICE_FQ_NAME: &str = "mirror.linkerd.io/remote-svc-fq-name";
    /// Identity of the remote gateway, propagated onto mirror endpoints
    pub const REMOTE_GATEWAY_IDENTITY: &str = "mirror.linkerd.io/remote-gateway-identity";
    /// Copied from the remote service when present
    pub const PROXY_OPAQUE_PORTS: &str = "config.linkerd.io/opaque-ports";
}

/// Event reason recorded on remote services whose mirroring is skipped
pub const EVENT_TYPE_SKIPPED: &str = "ServiceMirroringSkipped";

/// Port name used on the gateway-probe endpoints object
pub const PROBE_PORT_NAME: &str = "mc-probe";

/// Sentinel clusterIP value of headless services
pub const CLUSTER_IP_NONE: &str = "None";

/// Namespace whose endpoints are never considered for mirroring
pub const KUBE_SYSTEM_NAMESPACE: &str = "kube-system";

/// Per-key exponential backoff applied to rate-limited requeues
pub mod backoff {
    use std::time::Duration;

    pub const BASE_DELAY: Duration = Duration::from_millis(5);
    pub const MAX_DELAY: Duration = Duration::from_secs(1000);
}
