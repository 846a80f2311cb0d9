// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Gateway address resolution

use crate::error::{Result, RetryableError};
use k8s_openapi::api::core::v1::EndpointAddress;
use tokio::net::lookup_host;
use tracing::warn;

/// Resolve each comma-separated gateway host to an IP address. One resolved
/// address is enough; only total failure is an error, and a retryable one.
pub async fn resolve_gateway_address(gateway_address: &str) -> Result<Vec<EndpointAddress>> {
    let mut addresses = Vec::new();
    let mut errors = Vec::new();

    for host in gateway_address
        .split(',')
        .map(str::trim)
        .filter(|h| !h.is_empty())
    {
        match lookup_host((host, 0u16)).await {
            Ok(mut resolved) => match resolved.next() {
                Some(addr) => addresses.push(EndpointAddress {
                    ip: addr.ip().to_string(),
                    ..Default::default()
                }),
                None => errors.push(anyhow::anyhow!("no addresses resolved for '{host}'")),
            },
            Err(e) => {
                let err = anyhow::anyhow!("Error resolving '{host}': {e}");
                warn!("{err}");
                errors.push(err);
            }
        }
    }

    if !addresses.is_empty() {
        return Ok(addresses);
    }
    Err(RetryableError::aggregate(errors).into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_resolves_ip_literal() {
        let addresses = resolve_gateway_address("10.0.0.1").await.unwrap();

        assert_eq!(addresses.len(), 1);
        assert_eq!(addresses[0].ip, "10.0.0.1");
    }

    #[tokio::test]
    async fn test_resolves_multiple_addresses() {
        let addresses = resolve_gateway_address("10.0.0.1, 10.0.0.2").await.unwrap();

        let ips: Vec<&str> = addresses.iter().map(|a| a.ip.as_str()).collect();
        assert_eq!(ips, vec!["10.0.0.1", "10.0.0.2"]);
    }

    #[tokio::test]
    async fn test_partial_resolution_is_enough() {
        // a syntactically invalid host fails without touching DNS
        let addresses = resolve_gateway_address("not a hostname,10.0.0.1")
            .await
            .unwrap();

        assert_eq!(addresses.len(), 1);
        assert_eq!(addresses[0].ip, "10.0.0.1");
    }

    #[tokio::test]
    async fn test_total_failure_is_retryable() {
        let err = resolve_gateway_address("not a hostname").await.unwrap_err();
        assert!(err.is_retryable());
    }
}
