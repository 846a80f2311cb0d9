// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Kubernetes utilities for remote client creation and namespace management.

pub mod client;
pub mod namespaces;

pub use client::{check_remote_connectivity, remote_cluster_config};
pub use namespaces::ensure_namespace_exists;
