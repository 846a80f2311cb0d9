// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Prometheus metrics. Exposition is left to the embedding process; this
//! module only defines and registers the collectors.

use lazy_static::lazy_static;
use prometheus::{IntCounterVec, Opts, Registry};

lazy_static! {
    /// Incremented once per endpoint repair sweep, per target cluster
    pub static ref ENDPOINT_REPAIR_COUNTER: IntCounterVec = IntCounterVec::new(
        Opts::new(
            "service_mirror_endpoint_repairs",
            "Number of times the gateway-probe and mirror service endpoints have been repaired"
        ),
        &["target_cluster_name"]
    )
    .expect("metric can be created");
}

pub fn register_metrics(registry: &Registry) {
    registry
        .register(Box::new(ENDPOINT_REPAIR_COUNTER.clone()))
        .expect("collector can be registered");
}
