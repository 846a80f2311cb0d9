// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! The service mirroring core: domain events, the rate-limited work queue,
//! and the remote cluster service watcher with its mutators.

pub mod events;
pub mod queue;
pub mod watcher;

mod cleanup;
mod gateway;
mod headless;
mod repair;
mod service;

pub use events::{MirrorEvent, RemoteServiceUpdate};
pub use queue::EventQueue;
pub use watcher::RemoteClusterServiceWatcher;
