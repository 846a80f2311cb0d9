// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Configuration types shared across the controller.

pub mod link;

pub use link::{Link, ProbeSpec};
