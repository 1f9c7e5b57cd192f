// SPDX-FileCopyrightText: Copyright (c) 2024-2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Test support for running lattice suites against a multi-device worker cluster.
//!
//! The crate provides two things:
//!
//! - [`MultiDeviceContext`], a scoped holder that provisions a worker cluster
//!   sized to a requested device count, binds a coordinating client to it,
//!   blocks until the requested worker count is ready, and tears both down in
//!   client-then-cluster order on release.
//! - [`enforce_rescale`], which asks a live cluster to change its worker count
//!   and polls under a bounded attempt budget instead of waiting forever.
//!
//! The cluster framework itself is opaque: it sits behind the
//! [`ClusterBackend`] / [`WorkerCluster`] / [`ClusterClient`] traits. The
//! in-process [`LocalBackend`] is enough for most suites; the [`mock`] module
//! is there for suites that need to script convergence or observe teardown
//! ordering.

pub use anyhow::{
    Context as ErrorContext, Error, Ok as OK, Result, anyhow as error, bail as raise,
};

pub mod cluster;
pub mod config;
pub mod context;
pub mod local;
pub mod logging;
pub mod mock;
pub mod rescale;

pub use cluster::{ClusterBackend, ClusterClient, WaitError, WorkerCluster};
pub use config::{AcquireOptions, RescalePolicy};
pub use context::{AcquireError, MultiDeviceContext, run_with_context};
pub use local::LocalBackend;
pub use rescale::{DEFAULT_MAX_ATTEMPTS, DEFAULT_WAIT_INTERVAL, RescaleError, enforce_rescale};
