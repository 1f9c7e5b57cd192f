// SPDX-FileCopyrightText: Copyright (c) 2024-2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Trait seam between the test context and the cluster framework.
//!
//! Everything the context needs from the underlying framework is expressed
//! here: start a cluster, connect a client, scale, count workers, wait for
//! readiness, close. Scheduling, placement and transport all live on the
//! other side of these traits.

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

use crate::Result;

/// Error surfaced by [`ClusterClient::wait_for_workers`].
#[derive(Debug, Error)]
pub enum WaitError {
    /// The readiness wait was given a deadline and the deadline passed first.
    #[error("timed out after {waited:?} waiting for {requested} ready workers ({observed} observed)")]
    Timeout {
        requested: usize,
        observed: usize,
        waited: Duration,
    },

    /// The underlying framework failed while we were waiting.
    #[error(transparent)]
    Backend(#[from] anyhow::Error),
}

/// Handle to a provisioned set of worker processes, one per accelerator device.
///
/// A cluster is exclusively owned by whoever started it; nothing here is safe
/// against concurrent owners and no internal locking beyond what an
/// implementation needs for its own bookkeeping is promised.
#[async_trait]
pub trait WorkerCluster: Send + Sync {
    /// Ask the cluster to grow or shrink to `target` workers.
    ///
    /// Returns once the request is accepted, not once it is satisfied. Use
    /// [`crate::enforce_rescale`] to converge on the new count under a
    /// bounded budget.
    async fn scale(&self, target: usize) -> Result<()>;

    /// Number of workers currently alive, as the cluster sees them right now.
    fn num_workers(&self) -> usize;

    /// Tear down all workers. Errors are not suppressed.
    async fn close(&self) -> Result<()>;
}

/// Coordinating handle bound to exactly one cluster.
#[async_trait]
pub trait ClusterClient: Send + Sync {
    /// Block until at least `count` workers are ready.
    ///
    /// With `timeout = None` this delegates entirely to the framework and may
    /// wait forever; a `Some` deadline surfaces [`WaitError::Timeout`] instead.
    async fn wait_for_workers(
        &self,
        count: usize,
        timeout: Option<Duration>,
    ) -> Result<(), WaitError>;

    /// Disconnect from the cluster. Must be called before the cluster itself
    /// is closed.
    async fn close(&self) -> Result<()>;
}

/// Factory that starts clusters and connects coordinating clients to them,
/// keeping the two implementations paired behind a single seam.
#[async_trait]
pub trait ClusterBackend: Send + Sync {
    type Cluster: WorkerCluster;
    type Client: ClusterClient;

    /// Start a cluster with one worker per requested device.
    ///
    /// Device availability is the caller's problem; asking for more devices
    /// than the environment has ends however the framework decides it ends.
    async fn start_cluster(&self, num_workers: usize) -> Result<Self::Cluster>;

    /// Connect a coordinating client to an already-running cluster.
    async fn connect(&self, cluster: &Self::Cluster) -> Result<Self::Client>;
}
