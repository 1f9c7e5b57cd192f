// SPDX-FileCopyrightText: Copyright (c) 2024-2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Scoped acquisition of a multi-device cluster and its coordinating client.
//!
//! Acquire order is cluster, then client, then a readiness wait for the
//! requested worker count. Release order is always client, then cluster.
//! Handles are stored as soon as they exist, so a failure partway through
//! acquire still leaves everything reachable for release.

use std::sync::Arc;
use thiserror::Error;

use crate::cluster::{ClusterBackend, ClusterClient, WaitError, WorkerCluster};
use crate::config::AcquireOptions;
use crate::{Result, raise};

#[derive(Debug, Error)]
pub enum AcquireError {
    #[error("failed to start cluster for {requested} devices")]
    ClusterStart {
        requested: usize,
        #[source]
        source: anyhow::Error,
    },

    #[error("failed to connect client to cluster")]
    ClientConnect(#[source] anyhow::Error),

    #[error("workers did not become ready")]
    Wait(#[from] WaitError),
}

/// Holder for a (cluster, client) pair sized to a caller-specified device
/// count.
///
/// One pair per holder; re-acquiring an already-acquired holder is not
/// supported. [`release`](Self::release) is idempotent and safe to call
/// without a prior acquire. Because teardown is async it cannot run in
/// `Drop`; dropping a still-acquired holder only logs a warning.
pub struct MultiDeviceContext<B: ClusterBackend> {
    backend: B,
    number_of_devices: usize,
    options: AcquireOptions,
    cluster: Option<Arc<B::Cluster>>,
    client: Option<Arc<B::Client>>,
}

impl<B: ClusterBackend> MultiDeviceContext<B> {
    /// Create an unacquired holder. No side effects.
    ///
    /// The device count is not checked against what the environment can
    /// actually supply; that verification must be done prior to the call.
    pub fn new(backend: B, number_of_devices: usize) -> Result<Self> {
        Self::with_options(backend, number_of_devices, AcquireOptions::default())
    }

    pub fn with_options(
        backend: B,
        number_of_devices: usize,
        options: AcquireOptions,
    ) -> Result<Self> {
        if number_of_devices == 0 {
            raise!("number_of_devices must be at least 1");
        }
        Ok(Self {
            backend,
            number_of_devices,
            options,
            cluster: None,
            client: None,
        })
    }

    /// Start the cluster, connect the client, and block until the requested
    /// worker count is ready.
    ///
    /// Spawns one worker per requested device plus a coordinating client.
    /// With no `ready_timeout` configured the readiness wait is delegated to
    /// the framework and may block indefinitely; [`crate::enforce_rescale`]
    /// is the bounded alternative for an already-running cluster.
    pub async fn acquire(&mut self) -> Result<&mut Self, AcquireError> {
        let requested = self.number_of_devices;
        tracing::debug!(devices = requested, "acquiring multi-device context");

        let cluster = Arc::new(
            self.backend
                .start_cluster(requested)
                .await
                .map_err(|source| AcquireError::ClusterStart { requested, source })?,
        );
        // Stored before the client exists so a failure below still releases it.
        self.cluster = Some(cluster.clone());

        let client = Arc::new(
            self.backend
                .connect(&cluster)
                .await
                .map_err(AcquireError::ClientConnect)?,
        );
        self.client = Some(client.clone());

        client
            .wait_for_workers(requested, self.options.ready_timeout())
            .await?;

        tracing::debug!(devices = requested, "multi-device context ready");
        Ok(self)
    }

    /// The bound client, or `None` before a successful connect.
    pub fn client(&self) -> Option<Arc<B::Client>> {
        self.client.clone()
    }

    /// The cluster handle, or `None` before a successful start.
    pub fn cluster(&self) -> Option<Arc<B::Cluster>> {
        self.cluster.clone()
    }

    pub fn number_of_devices(&self) -> usize {
        self.number_of_devices
    }

    /// Close the client, then the cluster, each only if present.
    ///
    /// Close failures are not suppressed. A handle whose close fails is
    /// dropped from the holder anyway, so a later call moves on to the
    /// remaining handle instead of retrying the failed one.
    pub async fn release(&mut self) -> Result<()> {
        if let Some(client) = self.client.take() {
            client.close().await?;
        }
        if let Some(cluster) = self.cluster.take() {
            cluster.close().await?;
        }
        Ok(())
    }
}

impl<B: ClusterBackend> Drop for MultiDeviceContext<B> {
    fn drop(&mut self) {
        if self.cluster.is_some() || self.client.is_some() {
            tracing::warn!(
                devices = self.number_of_devices,
                "multi-device context dropped while still acquired; worker processes may leak"
            );
        }
    }
}

/// Acquire a context, run `body` against the client and cluster, and release
/// on the way out whether or not `body` succeeded.
///
/// When both the body and the teardown fail, the body's error wins and the
/// teardown failure is logged.
pub async fn run_with_context<B, F, Fut, T>(
    backend: B,
    number_of_devices: usize,
    body: F,
) -> Result<T>
where
    B: ClusterBackend,
    F: FnOnce(Arc<B::Client>, Arc<B::Cluster>) -> Fut,
    Fut: std::future::Future<Output = Result<T>>,
{
    let mut ctx = MultiDeviceContext::new(backend, number_of_devices)?;
    if let Err(acquire_err) = ctx.acquire().await {
        // Acquire stores handles as they are created, so a partial failure
        // still has something to tear down.
        if let Err(close_err) = ctx.release().await {
            tracing::error!(error = %close_err, "teardown failed after acquire error");
        }
        return Err(acquire_err.into());
    }

    let (client, cluster) = match (ctx.client(), ctx.cluster()) {
        (Some(client), Some(cluster)) => (client, cluster),
        _ => raise!("context reported acquired without handles"),
    };

    let outcome = body(client, cluster).await;
    match ctx.release().await {
        Ok(()) => outcome,
        Err(close_err) => match outcome {
            Ok(_) => Err(close_err),
            Err(body_err) => {
                tracing::error!(error = %close_err, "teardown failed after test body error");
                Err(body_err)
            }
        },
    }
}
