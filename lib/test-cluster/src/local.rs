// SPDX-FileCopyrightText: Copyright (c) 2024-2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! In-process cluster backend.
//!
//! One tokio task per device ordinal stands in for a worker process. Workers
//! do no work: they register ready, park on a cancellation token, and
//! deregister when cancelled. Readiness is published over a watch channel so
//! both the client wait and the rescale poll observe the same count.
//!
//! Scale-down cancels the excess workers and returns immediately; the count
//! converges once the cancelled tasks get to run, which is exactly the
//! behavior the bounded rescale poll exists for.

use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::cluster::{ClusterBackend, ClusterClient, WaitError, WorkerCluster};
use crate::Result;

/// Backend that starts [`LocalCluster`]s. Stateless; one value can serve any
/// number of contexts.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalBackend;

struct LocalWorker {
    ordinal: usize,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

/// Cluster of in-process workers, one per device ordinal.
pub struct LocalCluster {
    id: String,
    requested: usize,
    workers: Mutex<Vec<LocalWorker>>,
    ready_tx: watch::Sender<usize>,
    ready_rx: watch::Receiver<usize>,
    cancel: CancellationToken,
    next_ordinal: AtomicUsize,
}

impl LocalCluster {
    /// Start a cluster with `num_workers` workers. Must be called from within
    /// a tokio runtime.
    pub fn start(num_workers: usize) -> Self {
        let (ready_tx, ready_rx) = watch::channel(0usize);
        let cluster = Self {
            id: Uuid::new_v4().to_string(),
            requested: num_workers,
            workers: Mutex::new(Vec::with_capacity(num_workers)),
            ready_tx,
            ready_rx,
            cancel: CancellationToken::new(),
            next_ordinal: AtomicUsize::new(0),
        };
        for _ in 0..num_workers {
            cluster.spawn_worker();
        }
        tracing::debug!(cluster_id = %cluster.id, workers = num_workers, "local cluster started");
        cluster
    }

    /// Worker count requested at start time.
    pub fn requested(&self) -> usize {
        self.requested
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Connect a client to this cluster.
    pub fn client(&self) -> LocalClient {
        LocalClient {
            cluster_id: self.id.clone(),
            ready: self.ready_rx.clone(),
        }
    }

    fn spawn_worker(&self) {
        let ordinal = self.next_ordinal.fetch_add(1, Ordering::SeqCst);
        let cancel = self.cancel.child_token();
        let worker_cancel = cancel.clone();
        let ready = self.ready_tx.clone();
        let cluster_id = self.id.clone();

        let task = tokio::spawn(async move {
            tracing::debug!(%cluster_id, device = ordinal, "worker ready");
            ready.send_modify(|n| *n += 1);
            worker_cancel.cancelled().await;
            ready.send_modify(|n| *n = n.saturating_sub(1));
            tracing::debug!(%cluster_id, device = ordinal, "worker stopped");
        });

        self.workers.lock().unwrap().push(LocalWorker {
            ordinal,
            cancel,
            task,
        });
    }
}

#[async_trait]
impl WorkerCluster for LocalCluster {
    async fn scale(&self, target: usize) -> Result<()> {
        let excess = {
            let mut workers = self.workers.lock().unwrap();
            let current = workers.len();
            if target >= current {
                Vec::new()
            } else {
                workers.split_off(target)
            }
        };

        if excess.is_empty() {
            let current = self.workers.lock().unwrap().len();
            for _ in current..target {
                self.spawn_worker();
            }
        } else {
            for worker in &excess {
                tracing::debug!(cluster_id = %self.id, device = worker.ordinal, "cancelling worker");
                worker.cancel.cancel();
            }
            // Cancelled tasks deregister on their own; the handle is dropped
            // and the task detaches.
        }

        tracing::debug!(cluster_id = %self.id, target_workers = target, "scale request accepted");
        Ok(())
    }

    fn num_workers(&self) -> usize {
        *self.ready_rx.borrow()
    }

    async fn close(&self) -> Result<()> {
        self.cancel.cancel();
        let workers: Vec<LocalWorker> = {
            let mut guard = self.workers.lock().unwrap();
            guard.drain(..).collect()
        };
        for worker in workers {
            worker.task.await?;
        }
        tracing::debug!(cluster_id = %self.id, "local cluster closed");
        Ok(())
    }
}

/// Client over a [`LocalCluster`]'s readiness channel. Holds no OS resources;
/// close only marks the disconnect in the log.
pub struct LocalClient {
    cluster_id: String,
    ready: watch::Receiver<usize>,
}

#[async_trait]
impl ClusterClient for LocalClient {
    async fn wait_for_workers(
        &self,
        count: usize,
        timeout: Option<Duration>,
    ) -> Result<(), WaitError> {
        let mut ready = self.ready.clone();
        let wait = async move {
            loop {
                let observed = *ready.borrow_and_update();
                if observed >= count {
                    return Ok(());
                }
                ready.changed().await.map_err(anyhow::Error::from)?;
            }
        };

        match timeout {
            Some(limit) => match tokio::time::timeout(limit, wait).await {
                Ok(result) => result,
                Err(_) => Err(WaitError::Timeout {
                    requested: count,
                    observed: *self.ready.borrow(),
                    waited: limit,
                }),
            },
            None => wait.await,
        }
    }

    async fn close(&self) -> Result<()> {
        tracing::debug!(cluster_id = %self.cluster_id, "local client disconnected");
        Ok(())
    }
}

#[async_trait]
impl ClusterBackend for LocalBackend {
    type Cluster = LocalCluster;
    type Client = LocalClient;

    async fn start_cluster(&self, num_workers: usize) -> Result<LocalCluster> {
        Ok(LocalCluster::start(num_workers))
    }

    async fn connect(&self, cluster: &LocalCluster) -> Result<LocalClient> {
        Ok(cluster.client())
    }
}
