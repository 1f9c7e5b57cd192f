// SPDX-FileCopyrightText: Copyright (c) 2024-2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Scriptable in-memory backend for exercising the context and rescale
//! helpers without a real cluster framework.
//!
//! Worker counts are scripted per observation, so a test can stage exactly
//! the convergence (or non-convergence) it wants. Teardown ordering is
//! recorded in a shared [`CloseLog`] that the cluster and client both write
//! to.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::cluster::{ClusterBackend, ClusterClient, WaitError, WorkerCluster};
use crate::{Result, error};

/// One teardown event, in the order it happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseEvent {
    Client,
    Cluster,
}

/// Shared record of close calls across a mock cluster/client pair.
#[derive(Clone, Default)]
pub struct CloseLog {
    events: Arc<Mutex<Vec<CloseEvent>>>,
}

impl CloseLog {
    pub fn record(&self, event: CloseEvent) {
        self.events.lock().unwrap().push(event);
    }

    pub fn events(&self) -> Vec<CloseEvent> {
        self.events.lock().unwrap().clone()
    }
}

/// Mock cluster whose observed worker count follows a script.
///
/// Each [`WorkerCluster::num_workers`] call consumes the next scripted count;
/// the final count repeats once the script is exhausted.
#[derive(Clone)]
pub struct MockCluster {
    log: CloseLog,
    counts: Arc<Mutex<VecDeque<usize>>>,
    last_count: Arc<AtomicUsize>,
    queries: Arc<AtomicUsize>,
    scale_requests: Arc<Mutex<Vec<usize>>>,
    fail_scale: bool,
    fail_close: bool,
}

impl MockCluster {
    pub fn with_counts(log: CloseLog, counts: impl IntoIterator<Item = usize>) -> Self {
        Self {
            log,
            counts: Arc::new(Mutex::new(counts.into_iter().collect())),
            last_count: Arc::new(AtomicUsize::new(0)),
            queries: Arc::new(AtomicUsize::new(0)),
            scale_requests: Arc::new(Mutex::new(Vec::new())),
            fail_scale: false,
            fail_close: false,
        }
    }

    /// Refuse every scale request.
    pub fn failing_scale(mut self) -> Self {
        self.fail_scale = true;
        self
    }

    /// Fail every close call.
    pub fn failing_close(mut self) -> Self {
        self.fail_close = true;
        self
    }

    /// Scale targets requested so far.
    pub fn scale_requests(&self) -> Vec<usize> {
        self.scale_requests.lock().unwrap().clone()
    }

    /// How many times the worker count was observed.
    pub fn count_queries(&self) -> usize {
        self.queries.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl WorkerCluster for MockCluster {
    async fn scale(&self, target: usize) -> Result<()> {
        if self.fail_scale {
            return Err(error!("mock cluster refuses to scale"));
        }
        self.scale_requests.lock().unwrap().push(target);
        Ok(())
    }

    fn num_workers(&self) -> usize {
        self.queries.fetch_add(1, Ordering::SeqCst);
        match self.counts.lock().unwrap().pop_front() {
            Some(count) => {
                self.last_count.store(count, Ordering::SeqCst);
                count
            }
            None => self.last_count.load(Ordering::SeqCst),
        }
    }

    async fn close(&self) -> Result<()> {
        self.log.record(CloseEvent::Cluster);
        if self.fail_close {
            return Err(error!("mock cluster close failed"));
        }
        Ok(())
    }
}

/// How a [`MockClient`] answers a readiness wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitBehavior {
    /// Report readiness immediately.
    Ready,
    /// Never become ready; only a deadline gets the caller out.
    Never,
}

#[derive(Clone)]
pub struct MockClient {
    log: CloseLog,
    behavior: WaitBehavior,
    waits: Arc<Mutex<Vec<usize>>>,
    fail_close: bool,
}

impl MockClient {
    pub fn new(log: CloseLog, behavior: WaitBehavior) -> Self {
        Self {
            log,
            behavior,
            waits: Arc::new(Mutex::new(Vec::new())),
            fail_close: false,
        }
    }

    /// Fail every close call.
    pub fn failing_close(mut self) -> Self {
        self.fail_close = true;
        self
    }

    /// Worker counts passed to `wait_for_workers` so far.
    pub fn waits(&self) -> Vec<usize> {
        self.waits.lock().unwrap().clone()
    }
}

#[async_trait]
impl ClusterClient for MockClient {
    async fn wait_for_workers(
        &self,
        count: usize,
        timeout: Option<Duration>,
    ) -> Result<(), WaitError> {
        self.waits.lock().unwrap().push(count);
        match self.behavior {
            WaitBehavior::Ready => Ok(()),
            WaitBehavior::Never => match timeout {
                Some(waited) => {
                    tokio::time::sleep(waited).await;
                    Err(WaitError::Timeout {
                        requested: count,
                        observed: 0,
                        waited,
                    })
                }
                None => std::future::pending().await,
            },
        }
    }

    async fn close(&self) -> Result<()> {
        self.log.record(CloseEvent::Client);
        if self.fail_close {
            return Err(error!("mock client close failed"));
        }
        Ok(())
    }
}

/// Backend handing out clones of a pre-built cluster/client pair, so the test
/// keeps handles to everything the context creates.
#[derive(Clone)]
pub struct MockBackend {
    cluster: MockCluster,
    client: MockClient,
    starts: Arc<Mutex<Vec<usize>>>,
}

impl MockBackend {
    pub fn new(cluster: MockCluster, client: MockClient) -> Self {
        Self {
            cluster,
            client,
            starts: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Device counts that clusters were started with.
    pub fn starts(&self) -> Vec<usize> {
        self.starts.lock().unwrap().clone()
    }
}

#[async_trait]
impl ClusterBackend for MockBackend {
    type Cluster = MockCluster;
    type Client = MockClient;

    async fn start_cluster(&self, num_workers: usize) -> Result<MockCluster> {
        self.starts.lock().unwrap().push(num_workers);
        Ok(self.cluster.clone())
    }

    async fn connect(&self, _cluster: &MockCluster) -> Result<MockClient> {
        Ok(self.client.clone())
    }
}
