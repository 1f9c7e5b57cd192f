// SPDX-FileCopyrightText: Copyright (c) 2024-2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Bounded rescale-and-wait for a live cluster.
//!
//! The scale request itself is issued exactly once; only the readiness check
//! is retried. A cluster that cannot reach the target (not enough physical
//! devices, scheduler refusing to place workers) fails fast instead of
//! hanging the suite.

use std::time::Duration;
use thiserror::Error;

use crate::cluster::WorkerCluster;
use crate::config::RescalePolicy;

/// Maximal number of verifications of the number of workers.
pub const DEFAULT_MAX_ATTEMPTS: usize = 100;

/// Time between attempts.
pub const DEFAULT_WAIT_INTERVAL: Duration = Duration::from_millis(500);

#[derive(Debug, Error)]
pub enum RescaleError {
    /// The cluster refused the scale request outright.
    #[error("cluster refused scale request to {target}")]
    ScaleRequest {
        target: usize,
        #[source]
        source: anyhow::Error,
    },

    /// The worker count never converged on the target within the budget.
    #[error("Unable to rescale cluster to {target}: {observed} workers after {attempts} attempts")]
    ConvergenceTimeout {
        target: usize,
        observed: usize,
        attempts: usize,
    },
}

/// Rescale `cluster` to `target` workers and poll until the live worker count
/// matches, sleeping `policy.wait_interval()` between checks, for at most
/// `policy.max_attempts` checks after the initial one.
///
/// Readiness is evaluated once before any sleeping, so a cluster already at
/// the target returns without waiting at all.
pub async fn enforce_rescale<C: WorkerCluster>(
    cluster: &C,
    target: usize,
    policy: &RescalePolicy,
) -> Result<(), RescaleError> {
    cluster
        .scale(target)
        .await
        .map_err(|source| RescaleError::ScaleRequest { target, source })?;

    let mut attempt = 0;
    let mut ready = cluster.num_workers() == target;
    while !ready && attempt < policy.max_attempts {
        tokio::time::sleep(policy.wait_interval()).await;
        ready = cluster.num_workers() == target;
        attempt += 1;
    }

    if !ready {
        return Err(RescaleError::ConvergenceTimeout {
            target,
            observed: cluster.num_workers(),
            attempts: attempt,
        });
    }

    tracing::debug!(
        target_workers = target,
        attempts = attempt,
        "cluster rescale converged"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{CloseLog, MockCluster};
    use tokio::time::Instant;

    fn policy(max_attempts: usize, wait_ms: u64) -> RescalePolicy {
        RescalePolicy {
            max_attempts,
            wait_interval_ms: wait_ms,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_already_at_target_returns_without_sleeping() {
        let cluster = MockCluster::with_counts(CloseLog::default(), [4]);
        let start = Instant::now();

        enforce_rescale(&cluster, 4, &policy(100, 500))
            .await
            .unwrap();

        assert_eq!(start.elapsed(), Duration::ZERO);
        assert_eq!(cluster.scale_requests(), vec![4]);
        // One readiness check, zero poll iterations.
        assert_eq!(cluster.count_queries(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_converges_after_three_polls() {
        let cluster = MockCluster::with_counts(CloseLog::default(), [0, 1, 2, 3]);
        let start = Instant::now();

        enforce_rescale(&cluster, 3, &policy(100, 500))
            .await
            .unwrap();

        assert_eq!(start.elapsed(), Duration::from_millis(1500));
        assert_eq!(cluster.count_queries(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_budget_names_the_target() {
        let cluster = MockCluster::with_counts(CloseLog::default(), [1]);
        let start = Instant::now();

        let err = enforce_rescale(&cluster, 8, &policy(5, 500))
            .await
            .expect_err("count never reaches 8");

        assert_eq!(start.elapsed(), Duration::from_millis(2500));
        assert!(matches!(
            err,
            RescaleError::ConvergenceTimeout {
                target: 8,
                observed: 1,
                attempts: 5,
            }
        ));
        assert!(err.to_string().contains("Unable to rescale cluster to 8"));
    }

    #[tokio::test]
    async fn test_scale_request_failure_is_not_retried() {
        let cluster = MockCluster::with_counts(CloseLog::default(), [0]).failing_scale();

        let err = enforce_rescale(&cluster, 2, &policy(100, 500))
            .await
            .expect_err("scale is refused");

        assert!(matches!(err, RescaleError::ScaleRequest { target: 2, .. }));
        // The refusal short-circuits before any readiness check.
        assert_eq!(cluster.count_queries(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_scale_to_zero_converges() {
        let cluster = MockCluster::with_counts(CloseLog::default(), [3, 0]);

        enforce_rescale(&cluster, 0, &policy(100, 500))
            .await
            .unwrap();

        assert_eq!(cluster.scale_requests(), vec![0]);
    }
}
