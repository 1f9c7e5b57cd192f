// SPDX-FileCopyrightText: Copyright (c) 2024-2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! End-to-end exercise of the scoped context and rescale helper over the
//! in-process backend, the way a lattice suite would use them.

use std::time::Duration;

use lattice_test_cluster::{
    AcquireOptions, ClusterClient, LocalBackend, MultiDeviceContext, RescalePolicy, Result,
    WorkerCluster, enforce_rescale, logging, run_with_context,
};

fn fast_policy() -> RescalePolicy {
    RescalePolicy {
        max_attempts: 200,
        wait_interval_ms: 5,
    }
}

#[tokio::test]
async fn acquire_provisions_one_worker_per_device() -> Result<()> {
    logging::init();

    let mut ctx = MultiDeviceContext::new(LocalBackend, 4)?;
    ctx.acquire().await?;

    let cluster = ctx.cluster().expect("acquired context has a cluster");
    assert_eq!(cluster.requested(), 4);
    assert_eq!(cluster.num_workers(), 4);

    ctx.release().await?;
    assert_eq!(cluster.num_workers(), 0);
    assert!(ctx.cluster().is_none());
    assert!(ctx.client().is_none());
    Ok(())
}

#[tokio::test]
async fn rescale_grows_and_shrinks_an_acquired_cluster() -> Result<()> {
    logging::init();

    let mut ctx = MultiDeviceContext::new(LocalBackend, 2)?;
    ctx.acquire().await?;
    let cluster = ctx.cluster().expect("acquired context has a cluster");

    enforce_rescale(&*cluster, 6, &fast_policy()).await?;
    assert_eq!(cluster.num_workers(), 6);

    enforce_rescale(&*cluster, 2, &fast_policy()).await?;
    assert_eq!(cluster.num_workers(), 2);

    ctx.release().await?;
    Ok(())
}

#[tokio::test]
async fn bounded_acquire_times_out_against_a_live_cluster() -> Result<()> {
    logging::init();

    // Start a cluster, then wait for more workers than it will ever have.
    let mut ctx = MultiDeviceContext::new(LocalBackend, 1)?;
    ctx.acquire().await?;
    let client = ctx.client().expect("acquired context has a client");

    let err = client
        .wait_for_workers(3, Some(Duration::from_millis(50)))
        .await
        .expect_err("cluster only has one worker");
    assert!(err.to_string().contains("3 ready workers"));

    ctx.release().await?;
    Ok(())
}

#[tokio::test]
async fn run_with_context_tears_down_after_the_body() -> Result<()> {
    logging::init();

    let mut seen = None;
    run_with_context(LocalBackend, 3, |client, cluster| {
        seen = Some(cluster.clone());
        async move {
            client.wait_for_workers(3, None).await?;
            assert_eq!(cluster.num_workers(), 3);
            Ok(())
        }
    })
    .await?;

    let cluster = seen.expect("body ran");
    assert_eq!(cluster.num_workers(), 0, "workers survive the scope");
    Ok(())
}

#[tokio::test]
async fn acquire_with_ready_timeout_still_succeeds_when_capacity_exists() -> Result<()> {
    logging::init();

    let options = AcquireOptions {
        ready_timeout_ms: Some(5_000),
    };
    let mut ctx = MultiDeviceContext::with_options(LocalBackend, 2, options)?;
    ctx.acquire().await?;
    ctx.release().await?;
    Ok(())
}
