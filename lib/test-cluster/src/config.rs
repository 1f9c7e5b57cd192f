// SPDX-FileCopyrightText: Copyright (c) 2024-2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Named configuration defaults for the test cluster helpers.
//!
//! Values are plain serde structs with code defaults, overridable from
//! `LATTICE_TEST_*` environment variables via figment. Nothing here is a
//! mutable global; callers pass the values explicitly.

use figment::{
    Figment,
    providers::{Env, Serialized},
};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use validator::{Validate, ValidationErrors};

use crate::rescale::{DEFAULT_MAX_ATTEMPTS, DEFAULT_WAIT_INTERVAL};

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to extract configuration: {0}")]
    Extraction(#[from] Box<figment::Error>),

    #[error("Configuration validation failed: {0}")]
    Validation(#[from] ValidationErrors),
}

/// Retry budget for [`crate::enforce_rescale`].
///
/// Environment overrides: `LATTICE_TEST_RESCALE_MAX_ATTEMPTS`,
/// `LATTICE_TEST_RESCALE_WAIT_INTERVAL_MS`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct RescalePolicy {
    /// Maximal number of verifications of the worker count.
    #[validate(range(min = 1))]
    pub max_attempts: usize,

    /// Time between attempts, in milliseconds.
    #[validate(range(min = 1))]
    pub wait_interval_ms: u64,
}

impl Default for RescalePolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            wait_interval_ms: DEFAULT_WAIT_INTERVAL.as_millis() as u64,
        }
    }
}

impl RescalePolicy {
    pub fn wait_interval(&self) -> Duration {
        Duration::from_millis(self.wait_interval_ms)
    }

    /// Code defaults merged under `LATTICE_TEST_RESCALE_*` env overrides.
    pub fn figment() -> Figment {
        Figment::new()
            .merge(Serialized::defaults(RescalePolicy::default()))
            .merge(Env::prefixed("LATTICE_TEST_RESCALE_"))
    }

    pub fn from_env() -> Result<Self, ConfigError> {
        let policy: RescalePolicy = Self::figment().extract().map_err(Box::new)?;
        policy.validate()?;
        Ok(policy)
    }
}

/// Options for [`crate::MultiDeviceContext::acquire`].
///
/// Environment override: `LATTICE_TEST_ACQUIRE_READY_TIMEOUT_MS`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct AcquireOptions {
    /// Deadline for the readiness wait inside acquire. `None` delegates to
    /// the framework's own wait semantics, which may block indefinitely.
    #[validate(range(min = 1))]
    pub ready_timeout_ms: Option<u64>,
}

impl AcquireOptions {
    pub fn ready_timeout(&self) -> Option<Duration> {
        self.ready_timeout_ms.map(Duration::from_millis)
    }

    pub fn figment() -> Figment {
        Figment::new()
            .merge(Serialized::defaults(AcquireOptions::default()))
            .merge(Env::prefixed("LATTICE_TEST_ACQUIRE_"))
    }

    pub fn from_env() -> Result<Self, ConfigError> {
        let options: AcquireOptions = Self::figment().extract().map_err(Box::new)?;
        options.validate()?;
        Ok(options)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rescale_policy_defaults() {
        let policy = RescalePolicy::default();
        assert_eq!(policy.max_attempts, 100);
        assert_eq!(policy.wait_interval(), Duration::from_millis(500));
    }

    #[test]
    fn test_rescale_policy_env_override() {
        figment::Jail::expect_with(|jail| {
            jail.set_env("LATTICE_TEST_RESCALE_MAX_ATTEMPTS", "5");
            jail.set_env("LATTICE_TEST_RESCALE_WAIT_INTERVAL_MS", "10");

            let policy = RescalePolicy::from_env().expect("config should load");
            assert_eq!(policy.max_attempts, 5);
            assert_eq!(policy.wait_interval(), Duration::from_millis(10));
            Ok(())
        });
    }

    #[test]
    fn test_rescale_policy_rejects_zero_attempts() {
        figment::Jail::expect_with(|jail| {
            jail.set_env("LATTICE_TEST_RESCALE_MAX_ATTEMPTS", "0");

            let err = RescalePolicy::from_env().expect_err("zero attempts must not validate");
            assert!(matches!(err, ConfigError::Validation(_)));
            Ok(())
        });
    }

    #[test]
    fn test_acquire_options_default_is_unbounded() {
        assert_eq!(AcquireOptions::default().ready_timeout(), None);
    }

    #[test]
    fn test_acquire_options_env_override() {
        figment::Jail::expect_with(|jail| {
            jail.set_env("LATTICE_TEST_ACQUIRE_READY_TIMEOUT_MS", "2000");

            let options = AcquireOptions::from_env().expect("config should load");
            assert_eq!(options.ready_timeout(), Some(Duration::from_secs(2)));
            Ok(())
        });
    }
}
