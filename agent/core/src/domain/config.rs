// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// Agent Configuration
//
// Tuning knobs for the polling/delivery pipeline. Loadable from YAML
// (durations in humantime form, e.g. "10s") with CLI flags layered on top.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0} must be greater than zero")]
    Zero(&'static str),
    #[error("backoff_cap must not be below backoff_base")]
    BackoffCapBelowBase,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AgentConfig {
    /// Identifier stamped into heartbeat events. Defaults to the hostname.
    pub source: Option<String>,

    /// Name of the container the probes watch.
    pub container: String,

    /// Maximum number of events buffered for delivery.
    pub queue_capacity: usize,

    #[serde(with = "humantime_serde")]
    pub poll_interval: Duration,

    /// Send attempts per event before it is dropped.
    pub max_attempts: u32,

    #[serde(with = "humantime_serde")]
    pub backoff_base: Duration,

    #[serde(with = "humantime_serde")]
    pub backoff_cap: Duration,

    /// Per-attempt cap on one Transport::send call.
    #[serde(with = "humantime_serde")]
    pub send_timeout: Duration,

    /// How long a first stop request lets the queue drain.
    #[serde(with = "humantime_serde")]
    pub drain_timeout: Duration,

    /// Stop after this many poll cycles. `None` runs until signalled.
    pub max_cycles: Option<u32>,

    /// Ask the collector to exempt this agent from throttling directives.
    /// Recorded for the collector handshake only; no core behavior hangs
    /// off it.
    pub throttle_exempt: bool,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            source: None,
            container: "vHello".to_string(),
            queue_capacity: 256,
            poll_interval: Duration::from_secs(10),
            max_attempts: 5,
            backoff_base: Duration::from_secs(1),
            backoff_cap: Duration::from_secs(30),
            send_timeout: Duration::from_secs(10),
            drain_timeout: Duration::from_secs(3),
            max_cycles: None,
            throttle_exempt: false,
        }
    }
}

impl AgentConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.queue_capacity == 0 {
            return Err(ConfigError::Zero("queue_capacity"));
        }
        if self.max_attempts == 0 {
            return Err(ConfigError::Zero("max_attempts"));
        }
        if self.poll_interval.is_zero() {
            return Err(ConfigError::Zero("poll_interval"));
        }
        if self.backoff_base.is_zero() {
            return Err(ConfigError::Zero("backoff_base"));
        }
        if self.send_timeout.is_zero() {
            return Err(ConfigError::Zero("send_timeout"));
        }
        if self.backoff_cap < self.backoff_base {
            return Err(ConfigError::BackoffCapBelowBase);
        }
        if let Some(cycles) = self.max_cycles {
            if cycles == 0 {
                return Err(ConfigError::Zero("max_cycles"));
            }
        }
        Ok(())
    }

    /// Event source identifier: the configured name, else the hostname.
    pub fn source_name(&self) -> String {
        self.source.clone().unwrap_or_else(|| {
            hostname::get()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_else(|_| "ves-agent".to_string())
        })
    }
}
