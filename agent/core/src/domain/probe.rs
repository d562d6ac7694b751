// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Observed run state of the monitored container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContainerState {
    Running,
    Stopped,
}

impl fmt::Display for ContainerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ContainerState::Running => write!(f, "Running"),
            ContainerState::Stopped => write!(f, "Stopped"),
        }
    }
}

#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("container {0} not found")]
    ContainerNotFound(String),
    #[error("probe failed: {0}")]
    Failed(String),
}

/// Result of one container state check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StateObservation {
    pub state: ContainerState,
}

/// Result of one traffic measurement pass.
///
/// Field set follows what the agent reports upstream; implementations fill
/// what they can observe and leave the rest at zero.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MeasurementObservation {
    pub interval_secs: f64,
    pub request_rate: u64,
    pub concurrent_sessions: u32,
    pub configured_entities: u32,
    pub mean_request_latency_ms: f64,
    pub memory_configured_mb: f64,
    pub memory_used_mb: f64,
    pub cpu_use: Option<f64>,
}

/// Checks whether the monitored workload is up. How it looks is up to the
/// implementation (container inspection, syscall, API probe).
#[async_trait]
pub trait StateProbe: Send + Sync {
    async fn observe(&self) -> Result<StateObservation, ProbeError>;
}

/// Collects one traffic measurement per poll cycle.
#[async_trait]
pub trait MeasurementProbe: Send + Sync {
    async fn observe(&self) -> Result<MeasurementObservation, ProbeError>;
}
