// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use std::collections::HashMap;
use std::fmt;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::probe::ContainerState;

/// Telemetry event classes, ordered by delivery value.
///
/// The queue's eviction policy drops the lowest class first: a heartbeat is
/// always cheaper to lose than a fault report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Heartbeat,
    Other,
    Measurement,
    StateChange,
    Fault,
}

impl EventKind {
    /// Eviction priority. Higher values survive longer under queue pressure.
    pub fn priority(&self) -> u8 {
        match self {
            EventKind::Heartbeat => 0,
            EventKind::Other => 1,
            EventKind::Measurement => 2,
            EventKind::StateChange => 3,
            EventKind::Fault => 4,
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventKind::Heartbeat => write!(f, "heartbeat"),
            EventKind::Other => write!(f, "other"),
            EventKind::Measurement => write!(f, "measurement"),
            EventKind::StateChange => write!(f, "state_change"),
            EventKind::Fault => write!(f, "fault"),
        }
    }
}

/// Fault severity reported to the collector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FaultSeverity {
    Minor,
    Major,
    Critical,
}

/// Kind-specific event body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventPayload {
    Heartbeat {
        source: String,
        interval_secs: u64,
    },
    Fault {
        condition: String,
        specific_problem: String,
        severity: FaultSeverity,
        #[serde(default)]
        additional_info: HashMap<String, String>,
    },
    Measurement {
        interval_secs: f64,
        request_rate: u64,
        concurrent_sessions: u32,
        configured_entities: u32,
        mean_request_latency_ms: f64,
        memory_configured_mb: f64,
        memory_used_mb: f64,
        #[serde(skip_serializing_if = "Option::is_none")]
        cpu_use: Option<f64>,
    },
    StateChange {
        old_state: ContainerState,
        new_state: ContainerState,
        state_interface: String,
    },
    Other {
        domain: String,
        body: serde_json::Value,
    },
}

impl EventPayload {
    pub fn kind(&self) -> EventKind {
        match self {
            EventPayload::Heartbeat { .. } => EventKind::Heartbeat,
            EventPayload::Fault { .. } => EventKind::Fault,
            EventPayload::Measurement { .. } => EventKind::Measurement,
            EventPayload::StateChange { .. } => EventKind::StateChange,
            EventPayload::Other { .. } => EventKind::Other,
        }
    }
}

/// One outbound telemetry event.
///
/// Immutable once enqueued, with two exceptions owned by the machinery:
/// `sequence` is stamped by the queue on admission and `attempt_count` is
/// incremented by the delivery worker between send attempts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: Uuid,
    pub kind: EventKind,
    pub created_at: DateTime<Utc>,
    /// Monotonic creation instant, for latency measurements; not on the wire.
    #[serde(skip, default = "Instant::now")]
    pub occurred: Instant,
    #[serde(default)]
    pub sequence: u64,
    #[serde(default)]
    pub attempt_count: u32,
    pub payload: EventPayload,
}

impl Event {
    pub fn new(payload: EventPayload) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind: payload.kind(),
            created_at: Utc::now(),
            occurred: Instant::now(),
            sequence: 0,
            attempt_count: 0,
            payload,
        }
    }

    pub fn heartbeat(source: impl Into<String>, interval_secs: u64) -> Self {
        Self::new(EventPayload::Heartbeat {
            source: source.into(),
            interval_secs,
        })
    }

    pub fn fault(
        condition: impl Into<String>,
        specific_problem: impl Into<String>,
        severity: FaultSeverity,
    ) -> Self {
        Self::new(EventPayload::Fault {
            condition: condition.into(),
            specific_problem: specific_problem.into(),
            severity,
            additional_info: HashMap::new(),
        })
    }

    pub fn state_change(
        old_state: ContainerState,
        new_state: ContainerState,
        state_interface: impl Into<String>,
    ) -> Self {
        Self::new(EventPayload::StateChange {
            old_state,
            new_state,
            state_interface: state_interface.into(),
        })
    }
}
