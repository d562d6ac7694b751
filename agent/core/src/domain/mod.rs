// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

pub mod config;
pub mod event;
pub mod probe;
pub mod state;
pub mod transport;

pub use config::{AgentConfig, ConfigError};
pub use event::{Event, EventKind, EventPayload, FaultSeverity};
pub use probe::{
    ContainerState, MeasurementObservation, MeasurementProbe, ProbeError, StateObservation,
    StateProbe,
};
pub use state::{AgentState, StateHandle};
pub use transport::{Transport, TransportError};
