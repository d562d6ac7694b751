// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # VES Agent Core
//!
//! Event delivery core for the VES telemetry agent: a bounded event queue,
//! a retrying delivery worker, a cooperative shutdown coordinator and a
//! fixed-cadence poller.
//!
//! # Architecture
//!
//! - **Layer:** Core System
//! - **Purpose:** Buffers telemetry events and delivers them to a collector
//!   through a pluggable [`domain::transport::Transport`]

pub mod application;
pub mod domain;
pub mod infrastructure;

pub use domain::*;
