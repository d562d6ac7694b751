// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

pub mod agent;
pub mod delivery;
pub mod poller;
pub mod queue;
pub mod shutdown;

pub use agent::{AgentReport, TelemetryAgent};
pub use delivery::{DeliveryConfig, DeliverySnapshot, DeliveryStats, DeliveryWorker};
pub use poller::Poller;
pub use queue::{EventQueue, QueueFull, QueueStats};
pub use shutdown::{listen_for_signals, DrainResult, ShutdownCoordinator, ShutdownOutcome, StopReason};
