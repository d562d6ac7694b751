// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! # Telemetry Agent assembly
//!
//! Wires the queue, poller, delivery worker and shutdown coordinator
//! together and runs them to completion. Exactly three tasks run
//! concurrently; the queue and the lifecycle state are the only shared
//! synchronization points.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::info;

use crate::application::delivery::{DeliveryConfig, DeliveryStats, DeliveryWorker};
use crate::application::poller::Poller;
use crate::application::queue::EventQueue;
use crate::application::shutdown::{
    listen_for_signals, DrainResult, ShutdownCoordinator, StopReason,
};
use crate::domain::config::{AgentConfig, ConfigError};
use crate::domain::probe::{MeasurementProbe, StateProbe};
use crate::domain::state::{AgentState, StateHandle};
use crate::domain::transport::Transport;

/// Final tally of a run. Every produced event ends up in exactly one bucket.
#[derive(Debug, Clone, Copy)]
pub struct AgentReport {
    pub reason: StopReason,
    pub drain: DrainResult,
    pub delivered: u64,
    pub dropped_after_retries: u64,
    pub dropped_permanent: u64,
    pub dropped_unserializable: u64,
    pub evicted: u64,
    pub rejected: u64,
    pub discarded_at_shutdown: u64,
}

impl AgentReport {
    /// Everything that was produced but never reached the collector.
    pub fn total_dropped(&self) -> u64 {
        self.dropped_after_retries
            + self.dropped_permanent
            + self.dropped_unserializable
            + self.evicted
            + self.rejected
            + self.discarded_at_shutdown
    }
}

pub struct TelemetryAgent {
    config: AgentConfig,
    transport: Arc<dyn Transport>,
    state_probe: Arc<dyn StateProbe>,
    measurement_probe: Arc<dyn MeasurementProbe>,
}

impl TelemetryAgent {
    pub fn new(
        config: AgentConfig,
        transport: Arc<dyn Transport>,
        state_probe: Arc<dyn StateProbe>,
        measurement_probe: Arc<dyn MeasurementProbe>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            config,
            transport,
            state_probe,
            measurement_probe,
        })
    }

    /// Run until an OS termination signal (or the cycle budget) stops the
    /// agent.
    pub async fn run(self) -> AgentReport {
        let (stop_tx, stop_rx) = mpsc::channel(4);
        let signals = tokio::spawn(listen_for_signals(stop_tx.clone()));
        let report = self.run_with(stop_tx, stop_rx).await;
        signals.abort();
        report
    }

    /// Run with an externally driven stop channel. Tests and embedders send
    /// [`StopReason`]s directly instead of raising signals.
    pub async fn run_with(
        self,
        stop_tx: mpsc::Sender<StopReason>,
        stop_rx: mpsc::Receiver<StopReason>,
    ) -> AgentReport {
        let state = StateHandle::new();
        let queue = Arc::new(EventQueue::new(self.config.queue_capacity));
        let delivery_stats = Arc::new(DeliveryStats::default());

        let worker = DeliveryWorker::new(
            queue.clone(),
            self.transport.clone(),
            state.subscribe(),
            DeliveryConfig::from(&self.config),
            delivery_stats.clone(),
        );
        let poller = Poller::new(
            queue.clone(),
            state.subscribe(),
            stop_tx,
            self.state_probe.clone(),
            self.measurement_probe.clone(),
            &self.config,
        );

        state.advance(AgentState::Running);
        info!(
            source = %self.config.source_name(),
            container = %self.config.container,
            poll_interval = ?self.config.poll_interval,
            queue_capacity = self.config.queue_capacity,
            "telemetry agent running"
        );

        let worker_handle = tokio::spawn(worker.run());
        let poller_handle = tokio::spawn(poller.run());

        let coordinator = ShutdownCoordinator::new(
            state,
            queue.clone(),
            self.transport.clone(),
            delivery_stats.clone(),
            self.config.drain_timeout,
        );
        let outcome = coordinator.run(stop_rx, worker_handle, poller_handle).await;

        let queue_stats = queue.stats();
        let delivery = delivery_stats.snapshot();
        AgentReport {
            reason: outcome.reason,
            drain: outcome.drain,
            delivered: delivery.delivered,
            dropped_after_retries: delivery.dropped_after_retries,
            dropped_permanent: delivery.dropped_permanent,
            dropped_unserializable: delivery.dropped_unserializable,
            evicted: queue_stats.evicted,
            rejected: queue_stats.rejected,
            discarded_at_shutdown: outcome.discarded + delivery.discarded_in_flight,
        }
    }
}
