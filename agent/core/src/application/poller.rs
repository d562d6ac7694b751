// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// Poller - fixed-cadence producer side of the pipeline
//
// Every tick: heartbeat, container state check, traffic measurement. State
// transitions become state-change events; probe failures become faults.
// The poller never talks to the Transport; it only feeds the queue.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use crate::application::queue::EventQueue;
use crate::application::shutdown::StopReason;
use crate::domain::config::AgentConfig;
use crate::domain::event::{Event, EventPayload, FaultSeverity};
use crate::domain::probe::{ContainerState, MeasurementProbe, StateProbe};
use crate::domain::state::AgentState;

pub struct Poller {
    queue: Arc<EventQueue>,
    state: watch::Receiver<AgentState>,
    stop_tx: mpsc::Sender<StopReason>,
    state_probe: Arc<dyn StateProbe>,
    measurement_probe: Arc<dyn MeasurementProbe>,
    source: String,
    interval: Duration,
    max_cycles: Option<u32>,
    prev_state: ContainerState,
}

impl Poller {
    pub fn new(
        queue: Arc<EventQueue>,
        state: watch::Receiver<AgentState>,
        stop_tx: mpsc::Sender<StopReason>,
        state_probe: Arc<dyn StateProbe>,
        measurement_probe: Arc<dyn MeasurementProbe>,
        config: &AgentConfig,
    ) -> Self {
        Self {
            queue,
            state,
            stop_tx,
            state_probe,
            measurement_probe,
            source: config.source_name(),
            interval: config.poll_interval,
            max_cycles: config.max_cycles,
            // Assume the workload starts out down, so a container that is
            // already up produces one Stopped -> Running transition on the
            // first tick.
            prev_state: ContainerState::Stopped,
        }
    }

    pub async fn run(mut self) {
        if self
            .state
            .wait_for(|state| *state >= AgentState::Running)
            .await
            .is_err()
        {
            return;
        }

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        let mut cycle: u32 = 0;

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = self.state.wait_for(|state| *state > AgentState::Running) => break,
            }
            if *self.state.borrow() != AgentState::Running {
                break;
            }

            cycle += 1;
            self.tick(cycle).await;

            if let Some(max) = self.max_cycles {
                if cycle >= max {
                    info!(cycles = max, "cycle budget spent, requesting drain");
                    let _ = self.stop_tx.send(StopReason::CyclesExhausted).await;
                    break;
                }
            }
        }
        debug!("poller stopped");
    }

    async fn tick(&mut self, cycle: u32) {
        debug!(cycle, container = %self.source, "poll tick");

        self.push(Event::heartbeat(
            self.source.clone(),
            self.interval.as_secs(),
        ));
        self.check_container_state().await;
        self.measure_traffic().await;
    }

    async fn check_container_state(&mut self) {
        match self.state_probe.observe().await {
            Ok(observation) => {
                let current = observation.state;
                if current != self.prev_state {
                    info!(from = %self.prev_state, to = %current, "container state change detected");
                    self.push(Event::state_change(self.prev_state, current, self.source.clone()));
                }
                self.prev_state = current;
            }
            Err(err) => {
                warn!(error = %err, "state probe failed");
                self.push(Event::fault(
                    "state probe failure",
                    err.to_string(),
                    FaultSeverity::Major,
                ));
            }
        }
    }

    async fn measure_traffic(&mut self) {
        match self.measurement_probe.observe().await {
            Ok(observation) => {
                self.push(Event::new(EventPayload::Measurement {
                    interval_secs: observation.interval_secs,
                    request_rate: observation.request_rate,
                    concurrent_sessions: observation.concurrent_sessions,
                    configured_entities: observation.configured_entities,
                    mean_request_latency_ms: observation.mean_request_latency_ms,
                    memory_configured_mb: observation.memory_configured_mb,
                    memory_used_mb: observation.memory_used_mb,
                    cpu_use: observation.cpu_use,
                }));
            }
            Err(err) => {
                warn!(error = %err, "measurement probe failed");
                self.push(Event::fault(
                    "measurement probe failure",
                    err.to_string(),
                    FaultSeverity::Minor,
                ));
            }
        }
    }

    fn push(&self, event: Event) {
        // A tick that straddles the stop request must not keep producing.
        if *self.state.borrow() != AgentState::Running {
            return;
        }
        let kind = event.kind;
        if let Err(err) = self.queue.enqueue(event) {
            warn!(kind = %kind, error = %err, "event not admitted to queue");
        }
    }
}
