// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// Shutdown Coordinator - turns async stop requests into an orderly drain
//
// Running -> (first stop request) -> Draining -> (drain complete | timeout |
// second request) -> Stopped. A fatal timeout request skips the drain
// entirely. Whatever is still queued or in flight at Stopped is counted,
// never silently lost.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::application::delivery::DeliveryStats;
use crate::application::queue::EventQueue;
use crate::domain::state::{AgentState, StateHandle};
use crate::domain::transport::Transport;

/// Why the agent is being asked to stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// Interactive interrupt (SIGINT / Ctrl+C).
    Interrupt,
    /// Service termination (SIGTERM).
    Terminate,
    /// The poller spent its configured cycle budget.
    CyclesExhausted,
    /// Watchdog alarm (SIGALRM): stop now, no drain.
    FatalTimeout,
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StopReason::Interrupt => write!(f, "interrupt"),
            StopReason::Terminate => write!(f, "terminate"),
            StopReason::CyclesExhausted => write!(f, "cycles_exhausted"),
            StopReason::FatalTimeout => write!(f, "fatal_timeout"),
        }
    }
}

/// How the drain phase ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainResult {
    /// Worker emptied the queue before the deadline.
    Completed,
    /// Deadline elapsed with events still queued.
    TimedOut,
    /// Drain was never attempted (fatal stop or second request).
    Skipped,
}

#[derive(Debug, Clone, Copy)]
pub struct ShutdownOutcome {
    pub reason: StopReason,
    pub drain: DrainResult,
    /// Events still queued or in flight when the agent reached `Stopped`.
    pub discarded: u64,
}

pub struct ShutdownCoordinator {
    state: StateHandle,
    queue: Arc<EventQueue>,
    transport: Arc<dyn Transport>,
    delivery_stats: Arc<DeliveryStats>,
    drain_timeout: Duration,
}

impl ShutdownCoordinator {
    pub fn new(
        state: StateHandle,
        queue: Arc<EventQueue>,
        transport: Arc<dyn Transport>,
        delivery_stats: Arc<DeliveryStats>,
        drain_timeout: Duration,
    ) -> Self {
        Self {
            state,
            queue,
            transport,
            delivery_stats,
            drain_timeout,
        }
    }

    /// Block until a stop request arrives, run the drain state machine, and
    /// bring the agent to `Stopped`.
    pub async fn run(
        self,
        mut stop_rx: mpsc::Receiver<StopReason>,
        mut worker: JoinHandle<()>,
        poller: JoinHandle<()>,
    ) -> ShutdownOutcome {
        let reason = match stop_rx.recv().await {
            Some(reason) => reason,
            // Every requester hung up; treat like a termination.
            None => StopReason::Terminate,
        };

        let drain = if reason == StopReason::FatalTimeout {
            error!("fatal timeout, stopping without drain");
            DrainResult::Skipped
        } else {
            info!(%reason, queued = self.queue.len(), "stop requested, draining event queue");
            self.state.advance(AgentState::Draining);
            self.drain(&mut stop_rx, &mut worker).await
        };

        self.state.advance(AgentState::Stopped);
        poller.abort();
        worker.abort();
        // Wait the tasks out so the delivery counters are final before we
        // read them; an event cancelled mid-send stays on the in-flight
        // gauge and gets counted below.
        let _ = poller.await;
        let _ = worker.await;

        let undelivered = self.queue.drain_remaining().len() as u64;
        let in_flight = self.delivery_stats.in_flight();
        let discarded = undelivered + in_flight;
        if discarded > 0 {
            warn!(
                undelivered,
                in_flight, "discarding events that missed the drain window"
            );
        }

        self.transport.teardown().await;
        info!(%reason, drain = ?drain, discarded, "agent stopped");

        ShutdownOutcome {
            reason,
            drain,
            discarded,
        }
    }

    async fn drain(
        &self,
        stop_rx: &mut mpsc::Receiver<StopReason>,
        worker: &mut JoinHandle<()>,
    ) -> DrainResult {
        let deadline = tokio::time::sleep(self.drain_timeout);
        tokio::pin!(deadline);
        let mut requests_open = true;

        loop {
            tokio::select! {
                _ = &mut *worker => {
                    info!("event queue drained");
                    return DrainResult::Completed;
                }
                _ = &mut deadline => {
                    warn!(timeout = ?self.drain_timeout, queued = self.queue.len(), "drain timed out");
                    return DrainResult::TimedOut;
                }
                request = stop_rx.recv(), if requests_open => {
                    match request {
                        Some(second) => {
                            warn!(%second, "second stop request, skipping drain");
                            return DrainResult::Skipped;
                        }
                        // Channel closed: no further requests can arrive,
                        // keep waiting on the worker and the deadline.
                        None => requests_open = false,
                    }
                }
            }
        }
    }
}

/// Feed OS termination signals into the coordinator's stop channel.
///
/// Runs on its own task so signals are observed even while the poller and
/// worker are blocked in I/O. SIGINT/SIGTERM request an orderly drain (a
/// repeat skips it); SIGALRM is the watchdog's fatal stop.
#[cfg(unix)]
pub async fn listen_for_signals(stop_tx: mpsc::Sender<StopReason>) {
    use tokio::signal::unix::{signal, SignalKind};

    let mut terminate =
        signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
    let mut alarm = signal(SignalKind::alarm()).expect("failed to install SIGALRM handler");

    loop {
        let reason = tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("received interrupt");
                StopReason::Interrupt
            }
            _ = terminate.recv() => {
                info!("received SIGTERM");
                StopReason::Terminate
            }
            _ = alarm.recv() => {
                error!("timeout alarm");
                StopReason::FatalTimeout
            }
        };
        if stop_tx.send(reason).await.is_err() {
            return;
        }
    }
}

#[cfg(not(unix))]
pub async fn listen_for_signals(stop_tx: mpsc::Sender<StopReason>) {
    loop {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
        info!("received interrupt");
        if stop_tx.send(StopReason::Interrupt).await.is_err() {
            return;
        }
    }
}
