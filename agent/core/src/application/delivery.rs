// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// Delivery Worker - drains the event queue into the Transport
//
// Single consumer: attempts for one event always start before attempts for
// the next. Transient failures retry with capped exponential backoff and
// jitter; permanent failures and unserializable events are dropped and
// counted. No event is ever requeued.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use rand::Rng;
use tokio::sync::watch;
use tracing::{debug, error, warn};

use crate::application::queue::EventQueue;
use crate::domain::config::AgentConfig;
use crate::domain::event::{Event, EventKind};
use crate::domain::state::AgentState;
use crate::domain::transport::{Transport, TransportError};

/// How long one dequeue wait lasts before the worker re-checks agent state.
const DEQUEUE_WAIT: Duration = Duration::from_millis(200);

#[derive(Debug, Clone)]
pub struct DeliveryConfig {
    pub max_attempts: u32,
    pub backoff_base: Duration,
    pub backoff_cap: Duration,
    pub send_timeout: Duration,
}

impl From<&AgentConfig> for DeliveryConfig {
    fn from(config: &AgentConfig) -> Self {
        Self {
            max_attempts: config.max_attempts,
            backoff_base: config.backoff_base,
            backoff_cap: config.backoff_cap,
            send_timeout: config.send_timeout,
        }
    }
}

/// Outcome of a single send attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptOutcome {
    Success,
    TransientFailure(String),
    PermanentFailure(String),
}

/// One send attempt, created and discarded inside the worker; feeds the
/// structured logs only.
#[derive(Debug)]
pub struct DeliveryAttempt {
    pub event_id: uuid::Uuid,
    pub kind: EventKind,
    pub attempt: u32,
    pub bytes: usize,
    pub elapsed: Duration,
    pub outcome: AttemptOutcome,
}

/// Delivery counters. Shared with the shutdown coordinator so in-flight
/// work can be accounted for on a fatal stop.
#[derive(Debug, Default)]
pub struct DeliveryStats {
    pub delivered: AtomicU64,
    pub dropped_after_retries: AtomicU64,
    pub dropped_permanent: AtomicU64,
    pub dropped_unserializable: AtomicU64,
    pub discarded_in_flight: AtomicU64,
    in_flight: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeliverySnapshot {
    pub delivered: u64,
    pub dropped_after_retries: u64,
    pub dropped_permanent: u64,
    pub dropped_unserializable: u64,
    pub discarded_in_flight: u64,
}

impl DeliveryStats {
    pub fn snapshot(&self) -> DeliverySnapshot {
        DeliverySnapshot {
            delivered: self.delivered.load(Ordering::Relaxed),
            dropped_after_retries: self.dropped_after_retries.load(Ordering::Relaxed),
            dropped_permanent: self.dropped_permanent.load(Ordering::Relaxed),
            dropped_unserializable: self.dropped_unserializable.load(Ordering::Relaxed),
            discarded_in_flight: self.discarded_in_flight.load(Ordering::Relaxed),
        }
    }

    /// Events dequeued but not yet resolved. 0 or 1 with a single worker.
    pub fn in_flight(&self) -> u64 {
        self.in_flight.load(Ordering::Relaxed)
    }
}

pub struct DeliveryWorker {
    queue: Arc<EventQueue>,
    transport: Arc<dyn Transport>,
    state: watch::Receiver<AgentState>,
    config: DeliveryConfig,
    stats: Arc<DeliveryStats>,
}

impl DeliveryWorker {
    pub fn new(
        queue: Arc<EventQueue>,
        transport: Arc<dyn Transport>,
        state: watch::Receiver<AgentState>,
        config: DeliveryConfig,
        stats: Arc<DeliveryStats>,
    ) -> Self {
        Self {
            queue,
            transport,
            state,
            config,
            stats,
        }
    }

    /// Consume the queue until the agent stops.
    ///
    /// Exits when the state reaches `Stopped`, or when it is `Draining` and
    /// the queue has been emptied (drain complete).
    pub async fn run(mut self) {
        loop {
            match *self.state.borrow() {
                AgentState::Stopped => break,
                AgentState::Draining if self.queue.is_empty() => break,
                _ => {}
            }

            let Some(event) = self.queue.dequeue(DEQUEUE_WAIT).await else {
                continue;
            };
            self.stats.in_flight.fetch_add(1, Ordering::Relaxed);
            self.deliver(event).await;
            self.stats.in_flight.fetch_sub(1, Ordering::Relaxed);
        }
        debug!("delivery worker stopped");
    }

    /// Drive one event to a terminal outcome: delivered or counted as lost.
    ///
    /// A malformed event is fatal to that event only; the worker always
    /// survives to take the next one.
    async fn deliver(&mut self, mut event: Event) {
        let body = match serde_json::to_vec(&event) {
            Ok(body) => body,
            Err(err) => {
                error!(
                    event_id = %event.id,
                    kind = %event.kind,
                    error = %err,
                    dropped_total = self.stats.dropped_unserializable.fetch_add(1, Ordering::Relaxed) + 1,
                    "event failed to serialize, dropping"
                );
                return;
            }
        };

        loop {
            event.attempt_count += 1;
            let attempt = self.attempt(&event, &body).await;

            match &attempt.outcome {
                AttemptOutcome::Success => {
                    debug!(
                        event_id = %attempt.event_id,
                        kind = %attempt.kind,
                        attempt = attempt.attempt,
                        elapsed_ms = attempt.elapsed.as_millis() as u64,
                        "event delivered"
                    );
                    self.stats.delivered.fetch_add(1, Ordering::Relaxed);
                    return;
                }
                AttemptOutcome::PermanentFailure(reason) => {
                    warn!(
                        event_id = %attempt.event_id,
                        kind = %attempt.kind,
                        reason = %reason,
                        dropped_total = self.stats.dropped_permanent.fetch_add(1, Ordering::Relaxed) + 1,
                        "permanent delivery failure, discarding event"
                    );
                    return;
                }
                AttemptOutcome::TransientFailure(reason) => {
                    if event.attempt_count >= self.config.max_attempts {
                        warn!(
                            event_id = %attempt.event_id,
                            kind = %attempt.kind,
                            attempts = event.attempt_count,
                            reason = %reason,
                            dropped_total = self.stats.dropped_after_retries.fetch_add(1, Ordering::Relaxed) + 1,
                            "dropping event after retries"
                        );
                        return;
                    }
                    let delay = backoff_delay(&self.config, event.attempt_count);
                    debug!(
                        event_id = %attempt.event_id,
                        attempt = event.attempt_count,
                        reason = %reason,
                        retry_in_ms = delay.as_millis() as u64,
                        "transient delivery failure, backing off"
                    );
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = self.state.wait_for(|state| *state == AgentState::Stopped) => {
                            warn!(
                                event_id = %attempt.event_id,
                                kind = %attempt.kind,
                                "agent stopped during retry backoff, discarding event"
                            );
                            self.stats.discarded_in_flight.fetch_add(1, Ordering::Relaxed);
                            return;
                        }
                    }
                }
            }
        }
    }

    async fn attempt(&self, event: &Event, body: &[u8]) -> DeliveryAttempt {
        let started = Instant::now();
        let outcome = match tokio::time::timeout(
            self.config.send_timeout,
            self.transport.send(body),
        )
        .await
        {
            Ok(Ok(())) => AttemptOutcome::Success,
            Ok(Err(TransportError::Transient(reason))) => AttemptOutcome::TransientFailure(reason),
            Ok(Err(TransportError::Permanent(reason))) => AttemptOutcome::PermanentFailure(reason),
            Err(_) => AttemptOutcome::TransientFailure(format!(
                "send timed out after {:?}",
                self.config.send_timeout
            )),
        };
        DeliveryAttempt {
            event_id: event.id,
            kind: event.kind,
            attempt: event.attempt_count,
            bytes: body.len(),
            elapsed: started.elapsed(),
            outcome,
        }
    }
}

/// Exponential backoff with ±20% jitter: base * 2^(attempt-1), capped.
fn backoff_delay(config: &DeliveryConfig, attempt: u32) -> Duration {
    let exponent = attempt.saturating_sub(1).min(16);
    let raw = config
        .backoff_base
        .saturating_mul(2u32.saturating_pow(exponent));
    let capped = raw.min(config.backoff_cap);
    let jitter = rand::rng().random_range(0.8..=1.2);
    capped.mul_f64(jitter)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use tokio::sync::watch;

    use crate::domain::event::FaultSeverity;

    // Scripted transport: consumes one canned result per send, recording
    // every body it was handed.
    struct MockTransport {
        results: Mutex<Vec<Result<(), TransportError>>>,
        sent: Mutex<Vec<Vec<u8>>>,
    }

    impl MockTransport {
        fn new(results: Vec<Result<(), TransportError>>) -> Arc<Self> {
            Arc::new(Self {
                results: Mutex::new(results),
                sent: Mutex::new(Vec::new()),
            })
        }

        fn sent_count(&self) -> usize {
            self.sent.lock().len()
        }
    }

    #[async_trait]
    impl Transport for MockTransport {
        async fn send(&self, body: &[u8]) -> Result<(), TransportError> {
            self.sent.lock().push(body.to_vec());
            let mut results = self.results.lock();
            if results.is_empty() {
                Ok(())
            } else {
                results.remove(0)
            }
        }

        async fn teardown(&self) {}
    }

    fn test_config() -> DeliveryConfig {
        DeliveryConfig {
            max_attempts: 5,
            backoff_base: Duration::from_millis(1),
            backoff_cap: Duration::from_millis(4),
            send_timeout: Duration::from_millis(200),
        }
    }

    fn worker_with(
        transport: Arc<MockTransport>,
        config: DeliveryConfig,
    ) -> (DeliveryWorker, Arc<EventQueue>, watch::Sender<AgentState>, Arc<DeliveryStats>) {
        let queue = Arc::new(EventQueue::new(16));
        let (state_tx, state_rx) = watch::channel(AgentState::Running);
        let stats = Arc::new(DeliveryStats::default());
        let worker = DeliveryWorker::new(
            queue.clone(),
            transport,
            state_rx,
            config,
            stats.clone(),
        );
        (worker, queue, state_tx, stats)
    }

    #[tokio::test]
    async fn test_success_sends_exactly_once_with_matching_payload() {
        let transport = MockTransport::new(vec![Ok(())]);
        let (mut worker, _queue, _state, stats) = worker_with(transport.clone(), test_config());

        let event = Event::heartbeat("agent-1", 10);
        let expected_id = event.id;
        worker.deliver(event).await;

        assert_eq!(transport.sent_count(), 1);
        let body = transport.sent.lock()[0].clone();
        let decoded: Event = serde_json::from_slice(&body).unwrap();
        assert_eq!(decoded.id, expected_id);
        assert_eq!(decoded.kind, EventKind::Heartbeat);
        assert_eq!(stats.snapshot().delivered, 1);
    }

    #[tokio::test]
    async fn test_permanent_failure_discards_without_retry() {
        let transport = MockTransport::new(vec![Err(TransportError::Permanent(
            "collector returned 400".to_string(),
        ))]);
        let (mut worker, _queue, _state, stats) = worker_with(transport.clone(), test_config());

        worker
            .deliver(Event::fault("bad", "payload rejected", FaultSeverity::Minor))
            .await;

        assert_eq!(transport.sent_count(), 1);
        let snapshot = stats.snapshot();
        assert_eq!(snapshot.dropped_permanent, 1);
        assert_eq!(snapshot.delivered, 0);
    }

    #[tokio::test]
    async fn test_transient_failures_exhaust_attempts_then_drop() {
        let transient = || Err(TransportError::Transient("connection refused".to_string()));
        let transport = MockTransport::new(vec![
            transient(),
            transient(),
            transient(),
            transient(),
            transient(),
        ]);
        let (mut worker, queue, _state, stats) = worker_with(transport.clone(), test_config());

        worker.deliver(Event::heartbeat("agent-1", 10)).await;

        assert_eq!(transport.sent_count(), 5);
        let snapshot = stats.snapshot();
        assert_eq!(snapshot.dropped_after_retries, 1);
        assert_eq!(snapshot.delivered, 0);
        // Never requeued
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn test_transient_failure_recovers_on_retry() {
        let transport = MockTransport::new(vec![
            Err(TransportError::Transient("503".to_string())),
            Ok(()),
        ]);
        let (mut worker, _queue, _state, stats) = worker_with(transport.clone(), test_config());

        worker.deliver(Event::heartbeat("agent-1", 10)).await;

        assert_eq!(transport.sent_count(), 2);
        assert_eq!(stats.snapshot().delivered, 1);
    }

    #[tokio::test]
    async fn test_stop_during_backoff_discards_and_counts() {
        let transport = MockTransport::new(vec![Err(TransportError::Transient(
            "connection refused".to_string(),
        ))]);
        let config = DeliveryConfig {
            backoff_base: Duration::from_secs(30),
            backoff_cap: Duration::from_secs(30),
            ..test_config()
        };
        let (worker, queue, state_tx, stats) = worker_with(transport.clone(), config);

        queue.enqueue(Event::heartbeat("agent-1", 10)).unwrap();
        let handle = tokio::spawn(worker.run());
        tokio::time::sleep(Duration::from_millis(50)).await;
        state_tx.send(AgentState::Stopped).unwrap();

        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("worker should stop promptly")
            .unwrap();
        assert_eq!(stats.snapshot().discarded_in_flight, 1);
    }

    #[tokio::test]
    async fn test_worker_drains_queue_then_exits_on_draining() {
        let transport = MockTransport::new(Vec::new());
        let (worker, queue, state_tx, stats) = worker_with(transport.clone(), test_config());

        for _ in 0..10 {
            queue.enqueue(Event::heartbeat("agent-1", 10)).unwrap();
        }
        state_tx.send(AgentState::Draining).unwrap();

        tokio::time::timeout(Duration::from_secs(2), worker.run())
            .await
            .expect("drain should complete");
        assert_eq!(stats.snapshot().delivered, 10);
        assert_eq!(transport.sent_count(), 10);
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn test_send_timeout_counts_as_transient() {
        struct StallTransport;

        #[async_trait]
        impl Transport for StallTransport {
            async fn send(&self, _body: &[u8]) -> Result<(), TransportError> {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok(())
            }
            async fn teardown(&self) {}
        }

        let queue = Arc::new(EventQueue::new(4));
        let (_state_tx, state_rx) = watch::channel(AgentState::Running);
        let stats = Arc::new(DeliveryStats::default());
        let config = DeliveryConfig {
            max_attempts: 2,
            send_timeout: Duration::from_millis(20),
            ..test_config()
        };
        let mut worker = DeliveryWorker::new(
            queue,
            Arc::new(StallTransport),
            state_rx,
            config,
            stats.clone(),
        );

        worker.deliver(Event::heartbeat("agent-1", 10)).await;
        assert_eq!(stats.snapshot().dropped_after_retries, 1);
    }

    #[test]
    fn test_backoff_grows_and_caps() {
        let config = DeliveryConfig {
            max_attempts: 10,
            backoff_base: Duration::from_secs(1),
            backoff_cap: Duration::from_secs(30),
            send_timeout: Duration::from_secs(10),
        };
        // Jitter is ±20%, so check against widened bounds.
        let first = backoff_delay(&config, 1);
        assert!(first >= Duration::from_millis(800) && first <= Duration::from_millis(1200));

        let third = backoff_delay(&config, 3);
        assert!(third >= Duration::from_millis(3200) && third <= Duration::from_millis(4800));

        let late = backoff_delay(&config, 9);
        assert!(late <= Duration::from_secs(36));
        assert!(late >= Duration::from_secs(24));
    }
}
