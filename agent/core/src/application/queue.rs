// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// Event Queue - bounded buffer between the poller and the delivery worker
//
// FIFO within a priority class. When full, admission evicts the oldest event
// of the lowest priority present; an arrival that is itself lower-priority
// than everything queued is rejected instead, so a fault is only ever pushed
// out by another fault.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::Notify;
use tracing::{debug, warn};

use crate::domain::event::{Event, EventKind};

/// Queue at capacity and every queued event outranks the newcomer.
#[derive(Debug, Error)]
#[error("event queue full ({capacity}), {rejected} outranked by all queued events")]
pub struct QueueFull {
    pub capacity: usize,
    pub rejected: EventKind,
}

/// Counters exposed for observability. All monotonically increasing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueStats {
    pub enqueued: u64,
    pub dequeued: u64,
    pub evicted: u64,
    pub rejected: u64,
}

#[derive(Default)]
struct Counters {
    enqueued: AtomicU64,
    dequeued: AtomicU64,
    evicted: AtomicU64,
    rejected: AtomicU64,
    sequence: AtomicU64,
}

pub struct EventQueue {
    events: Mutex<VecDeque<Event>>,
    notify: Notify,
    capacity: usize,
    counters: Counters,
}

impl EventQueue {
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "queue capacity must be non-zero");
        Self {
            events: Mutex::new(VecDeque::with_capacity(capacity)),
            notify: Notify::new(),
            capacity,
            counters: Counters::default(),
        }
    }

    /// Admit an event, evicting under pressure per the priority policy.
    ///
    /// Non-blocking. Stamps the event with the next sequence number on
    /// admission.
    pub fn enqueue(&self, mut event: Event) -> Result<(), QueueFull> {
        {
            let mut events = self.events.lock();
            if events.len() >= self.capacity {
                self.make_room(&mut events, event.kind)?;
            }
            event.sequence = self.counters.sequence.fetch_add(1, Ordering::Relaxed) + 1;
            debug!(kind = %event.kind, sequence = event.sequence, "event queued");
            events.push_back(event);
        }
        self.counters.enqueued.fetch_add(1, Ordering::Relaxed);
        self.notify.notify_one();
        Ok(())
    }

    /// Take the oldest event, waiting up to `timeout` for one to arrive.
    pub async fn dequeue(&self, timeout: Duration) -> Option<Event> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            // Register interest before checking, so a concurrent enqueue
            // between the check and the await still wakes us.
            let notified = self.notify.notified();
            if let Some(event) = self.pop() {
                return Some(event);
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return self.pop();
            }
        }
    }

    /// Empty the queue, handing back whatever was still waiting.
    ///
    /// Used at shutdown so every undelivered event can be counted.
    pub fn drain_remaining(&self) -> Vec<Event> {
        let mut events = self.events.lock();
        events.drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.lock().is_empty()
    }

    pub fn stats(&self) -> QueueStats {
        QueueStats {
            enqueued: self.counters.enqueued.load(Ordering::Relaxed),
            dequeued: self.counters.dequeued.load(Ordering::Relaxed),
            evicted: self.counters.evicted.load(Ordering::Relaxed),
            rejected: self.counters.rejected.load(Ordering::Relaxed),
        }
    }

    fn pop(&self) -> Option<Event> {
        let event = self.events.lock().pop_front();
        if event.is_some() {
            self.counters.dequeued.fetch_add(1, Ordering::Relaxed);
        }
        event
    }

    fn make_room(
        &self,
        events: &mut VecDeque<Event>,
        incoming: EventKind,
    ) -> Result<(), QueueFull> {
        // Oldest event of the lowest priority present. Index breaks ties so
        // FIFO order holds within a priority class.
        let (victim_idx, victim_priority) = events
            .iter()
            .enumerate()
            .map(|(idx, event)| (idx, event.kind.priority()))
            .min_by_key(|&(idx, priority)| (priority, idx))
            .expect("make_room called on an empty queue");

        if victim_priority > incoming.priority() {
            self.counters.rejected.fetch_add(1, Ordering::Relaxed);
            warn!(kind = %incoming, capacity = self.capacity, "queue full, rejecting event");
            return Err(QueueFull {
                capacity: self.capacity,
                rejected: incoming,
            });
        }

        let victim = events.remove(victim_idx).expect("victim index in bounds");
        self.counters.evicted.fetch_add(1, Ordering::Relaxed);
        warn!(
            kind = %victim.kind,
            sequence = victim.sequence,
            for_kind = %incoming,
            "queue full, evicting event"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::event::{EventPayload, FaultSeverity};

    fn heartbeat() -> Event {
        Event::heartbeat("test", 10)
    }

    fn measurement() -> Event {
        Event::new(EventPayload::Measurement {
            interval_secs: 1.0,
            request_rate: 40,
            concurrent_sessions: 0,
            configured_entities: 0,
            mean_request_latency_ms: 0.0,
            memory_configured_mb: 0.0,
            memory_used_mb: 0.0,
            cpu_use: None,
        })
    }

    fn fault() -> Event {
        Event::fault("App state change", "container stopped", FaultSeverity::Major)
    }

    #[tokio::test]
    async fn test_fifo_order_preserved() {
        let queue = EventQueue::new(8);
        let first = heartbeat();
        let second = heartbeat();
        let first_id = first.id;
        let second_id = second.id;

        queue.enqueue(first).unwrap();
        queue.enqueue(second).unwrap();

        assert_eq!(queue.dequeue(Duration::from_millis(10)).await.unwrap().id, first_id);
        assert_eq!(queue.dequeue(Duration::from_millis(10)).await.unwrap().id, second_id);
    }

    #[tokio::test]
    async fn test_size_never_exceeds_capacity() {
        let queue = EventQueue::new(4);
        for _ in 0..20 {
            queue.enqueue(heartbeat()).unwrap();
            assert!(queue.len() <= 4);
        }
        assert_eq!(queue.len(), 4);
        assert_eq!(queue.stats().evicted, 16);
    }

    #[tokio::test]
    async fn test_eviction_prefers_lowest_priority() {
        let queue = EventQueue::new(3);
        queue.enqueue(fault()).unwrap();
        queue.enqueue(heartbeat()).unwrap();
        queue.enqueue(measurement()).unwrap();

        // Queue is full; a fault pushes out the heartbeat first.
        queue.enqueue(fault()).unwrap();
        let kinds: Vec<EventKind> = queue.drain_remaining().iter().map(|e| e.kind).collect();
        assert_eq!(
            kinds,
            vec![EventKind::Fault, EventKind::Measurement, EventKind::Fault]
        );
        assert_eq!(queue.stats().evicted, 1);
    }

    #[tokio::test]
    async fn test_eviction_drops_oldest_within_priority() {
        let queue = EventQueue::new(2);
        let old = heartbeat();
        let old_id = old.id;
        queue.enqueue(old).unwrap();
        queue.enqueue(heartbeat()).unwrap();
        queue.enqueue(heartbeat()).unwrap();

        let remaining = queue.drain_remaining();
        assert_eq!(remaining.len(), 2);
        assert!(remaining.iter().all(|e| e.id != old_id));
    }

    #[tokio::test]
    async fn test_fault_only_evicted_by_fault() {
        let queue = EventQueue::new(2);
        queue.enqueue(fault()).unwrap();
        queue.enqueue(fault()).unwrap();

        // Lower-priority arrivals bounce off a fault-only queue.
        let err = queue.enqueue(heartbeat()).unwrap_err();
        assert_eq!(err.rejected, EventKind::Heartbeat);
        assert!(queue.enqueue(measurement()).is_err());
        assert_eq!(queue.stats().rejected, 2);
        assert_eq!(queue.stats().evicted, 0);

        // Another fault still gets in, displacing the oldest fault.
        queue.enqueue(fault()).unwrap();
        assert_eq!(queue.len(), 2);
        assert_eq!(queue.stats().evicted, 1);
    }

    #[tokio::test]
    async fn test_sequence_numbers_increase() {
        let queue = EventQueue::new(8);
        queue.enqueue(heartbeat()).unwrap();
        queue.enqueue(heartbeat()).unwrap();
        let first = queue.dequeue(Duration::from_millis(10)).await.unwrap();
        let second = queue.dequeue(Duration::from_millis(10)).await.unwrap();
        assert!(second.sequence > first.sequence);
        assert_eq!(first.sequence, 1);
    }

    #[tokio::test]
    async fn test_dequeue_times_out_on_empty_queue() {
        let queue = EventQueue::new(2);
        let start = tokio::time::Instant::now();
        assert!(queue.dequeue(Duration::from_millis(20)).await.is_none());
        assert!(start.elapsed() >= Duration::from_millis(20));
    }

    #[tokio::test]
    async fn test_dequeue_wakes_on_enqueue() {
        let queue = std::sync::Arc::new(EventQueue::new(2));
        let waiter = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.dequeue(Duration::from_secs(5)).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        queue.enqueue(heartbeat()).unwrap();
        let event = waiter.await.unwrap();
        assert!(event.is_some());
    }

    #[tokio::test]
    async fn test_drain_remaining_counts_everything() {
        let queue = EventQueue::new(8);
        for _ in 0..5 {
            queue.enqueue(heartbeat()).unwrap();
        }
        let drained = queue.drain_remaining();
        assert_eq!(drained.len(), 5);
        assert!(queue.is_empty());
    }
}
