//! Bounded in-memory event buffer.
//!
//! Many producers (every observed call) push finished events; one consumer
//! (the dispatcher) drains them in FIFO order. Enqueue never blocks and
//! never fails from the caller's point of view: when the buffer is full the
//! configured [`OverflowPolicy`] decides which event is discarded, and the
//! drop is counted.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use invokelens_config::{MAX_QUEUE_CAPACITY, OverflowPolicy};
use invokelens_core::Event;
use tokio::sync::Notify;
use tokio::sync::futures::Notified;
use tracing::warn;

#[derive(Debug, Default)]
struct QueueState {
    events: VecDeque<Event>,
    closed: bool,
}

/// Thread-safe bounded FIFO of finished events.
#[derive(Debug)]
pub struct EventQueue {
    state: Mutex<QueueState>,
    capacity: usize,
    batch_size: usize,
    policy: OverflowPolicy,
    dropped: AtomicU64,
    threshold: Notify,
}

impl EventQueue {
    /// `capacity` is clamped to `1..=MAX_QUEUE_CAPACITY`; the threshold
    /// signal fires once `batch_size` events are pending.
    pub fn new(capacity: usize, batch_size: usize, policy: OverflowPolicy) -> Self {
        Self {
            state: Mutex::new(QueueState::default()),
            capacity: capacity.clamp(1, MAX_QUEUE_CAPACITY),
            batch_size: batch_size.max(1),
            policy,
            dropped: AtomicU64::new(0),
            threshold: Notify::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn record_drop(&self, reason: &'static str) {
        let total = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
        warn!(
            capacity = self.capacity,
            dropped_total = total,
            reason,
            "Telemetry event dropped"
        );
    }

    /// Add an event. Returns whether the event was admitted.
    pub fn enqueue(&self, event: Event) -> bool {
        let reached_threshold;
        {
            let mut state = self.lock();
            if state.closed {
                drop(state);
                self.record_drop("queue closed");
                return false;
            }

            if state.events.len() >= self.capacity {
                match self.policy {
                    OverflowPolicy::DropNewest => {
                        drop(state);
                        self.record_drop("queue full");
                        return false;
                    }
                    OverflowPolicy::DropOldest => {
                        state.events.pop_front();
                        state.events.push_back(event);
                        drop(state);
                        self.record_drop("queue full, evicted oldest");
                        return true;
                    }
                }
            }

            state.events.push_back(event);
            reached_threshold = state.events.len() >= self.batch_size;
        }

        if reached_threshold {
            self.threshold.notify_one();
        }
        true
    }

    /// Remove up to `max_count` events, oldest first.
    pub fn drain(&self, max_count: usize) -> Vec<Event> {
        let mut state = self.lock();
        let n = max_count.min(state.events.len());
        state.events.drain(..n).collect()
    }

    /// Resolves after an enqueue brings the queue to `batch_size` events.
    pub fn threshold_reached(&self) -> Notified<'_> {
        self.threshold.notified()
    }

    /// Refuse further events. Pending events can still be drained.
    pub fn close(&self) {
        self.lock().closed = true;
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    pub fn len(&self) -> usize {
        self.lock().events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total events discarded since creation.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn event(agent: &str) -> Event {
        Event::builder(agent).build().unwrap()
    }

    fn agents(events: &[Event]) -> Vec<String> {
        events.iter().map(|e| e.agent_id().to_string()).collect()
    }

    #[test]
    fn fifo_drain() {
        let queue = EventQueue::new(10, 5, OverflowPolicy::DropNewest);
        for name in ["a", "b", "c"] {
            assert!(queue.enqueue(event(name)));
        }
        assert_eq!(agents(&queue.drain(2)), vec!["a", "b"]);
        assert_eq!(agents(&queue.drain(10)), vec!["c"]);
        assert!(queue.drain(10).is_empty());
    }

    #[test]
    fn drop_newest_keeps_existing() {
        let queue = EventQueue::new(2, 10, OverflowPolicy::DropNewest);
        assert!(queue.enqueue(event("a")));
        assert!(queue.enqueue(event("b")));
        assert!(!queue.enqueue(event("c")));
        assert_eq!(queue.dropped(), 1);
        assert_eq!(agents(&queue.drain(10)), vec!["a", "b"]);
    }

    #[test]
    fn drop_oldest_evicts_front() {
        let queue = EventQueue::new(2, 10, OverflowPolicy::DropOldest);
        queue.enqueue(event("a"));
        queue.enqueue(event("b"));
        assert!(queue.enqueue(event("c")));
        assert_eq!(queue.dropped(), 1);
        assert_eq!(agents(&queue.drain(10)), vec!["b", "c"]);
    }

    #[test]
    fn closed_queue_counts_drops_but_drains() {
        let queue = EventQueue::new(10, 10, OverflowPolicy::DropNewest);
        queue.enqueue(event("before"));
        queue.close();
        assert!(queue.is_closed());
        assert!(!queue.enqueue(event("after")));
        assert_eq!(queue.dropped(), 1);
        assert_eq!(agents(&queue.drain(10)), vec!["before"]);
    }

    #[test]
    fn capacity_clamped() {
        assert_eq!(EventQueue::new(0, 1, OverflowPolicy::DropNewest).capacity(), 1);
        assert_eq!(
            EventQueue::new(usize::MAX, 1, OverflowPolicy::DropNewest).capacity(),
            MAX_QUEUE_CAPACITY
        );
    }

    #[tokio::test]
    async fn threshold_signal_fires_at_batch_size() {
        let queue = Arc::new(EventQueue::new(100, 3, OverflowPolicy::DropNewest));
        queue.enqueue(event("1"));
        queue.enqueue(event("2"));

        let waiter = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.threshold_reached().await })
        };
        tokio::task::yield_now().await;
        queue.enqueue(event("3"));

        tokio::time::timeout(std::time::Duration::from_secs(1), waiter)
            .await
            .expect("threshold signal")
            .unwrap();
    }

    #[test]
    fn concurrent_producers_lose_nothing() {
        let queue = Arc::new(EventQueue::new(10_000, 10, OverflowPolicy::DropNewest));
        let handles: Vec<_> = (0..8)
            .map(|t| {
                let queue = queue.clone();
                std::thread::spawn(move || {
                    for i in 0..250 {
                        queue.enqueue(event(&format!("t{t}-{i}")));
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        let drained = agents(&queue.drain(usize::MAX));
        assert_eq!(drained.len(), 2000);
        let unique: std::collections::HashSet<_> = drained.iter().collect();
        assert_eq!(unique.len(), 2000);
        assert_eq!(queue.dropped(), 0);
    }
}
