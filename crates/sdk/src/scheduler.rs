//! Batch assembly and the background flush loop.
//!
//! The [`Dispatcher`] turns queued events into batches and hands them to the
//! transport, one batch at a time. The background task started by
//! [`spawn_flush_loop`] drives it on two triggers: the queue's size
//! threshold and a fixed interval.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use invokelens_core::{Batch, DeliveryOutcome, Transport};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::queue::EventQueue;

/// Totals from one [`Dispatcher::flush_all`] call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlushSummary {
    pub batches: u64,
    pub events_delivered: u64,
    pub events_failed: u64,
}

/// Drains the queue into batches and sends them, never two at once.
pub struct Dispatcher {
    queue: Arc<EventQueue>,
    transport: Arc<dyn Transport>,
    batch_size: usize,
    gate: tokio::sync::Mutex<()>,
    batches_sent: AtomicU64,
    events_delivered: AtomicU64,
    events_failed: AtomicU64,
    last_outcome: Mutex<Option<DeliveryOutcome>>,
}

impl Dispatcher {
    pub fn new(queue: Arc<EventQueue>, transport: Arc<dyn Transport>, batch_size: usize) -> Self {
        Self {
            queue,
            transport,
            batch_size: batch_size.max(1),
            gate: tokio::sync::Mutex::new(()),
            batches_sent: AtomicU64::new(0),
            events_delivered: AtomicU64::new(0),
            events_failed: AtomicU64::new(0),
            last_outcome: Mutex::new(None),
        }
    }

    pub fn queue(&self) -> &Arc<EventQueue> {
        &self.queue
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub fn transport_name(&self) -> &str {
        self.transport.name()
    }

    /// Drain one batch and send it. Returns `None` (and does not touch the
    /// transport) when the queue is empty.
    pub async fn dispatch_once(&self) -> Option<DeliveryOutcome> {
        self.dispatch_batch().await.map(|(_, outcome)| outcome)
    }

    async fn dispatch_batch(&self) -> Option<(u64, DeliveryOutcome)> {
        let _guard = self.gate.lock().await;

        let events = self.queue.drain(self.batch_size);
        if events.is_empty() {
            return None;
        }

        let batch = Batch::new(events);
        let count = batch.len() as u64;
        trace!(events = count, transport = self.transport.name(), "Dispatching batch");

        let outcome = self.transport.send(&batch).await;
        self.batches_sent.fetch_add(1, Ordering::Relaxed);
        if outcome.is_delivered() {
            self.events_delivered.fetch_add(count, Ordering::Relaxed);
        } else {
            self.events_failed.fetch_add(count, Ordering::Relaxed);
        }
        *self
            .last_outcome
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(outcome.clone());

        Some((count, outcome))
    }

    /// Dispatch until the queue is empty.
    pub async fn flush_all(&self) -> FlushSummary {
        let mut summary = FlushSummary::default();
        loop {
            match self.dispatch_batch().await {
                None => break,
                Some((count, outcome)) => {
                    summary.batches += 1;
                    if outcome.is_delivered() {
                        summary.events_delivered += count;
                    } else {
                        summary.events_failed += count;
                    }
                }
            }
        }
        summary
    }

    pub fn batches_sent(&self) -> u64 {
        self.batches_sent.load(Ordering::Relaxed)
    }

    pub fn events_delivered(&self) -> u64 {
        self.events_delivered.load(Ordering::Relaxed)
    }

    pub fn events_failed(&self) -> u64 {
        self.events_failed.load(Ordering::Relaxed)
    }

    pub fn last_outcome(&self) -> Option<DeliveryOutcome> {
        self.last_outcome
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("transport", &self.transport.name())
            .field("batch_size", &self.batch_size)
            .field("batches_sent", &self.batches_sent())
            .finish()
    }
}

/// Shortest tick the flush loop will run at.
const MIN_FLUSH_INTERVAL: Duration = Duration::from_millis(1);

/// Spawn the flush loop on the current runtime. It runs until `cancel`
/// fires; a dispatch already in flight is allowed to finish.
pub fn spawn_flush_loop(
    dispatcher: Arc<Dispatcher>,
    interval: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval.max(MIN_FLUSH_INTERVAL));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately.
        ticker.tick().await;

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    debug!("Flush loop: shutdown requested");
                    break;
                }
                _ = dispatcher.queue().threshold_reached() => {
                    while dispatcher.queue().len() >= dispatcher.batch_size() {
                        if dispatcher.dispatch_once().await.is_none() {
                            break;
                        }
                    }
                }
                _ = ticker.tick() => {
                    let summary = dispatcher.flush_all().await;
                    if summary.batches > 0 {
                        trace!(batches = summary.batches, "Interval flush");
                    }
                }
            }
        }

        debug!("Flush loop exited");
    })
}
