//! Message-bus transport.
//!
//! Each event becomes one [`BusEntry`] shaped like an EventBridge
//! `PutEvents` entry. Entries are published in chunks of at most
//! [`MAX_ENTRIES_PER_PUBLISH`] through a [`BusPublisher`], in a single
//! attempt: any failed entry fails the whole batch outcome.
//!
//! [`BroadcastBus`] is the in-process publisher used when no external bus
//! client is plugged in.

use std::sync::Arc;

use async_trait::async_trait;
use invokelens_core::{Batch, DeliveryError, DeliveryOutcome, Transport};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{debug, error, warn};

/// `Source` of every published entry.
pub const EVENT_SOURCE: &str = "invokelens.sdk";

/// `DetailType` of every published entry.
pub const DETAIL_TYPE: &str = "InvocationTelemetry";

/// EventBridge accepts at most 10 entries per `PutEvents` call.
pub const MAX_ENTRIES_PER_PUBLISH: usize = 10;

/// One message on the bus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct BusEntry {
    pub source: String,
    pub detail_type: String,
    /// The event, serialised as JSON.
    pub detail: String,
    pub event_bus_name: String,
}

impl BusEntry {
    pub fn new(event_bus_name: impl Into<String>, detail: String) -> Self {
        Self {
            source: EVENT_SOURCE.into(),
            detail_type: DETAIL_TYPE.into(),
            detail,
            event_bus_name: event_bus_name.into(),
        }
    }
}

/// Result of one publish call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PublishResult {
    /// Entries the bus rejected.
    pub failed_entry_count: usize,
    /// Per-entry error messages, if the bus reported any.
    pub errors: Vec<String>,
}

/// A client able to put entries on a bus.
#[async_trait]
pub trait BusPublisher: Send + Sync {
    /// Publish up to [`MAX_ENTRIES_PER_PUBLISH`] entries.
    async fn put_events(&self, entries: &[BusEntry]) -> Result<PublishResult, DeliveryError>;
}

/// Per-event bus delivery, single attempt.
pub struct BusTransport {
    event_bus_name: String,
    publisher: Arc<dyn BusPublisher>,
}

impl BusTransport {
    pub fn new(event_bus_name: impl Into<String>, publisher: Arc<dyn BusPublisher>) -> Self {
        Self {
            event_bus_name: event_bus_name.into(),
            publisher,
        }
    }

    pub fn event_bus_name(&self) -> &str {
        &self.event_bus_name
    }

    fn entries(&self, batch: &Batch) -> Result<Vec<BusEntry>, DeliveryError> {
        batch
            .iter()
            .map(|event| {
                serde_json::to_string(event)
                    .map(|detail| BusEntry::new(&self.event_bus_name, detail))
                    .map_err(|e| DeliveryError::Serialization(e.to_string()))
            })
            .collect()
    }
}

#[async_trait]
impl Transport for BusTransport {
    fn name(&self) -> &str {
        "eventbridge"
    }

    async fn send(&self, batch: &Batch) -> DeliveryOutcome {
        if batch.is_empty() {
            return DeliveryOutcome::Delivered { attempts: 0 };
        }

        let entries = match self.entries(batch) {
            Ok(entries) => entries,
            Err(e) => {
                error!(events = batch.len(), error = %e, "Failed to serialize batch, dropping it");
                return DeliveryOutcome::Failed {
                    attempts: 0,
                    error: e,
                };
            }
        };

        let total = entries.len();
        let mut failed = 0;
        let mut first_error: Option<DeliveryError> = None;

        for chunk in entries.chunks(MAX_ENTRIES_PER_PUBLISH) {
            match self.publisher.put_events(chunk).await {
                Ok(result) if result.failed_entry_count > 0 => {
                    warn!(
                        bus = %self.event_bus_name,
                        failed = result.failed_entry_count,
                        chunk = chunk.len(),
                        errors = ?result.errors,
                        "Bus rejected some entries"
                    );
                    failed += result.failed_entry_count.min(chunk.len());
                }
                Ok(_) => {}
                Err(e) => {
                    warn!(bus = %self.event_bus_name, chunk = chunk.len(), error = %e, "Bus publish failed");
                    failed += chunk.len();
                    first_error.get_or_insert(e);
                }
            }
        }

        if failed == 0 {
            debug!(bus = %self.event_bus_name, events = total, "Batch published");
            return DeliveryOutcome::Delivered { attempts: 1 };
        }

        let error = match first_error {
            Some(e) if failed == total => e,
            _ => DeliveryError::PartialPublish { failed, total },
        };
        error!(
            bus = %self.event_bus_name,
            failed,
            total,
            error = %error,
            "Bus delivery failed, dropping events"
        );
        DeliveryOutcome::Failed { attempts: 1, error }
    }
}

// ── In-process bus ─────────────────────────────────────────────────────

/// Default number of entries a lagging subscriber may fall behind.
const BROADCAST_CAPACITY: usize = 1024;

/// An in-process bus over `tokio::sync::broadcast`.
///
/// Every subscriber receives every entry addressed to this bus. Entries
/// addressed to another bus name are rejected like a missing bus would be.
#[derive(Clone)]
pub struct BroadcastBus {
    name: String,
    sender: broadcast::Sender<BusEntry>,
}

impl BroadcastBus {
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_capacity(name, BROADCAST_CAPACITY)
    }

    pub fn with_capacity(name: impl Into<String>, capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            name: name.into(),
            sender,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Subscribe to all future entries.
    pub fn subscribe(&self) -> broadcast::Receiver<BusEntry> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

#[async_trait]
impl BusPublisher for BroadcastBus {
    async fn put_events(&self, entries: &[BusEntry]) -> Result<PublishResult, DeliveryError> {
        let mut result = PublishResult::default();
        for entry in entries {
            if entry.event_bus_name != self.name {
                result.failed_entry_count += 1;
                result
                    .errors
                    .push(format!("event bus {} does not exist", entry.event_bus_name));
                continue;
            }
            // No subscribers is not an error: nobody is listening yet.
            let _ = self.sender.send(entry.clone());
        }
        Ok(result)
    }
}

impl std::fmt::Debug for BroadcastBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BroadcastBus")
            .field("name", &self.name)
            .field("subscribers", &self.sender.receiver_count())
            .finish()
    }
}
