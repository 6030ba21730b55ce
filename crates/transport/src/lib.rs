//! Delivery backends for telemetry batches.
//!
//! Both backends implement [`invokelens_core::Transport`] and never return
//! an error to the caller: every failure ends up in
//! [`invokelens_core::DeliveryOutcome::Failed`] and a log line.
//!
//! - [`HttpTransport`] posts the batch to the ingest endpoint, retrying
//!   with exponential backoff and jitter.
//! - [`BusTransport`] publishes one entry per event through a
//!   [`BusPublisher`], in a single attempt.

pub mod bus;
pub mod http;
pub mod retry;

pub use bus::{
    BroadcastBus, BusEntry, BusPublisher, BusTransport, DETAIL_TYPE, EVENT_SOURCE,
    MAX_ENTRIES_PER_PUBLISH, PublishResult,
};
pub use http::{HttpTransport, INGEST_PATH};
pub use retry::RetryPolicy;
