//! # InvokeLens
//!
//! Non-blocking telemetry for AWS Bedrock agent and model invocations.
//!
//! Wrap a call with an [`Observer`] and every invocation produces one
//! [`Event`]: timing, token usage, estimated cost, status, errors and tool
//! calls. Events are buffered in a bounded queue and delivered in batches
//! by a background task, so the wrapped call never waits on telemetry and
//! never sees a telemetry error.
//!
//! ## Crates
//!
//! - `invokelens-core`: event model, errors, the `Transport` trait
//! - `invokelens-config`: `SdkConfig` loading and validation
//! - `invokelens-telemetry`: pricing, response detection, spans, fingerprints
//! - `invokelens-transport`: HTTP ingest and message-bus backends
//! - `invokelens` (this crate): queue, scheduler, observer and client

pub mod client;
pub mod observe;
pub mod queue;
pub mod scheduler;

pub use client::{Client, ClientBuilder, PipelineStats, ShutdownReport};
pub use observe::{Invocation, Observer, ObserverBuilder};
pub use queue::EventQueue;
pub use scheduler::{Dispatcher, FlushSummary, spawn_flush_loop};

pub use invokelens_config::{
    ConfigError, OverflowPolicy, PricingOverrideConfig, RetryConfig, SdkConfig, TransportMode,
};
pub use invokelens_core::{
    Batch, DeliveryError, DeliveryOutcome, Error, Event, EventBuilder, EventError, EventType,
    PromptFingerprint, Result, Span, SpanKind, SpanStatus, Status, Transport,
};
pub use invokelens_telemetry::{
    ActiveSpan, Detected, DetectorChain, ModelPricing, PricingTable, TraceContext, UsageDetector,
    compute_fingerprint, estimate_cost, similarity,
};
pub use invokelens_transport::{
    BroadcastBus, BusEntry, BusPublisher, BusTransport, HttpTransport, PublishResult, RetryPolicy,
};

/// Version reported on every event.
pub const SDK_VERSION: &str = env!("CARGO_PKG_VERSION");
