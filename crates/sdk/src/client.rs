//! Lifecycle controller: owns the queue, the flush loop and the transport.
//!
//! ```no_run
//! # async fn demo() -> invokelens::Result<()> {
//! use invokelens::{Client, SdkConfig};
//! use std::time::Duration;
//!
//! let client = Client::new(SdkConfig::new("il_live_..."))?;
//! client.start()?;
//!
//! let observer = client
//!     .observe("support-agent")
//!     .model_id("anthropic.claude-3-haiku")
//!     .build()?;
//! let answer: Result<serde_json::Value, std::io::Error> =
//!     observer.invoke(async { Ok(serde_json::json!({"completion": "hi"})) }).await;
//!
//! client.shutdown(Duration::from_secs(5)).await;
//! # Ok(())
//! # }
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use invokelens_config::{SdkConfig, TransportMode, valid_price};
use invokelens_core::Transport;
use invokelens_telemetry::{DetectorChain, ModelPricing, PricingTable, UsageDetector};
use invokelens_transport::{BroadcastBus, BusPublisher, BusTransport, HttpTransport};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::observe::{ObserverBuilder, Pipeline};
use crate::queue::EventQueue;
use crate::scheduler::{Dispatcher, spawn_flush_loop};

/// Snapshot of pipeline counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PipelineStats {
    /// Events waiting in the queue.
    pub queued: usize,
    /// Events discarded by the queue (overflow or after shutdown).
    pub dropped: u64,
    /// Batches handed to the transport.
    pub batches_sent: u64,
    pub events_delivered: u64,
    pub events_failed: u64,
}

/// What a [`Client::shutdown`] call accomplished.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ShutdownReport {
    /// Events delivered by the final flush.
    pub events_flushed: u64,
    /// Events the final flush tried and failed to deliver.
    pub events_failed: u64,
    /// Events still queued when shutdown returned.
    pub events_remaining: usize,
    /// The deadline expired before the final flush completed.
    pub timed_out: bool,
    /// An earlier call already shut the client down; nothing was done.
    pub already_shut_down: bool,
}

struct ClientInner {
    config: SdkConfig,
    pipeline: Pipeline,
    dispatcher: Arc<Dispatcher>,
    bus: Option<BroadcastBus>,
    cancel: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
    shut_down: AtomicBool,
}

impl Drop for ClientInner {
    fn drop(&mut self) {
        if self.shut_down.load(Ordering::SeqCst) {
            return;
        }
        self.cancel.cancel();
        let abandoned = self.pipeline.queue.len();
        if abandoned > 0 {
            warn!(
                events = abandoned,
                "Client dropped without shutdown, queued telemetry abandoned"
            );
        }
    }
}

/// Handle to a telemetry pipeline. Cheap to clone; the pipeline stops when
/// the last handle is dropped or [`shutdown`](Client::shutdown) is called.
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

impl Client {
    /// Validate `config` and build a client with the configured transport.
    pub fn new(config: SdkConfig) -> invokelens_core::Result<Self> {
        Self::builder(config).build()
    }

    /// Builder for injecting a custom transport, bus publisher or detector.
    pub fn builder(config: SdkConfig) -> ClientBuilder {
        ClientBuilder {
            config,
            transport: None,
            publisher: None,
            detectors: DetectorChain::default(),
        }
    }

    /// Spawn the background flush loop on the current tokio runtime.
    /// Calling it again while running is a no-op.
    pub fn start(&self) -> invokelens_core::Result<()> {
        tokio::runtime::Handle::try_current()
            .map_err(|e| invokelens_core::Error::NoRuntime(e.to_string()))?;

        if self.inner.shut_down.load(Ordering::SeqCst) {
            warn!("start() called after shutdown, ignoring");
            return Ok(());
        }

        let mut task = self
            .inner
            .task
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if task.is_some() {
            return Ok(());
        }

        *task = Some(spawn_flush_loop(
            self.inner.dispatcher.clone(),
            self.inner.config.flush_interval_duration(),
            self.inner.cancel.clone(),
        ));
        info!(
            transport = self.inner.dispatcher.transport_name(),
            batch_size = self.inner.config.batch_size,
            flush_interval_secs = self.inner.config.flush_interval,
            "Telemetry pipeline started"
        );
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.inner
            .task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|t| !t.is_finished())
    }

    /// Configure an observer for `agent_id`.
    pub fn observe(&self, agent_id: impl Into<String>) -> ObserverBuilder {
        ObserverBuilder::new(self.inner.pipeline.clone(), agent_id)
    }

    /// Deliver everything queued right now.
    pub async fn flush(&self) -> crate::scheduler::FlushSummary {
        self.inner.dispatcher.flush_all().await
    }

    /// Stop the pipeline and make a final delivery attempt, bounded by
    /// `timeout`. Only the first call does anything.
    pub async fn shutdown(&self, timeout: Duration) -> ShutdownReport {
        if self.inner.shut_down.swap(true, Ordering::SeqCst) {
            return ShutdownReport {
                already_shut_down: true,
                events_remaining: self.inner.pipeline.queue.len(),
                ..ShutdownReport::default()
            };
        }

        let queue = &self.inner.pipeline.queue;
        queue.close();
        self.inner.cancel.cancel();

        let task = self
            .inner
            .task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let dispatcher = self.inner.dispatcher.clone();

        let final_flush = async move {
            if let Some(task) = task
                && let Err(e) = task.await
            {
                warn!(error = %e, "Flush loop ended abnormally");
            }
            dispatcher.flush_all().await
        };

        let mut report = match tokio::time::timeout(timeout, final_flush).await {
            Ok(summary) => ShutdownReport {
                events_flushed: summary.events_delivered,
                events_failed: summary.events_failed,
                ..ShutdownReport::default()
            },
            Err(_) => {
                warn!(
                    timeout_ms = timeout.as_millis() as u64,
                    "Shutdown deadline reached before the final flush completed"
                );
                ShutdownReport {
                    timed_out: true,
                    ..ShutdownReport::default()
                }
            }
        };
        report.events_remaining = queue.len();

        debug!(
            flushed = report.events_flushed,
            failed = report.events_failed,
            remaining = report.events_remaining,
            "Telemetry pipeline shut down"
        );
        report
    }

    /// Shut down with the configured `shutdown_timeout_secs`.
    pub async fn close(&self) -> ShutdownReport {
        self.shutdown(self.inner.config.shutdown_timeout()).await
    }

    pub fn stats(&self) -> PipelineStats {
        let queue = &self.inner.pipeline.queue;
        let dispatcher = &self.inner.dispatcher;
        PipelineStats {
            queued: queue.len(),
            dropped: queue.dropped(),
            batches_sent: dispatcher.batches_sent(),
            events_delivered: dispatcher.events_delivered(),
            events_failed: dispatcher.events_failed(),
        }
    }

    /// Override pricing for one model on this client. Prices must be finite
    /// and non-negative.
    pub fn set_custom_pricing(
        &self,
        model_id: &str,
        input_per_m: f64,
        output_per_m: f64,
    ) -> invokelens_core::Result<()> {
        if !valid_price(input_per_m) || !valid_price(output_per_m) {
            return Err(invokelens_core::Error::Validation(format!(
                "custom pricing for {model_id} must be finite and non-negative"
            )));
        }
        self.inner
            .pipeline
            .pricing
            .set(model_id, ModelPricing::new(input_per_m, output_per_m));
        Ok(())
    }

    pub fn pricing(&self) -> &PricingTable {
        &self.inner.pipeline.pricing
    }

    /// The in-process bus, when the client publishes to one.
    pub fn broadcast_bus(&self) -> Option<&BroadcastBus> {
        self.inner.bus.as_ref()
    }

    pub fn config(&self) -> &SdkConfig {
        &self.inner.config
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("transport", &self.inner.dispatcher.transport_name())
            .field("stats", &self.stats())
            .finish()
    }
}

/// Builds a [`Client`] with optional injected collaborators.
pub struct ClientBuilder {
    config: SdkConfig,
    transport: Option<Arc<dyn Transport>>,
    publisher: Option<Arc<dyn BusPublisher>>,
    detectors: DetectorChain,
}

impl ClientBuilder {
    /// Use `transport` instead of the one `transport_mode` selects.
    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Publisher for `eventbridge` mode (defaults to an in-process bus).
    pub fn bus_publisher(mut self, publisher: Arc<dyn BusPublisher>) -> Self {
        self.publisher = Some(publisher);
        self
    }

    /// Try `detector` after the built-in response detectors.
    pub fn detector(mut self, detector: Box<dyn UsageDetector>) -> Self {
        self.detectors.push(detector);
        self
    }

    pub fn build(self) -> invokelens_core::Result<Client> {
        let config = self.config;
        config.validate()?;

        let pricing = PricingTable::with_defaults();
        for (model, price) in &config.custom_pricing {
            pricing.set(model, ModelPricing::new(price.input_per_m, price.output_per_m));
        }

        let mut bus = None;
        let transport: Arc<dyn Transport> = match (self.transport, config.transport_mode) {
            (Some(transport), _) => transport,
            (None, TransportMode::Http) => Arc::new(HttpTransport::from_config(&config)?),
            (None, TransportMode::Eventbridge) => {
                let bus_name = config.event_bus_name.clone().unwrap_or_default();
                let publisher: Arc<dyn BusPublisher> = match self.publisher {
                    Some(publisher) => publisher,
                    None => {
                        let local = BroadcastBus::new(bus_name.clone());
                        bus = Some(local.clone());
                        Arc::new(local)
                    }
                };
                Arc::new(BusTransport::new(bus_name, publisher))
            }
        };

        let queue = Arc::new(EventQueue::new(
            config.max_queue_size,
            config.batch_size,
            config.overflow_policy,
        ));
        let dispatcher = Arc::new(Dispatcher::new(
            queue.clone(),
            transport,
            config.batch_size,
        ));
        let pipeline = Pipeline {
            queue,
            pricing: Arc::new(pricing),
            detectors: Arc::new(self.detectors),
            region: config.resolved_region(),
        };

        Ok(Client {
            inner: Arc::new(ClientInner {
                config,
                pipeline,
                dispatcher,
                bus,
                cancel: CancellationToken::new(),
                task: Mutex::new(None),
                shut_down: AtomicBool::new(false),
            }),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_config_fails_construction() {
        let err = Client::new(SdkConfig::new("")).unwrap_err();
        assert!(matches!(err, invokelens_core::Error::Config { .. }));
    }

    #[test]
    fn start_outside_runtime_is_an_error() {
        let client = Client::new(SdkConfig::new("key")).unwrap();
        let err = client.start().unwrap_err();
        assert!(matches!(err, invokelens_core::Error::NoRuntime(_)));
        assert!(!client.is_running());
    }

    #[test]
    fn eventbridge_mode_uses_broadcast_bus() {
        let client = Client::new(SdkConfig::new("key").with_event_bus("invokelens-bus")).unwrap();
        assert_eq!(client.broadcast_bus().map(|b| b.name()), Some("invokelens-bus"));
        assert_eq!(client.inner.dispatcher.transport_name(), "eventbridge");
    }

    #[test]
    fn custom_pricing_from_config() {
        let config = SdkConfig::new("key").with_custom_pricing("acme.model", 2.0, 4.0);
        let client = Client::new(config).unwrap();
        let cost = client.pricing().compute_cost("acme.model", 1_000_000, 0).unwrap();
        assert!((cost - 2.0).abs() < 1e-10);

        client.set_custom_pricing("acme.other", 1.0, 1.0).unwrap();
        assert!(client.pricing().get("acme.other").is_some());
    }

    #[test]
    fn invalid_custom_pricing_rejected() {
        let client = Client::new(SdkConfig::new("key")).unwrap();
        for (input, output) in [(-1.0, 1.0), (1.0, f64::NAN), (f64::INFINITY, 0.0)] {
            let err = client.set_custom_pricing("acme.model", input, output).unwrap_err();
            assert!(matches!(err, invokelens_core::Error::Validation(_)));
        }
        assert!(client.pricing().get("acme.model").is_none());

        let config = SdkConfig::new("key").with_custom_pricing("acme.model", f64::NAN, 1.0);
        assert!(Client::new(config).is_err());
    }

    #[test]
    fn empty_agent_id_rejected() {
        let client = Client::new(SdkConfig::new("key")).unwrap();
        assert!(client.observe("   ").build().is_err());
    }

    #[tokio::test]
    async fn start_is_idempotent() {
        let client = Client::new(SdkConfig::new("key")).unwrap();
        client.start().unwrap();
        client.start().unwrap();
        assert!(client.is_running());
        let report = client.shutdown(Duration::from_secs(1)).await;
        assert!(!report.timed_out);
        assert!(!client.is_running());
    }
}
