//! The instrumentation wrapper.
//!
//! An [`Observer`] wraps a caller's future or closure, measures it, and
//! turns the outcome into an [`Event`] on the client's queue. The wrapped
//! call's result is always handed back untouched: anything that goes wrong
//! while building or queueing the event is logged and swallowed.

use std::any::Any;
use std::collections::BTreeMap;
use std::fmt::{Debug, Display};
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use invokelens_core::{Event, Span, SpanKind, SpanStatus, Status};
use invokelens_telemetry::{ActiveSpan, Detected, DetectorChain, PricingTable, TraceContext};
use invokelens_telemetry::fingerprint::compute_fingerprint;
use serde::Serialize;
use tracing::{debug, warn};

use crate::queue::EventQueue;

/// Shared pipeline handles every observer feeds into.
#[derive(Clone)]
pub(crate) struct Pipeline {
    pub(crate) queue: Arc<EventQueue>,
    pub(crate) pricing: Arc<PricingTable>,
    pub(crate) detectors: Arc<DetectorChain>,
    pub(crate) region: String,
}

// ── Builder ────────────────────────────────────────────────────────────

/// Configures an [`Observer`]. Obtained from `Client::observe`.
pub struct ObserverBuilder {
    pipeline: Pipeline,
    agent_id: String,
    agent_name: Option<String>,
    model_id: Option<String>,
    session_id: Option<String>,
    user_id: Option<String>,
    tags: BTreeMap<String, String>,
}

impl ObserverBuilder {
    pub(crate) fn new(pipeline: Pipeline, agent_id: impl Into<String>) -> Self {
        Self {
            pipeline,
            agent_id: agent_id.into(),
            agent_name: None,
            model_id: None,
            session_id: None,
            user_id: None,
            tags: BTreeMap::new(),
        }
    }

    pub fn agent_name(mut self, name: impl Into<String>) -> Self {
        self.agent_name = Some(name.into());
        self
    }

    /// Model reported on every event, overriding whatever the response says.
    pub fn model_id(mut self, model_id: impl Into<String>) -> Self {
        self.model_id = Some(model_id.into());
        self
    }

    /// Default session id, overridable per invocation.
    pub fn session_id(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    /// Default user id, overridable per invocation.
    pub fn user_id(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    pub fn build(self) -> invokelens_core::Result<Observer> {
        let agent_id = self.agent_id.trim().to_string();
        if agent_id.is_empty() {
            return Err(invokelens_core::Error::Validation(
                "agent_id must not be empty".into(),
            ));
        }

        Ok(Observer {
            inner: Arc::new(ObserverInner {
                pipeline: self.pipeline,
                agent_id,
                agent_name: self.agent_name,
                model_id: self.model_id,
                session_id: self.session_id,
                user_id: self.user_id,
                tags: self.tags,
            }),
        })
    }
}

// ── Observer ───────────────────────────────────────────────────────────

struct ObserverInner {
    pipeline: Pipeline,
    agent_id: String,
    agent_name: Option<String>,
    model_id: Option<String>,
    session_id: Option<String>,
    user_id: Option<String>,
    tags: BTreeMap<String, String>,
}

/// Wraps calls for one agent and records an event per call. Cheap to clone.
#[derive(Clone)]
pub struct Observer {
    inner: Arc<ObserverInner>,
}

impl Observer {
    pub fn agent_id(&self) -> &str {
        &self.inner.agent_id
    }

    /// Start a per-call builder for ids, prompt and extra tags.
    pub fn invocation(&self) -> Invocation<'_> {
        Invocation {
            observer: self,
            session_id: self.inner.session_id.clone(),
            user_id: self.inner.user_id.clone(),
            prompt: None,
            tags: BTreeMap::new(),
        }
    }

    /// Await `fut` and record the outcome.
    pub async fn invoke<T, E, Fut>(&self, fut: Fut) -> Result<T, E>
    where
        Fut: Future<Output = Result<T, E>>,
        T: Serialize,
        E: Display + Debug + 'static,
    {
        self.invocation().invoke(fut).await
    }

    /// Like [`invoke`](Self::invoke), with a [`TraceContext`] for recording spans.
    pub async fn invoke_traced<T, E, F, Fut>(&self, f: F) -> Result<T, E>
    where
        F: FnOnce(TraceContext) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        T: Serialize,
        E: Display + Debug + 'static,
    {
        self.invocation().invoke_traced(f).await
    }

    /// Run a synchronous closure and record the outcome.
    pub fn invoke_blocking<T, E, F>(&self, f: F) -> Result<T, E>
    where
        F: FnOnce() -> Result<T, E>,
        T: Serialize,
        E: Display + Debug + 'static,
    {
        self.invocation().invoke_blocking(f)
    }

    /// Turn `f` into an observed function with the same argument and result.
    pub fn wrap<A, T, E, F, Fut>(
        &self,
        f: F,
    ) -> impl Fn(A) -> BoxFuture<'static, Result<T, E>> + Clone + Send + Sync + 'static
    where
        A: Send + 'static,
        F: Fn(A) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        T: Serialize + Send + 'static,
        E: Display + Debug + Send + 'static,
    {
        let observer = self.clone();
        let f = Arc::new(f);
        move |arg: A| -> BoxFuture<'static, Result<T, E>> {
            let observer = observer.clone();
            let fut = f(arg);
            Box::pin(async move { observer.invoke(fut).await })
        }
    }
}

impl Debug for Observer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Observer")
            .field("agent_id", &self.inner.agent_id)
            .field("agent_name", &self.inner.agent_name)
            .field("model_id", &self.inner.model_id)
            .finish()
    }
}

// ── Per-call builder ───────────────────────────────────────────────────

/// One observed call, with per-call metadata.
pub struct Invocation<'a> {
    observer: &'a Observer,
    session_id: Option<String>,
    user_id: Option<String>,
    prompt: Option<String>,
    tags: BTreeMap<String, String>,
}

impl Invocation<'_> {
    pub fn session_id(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn user_id(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    /// Prompt text: summarised and fingerprinted on the event.
    pub fn prompt(mut self, prompt: impl Into<String>) -> Self {
        self.prompt = Some(prompt.into());
        self
    }

    pub fn tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    pub async fn invoke<T, E, Fut>(self, fut: Fut) -> Result<T, E>
    where
        Fut: Future<Output = Result<T, E>>,
        T: Serialize,
        E: Display + Debug + 'static,
    {
        self.invoke_traced(|_| fut).await
    }

    pub async fn invoke_traced<T, E, F, Fut>(self, f: F) -> Result<T, E>
    where
        F: FnOnce(TraceContext) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        T: Serialize,
        E: Display + Debug + 'static,
    {
        let (trace, root, started_at, start) = self.begin();
        let result = f(trace.clone()).await;
        self.finish(trace, root, started_at, start.elapsed(), &result);
        result
    }

    pub fn invoke_blocking<T, E, F>(self, f: F) -> Result<T, E>
    where
        F: FnOnce() -> Result<T, E>,
        T: Serialize,
        E: Display + Debug + 'static,
    {
        let (trace, root, started_at, start) = self.begin();
        let result = f();
        self.finish(trace, root, started_at, start.elapsed(), &result);
        result
    }

    fn begin(&self) -> (TraceContext, ActiveSpan, DateTime<Utc>, Instant) {
        let inner = &self.observer.inner;
        let trace = TraceContext::new(inner.pipeline.pricing.clone());
        let root_name = inner.agent_name.as_deref().unwrap_or(&inner.agent_id);
        let mut root_span = Span::new(root_name, SpanKind::Chain);
        if let Some(prompt) = &self.prompt {
            root_span = root_span.with_input(prompt);
        }
        let root = trace.start_span(root_span);
        (trace, root, Utc::now(), Instant::now())
    }

    /// Build the event and queue it. Never fails.
    fn finish<T, E>(
        self,
        trace: TraceContext,
        mut root: ActiveSpan,
        started_at: DateTime<Utc>,
        elapsed: Duration,
        result: &Result<T, E>,
    ) where
        T: Serialize,
        E: Display + Debug + 'static,
    {
        let inner = &self.observer.inner;
        let pipeline = &inner.pipeline;

        let (status, failure, detected) = match result {
            Ok(value) => {
                let detected = match serde_json::to_value(value) {
                    Ok(json) => pipeline.detectors.detect(&json),
                    Err(e) => {
                        debug!(agent_id = %inner.agent_id, error = %e, "Response is not serializable, skipping usage detection");
                        None
                    }
                };
                (Status::Success, None, detected.unwrap_or_default())
            }
            Err(err) => {
                let (status, error_type, message) = classify_error(err);
                (status, Some((error_type, message)), Detected::default())
            }
        };

        for span in detected.spans.iter().cloned() {
            trace.record_span(span);
        }

        if let Some((_, message)) = &failure {
            root.error = Some(message.clone());
        }
        let root_status = if status == Status::Success {
            SpanStatus::Ok
        } else {
            SpanStatus::Error
        };
        trace.end_span(root, root_status);

        let mut tool_calls = trace.tool_names();
        for name in detected.tool_calls {
            if !tool_calls.contains(&name) {
                tool_calls.push(name);
            }
        }

        let model_id = inner.model_id.clone().or(detected.model_id);
        let estimated_cost = model_id.as_deref().and_then(|model| {
            pipeline
                .pricing
                .compute_cost(model, detected.input_tokens, detected.output_tokens)
                .filter(|cost| {
                    let usable = cost.is_finite() && *cost >= 0.0;
                    if !usable {
                        debug!(model, cost, "Discarding unusable cost estimate");
                    }
                    usable
                })
        });

        let mut tags = inner.tags.clone();
        tags.extend(self.tags);

        let mut builder = Event::builder(inner.agent_id.clone())
            .agent_name(inner.agent_name.clone())
            .session_id(self.session_id)
            .user_id(self.user_id)
            .model_id(model_id)
            .region(pipeline.region.clone())
            .timing(started_at, elapsed)
            .tokens(detected.input_tokens, detected.output_tokens)
            .estimated_cost(estimated_cost)
            .status(status)
            .tool_calls(tool_calls)
            .spans(trace.spans())
            .tags(tags)
            .sdk_version(crate::SDK_VERSION);

        if let Some((error_type, message)) = failure {
            builder = builder.error(error_type, message);
        }
        if let Some(prompt) = self.prompt.as_deref() {
            builder = builder.prompt(prompt, Some(compute_fingerprint(prompt)));
        }

        match builder.build() {
            Ok(event) => {
                if !pipeline.queue.enqueue(event) {
                    debug!(agent_id = %inner.agent_id, "Event not queued");
                }
            }
            Err(e) => {
                warn!(agent_id = %inner.agent_id, error = %e, "Failed to build telemetry event");
            }
        }
    }
}

// ── Error classification ───────────────────────────────────────────────

/// Status, short type name and message for a wrapped call's error.
pub(crate) fn classify_error<E>(err: &E) -> (Status, String, String)
where
    E: Display + Debug + 'static,
{
    let message = err.to_string();
    let status = if is_timeout(err, &message) {
        Status::Timeout
    } else {
        Status::Failure
    };
    (status, short_type_name::<E>(), message)
}

fn is_timeout_error(err: &(dyn std::error::Error + 'static)) -> bool {
    let mut current: Option<&(dyn std::error::Error + 'static)> = Some(err);
    while let Some(e) = current {
        if e.is::<tokio::time::error::Elapsed>() {
            return true;
        }
        if let Some(io) = e.downcast_ref::<std::io::Error>()
            && io.kind() == std::io::ErrorKind::TimedOut
        {
            return true;
        }
        if let Some(http) = e.downcast_ref::<reqwest::Error>()
            && http.is_timeout()
        {
            return true;
        }
        current = e.source();
    }
    false
}

fn is_timeout<E: 'static>(err: &E, message: &str) -> bool {
    let any = err as &dyn Any;

    let typed = if let Some(e) = any.downcast_ref::<tokio::time::error::Elapsed>() {
        is_timeout_error(e)
    } else if let Some(e) = any.downcast_ref::<std::io::Error>() {
        is_timeout_error(e)
    } else if let Some(e) = any.downcast_ref::<reqwest::Error>() {
        is_timeout_error(e)
    } else if let Some(e) = any.downcast_ref::<anyhow::Error>() {
        e.chain().any(is_timeout_error)
    } else if let Some(e) = any.downcast_ref::<Box<dyn std::error::Error + Send + Sync>>() {
        is_timeout_error(e.as_ref())
    } else {
        false
    };

    if typed {
        return true;
    }
    let lower = message.to_lowercase();
    lower.contains("timed out") || lower.contains("timeout")
}

/// `my_crate::errors::ApiError<T>` → `ApiError`.
fn short_type_name<E>() -> String {
    let full = std::any::type_name::<E>();
    let base = full.split('<').next().unwrap_or(full);
    base.rsplit("::").next().unwrap_or(base).to_string()
}
