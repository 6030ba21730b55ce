//! Per-invocation span collection.
//!
//! A [`TraceContext`] is created for every observed call. The wrapper opens
//! a root `chain` span, user code records nested `llm` / `tool` / ... spans
//! through the context, and the finished list travels on the event.
//!
//! Parenting follows a single active stack: a new span is parented to the
//! most recently started span that has not ended yet.

use std::future::Future;
use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;

use invokelens_core::{Span, SpanKind, SpanStatus};

use crate::pricing::PricingTable;

/// Maximum number of spans recorded per invocation.
pub const MAX_SPANS_PER_TRACE: usize = 100;

#[derive(Debug, Default)]
struct TraceState {
    spans: Vec<Span>,
    active: Vec<String>,
}

/// Collects spans for a single invocation. Cheap to clone.
#[derive(Clone)]
pub struct TraceContext {
    state: Arc<Mutex<TraceState>>,
    pricing: Arc<PricingTable>,
}

/// A started span, owned by the caller until handed back to
/// [`TraceContext::end_span`]. Dereferences to the underlying [`Span`] so
/// output, tokens and model can be filled in while it runs.
#[derive(Debug)]
pub struct ActiveSpan {
    span: Span,
    recorded: bool,
    started: Instant,
}

impl ActiveSpan {
    /// Whether the span counts toward the trace (false past the span limit).
    pub fn is_recorded(&self) -> bool {
        self.recorded
    }

    pub fn id(&self) -> &str {
        &self.span.span_id
    }

    pub fn into_span(self) -> Span {
        self.span
    }
}

impl Deref for ActiveSpan {
    type Target = Span;

    fn deref(&self) -> &Span {
        &self.span
    }
}

impl DerefMut for ActiveSpan {
    fn deref_mut(&mut self) -> &mut Span {
        &mut self.span
    }
}

impl TraceContext {
    /// A context that prices spans against `pricing`.
    pub fn new(pricing: Arc<PricingTable>) -> Self {
        Self {
            state: Arc::new(Mutex::new(TraceState::default())),
            pricing,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, TraceState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register `span` and make it the parent of spans started after it.
    ///
    /// Past [`MAX_SPANS_PER_TRACE`] the span is handed back detached: it can
    /// still be used and ended, but it is not recorded.
    pub fn start_span(&self, mut span: Span) -> ActiveSpan {
        let mut state = self.lock();

        if state.spans.len() >= MAX_SPANS_PER_TRACE {
            tracing::debug!(
                limit = MAX_SPANS_PER_TRACE,
                span = %span.name,
                "Span limit reached, span will not be recorded"
            );
            return ActiveSpan {
                span,
                recorded: false,
                started: Instant::now(),
            };
        }

        if span.parent_span_id.is_none() {
            span.parent_span_id = state.active.last().cloned();
        }
        state.spans.push(span.clone());
        state.active.push(span.span_id.clone());

        ActiveSpan {
            span,
            recorded: true,
            started: Instant::now(),
        }
    }

    /// Finalise a span: timing, status, cost. Returns the finished span.
    ///
    /// Duration comes from a monotonic clock, so wall-clock adjustments while
    /// the span runs cannot skew it.
    pub fn end_span(&self, mut active: ActiveSpan, status: SpanStatus) -> Span {
        let elapsed = active.started.elapsed();
        active.span.end_after(status, elapsed);

        if let Some(model) = active.span.model_id.as_deref()
            && active.span.total_tokens() > 0
        {
            active.span.estimated_cost_usd = self
                .pricing
                .compute_cost(model, active.span.input_tokens, active.span.output_tokens)
                .filter(|cost| cost.is_finite() && *cost >= 0.0)
                .unwrap_or(0.0);
        }

        let mut state = self.lock();
        if active.recorded {
            let id = active.span.span_id.as_str();
            if let Some(slot) = state.spans.iter_mut().find(|s| s.span_id == id) {
                *slot = active.span.clone();
            }
            if state.active.last().is_some_and(|top| top == id) {
                state.active.pop();
            }
        }

        active.span
    }

    /// Run `f` inside a span. An `Err` marks the span as failed.
    pub fn span<R, E, F>(&self, name: &str, kind: SpanKind, f: F) -> Result<R, E>
    where
        F: FnOnce(&mut ActiveSpan) -> Result<R, E>,
        E: std::fmt::Display,
    {
        let mut active = self.start_span(Span::new(name, kind));
        let result = f(&mut active);
        let status = match &result {
            Ok(_) => active.status,
            Err(e) => {
                active.error = Some(e.to_string());
                SpanStatus::Error
            }
        };
        self.end_span(active, status);
        result
    }

    /// Await `fut` inside `span`. An `Err` marks the span as failed.
    pub async fn span_async<R, E, Fut>(&self, span: Span, fut: Fut) -> Result<R, E>
    where
        Fut: Future<Output = Result<R, E>>,
        E: std::fmt::Display,
    {
        let mut active = self.start_span(span);
        let result = fut.await;
        let status = match &result {
            Ok(_) => SpanStatus::Ok,
            Err(e) => {
                active.error = Some(e.to_string());
                SpanStatus::Error
            }
        };
        self.end_span(active, status);
        result
    }

    /// Attach an already finished span under the current active span.
    /// Returns false when the span limit has been reached.
    pub fn record_span(&self, mut span: Span) -> bool {
        let mut state = self.lock();
        if state.spans.len() >= MAX_SPANS_PER_TRACE {
            return false;
        }
        if span.parent_span_id.is_none() {
            span.parent_span_id = state.active.last().cloned();
        }
        state.spans.push(span);
        true
    }

    /// Record a completed tool call as a zero-length `tool` span.
    pub fn record_tool(&self, name: impl Into<String>) {
        let active = self.start_span(Span::new(name, SpanKind::Tool));
        self.end_span(active, SpanStatus::Ok);
    }

    /// Snapshot of all recorded spans, in start order.
    pub fn spans(&self) -> Vec<Span> {
        self.lock().spans.clone()
    }

    /// Names of recorded `tool` spans, de-duplicated, first occurrence order.
    pub fn tool_names(&self) -> Vec<String> {
        let state = self.lock();
        let mut names: Vec<String> = Vec::new();
        for span in state.spans.iter().filter(|s| s.span_type == SpanKind::Tool) {
            if !names.contains(&span.name) {
                names.push(span.name.clone());
            }
        }
        names
    }

    pub fn len(&self) -> usize {
        self.lock().spans.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for TraceContext {
    fn default() -> Self {
        Self::new(Arc::new(PricingTable::with_defaults()))
    }
}

impl std::fmt::Debug for TraceContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.lock();
        f.debug_struct("TraceContext")
            .field("spans", &state.spans.len())
            .field("active", &state.active.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nested_spans_get_parents() {
        let trace = TraceContext::default();
        let root = trace.start_span(Span::new("agent", SpanKind::Chain));
        let root_id = root.id().to_string();

        let child = trace.start_span(Span::new("lookup", SpanKind::Retrieval));
        let child_id = child.id().to_string();
        let grandchild = trace.start_span(Span::new("db", SpanKind::Tool));
        assert_eq!(grandchild.parent_span_id.as_deref(), Some(child_id.as_str()));

        trace.end_span(grandchild, SpanStatus::Ok);
        trace.end_span(child, SpanStatus::Ok);

        let sibling = trace.start_span(Span::new("answer", SpanKind::Llm));
        assert_eq!(sibling.parent_span_id.as_deref(), Some(root_id.as_str()));
        trace.end_span(sibling, SpanStatus::Ok);
        trace.end_span(root, SpanStatus::Ok);

        let spans = trace.spans();
        assert_eq!(spans.len(), 4);
        assert!(spans[0].parent_span_id.is_none());
        assert!(spans.iter().all(|s| s.is_ended()));
    }

    #[test]
    fn span_limit_returns_detached_spans() {
        let trace = TraceContext::default();
        for i in 0..MAX_SPANS_PER_TRACE {
            trace.record_tool(format!("tool-{i}"));
        }
        let extra = trace.start_span(Span::new("overflow", SpanKind::Custom));
        assert!(!extra.is_recorded());
        let finished = trace.end_span(extra, SpanStatus::Ok);
        assert!(finished.is_ended());
        assert_eq!(trace.len(), MAX_SPANS_PER_TRACE);
    }

    #[test]
    fn duration_ignores_wall_clock_steps() {
        let trace = TraceContext::default();
        let mut span = Span::new("skewed", SpanKind::Tool);
        // Wall clock stepped back an hour after the span was stamped.
        span.started_at += chrono::Duration::hours(1);
        let active = trace.start_span(span);
        std::thread::sleep(std::time::Duration::from_millis(5));
        let finished = trace.end_span(active, SpanStatus::Ok);

        assert!(finished.duration_ms >= 5);
        assert!(finished.duration_ms < 60_000);
        let ended = finished.ended_at.unwrap();
        assert!(ended >= finished.started_at);
        assert_eq!(
            (ended - finished.started_at).num_milliseconds() as u64,
            finished.duration_ms
        );
    }

    #[test]
    fn closure_error_marks_span_failed() {
        let trace = TraceContext::default();
        let result: Result<(), String> =
            trace.span("flaky", SpanKind::Tool, |_| Err("boom".to_string()));
        assert!(result.is_err());

        let spans = trace.spans();
        assert_eq!(spans[0].status, SpanStatus::Error);
        assert_eq!(spans[0].error.as_deref(), Some("boom"));
    }

    #[test]
    fn llm_span_is_priced() {
        let trace = TraceContext::default();
        let out: Result<&str, String> = trace.span("call", SpanKind::Llm, |s| {
            s.model_id = Some("anthropic.claude-3-sonnet".into());
            s.input_tokens = 1000;
            s.output_tokens = 500;
            s.set_output("hello");
            Ok("hello")
        });
        assert_eq!(out.unwrap(), "hello");

        let span = &trace.spans()[0];
        assert!((span.estimated_cost_usd - 0.0105).abs() < 1e-10);
        assert_eq!(span.output.as_deref(), Some("hello"));
    }

    #[test]
    fn long_input_truncated() {
        let trace = TraceContext::default();
        let active = trace.start_span(Span::new("big", SpanKind::Custom).with_input("x".repeat(5000)));
        let span = trace.end_span(active, SpanStatus::Ok);
        let input = span.input.unwrap();
        assert_eq!(input.chars().count(), invokelens_core::span::MAX_IO_LENGTH);
        assert!(input.ends_with("...[truncated]"));
    }

    #[test]
    fn tool_names_deduplicated_in_order() {
        let trace = TraceContext::default();
        trace.record_tool("search");
        trace.record_tool("calculator");
        trace.record_tool("search");
        assert_eq!(trace.tool_names(), vec!["search", "calculator"]);
    }

    #[tokio::test]
    async fn async_span_records_error() {
        let trace = TraceContext::default();
        let clone = trace.clone();
        let result: Result<u32, String> = clone
            .span_async(Span::new("fetch", SpanKind::Retrieval), async {
                Err("not found".to_string())
            })
            .await;
        assert!(result.is_err());
        assert_eq!(trace.spans()[0].status, SpanStatus::Error);
    }
}
