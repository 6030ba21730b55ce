//! Spans: timed steps recorded inside a single agent invocation.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Longest span input/output kept, in characters.
pub const MAX_IO_LENGTH: usize = 2000;

const TRUNCATION_SUFFIX: &str = "...[truncated]";

/// The kind of work a span represents.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SpanKind {
    /// A model call.
    Llm,
    /// A tool / action group execution.
    Tool,
    /// The whole invocation (root span).
    Chain,
    /// A knowledge base lookup.
    Retrieval,
    /// A guardrail evaluation.
    Guardrail,
    /// Anything else.
    #[default]
    Custom,
}

impl std::fmt::Display for SpanKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Llm => write!(f, "llm"),
            Self::Tool => write!(f, "tool"),
            Self::Chain => write!(f, "chain"),
            Self::Retrieval => write!(f, "retrieval"),
            Self::Guardrail => write!(f, "guardrail"),
            Self::Custom => write!(f, "custom"),
        }
    }
}

/// Outcome of a span.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum SpanStatus {
    #[default]
    Ok,
    Error,
}

/// A single traced step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Span {
    /// Unique identifier.
    pub span_id: String,
    /// Parent span id (None for root spans).
    pub parent_span_id: Option<String>,
    /// What kind of work this represents.
    pub span_type: SpanKind,
    /// Human-readable label (tool name, model step, ...).
    pub name: String,
    /// When the span started.
    pub started_at: DateTime<Utc>,
    /// When the span ended (None while running).
    pub ended_at: Option<DateTime<Utc>>,
    /// Duration in milliseconds (computed on end).
    pub duration_ms: u64,
    /// Truncated input.
    pub input: Option<String>,
    /// Truncated output.
    pub output: Option<String>,
    pub status: SpanStatus,
    pub error: Option<String>,
    pub model_id: Option<String>,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub estimated_cost_usd: f64,
}

impl Span {
    /// Create a new running span.
    pub fn new(name: impl Into<String>, span_type: SpanKind) -> Self {
        Self {
            span_id: Uuid::new_v4().to_string(),
            parent_span_id: None,
            span_type,
            name: name.into(),
            started_at: Utc::now(),
            ended_at: None,
            duration_ms: 0,
            input: None,
            output: None,
            status: SpanStatus::Ok,
            error: None,
            model_id: None,
            input_tokens: 0,
            output_tokens: 0,
            estimated_cost_usd: 0.0,
        }
    }

    /// Set the parent span.
    pub fn with_parent(mut self, parent_id: impl Into<String>) -> Self {
        self.parent_span_id = Some(parent_id.into());
        self
    }

    /// Attach (truncated) input.
    pub fn with_input(mut self, input: impl AsRef<str>) -> Self {
        self.input = Some(truncate_io(input.as_ref(), MAX_IO_LENGTH));
        self
    }

    pub fn with_model(mut self, model_id: impl Into<String>) -> Self {
        self.model_id = Some(model_id.into());
        self
    }

    /// Set (truncated) output.
    pub fn set_output(&mut self, output: impl AsRef<str>) {
        self.output = Some(truncate_io(output.as_ref(), MAX_IO_LENGTH));
    }

    /// Mark the span as ended now, timed from the wall clock.
    pub fn end(&mut self, status: SpanStatus) {
        let elapsed = Utc::now()
            .signed_duration_since(self.started_at)
            .to_std()
            .unwrap_or_default();
        self.end_after(status, elapsed);
    }

    /// Mark the span as ended `elapsed` after it started, as measured on a
    /// monotonic clock. `ended_at` is derived from it and never precedes
    /// `started_at`.
    pub fn end_after(&mut self, status: SpanStatus, elapsed: Duration) {
        let delta =
            chrono::Duration::from_std(elapsed).unwrap_or_else(|_| chrono::Duration::zero());
        self.ended_at = Some(
            self.started_at
                .checked_add_signed(delta)
                .unwrap_or(self.started_at),
        );
        self.duration_ms = elapsed.as_millis().min(u64::MAX as u128) as u64;
        self.status = status;
    }

    pub fn is_ended(&self) -> bool {
        self.ended_at.is_some()
    }

    /// Total tokens (input + output).
    pub fn total_tokens(&self) -> u64 {
        self.input_tokens + self.output_tokens
    }
}

/// Truncate `value` to at most `max_len` characters, ending with
/// `...[truncated]` when anything was cut.
pub fn truncate_io(value: &str, max_len: usize) -> String {
    if value.chars().count() <= max_len {
        return value.to_string();
    }
    let suffix_len = TRUNCATION_SUFFIX.chars().count();
    if max_len <= suffix_len {
        return value.chars().take(max_len).collect();
    }
    let mut out: String = value.chars().take(max_len - suffix_len).collect();
    out.push_str(TRUNCATION_SUFFIX);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn span_defaults() {
        let span = Span::new("test-span", SpanKind::Custom);
        assert_eq!(span.name, "test-span");
        assert_eq!(span.span_type, SpanKind::Custom);
        assert_eq!(span.status, SpanStatus::Ok);
        assert!(span.parent_span_id.is_none());
        assert_eq!(span.duration_ms, 0);
        assert_eq!(span.total_tokens(), 0);
        assert!(!span.span_id.is_empty());
    }

    #[test]
    fn span_lifecycle() {
        let parent = Span::new("root", SpanKind::Chain);
        let mut child = Span::new("search", SpanKind::Tool).with_parent(&parent.span_id);
        assert_eq!(child.parent_span_id.as_deref(), Some(parent.span_id.as_str()));

        child.set_output("found it");
        child.end(SpanStatus::Ok);
        assert!(child.is_ended());
        assert_eq!(child.output.as_deref(), Some("found it"));
    }

    #[test]
    fn end_after_uses_measured_duration() {
        let mut span = Span::new("slow", SpanKind::Llm);
        span.end_after(SpanStatus::Error, Duration::from_millis(1500));
        assert_eq!(span.duration_ms, 1500);
        assert_eq!(span.status, SpanStatus::Error);
        let ended = span.ended_at.unwrap();
        assert_eq!((ended - span.started_at).num_milliseconds(), 1500);
    }

    #[test]
    fn spans_compare_by_value() {
        let span = Span::new("a", SpanKind::Tool);
        assert_eq!(span, span.clone());
        assert_ne!(span, Span::new("a", SpanKind::Tool));
    }

    #[test]
    fn truncate_short_and_exact() {
        assert_eq!(truncate_io("hello", MAX_IO_LENGTH), "hello");
        let exact = "x".repeat(MAX_IO_LENGTH);
        assert_eq!(truncate_io(&exact, MAX_IO_LENGTH), exact);
    }

    #[test]
    fn truncate_long_string() {
        let long = "x".repeat(MAX_IO_LENGTH + 100);
        let result = truncate_io(&long, MAX_IO_LENGTH);
        assert_eq!(result.chars().count(), MAX_IO_LENGTH);
        assert!(result.ends_with("...[truncated]"));
    }

    #[test]
    fn truncate_is_char_boundary_safe() {
        let s = "é".repeat(60);
        let result = truncate_io(&s, 50);
        assert_eq!(result.chars().count(), 50);
    }

    #[test]
    fn span_serializes_snake_case_kind() {
        let span = Span::new("llm-call", SpanKind::Llm).with_model("claude-3");
        let json = serde_json::to_value(&span).unwrap();
        assert_eq!(json["span_type"], "llm");
        assert_eq!(json["status"], "OK");
        assert_eq!(json["model_id"], "claude-3");
    }
}
