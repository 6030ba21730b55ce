//! The telemetry event emitted for every observed invocation, and the
//! batch that carries events to a transport.
//!
//! An [`Event`] is immutable once built: its fields are private and the
//! only way to obtain one is [`EventBuilder::build`], which enforces the
//! validation rules. Ownership of the finished event moves into the queue.

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::EventError;
use crate::prompt::PromptFingerprint;
use crate::span::Span;

/// Schema version carried by every event.
pub const EVENT_VERSION: &str = "1.0";

/// Longest error message kept on an event, in characters.
pub const MAX_ERROR_MESSAGE_CHARS: usize = 500;

/// Longest prompt summary kept on an event, in characters.
pub const MAX_PROMPT_SUMMARY_CHARS: usize = 500;

/// Region reported when none is configured.
pub const DEFAULT_REGION: &str = "us-east-1";

/// Terminal status of an invocation.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "UPPERCASE")]
pub enum Status {
    #[default]
    Success,
    Failure,
    Timeout,
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Success => write!(f, "SUCCESS"),
            Self::Failure => write!(f, "FAILURE"),
            Self::Timeout => write!(f, "TIMEOUT"),
        }
    }
}

/// Event type, derived from the status.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum EventType {
    #[serde(rename = "invocation.completed")]
    Completed,
    #[serde(rename = "invocation.failed")]
    Failed,
}

impl From<Status> for EventType {
    fn from(status: Status) -> Self {
        match status {
            Status::Success => Self::Completed,
            Status::Failure | Status::Timeout => Self::Failed,
        }
    }
}

/// One immutable telemetry record for a single instrumented invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    event_id: String,
    event_type: EventType,
    event_version: String,
    timestamp: DateTime<Utc>,

    // Identity
    invocation_id: String,
    agent_id: String,
    agent_name: Option<String>,
    session_id: Option<String>,
    user_id: Option<String>,

    // Model
    model_id: Option<String>,
    region: String,

    // Timing
    started_at: DateTime<Utc>,
    ended_at: DateTime<Utc>,
    duration_ms: u64,

    // Usage
    input_tokens: u64,
    output_tokens: u64,
    estimated_cost_usd: Option<f64>,

    // Outcome
    status: Status,
    error_type: Option<String>,
    error_message: Option<String>,

    tool_calls: Vec<String>,

    // Prompt drift detection
    prompt_summary: Option<String>,
    prompt_fingerprint: Option<PromptFingerprint>,

    spans: Vec<Span>,
    tags: BTreeMap<String, String>,
    sdk_version: String,
}

impl Event {
    /// Start building an event for the given agent.
    pub fn builder(agent_id: impl Into<String>) -> EventBuilder {
        EventBuilder::new(agent_id)
    }

    pub fn event_id(&self) -> &str {
        &self.event_id
    }

    pub fn event_type(&self) -> EventType {
        self.event_type
    }

    pub fn event_version(&self) -> &str {
        &self.event_version
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn invocation_id(&self) -> &str {
        &self.invocation_id
    }

    pub fn agent_id(&self) -> &str {
        &self.agent_id
    }

    pub fn agent_name(&self) -> Option<&str> {
        self.agent_name.as_deref()
    }

    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    pub fn user_id(&self) -> Option<&str> {
        self.user_id.as_deref()
    }

    pub fn model_id(&self) -> Option<&str> {
        self.model_id.as_deref()
    }

    pub fn region(&self) -> &str {
        &self.region
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn ended_at(&self) -> DateTime<Utc> {
        self.ended_at
    }

    pub fn duration_ms(&self) -> u64 {
        self.duration_ms
    }

    pub fn input_tokens(&self) -> u64 {
        self.input_tokens
    }

    pub fn output_tokens(&self) -> u64 {
        self.output_tokens
    }

    pub fn estimated_cost_usd(&self) -> Option<f64> {
        self.estimated_cost_usd
    }

    pub fn status(&self) -> Status {
        self.status
    }

    pub fn is_success(&self) -> bool {
        self.status == Status::Success
    }

    pub fn error_type(&self) -> Option<&str> {
        self.error_type.as_deref()
    }

    pub fn error_message(&self) -> Option<&str> {
        self.error_message.as_deref()
    }

    pub fn tool_calls(&self) -> &[String] {
        &self.tool_calls
    }

    pub fn prompt_summary(&self) -> Option<&str> {
        self.prompt_summary.as_deref()
    }

    pub fn prompt_fingerprint(&self) -> Option<&PromptFingerprint> {
        self.prompt_fingerprint.as_ref()
    }

    pub fn spans(&self) -> &[Span] {
        &self.spans
    }

    pub fn tags(&self) -> &BTreeMap<String, String> {
        &self.tags
    }

    pub fn sdk_version(&self) -> &str {
        &self.sdk_version
    }
}

/// Builder for [`Event`].
#[derive(Debug, Clone)]
pub struct EventBuilder {
    agent_id: String,
    agent_name: Option<String>,
    session_id: Option<String>,
    user_id: Option<String>,
    model_id: Option<String>,
    region: String,
    started_at: DateTime<Utc>,
    duration: Duration,
    input_tokens: u64,
    output_tokens: u64,
    estimated_cost_usd: Option<f64>,
    status: Status,
    error_type: Option<String>,
    error_message: Option<String>,
    tool_calls: Vec<String>,
    prompt_summary: Option<String>,
    prompt_fingerprint: Option<PromptFingerprint>,
    spans: Vec<Span>,
    tags: BTreeMap<String, String>,
    sdk_version: String,
}

impl EventBuilder {
    pub fn new(agent_id: impl Into<String>) -> Self {
        Self {
            agent_id: agent_id.into(),
            agent_name: None,
            session_id: None,
            user_id: None,
            model_id: None,
            region: DEFAULT_REGION.to_string(),
            started_at: Utc::now(),
            duration: Duration::ZERO,
            input_tokens: 0,
            output_tokens: 0,
            estimated_cost_usd: None,
            status: Status::Success,
            error_type: None,
            error_message: None,
            tool_calls: Vec::new(),
            prompt_summary: None,
            prompt_fingerprint: None,
            spans: Vec::new(),
            tags: BTreeMap::new(),
            sdk_version: String::new(),
        }
    }

    pub fn agent_name(mut self, name: Option<String>) -> Self {
        self.agent_name = name;
        self
    }

    pub fn session_id(mut self, session_id: Option<String>) -> Self {
        self.session_id = session_id;
        self
    }

    pub fn user_id(mut self, user_id: Option<String>) -> Self {
        self.user_id = user_id;
        self
    }

    pub fn model_id(mut self, model_id: Option<String>) -> Self {
        self.model_id = model_id;
        self
    }

    pub fn region(mut self, region: impl Into<String>) -> Self {
        self.region = region.into();
        self
    }

    /// Wall-clock start plus the duration measured on a monotonic clock.
    ///
    /// `ended_at` is derived as `started_at + duration`, so it can never
    /// precede `started_at` even if the wall clock jumps backwards.
    pub fn timing(mut self, started_at: DateTime<Utc>, duration: Duration) -> Self {
        self.started_at = started_at;
        self.duration = duration;
        self
    }

    pub fn tokens(mut self, input_tokens: u64, output_tokens: u64) -> Self {
        self.input_tokens = input_tokens;
        self.output_tokens = output_tokens;
        self
    }

    pub fn estimated_cost(mut self, cost_usd: Option<f64>) -> Self {
        self.estimated_cost_usd = cost_usd;
        self
    }

    pub fn status(mut self, status: Status) -> Self {
        self.status = status;
        self
    }

    /// Record the error that ended the invocation. Ignored for SUCCESS.
    pub fn error(mut self, error_type: impl Into<String>, message: impl AsRef<str>) -> Self {
        self.error_type = Some(error_type.into());
        self.error_message = Some(truncate_chars(message.as_ref(), MAX_ERROR_MESSAGE_CHARS));
        self
    }

    pub fn tool_calls(mut self, tool_calls: Vec<String>) -> Self {
        self.tool_calls = tool_calls;
        self
    }

    /// Attach the prompt summary (truncated) and its fingerprint.
    pub fn prompt(mut self, prompt: &str, fingerprint: Option<PromptFingerprint>) -> Self {
        self.prompt_summary = Some(truncate_chars(prompt, MAX_PROMPT_SUMMARY_CHARS));
        self.prompt_fingerprint = fingerprint;
        self
    }

    pub fn spans(mut self, spans: Vec<Span>) -> Self {
        self.spans = spans;
        self
    }

    /// Add one tag. A later value for the same key replaces the earlier one.
    pub fn tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    pub fn tags(mut self, tags: impl IntoIterator<Item = (String, String)>) -> Self {
        self.tags.extend(tags);
        self
    }

    pub fn sdk_version(mut self, version: impl Into<String>) -> Self {
        self.sdk_version = version.into();
        self
    }

    /// Validate and produce the immutable event.
    pub fn build(self) -> Result<Event, EventError> {
        let agent_id = self.agent_id.trim().to_string();
        if agent_id.is_empty() {
            return Err(EventError::EmptyAgentId);
        }

        if let Some(cost) = self.estimated_cost_usd
            && (!cost.is_finite() || cost < 0.0)
        {
            return Err(EventError::InvalidCost(cost));
        }

        let (error_type, error_message) = match self.status {
            Status::Success => (None, None),
            Status::Failure | Status::Timeout => (
                Some(self.error_type.unwrap_or_else(|| "UnknownError".to_string())),
                self.error_message,
            ),
        };

        let duration =
            chrono::Duration::from_std(self.duration).unwrap_or_else(|_| chrono::Duration::zero());
        let ended_at = self
            .started_at
            .checked_add_signed(duration)
            .unwrap_or(self.started_at);

        Ok(Event {
            event_id: Uuid::new_v4().to_string(),
            event_type: self.status.into(),
            event_version: EVENT_VERSION.to_string(),
            timestamp: Utc::now(),
            invocation_id: Uuid::new_v4().to_string(),
            agent_id,
            agent_name: self.agent_name,
            session_id: self.session_id,
            user_id: self.user_id,
            model_id: self.model_id,
            region: self.region,
            started_at: self.started_at,
            ended_at,
            duration_ms: self.duration.as_millis().min(u64::MAX as u128) as u64,
            input_tokens: self.input_tokens,
            output_tokens: self.output_tokens,
            estimated_cost_usd: self.estimated_cost_usd,
            status: self.status,
            error_type,
            error_message,
            tool_calls: self.tool_calls,
            prompt_summary: self.prompt_summary,
            prompt_fingerprint: self.prompt_fingerprint,
            spans: self.spans,
            tags: self.tags,
            sdk_version: self.sdk_version,
        })
    }
}

/// Keep at most `max` characters of `value`.
pub fn truncate_chars(value: &str, max: usize) -> String {
    match value.char_indices().nth(max) {
        Some((idx, _)) => value[..idx].to_string(),
        None => value.to_string(),
    }
}

// ── Batch ─────────────────────────────────────────────────────────────────

/// An ordered group of events sent together in one transport operation.
///
/// Serializes to the ingest wire format: `{"events": [...]}`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Batch {
    events: Vec<Event>,
}

impl Batch {
    pub fn new(events: Vec<Event>) -> Self {
        Self { events }
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn events(&self) -> &[Event] {
        &self.events
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Event> {
        self.events.iter()
    }

    pub fn into_events(self) -> Vec<Event> {
        self.events
    }
}

impl From<Vec<Event>> for Batch {
    fn from(events: Vec<Event>) -> Self {
        Self::new(events)
    }
}

impl<'a> IntoIterator for &'a Batch {
    type Item = &'a Event;
    type IntoIter = std::slice::Iter<'a, Event>;

    fn into_iter(self) -> Self::IntoIter {
        self.events.iter()
    }
}
