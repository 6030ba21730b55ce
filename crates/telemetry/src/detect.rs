//! Usage detection from Bedrock response payloads.
//!
//! The wrapper serialises the wrapped call's `Ok` value to JSON and asks a
//! [`DetectorChain`] what it can find: token counts, the model that served
//! the call, tool invocations and agent trace steps. Detectors are tried in
//! order and the first one that recognises the shape wins. A payload no
//! detector recognises simply yields nothing.

use invokelens_core::{Span, SpanKind, SpanStatus};
use serde_json::Value;

/// What a detector extracted from a response.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Detected {
    pub model_id: Option<String>,
    pub input_tokens: u64,
    pub output_tokens: u64,
    /// Tool / action group names, in call order.
    pub tool_calls: Vec<String>,
    /// Finished spans reconstructed from an agent trace.
    pub spans: Vec<Span>,
}

/// A strategy for one known response shape.
pub trait UsageDetector: Send + Sync {
    fn name(&self) -> &'static str;

    /// Return `None` when the payload is not this detector's shape.
    fn detect(&self, response: &Value) -> Option<Detected>;
}

// ── Helpers ────────────────────────────────────────────────────────────

fn u64_field(obj: &Value, keys: &[&str]) -> u64 {
    keys.iter()
        .find_map(|k| obj.get(*k).and_then(Value::as_u64))
        .unwrap_or(0)
}

fn str_field(obj: &Value, keys: &[&str]) -> Option<String> {
    keys.iter()
        .find_map(|k| obj.get(*k).and_then(Value::as_str))
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// Iterate a field that may be a single object or a list of objects.
fn one_or_many(value: Option<&Value>) -> Vec<&Value> {
    match value {
        Some(Value::Array(items)) => items.iter().filter(|v| v.is_object()).collect(),
        Some(v @ Value::Object(_)) => vec![v],
        _ => Vec::new(),
    }
}

fn non_empty_object(value: Option<&Value>) -> Option<&Value> {
    value.filter(|v| v.as_object().is_some_and(|o| !o.is_empty()))
}

fn model_from_top_level(response: &Value) -> Option<String> {
    str_field(response, &["modelId", "model_id", "model"])
}

// ── InvokeModel ────────────────────────────────────────────────────────

/// `InvokeModel` bodies: top-level `usage` with camel or snake case keys.
pub struct InvokeModelDetector;

impl UsageDetector for InvokeModelDetector {
    fn name(&self) -> &'static str {
        "invoke_model"
    }

    fn detect(&self, response: &Value) -> Option<Detected> {
        // Converse responses also carry `usage`; leave them to ConverseDetector.
        if response.pointer("/output/message").is_some() {
            return None;
        }
        let usage = non_empty_object(response.get("usage"))?;
        Some(Detected {
            model_id: model_from_top_level(response),
            input_tokens: u64_field(usage, &["inputTokens", "input_tokens"]),
            output_tokens: u64_field(usage, &["outputTokens", "output_tokens"]),
            ..Detected::default()
        })
    }
}

// ── Converse ───────────────────────────────────────────────────────────

/// `Converse` responses: `usage` plus `toolUse` blocks in the output message.
pub struct ConverseDetector;

impl UsageDetector for ConverseDetector {
    fn name(&self) -> &'static str {
        "converse"
    }

    fn detect(&self, response: &Value) -> Option<Detected> {
        let message = response.pointer("/output/message")?;

        let tool_calls = message
            .get("content")
            .and_then(Value::as_array)
            .map(|blocks| {
                blocks
                    .iter()
                    .filter_map(|b| b.pointer("/toolUse/name").and_then(Value::as_str))
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        let usage = response.get("usage").cloned().unwrap_or(Value::Null);
        Some(Detected {
            model_id: model_from_top_level(response),
            input_tokens: u64_field(&usage, &["inputTokens", "input_tokens"]),
            output_tokens: u64_field(&usage, &["outputTokens", "output_tokens"]),
            tool_calls,
            spans: Vec::new(),
        })
    }
}

// ── ResponseMetadata ───────────────────────────────────────────────────

/// Raw service responses that report usage under `ResponseMetadata`.
pub struct ResponseMetadataDetector;

impl UsageDetector for ResponseMetadataDetector {
    fn name(&self) -> &'static str {
        "response_metadata"
    }

    fn detect(&self, response: &Value) -> Option<Detected> {
        let usage = non_empty_object(response.pointer("/ResponseMetadata/usage"))?;
        Some(Detected {
            model_id: model_from_top_level(response),
            input_tokens: u64_field(usage, &["inputTokens", "input_tokens"]),
            output_tokens: u64_field(usage, &["outputTokens", "output_tokens"]),
            ..Detected::default()
        })
    }
}

// ── InvokeAgent trace ──────────────────────────────────────────────────

/// `InvokeAgent` responses with `trace.orchestrationTrace` enabled.
pub struct AgentTraceDetector;

impl UsageDetector for AgentTraceDetector {
    fn name(&self) -> &'static str {
        "agent_trace"
    }

    fn detect(&self, response: &Value) -> Option<Detected> {
        let orchestration = non_empty_object(response.pointer("/trace/orchestrationTrace"))?;
        let mut detected = Detected {
            model_id: model_from_top_level(response),
            ..Detected::default()
        };

        for step in one_or_many(orchestration.get("modelInvocationInput")) {
            let name = str_field(step, &["type"]).unwrap_or_else(|| "llm_call".into());
            let mut span = Span::new(name, SpanKind::Llm);
            if let Some(text) = str_field(step, &["text"]) {
                span = span.with_input(text);
            }
            if let Some(model) = str_field(step, &["foundationModel"]) {
                if detected.model_id.is_none() {
                    detected.model_id = Some(model.clone());
                }
                span = span.with_model(model);
            }
            if let Some(content) = step.pointer("/rawResponse/content").and_then(Value::as_str) {
                span.set_output(content);
            }
            span.end(SpanStatus::Ok);
            detected.spans.push(span);
        }

        for invocation in one_or_many(orchestration.get("invocationInput")) {
            let Some(action) = non_empty_object(invocation.get("actionGroupInvocationInput"))
            else {
                continue;
            };
            let name =
                str_field(action, &["actionGroupName"]).unwrap_or_else(|| "action_group".into());
            let mut span = Span::new(name.clone(), SpanKind::Tool);
            if let Some(path) = str_field(action, &["apiPath"]) {
                span = span.with_input(path);
            }
            if let Some(verb) = str_field(action, &["verb"]) {
                span.set_output(verb);
            }
            span.end(SpanStatus::Ok);
            detected.spans.push(span);
            if !detected.tool_calls.contains(&name) {
                detected.tool_calls.push(name);
            }
        }

        let usage = orchestration.pointer("/modelInvocationOutput/metadata/usage");
        if let Some(usage) = non_empty_object(usage) {
            detected.input_tokens = u64_field(usage, &["inputTokens", "input_tokens"]);
            detected.output_tokens = u64_field(usage, &["outputTokens", "output_tokens"]);
        }

        Some(detected)
    }
}

// ── Chain ──────────────────────────────────────────────────────────────

/// Ordered list of detectors; first match wins.
pub struct DetectorChain {
    detectors: Vec<Box<dyn UsageDetector>>,
}

impl DetectorChain {
    pub fn new(detectors: Vec<Box<dyn UsageDetector>>) -> Self {
        Self { detectors }
    }

    /// Append a detector after the existing ones.
    pub fn push(&mut self, detector: Box<dyn UsageDetector>) {
        self.detectors.push(detector);
    }

    pub fn detect(&self, response: &Value) -> Option<Detected> {
        if !response.is_object() {
            return None;
        }
        self.detectors.iter().find_map(|d| {
            let found = d.detect(response);
            if found.is_some() {
                tracing::trace!(detector = d.name(), "Response shape recognised");
            }
            found
        })
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.detectors.iter().map(|d| d.name()).collect()
    }
}

impl Default for DetectorChain {
    fn default() -> Self {
        Self::new(vec![
            Box::new(InvokeModelDetector),
            Box::new(ConverseDetector),
            Box::new(ResponseMetadataDetector),
            Box::new(AgentTraceDetector),
        ])
    }
}

impl std::fmt::Debug for DetectorChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.names()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn invoke_model_camel_case() {
        let response = json!({
            "modelId": "anthropic.claude-3-haiku-20240307-v1:0",
            "usage": {"inputTokens": 120, "outputTokens": 45}
        });
        let d = DetectorChain::default().detect(&response).unwrap();
        assert_eq!(d.input_tokens, 120);
        assert_eq!(d.output_tokens, 45);
        assert_eq!(
            d.model_id.as_deref(),
            Some("anthropic.claude-3-haiku-20240307-v1:0")
        );
    }

    #[test]
    fn invoke_model_snake_case() {
        let response = json!({
            "model": "claude-3",
            "usage": {"input_tokens": 7, "output_tokens": 3}
        });
        let d = InvokeModelDetector.detect(&response).unwrap();
        assert_eq!((d.input_tokens, d.output_tokens), (7, 3));
        assert_eq!(d.model_id.as_deref(), Some("claude-3"));
    }

    #[test]
    fn converse_collects_tool_use() {
        let response = json!({
            "output": {"message": {"role": "assistant", "content": [
                {"text": "Let me check."},
                {"toolUse": {"toolUseId": "t1", "name": "get_weather", "input": {}}},
                {"toolUse": {"toolUseId": "t2", "name": "get_time", "input": {}}}
            ]}},
            "usage": {"inputTokens": 50, "outputTokens": 20, "totalTokens": 70},
            "stopReason": "tool_use"
        });
        let chain = DetectorChain::default();
        let d = chain.detect(&response).unwrap();
        assert_eq!(d.tool_calls, vec!["get_weather", "get_time"]);
        assert_eq!(d.input_tokens, 50);
    }

    #[test]
    fn response_metadata_usage() {
        let response = json!({
            "ResponseMetadata": {"HTTPStatusCode": 200, "usage": {"inputTokens": 9, "outputTokens": 4}}
        });
        let d = DetectorChain::default().detect(&response).unwrap();
        assert_eq!((d.input_tokens, d.output_tokens), (9, 4));
        assert!(d.model_id.is_none());
    }

    #[test]
    fn agent_trace_builds_spans_and_tools() {
        let response = json!({
            "completion": "done",
            "trace": {"orchestrationTrace": {
                "modelInvocationInput": [{
                    "type": "ORCHESTRATION",
                    "text": "plan the answer",
                    "foundationModel": "anthropic.claude-3-sonnet-20240229-v1:0"
                }],
                "invocationInput": [
                    {"actionGroupInvocationInput": {"actionGroupName": "orders", "apiPath": "/orders/{id}", "verb": "get"}},
                    {"knowledgeBaseLookupInput": {"text": "refunds"}}
                ]
            }}
        });
        let d = DetectorChain::default().detect(&response).unwrap();
        assert_eq!(d.tool_calls, vec!["orders"]);
        assert_eq!(
            d.model_id.as_deref(),
            Some("anthropic.claude-3-sonnet-20240229-v1:0")
        );
        assert_eq!(d.spans.len(), 2);
        assert_eq!(d.spans[0].span_type, SpanKind::Llm);
        assert_eq!(d.spans[0].name, "ORCHESTRATION");
        assert_eq!(d.spans[1].span_type, SpanKind::Tool);
        assert_eq!(d.spans[1].input.as_deref(), Some("/orders/{id}"));
        assert!(d.spans.iter().all(|s| s.is_ended()));
    }

    #[test]
    fn unknown_shapes_yield_nothing() {
        let chain = DetectorChain::default();
        assert!(chain.detect(&json!({"answer": 42})).is_none());
        assert!(chain.detect(&json!("plain string")).is_none());
        assert!(chain.detect(&json!({"usage": {}})).is_none());
        assert!(chain.detect(&Value::Null).is_none());
    }

    #[test]
    fn default_order() {
        assert_eq!(
            DetectorChain::default().names(),
            vec!["invoke_model", "converse", "response_metadata", "agent_trace"]
        );
    }
}
