//! Observe a (simulated) Bedrock agent and print what gets published.
//!
//! With `INVOKELENS_API_KEY` set, events go to the configured ingest
//! endpoint. Without it, the demo publishes to an in-process bus and prints
//! each entry.
//!
//! ```sh
//! RUST_LOG=invokelens=debug cargo run -p invokelens --example observe_bedrock
//! ```

use std::time::Duration;

use anyhow::Context;
use invokelens::{Client, SdkConfig, Span, SpanKind, estimate_cost};
use serde_json::{Value, json};
use tracing_subscriber::EnvFilter;

/// Stand-in for `bedrock_runtime.invoke_model`.
async fn invoke_model(prompt: &str) -> anyhow::Result<Value> {
    tokio::time::sleep(Duration::from_millis(40)).await;
    if prompt.contains("fail") {
        anyhow::bail!("ValidationException: malformed input");
    }
    Ok(json!({
        "modelId": "anthropic.claude-3-haiku-20240307-v1:0",
        "content": [{"type": "text", "text": format!("echo: {prompt}")}],
        "usage": {"inputTokens": 42 + prompt.len(), "outputTokens": 17}
    }))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("invokelens=info")),
        )
        .with_target(false)
        .init();

    let config = match SdkConfig::from_env() {
        Ok(config) => config,
        Err(_) => SdkConfig::new("local-demo")
            .with_event_bus("invokelens-bus")
            .with_flush_interval(1.0),
    };
    let client = Client::new(config).context("invalid InvokeLens configuration")?;

    if let Some(bus) = client.broadcast_bus() {
        let mut rx = bus.subscribe();
        tokio::spawn(async move {
            while let Ok(entry) = rx.recv().await {
                println!("[{}] {}", entry.detail_type, entry.detail);
            }
        });
    }

    client.start()?;

    let observer = client
        .observe("demo-agent")
        .agent_name("Demo Agent")
        .tag("env", "local")
        .build()?;

    for prompt in ["hello there", "please fail", "summarize {doc}"] {
        let result = observer
            .invocation()
            .session_id("session-1")
            .prompt(prompt)
            .invoke_traced(|trace| async move {
                trace.record_tool("retrieve_context");
                let span = Span::new("invoke_model", SpanKind::Llm)
                    .with_model("anthropic.claude-3-haiku-20240307-v1:0");
                trace.span_async(span, invoke_model(prompt)).await
            })
            .await;

        match result {
            Ok(response) => println!("ok: {}", response["content"][0]["text"]),
            Err(e) => println!("error: {e}"),
        }
    }

    println!(
        "typical haiku call costs ${:.6}",
        estimate_cost("anthropic.claude-3-haiku", 500, 200).unwrap_or_default()
    );

    let report = client.shutdown(Duration::from_secs(5)).await;
    println!(
        "flushed {} events ({} failed, {} left behind)",
        report.events_flushed, report.events_failed, report.events_remaining
    );
    println!("{:?}", client.stats());
    Ok(())
}
