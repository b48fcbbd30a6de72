//! Cross-module loop tests against the mock transport.
//!
//! These exercise whole flows — batch and streaming loops, hooks,
//! structured retry, and compaction feeding a loop — rather than a
//! single module's internals.

use std::sync::{Arc, Mutex};

use serde_json::{Value, json};

use toolflow::chat::ToolCall;
use toolflow::compress::{
    CompressionOptions, CompressionStrategy, FnSummarizer, compress_history,
};
use toolflow::mock::MockTransport;
use toolflow::stream::{Delta, StreamEvent};
use toolflow::test_helpers::{collect_events, sample_response, tool_call_response};
use toolflow::tool::{HookEvent, LoopConfig, TerminationReason, ToolRegistry, run_loop,
    stream_loop, tool_fn};
use toolflow::{ChatMessage, ChatRequest, JsonSchema, ToolDefinition, Usage};

fn add_registry() -> ToolRegistry<()> {
    let mut registry: ToolRegistry<()> = ToolRegistry::new();
    registry.register(tool_fn(
        ToolDefinition {
            name: "add".into(),
            description: "Add two numbers and return the sum".into(),
            parameters: JsonSchema::new(json!({
                "type": "object",
                "properties": {
                    "a": { "type": "number" },
                    "b": { "type": "number" }
                },
                "required": ["a", "b"]
            })),
            retry: None,
        },
        |input: Value| async move {
            let a = input["a"].as_f64().unwrap_or(0.0);
            let b = input["b"].as_f64().unwrap_or(0.0);
            Ok(format!("{}", a + b))
        },
    ));
    registry
}

fn add_call(id: &str) -> ToolCall {
    ToolCall {
        id: id.into(),
        name: "add".into(),
        arguments: json!({"a": 2, "b": 3}),
    }
}

fn request() -> ChatRequest {
    ChatRequest {
        messages: vec![ChatMessage::user("What is 2 + 3?")],
        ..Default::default()
    }
}

/// Batch and streaming, fed equivalent deterministic transcripts, agree
/// on the final assistant content and the accumulated usage totals.
#[tokio::test]
async fn batch_and_streaming_agree_on_content_and_usage() {
    // Batch script: one tool round, then the final answer.
    let batch = MockTransport::new();
    let mut first = tool_call_response(vec![add_call("tc_1")]);
    first.usage = Usage::new(10, 5);
    let mut second = sample_response("The sum is 5.");
    second.usage = Usage::new(3, 2);
    batch.queue_response(first);
    batch.queue_response(second);

    let batch_result = run_loop(&batch, &add_registry(), request(), LoopConfig::default(), &())
        .await
        .unwrap();

    // Streaming script: the same rounds as deltas.
    let streaming = MockTransport::new();
    streaming.queue_deltas(vec![
        Delta::ToolCallFragment {
            index: 0,
            id: Some("tc_1".into()),
            name: Some("add".into()),
            arguments: String::new(),
        },
        Delta::ToolCallFragment {
            index: 0,
            id: None,
            name: None,
            arguments: r#"{"a": 2, "b": 3}"#.into(),
        },
        Delta::RoundEnd {
            usage: Usage::new(10, 5),
        },
    ]);
    streaming.queue_deltas(vec![
        Delta::Content("The sum".into()),
        Delta::Content(" is 5.".into()),
        Delta::RoundEnd {
            usage: Usage::new(3, 2),
        },
    ]);

    let events = collect_events(stream_loop(
        Arc::new(streaming),
        Arc::new(add_registry()),
        request(),
        LoopConfig::default(),
        Arc::new(()),
    ))
    .await;

    let streamed_text: String = events
        .iter()
        .filter_map(|e| match e {
            StreamEvent::Chunk(t) => Some(t.as_str()),
            _ => None,
        })
        .collect();
    let streamed_usage = events
        .iter()
        .rev()
        .find_map(|e| match e {
            StreamEvent::Metadata(u) => Some(u.clone()),
            _ => None,
        })
        .unwrap();

    assert_eq!(batch_result.response.text(), Some(streamed_text.as_str()));
    assert_eq!(batch_result.total_usage, streamed_usage);
    assert_eq!(batch_result.total_usage, Usage::new(13, 7));
}

/// Hooks observe every execution in both modes, and the tool result the
/// model sees is identical either way.
#[tokio::test]
async fn hooks_observe_executions_in_both_modes() {
    let seen: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    let config = LoopConfig {
        hooks: Some(Arc::new(move |event: &HookEvent| {
            if let HookEvent::ToolEnd {
                tool_name, result, ..
            } = event
            {
                sink.lock().unwrap().push(format!("{tool_name}={}", result.content));
            }
        })),
        ..Default::default()
    };

    let batch = MockTransport::new();
    batch.queue_response(tool_call_response(vec![add_call("tc_1")]));
    batch.queue_response(sample_response("done"));
    run_loop(&batch, &add_registry(), request(), config.clone(), &())
        .await
        .unwrap();

    let streaming = MockTransport::new();
    streaming.queue_deltas(vec![
        Delta::ToolCallFragment {
            index: 0,
            id: Some("tc_2".into()),
            name: Some("add".into()),
            arguments: r#"{"a": 2, "b": 3}"#.into(),
        },
        Delta::RoundEnd {
            usage: Usage::new(1, 1),
        },
    ]);
    streaming.queue_deltas(vec![
        Delta::Content("done".into()),
        Delta::RoundEnd {
            usage: Usage::new(1, 1),
        },
    ]);
    collect_events(stream_loop(
        Arc::new(streaming),
        Arc::new(add_registry()),
        request(),
        config,
        Arc::new(()),
    ))
    .await;

    assert_eq!(*seen.lock().unwrap(), vec!["add=5".to_string(), "add=5".to_string()]);
}

/// A compacted history feeds a loop: the request the transport sees is
/// the compressed conversation, not the raw one.
#[tokio::test]
async fn compressed_history_feeds_the_loop() {
    let mut messages = vec![ChatMessage::system("be terse")];
    for i in 0..10 {
        messages.push(ChatMessage::user(format!("filler {i}")));
        messages.push(ChatMessage::assistant(format!("ack {i}")));
    }
    messages.push(ChatMessage::user("What is 2 + 3?"));

    let summarizer = FnSummarizer(|span: &[ChatMessage]| {
        let n = span.len();
        async move { Ok(format!("{n} earlier messages")) }
    });
    let options = CompressionOptions {
        strategy: Some(CompressionStrategy::LastNMessages(5)),
        max_history: Some(2),
        ..Default::default()
    };
    let compressed = compress_history(messages, &options, Some(&summarizer))
        .await
        .unwrap();

    let mock = MockTransport::new();
    mock.queue_response(sample_response("5"));
    let handle = mock.clone();

    let request = ChatRequest {
        messages: compressed,
        ..Default::default()
    };
    let result = run_loop(&mock, &add_registry(), request, LoopConfig::default(), &())
        .await
        .unwrap();
    assert_eq!(result.termination, TerminationReason::Completed);

    let sent = &handle.recorded_requests()[0].messages;
    assert!(sent[0].is_system());
    assert!(sent.len() <= 3);
    assert!(sent.iter().any(|m| m
        .text()
        .is_some_and(|t| t.starts_with("TL;DR"))));
}

/// The step-limit bound holds end to end: a model that always requests
/// tools is answered within `max_steps + 1` transport calls, and the
/// final response carries no tool calls.
#[tokio::test]
async fn step_limit_bounds_transport_calls() {
    let mock = MockTransport::new();
    let limit = 4;
    for i in 0..limit {
        mock.queue_response(tool_call_response(vec![add_call(&format!("tc_{i}"))]));
    }
    mock.queue_response(sample_response("forced"));
    let handle = mock.clone();

    let config = LoopConfig {
        max_steps: limit,
        ..Default::default()
    };
    let result = run_loop(&mock, &add_registry(), request(), config, &())
        .await
        .unwrap();

    assert_eq!(handle.recorded_requests().len() as u32, limit + 1);
    assert!(result.response.tool_calls().is_empty());
    assert_eq!(result.termination, TerminationReason::StepLimit { limit });
}

/// Structured output retries across full loop runs, carrying usage.
#[cfg(feature = "schema")]
#[tokio::test]
async fn structured_retry_spans_tool_rounds() {
    use serde::Deserialize;
    use toolflow::structured::{StructuredConfig, generate_structured};

    #[derive(Debug, Deserialize, schemars::JsonSchema)]
    struct Sum {
        value: f64,
    }

    let mock = MockTransport::new();
    // Attempt 1: a tool round, then a malformed answer.
    mock.queue_response(tool_call_response(vec![add_call("tc_1")]));
    mock.queue_response(sample_response(r#"{"value": "five"}"#));
    // Attempt 2: valid.
    mock.queue_response(sample_response(r#"{"value": 5}"#));

    let result = generate_structured::<Sum, ()>(
        &mock,
        &add_registry(),
        request(),
        StructuredConfig::default(),
        &(),
    )
    .await
    .unwrap();

    assert_eq!(result.retries, 1);
    assert!((result.value.value - 5.0).abs() < f64::EPSILON);
    // Three transport calls, 100 input tokens each.
    assert_eq!(result.usage.input_tokens, 300);
}
