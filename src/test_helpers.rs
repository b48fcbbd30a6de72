//! Shared shorthands for testing code that uses toolflow types.
//!
//! Available to downstream crates under the `test-utils` feature, and
//! compiled during `#[cfg(test)]` for this crate's own suites.

use futures::StreamExt;

use crate::chat::{ChatResponse, ContentBlock, StopReason, ToolCall};
use crate::error::FlowError;
use crate::stream::{EventStream, StreamEvent};
use crate::usage::Usage;

/// Builds a [`ChatResponse`] with a single text block and sample usage.
pub fn sample_response(text: &str) -> ChatResponse {
    ChatResponse {
        content: vec![ContentBlock::Text(text.into())],
        usage: sample_usage(),
        stop_reason: StopReason::EndTurn,
        model: "test-model".into(),
    }
}

/// Builds a [`ChatResponse`] carrying the given tool calls.
pub fn tool_call_response(calls: Vec<ToolCall>) -> ChatResponse {
    ChatResponse {
        content: calls.into_iter().map(ContentBlock::ToolCall).collect(),
        usage: sample_usage(),
        stop_reason: StopReason::ToolUse,
        model: "test-model".into(),
    }
}

/// Returns a [`Usage`] of 100 input / 50 output tokens.
pub fn sample_usage() -> Usage {
    Usage::new(100, 50)
}

/// Collects an [`EventStream`], panicking on any error.
///
/// Use [`collect_event_results`] when testing error paths.
pub async fn collect_events(stream: EventStream) -> Vec<StreamEvent> {
    stream
        .collect::<Vec<_>>()
        .await
        .into_iter()
        .map(|r| r.expect("stream event should be Ok"))
        .collect()
}

/// Collects an [`EventStream`], keeping errors in place.
pub async fn collect_event_results(stream: EventStream) -> Vec<Result<StreamEvent, FlowError>> {
    stream.collect::<Vec<_>>().await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sample_response_shape() {
        let r = sample_response("hello");
        assert_eq!(r.text(), Some("hello"));
        assert_eq!(r.stop_reason, StopReason::EndTurn);
        assert_eq!(r.usage, Usage::new(100, 50));
    }

    #[test]
    fn test_tool_call_response_shape() {
        let r = tool_call_response(vec![ToolCall {
            id: "tc_1".into(),
            name: "search".into(),
            arguments: serde_json::json!({"q": "rust"}),
        }]);
        assert_eq!(r.stop_reason, StopReason::ToolUse);
        assert_eq!(r.tool_calls().len(), 1);
    }

    #[tokio::test]
    async fn test_collect_events_happy() {
        let events = vec![Ok(StreamEvent::Chunk("hi".into())), Ok(StreamEvent::End)];
        let stream: EventStream = Box::pin(futures::stream::iter(events));
        let collected = collect_events(stream).await;
        assert_eq!(collected.len(), 2);
    }

    #[tokio::test]
    async fn test_collect_event_results_keeps_errors() {
        let events = vec![
            Ok(StreamEvent::Chunk("hi".into())),
            Err(FlowError::InvalidRequest("bad".into())),
        ];
        let stream: EventStream = Box::pin(futures::stream::iter(events));
        let collected = collect_event_results(stream).await;
        assert!(collected[0].is_ok());
        assert!(collected[1].is_err());
    }
}
