//! Batch (non-streaming) tool-call loop.
//!
//! One explicit loop carrying `(messages, total_usage, step)` — never
//! call-stack recursion, so stack depth stays flat no matter how many
//! rounds a conversation runs.

use tracing::debug;

use super::ToolRegistry;
use super::config::{FINAL_ANSWER_NOTICE, LoopConfig, LoopResult, TerminationReason};
use super::execution::execute_round;
use crate::chat::{ChatMessage, ChatResponse, ChatRole, ContentBlock};
use crate::error::FlowError;
use crate::transport::{ChatRequest, DynTransport, ToolChoice};
use crate::usage::Usage;

/// Runs the model in a tool-calling loop until it stops requesting tools.
///
/// Each round:
/// 1. Sends the current conversation via [`DynTransport::send`].
/// 2. A response without tool calls ends the loop ([`TerminationReason::Completed`]).
/// 3. At `config.max_steps` with tool calls still pending, the pending
///    assistant message and a system notice are appended and exactly one
///    further request goes out with tools disabled; its response is
///    returned ([`TerminationReason::StepLimit`]).
/// 4. Otherwise the round's calls execute (concurrently when configured;
///    results merge back in original call order), their results are
///    appended, and the loop repeats.
///
/// # Errors
///
/// Only transport failures are fatal; they propagate unchanged. Tool
/// failures of any kind are folded into error-flagged tool-result
/// messages and the loop continues.
pub async fn run_loop<Ctx: Send + Sync + 'static>(
    transport: &dyn DynTransport,
    registry: &ToolRegistry<Ctx>,
    mut request: ChatRequest,
    config: LoopConfig,
    ctx: &Ctx,
) -> Result<LoopResult, FlowError> {
    let mut total_usage = Usage::default();
    let mut step: u32 = 0;

    loop {
        let response = transport.send_boxed(&request).await?;
        total_usage += &response.usage;
        step += 1;

        let (calls, other_content) = response.partition_content();
        if calls.is_empty() {
            return Ok(LoopResult {
                response,
                steps: step,
                total_usage,
                termination: TerminationReason::Completed,
            });
        }

        // Assistant message carrying the round's text and tool calls.
        let mut assistant_content = other_content;
        assistant_content.extend(calls.iter().cloned().map(ContentBlock::ToolCall));
        request.messages.push(ChatMessage {
            role: ChatRole::Assistant,
            content: assistant_content,
            timestamp: None,
        });

        if step >= config.max_steps {
            debug!(step, limit = config.max_steps, "step limit reached, forcing final answer");
            let final_response =
                force_final_answer(transport, &mut request, &mut total_usage).await?;
            return Ok(LoopResult {
                response: final_response,
                steps: step + 1,
                total_usage,
                termination: TerminationReason::StepLimit {
                    limit: config.max_steps,
                },
            });
        }

        let results = execute_round(
            registry,
            &calls,
            config.hooks.as_ref(),
            config.parallel_tools,
            ctx,
        )
        .await;
        for result in results {
            request.messages.push(ChatMessage::tool_result_full(result));
        }
    }
}

/// Issues the single tools-disabled continuation after the step limit.
pub(crate) async fn force_final_answer(
    transport: &dyn DynTransport,
    request: &mut ChatRequest,
    total_usage: &mut Usage,
) -> Result<ChatResponse, FlowError> {
    request
        .messages
        .push(ChatMessage::system(FINAL_ANSWER_NOTICE));
    request.tools = None;
    request.tool_choice = Some(ToolChoice::None);

    let response = transport.send_boxed(request).await?;
    *total_usage += &response.usage;
    Ok(response)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::{StopReason, ToolCall};
    use crate::mock::MockTransport;
    use crate::test_helpers::{sample_response, tool_call_response};
    use crate::tool::handler::tool_fn;
    use crate::transport::{JsonSchema, ToolDefinition};
    use serde_json::{Value, json};

    fn echo_registry() -> ToolRegistry<()> {
        let mut registry: ToolRegistry<()> = ToolRegistry::new();
        registry.register(tool_fn(
            ToolDefinition {
                name: "echo".into(),
                description: "Echo the tag".into(),
                parameters: JsonSchema::new(json!({"type": "object"})),
                retry: None,
            },
            |input: Value| async move { Ok(input["tag"].as_str().unwrap_or("").to_string()) },
        ));
        registry
    }

    fn echo_call(id: &str, tag: &str) -> ToolCall {
        ToolCall {
            id: id.into(),
            name: "echo".into(),
            arguments: json!({"tag": tag}),
        }
    }

    fn request() -> ChatRequest {
        ChatRequest {
            messages: vec![ChatMessage::user("go")],
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_no_tool_calls_completes_in_one_round() {
        let mock = MockTransport::new();
        mock.queue_response(sample_response("done"));

        let result = run_loop(&mock, &echo_registry(), request(), LoopConfig::default(), &())
            .await
            .unwrap();

        assert_eq!(result.response.text(), Some("done"));
        assert_eq!(result.steps, 1);
        assert_eq!(result.termination, TerminationReason::Completed);
        assert_eq!(mock.recorded_requests().len(), 1);
    }

    #[tokio::test]
    async fn test_tool_round_then_completion() {
        let mock = MockTransport::new();
        mock.queue_response(tool_call_response(vec![echo_call("tc_1", "hi")]));
        mock.queue_response(sample_response("final"));

        let result = run_loop(&mock, &echo_registry(), request(), LoopConfig::default(), &())
            .await
            .unwrap();

        assert_eq!(result.response.text(), Some("final"));
        assert_eq!(result.steps, 2);

        // The second request carries assistant tool calls + tool results.
        let recorded = mock.recorded_requests();
        let messages = &recorded[1].messages;
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[1].role, ChatRole::Assistant);
        assert_eq!(messages[2].role, ChatRole::Tool);
        assert!(matches!(
            &messages[2].content[0],
            ContentBlock::ToolResult(r) if r.content == "hi" && !r.is_error
        ));
    }

    #[tokio::test]
    async fn test_tool_results_keep_call_order_under_parallelism() {
        let mock = MockTransport::new();
        mock.queue_response(tool_call_response(vec![
            echo_call("tc_a", "first"),
            echo_call("tc_b", "second"),
        ]));
        mock.queue_response(sample_response("final"));

        let result = run_loop(&mock, &echo_registry(), request(), LoopConfig::default(), &())
            .await
            .unwrap();
        assert_eq!(result.termination, TerminationReason::Completed);

        let recorded = mock.recorded_requests();
        let tool_messages: Vec<_> = recorded[1]
            .messages
            .iter()
            .filter(|m| m.role == ChatRole::Tool)
            .collect();
        assert_eq!(tool_messages.len(), 2);
        assert!(matches!(
            &tool_messages[0].content[0],
            ContentBlock::ToolResult(r) if r.tool_call_id == "tc_a"
        ));
        assert!(matches!(
            &tool_messages[1].content[0],
            ContentBlock::ToolResult(r) if r.tool_call_id == "tc_b"
        ));
    }

    #[tokio::test]
    async fn test_terminates_within_limit_plus_one_requests() {
        // A model that always re-requests the tool: with max_steps = N the
        // loop issues N tool-bearing requests plus one forced final.
        let mock = MockTransport::new();
        let limit = 3;
        for i in 0..limit {
            mock.queue_response(tool_call_response(vec![echo_call(
                &format!("tc_{i}"),
                "again",
            )]));
        }
        mock.queue_response(sample_response("forced final"));

        let config = LoopConfig {
            max_steps: limit,
            ..Default::default()
        };
        let result = run_loop(&mock, &echo_registry(), request(), config, &())
            .await
            .unwrap();

        assert_eq!(result.response.text(), Some("forced final"));
        assert_eq!(
            result.termination,
            TerminationReason::StepLimit { limit }
        );
        assert_eq!(mock.recorded_requests().len() as u32, limit + 1);
    }

    #[tokio::test]
    async fn test_forced_final_request_disables_tools_and_adds_notice() {
        let mock = MockTransport::new();
        mock.queue_response(tool_call_response(vec![echo_call("tc_1", "x")]));
        mock.queue_response(sample_response("forced"));

        let config = LoopConfig {
            max_steps: 1,
            ..Default::default()
        };
        let mut req = request();
        req.tools = Some(echo_registry().definitions());
        run_loop(&mock, &echo_registry(), req, config, &())
            .await
            .unwrap();

        let recorded = mock.recorded_requests();
        let last = recorded.last().unwrap();
        assert!(last.tools.is_none());
        assert_eq!(last.tool_choice, Some(ToolChoice::None));
        let notice = last
            .messages
            .iter()
            .rev()
            .find(|m| m.is_system())
            .and_then(|m| m.text())
            .unwrap();
        assert_eq!(notice, FINAL_ANSWER_NOTICE);
        // The pending assistant message precedes the notice.
        assert!(recorded
            .last()
            .unwrap()
            .messages
            .iter()
            .any(|m| m.role == ChatRole::Assistant));
    }

    #[tokio::test]
    async fn test_failing_tool_does_not_stop_loop() {
        let mock = MockTransport::new();
        mock.queue_response(tool_call_response(vec![ToolCall {
            id: "tc_1".into(),
            name: "no_such_tool".into(),
            arguments: json!({}),
        }]));
        mock.queue_response(sample_response("recovered"));

        let result = run_loop(&mock, &echo_registry(), request(), LoopConfig::default(), &())
            .await
            .unwrap();

        assert_eq!(result.response.text(), Some("recovered"));
        let recorded = mock.recorded_requests();
        assert!(matches!(
            &recorded[1].messages.last().unwrap().content[0],
            ContentBlock::ToolResult(r) if r.is_error
        ));
    }

    #[tokio::test]
    async fn test_transport_error_propagates() {
        let mock = MockTransport::new();
        mock.queue_failure(crate::mock::MockFailure::Transport {
            status: Some(http::StatusCode::SERVICE_UNAVAILABLE),
            message: "down".into(),
            retryable: true,
        });

        let err = run_loop(&mock, &echo_registry(), request(), LoopConfig::default(), &())
            .await
            .unwrap_err();
        assert!(matches!(err, FlowError::Transport { .. }));
    }

    #[tokio::test]
    async fn test_usage_accumulates_across_rounds() {
        let mock = MockTransport::new();
        let mut first = tool_call_response(vec![echo_call("tc_1", "x")]);
        first.usage = Usage::new(10, 5);
        let mut second = sample_response("done");
        second.usage = Usage::new(3, 2);
        mock.queue_response(first);
        mock.queue_response(second);

        let result = run_loop(&mock, &echo_registry(), request(), LoopConfig::default(), &())
            .await
            .unwrap();
        assert_eq!(result.total_usage, Usage::new(13, 7));
        assert_eq!(result.total_usage.total_tokens, 20);
    }

    #[tokio::test]
    async fn test_assistant_text_is_preserved_alongside_calls() {
        let mock = MockTransport::new();
        let mut resp = tool_call_response(vec![echo_call("tc_1", "x")]);
        resp.content.insert(0, ContentBlock::Text("let me check".into()));
        resp.stop_reason = StopReason::ToolUse;
        mock.queue_response(resp);
        mock.queue_response(sample_response("done"));

        run_loop(&mock, &echo_registry(), request(), LoopConfig::default(), &())
            .await
            .unwrap();

        let recorded = mock.recorded_requests();
        let assistant = &recorded[1].messages[1];
        assert_eq!(assistant.text(), Some("let me check"));
        assert!(assistant
            .content
            .iter()
            .any(|b| matches!(b, ContentBlock::ToolCall(_))));
    }
}
