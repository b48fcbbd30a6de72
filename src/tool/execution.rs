//! Per-round tool execution with hook notification.
//!
//! A round's calls may run concurrently, but the conversation is only
//! mutated by the orchestrator after all of them finish — and always in
//! original call order, so the resulting message sequence is
//! deterministic regardless of completion order.

use std::panic::{AssertUnwindSafe, catch_unwind};

use futures::future::join_all;

use super::config::{HookEvent, ToolHookFn};
use super::registry::ToolRegistry;
use crate::chat::{ToolCall, ToolResult};

/// Executes one tool call, notifying hooks before and after.
pub(crate) async fn execute_one<Ctx: Send + Sync + 'static>(
    registry: &ToolRegistry<Ctx>,
    call: &ToolCall,
    hooks: Option<&ToolHookFn>,
    ctx: &Ctx,
) -> ToolResult {
    notify(hooks, &HookEvent::ToolStart {
        call_id: call.id.clone(),
        tool_name: call.name.clone(),
        arguments: call.arguments.clone(),
    });

    let result = registry.execute(call, ctx).await;

    notify(hooks, &HookEvent::ToolEnd {
        call_id: call.id.clone(),
        tool_name: call.name.clone(),
        result: result.clone(),
    });

    result
}

/// Executes all of a round's calls, returning results in call order.
///
/// When `parallel` is set, calls run concurrently via `join_all`, which
/// already yields outputs in input order — completion order never leaks
/// into the result vector.
pub(crate) async fn execute_round<Ctx: Send + Sync + 'static>(
    registry: &ToolRegistry<Ctx>,
    calls: &[ToolCall],
    hooks: Option<&ToolHookFn>,
    parallel: bool,
    ctx: &Ctx,
) -> Vec<ToolResult> {
    if parallel && calls.len() > 1 {
        let futures: Vec<_> = calls
            .iter()
            .map(|call| execute_one(registry, call, hooks, ctx))
            .collect();
        join_all(futures).await
    } else {
        let mut results = Vec::with_capacity(calls.len());
        for call in calls {
            results.push(execute_one(registry, call, hooks, ctx).await);
        }
        results
    }
}

/// Invokes a hook, swallowing any panic it raises.
fn notify(hooks: Option<&ToolHookFn>, event: &HookEvent) {
    if let Some(hook) = hooks {
        let _ = catch_unwind(AssertUnwindSafe(|| hook(event)));
    }
}
