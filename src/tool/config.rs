//! Loop configuration, observability hooks, and results.

use std::sync::Arc;

use serde_json::Value;

use crate::chat::{ChatResponse, ToolResult};
use crate::usage::Usage;

/// The system notice sent with the forced tools-disabled final request
/// once the step limit is reached with tool calls still pending.
pub const FINAL_ANSWER_NOTICE: &str =
    "Final answer required without further tool use.";

/// Observability callback invoked around each tool execution.
///
/// Hooks see the tool identity, call id, and payload but cannot affect
/// control flow: the orchestrator catches (and discards) panics raised
/// inside a hook, and ignores its return entirely.
pub type ToolHookFn = Arc<dyn Fn(&HookEvent) + Send + Sync>;

/// What a [`ToolHookFn`] observes.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub enum HookEvent {
    /// A tool is about to execute.
    ToolStart {
        /// The call id from the model.
        call_id: String,
        /// The tool's name.
        tool_name: String,
        /// The parsed arguments.
        arguments: Value,
    },
    /// A tool finished executing (successfully or not).
    ToolEnd {
        /// The call id from the model.
        call_id: String,
        /// The tool's name.
        tool_name: String,
        /// The folded result, error or not.
        result: ToolResult,
    },
}

/// Configuration for [`run_loop`](super::run_loop) and
/// [`stream_loop`](super::stream_loop).
pub struct LoopConfig {
    /// Maximum number of request/execute rounds. Default: 10.
    ///
    /// Reaching the limit while the model still wants tools is not an
    /// error: one final tools-disabled request closes the conversation
    /// (termination [`TerminationReason::StepLimit`]).
    pub max_steps: u32,
    /// Whether to execute a round's tool calls concurrently.
    /// Results are merged back in original call order either way.
    /// Default: true. (Streaming mode executes inline as calls
    /// complete and ignores this flag.)
    pub parallel_tools: bool,
    /// Optional pre/post observability hook around each execution.
    pub hooks: Option<ToolHookFn>,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            max_steps: 10,
            parallel_tools: true,
            hooks: None,
        }
    }
}

impl Clone for LoopConfig {
    fn clone(&self) -> Self {
        Self {
            max_steps: self.max_steps,
            parallel_tools: self.parallel_tools,
            hooks: self.hooks.clone(),
        }
    }
}

impl std::fmt::Debug for LoopConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoopConfig")
            .field("max_steps", &self.max_steps)
            .field("parallel_tools", &self.parallel_tools)
            .field("has_hooks", &self.hooks.is_some())
            .finish()
    }
}

/// The outcome of a completed loop.
#[derive(Debug, Clone)]
pub struct LoopResult {
    /// The final model response (after all tool rounds).
    pub response: ChatResponse,
    /// How many rounds were executed.
    pub steps: u32,
    /// Accumulated usage across all rounds.
    pub total_usage: Usage,
    /// Why the loop terminated.
    pub termination: TerminationReason,
}

/// Why a loop terminated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TerminationReason {
    /// The model returned a response with no tool calls.
    Completed,
    /// The step limit was hit; the response is the forced tools-disabled
    /// final answer. This is defined policy, not an error.
    StepLimit {
        /// The configured limit that was reached.
        limit: u32,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config = LoopConfig::default();
        assert_eq!(config.max_steps, 10);
        assert!(config.parallel_tools);
        assert!(config.hooks.is_none());
    }

    #[test]
    fn test_config_debug_hides_hook_internals() {
        let config = LoopConfig {
            hooks: Some(Arc::new(|_| {})),
            ..Default::default()
        };
        let debug = format!("{config:?}");
        assert!(debug.contains("has_hooks: true"));
    }

    #[test]
    fn test_termination_reason_eq() {
        assert_eq!(
            TerminationReason::StepLimit { limit: 3 },
            TerminationReason::StepLimit { limit: 3 }
        );
        assert_ne!(
            TerminationReason::Completed,
            TerminationReason::StepLimit { limit: 3 }
        );
    }
}
