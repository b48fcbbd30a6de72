//! Tool execution engine and orchestration loops.
//!
//! # Architecture
//!
//! ```text
//!   ToolHandler     — defines a single tool (schema + execute fn)
//!       │
//!   ToolRegistry    — stores handlers by name, validates & dispatches
//!       │
//!   run_loop()      — batch: request → execute tools → feedback, repeat
//!   stream_loop()   — streaming: reassemble deltas, execute tools inline
//! ```
//!
//! Both loops share the same contract: tool failures are folded into
//! error-flagged tool-result messages and never abort a round; only
//! transport failures are fatal. The step count is bounded by
//! [`LoopConfig::max_steps`] — when the model is still requesting tools
//! at the limit, one final tools-disabled request produces the closing
//! answer (see [`TerminationReason::StepLimit`]).

mod config;
mod execution;
mod handler;
mod loop_batch;
mod loop_stream;
mod registry;

pub use config::{
    HookEvent, LoopConfig, LoopResult, TerminationReason, ToolHookFn, FINAL_ANSWER_NOTICE,
};
pub use handler::{FnToolHandler, NoCtxToolHandler, ToolError, ToolHandler, ToolOutput, tool_fn,
    tool_fn_with_ctx};
pub use loop_batch::run_loop;
pub use loop_stream::stream_loop;
pub use registry::ToolRegistry;
