//! # toolflow
//!
//! Transport-agnostic orchestration for LLM conversations with tools.
//!
//! This crate implements the loop that sits between an application and a
//! completion endpoint: it sends the conversation, lets the model invoke
//! locally-registered tools, feeds the results back, and repeats until
//! the model produces a final answer — in one of two modes:
//!
//! - **Batch** ([`tool::run_loop`]): each round is a single
//!   request/response pair; tool calls are executed at round boundaries.
//! - **Streaming** ([`tool::stream_loop`]): rounds arrive as incremental
//!   deltas; tool invocations are reassembled from fragments and executed
//!   inline as soon as their arguments parse.
//!
//! The crate deliberately contains **zero** wire-protocol code. Callers
//! inject a [`Transport`] (batch `send` + streaming `stream`), a
//! [`ToolRegistry`] of handlers, and — for history compaction — a
//! [`compress::Summarizer`]. Transport failures propagate unchanged;
//! tool failures never do (they are folded into tool-result messages).
//!
//! # Quick start
//!
//! ```rust,no_run
//! use toolflow::tool::{LoopConfig, ToolRegistry, run_loop, tool_fn};
//! use toolflow::{ChatMessage, ChatRequest, JsonSchema, ToolDefinition};
//! use serde_json::{Value, json};
//!
//! # async fn example(transport: &dyn toolflow::DynTransport) -> Result<(), toolflow::FlowError> {
//! let mut registry: ToolRegistry<()> = ToolRegistry::new();
//! registry.register(tool_fn(
//!     ToolDefinition {
//!         name: "add".into(),
//!         description: "Add two numbers".into(),
//!         parameters: JsonSchema::new(json!({
//!             "type": "object",
//!             "properties": {
//!                 "a": {"type": "number"},
//!                 "b": {"type": "number"}
//!             },
//!             "required": ["a", "b"]
//!         })),
//!         retry: None,
//!     },
//!     |input: Value| async move {
//!         let a = input["a"].as_f64().unwrap_or(0.0);
//!         let b = input["b"].as_f64().unwrap_or(0.0);
//!         Ok(format!("{}", a + b))
//!     },
//! ));
//!
//! let request = ChatRequest {
//!     messages: vec![ChatMessage::user("What is 2 + 3?")],
//!     tools: Some(registry.definitions()),
//!     ..Default::default()
//! };
//!
//! let result = run_loop(transport, &registry, request, LoopConfig::default(), &()).await?;
//! println!("{:?}", result.response.text());
//! # Ok(())
//! # }
//! ```
//!
//! # Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`chat`] | Messages, content blocks, tool calls, and responses |
//! | [`compress`] | Precedence-ordered history compaction |
//! | [`error`] | Unified [`FlowError`] |
//! | [`recovery`] | Extraction and repair of JSON from partial text |
//! | [`stream`] | Raw transport deltas and consumer stream events |
//! | [`structured`] | Schema-validated typed responses with bounded retry |
//! | [`tool`] | Tool registry, batch loop, streaming reassembler |
//! | [`transport`] | The [`Transport`] seam and request parameters |
//! | [`usage`] | Token accounting |

#![warn(missing_docs)]

pub mod chat;
pub mod compress;
pub mod error;
pub mod recovery;
pub mod stream;
pub mod tool;
pub mod transport;
pub mod usage;

#[cfg(feature = "schema")]
pub mod structured;

#[cfg(any(test, feature = "test-utils"))]
pub mod mock;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_helpers;

// ── Root re-exports ─────────────────────────────────────────────────
//
// Only the types that appear in nearly every program live at the root.
// Everything else stays in its submodule:
//
//   toolflow::tool::*       — registry, handlers, loops, hooks
//   toolflow::stream::*     — Delta, StreamEvent, stream aliases
//   toolflow::compress::*   — CompressionStrategy, Summarizer
//   toolflow::structured::* — generate_structured, stream_structured
//   toolflow::mock::*       — MockTransport (test-utils feature)

pub use chat::{ChatMessage, ChatResponse, ContentBlock, ToolCall, ToolResult};
pub use error::FlowError;
pub use stream::{Delta, DeltaStream, EventStream, StreamEvent};
pub use tool::{LoopConfig, ToolRegistry};
pub use transport::{ChatRequest, DynTransport, JsonSchema, ToolChoice, ToolDefinition, Transport};
pub use usage::Usage;
