//! Streaming types: raw transport deltas in, consumer events out.
//!
//! The streaming path has two layers with different vocabularies:
//!
//! - [`Delta`] is what the injected transport produces — fragments of
//!   text, fragments of tool-call arguments, and a round terminator.
//!   Tool-call fragments carry a positional `index` on every fragment
//!   but an `id`/`name` only once, so the reassembler maintains an
//!   index→id map to route later fragments.
//! - [`StreamEvent`] is what the orchestrator yields to the consumer
//!   after reassembly: whole chunks, whole tool calls, whole tool
//!   results, per-round usage metadata, and a single terminal `End`.
//!
//! # Event ordering
//!
//! Within one round the consumer sees `Chunk*`, then zero or more
//! `(ToolCall, ToolResult)` pairs, then `Metadata` — followed either by
//! the next round's events or by the terminal [`End`](StreamEvent::End).
//! `End` is emitted exactly once per stream. Every tool-call id appears
//! at most once, and every `ToolResult` references a previously emitted
//! `ToolCall`.

use std::pin::Pin;

use futures::Stream;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::chat::{ToolCall, ToolResult};
use crate::error::FlowError;
use crate::usage::Usage;

/// A pinned, boxed, `Send` stream of raw deltas from the transport.
pub type DeltaStream = Pin<Box<dyn Stream<Item = Result<Delta, FlowError>> + Send>>;

/// A pinned, boxed, `Send` stream of reassembled [`StreamEvent`]s.
pub type EventStream = Pin<Box<dyn Stream<Item = Result<StreamEvent, FlowError>> + Send>>;

/// One raw fragment of a streamed model response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[non_exhaustive]
pub enum Delta {
    /// A fragment of the model's text output.
    Content(String),

    /// A fragment of a tool call.
    ///
    /// The `index` identifies the call positionally and is present on
    /// every fragment; `id` and `name` arrive once (usually on the
    /// first fragment). `arguments` is a chunk of the call's JSON
    /// argument text, possibly empty.
    ToolCallFragment {
        /// Zero-based position of this call within the round.
        index: u32,
        /// Provider-assigned call identifier, once known.
        id: Option<String>,
        /// Tool name, once known.
        name: Option<String>,
        /// A chunk of the JSON arguments string.
        arguments: String,
    },

    /// The round is over; carries the round's token usage.
    RoundEnd {
        /// Usage for this round.
        usage: Usage,
    },
}

/// A reassembled event yielded to the stream consumer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[non_exhaustive]
pub enum StreamEvent {
    /// A fragment of free text, passed through as it arrived.
    Chunk(String),

    /// A complete JSON object recovered from the text stream.
    ///
    /// Only emitted in structured mode (when the request carries a
    /// `structured_output` schema); free text is buffered and parsed
    /// instead of passed through.
    Object(Value),

    /// A fully reassembled tool call, emitted the moment its argument
    /// buffer parses as well-formed JSON.
    ToolCall(ToolCall),

    /// The result of executing a previously emitted [`ToolCall`](StreamEvent::ToolCall).
    ToolResult(ToolResult),

    /// Accumulated usage, emitted once per round.
    Metadata(Usage),

    /// The stream is over. Emitted exactly once, always last.
    End,
}
