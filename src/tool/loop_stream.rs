//! Streaming delta reassembler and multi-round streaming loop.
//!
//! Consumes raw [`Delta`]s from the transport and yields reassembled
//! [`StreamEvent`]s. Tool calls are reconstructed from fragments —
//! keyed by position until their id is known — and executed *inline*
//! the moment their argument buffer parses as well-formed JSON. This is
//! the one place streaming deliberately diverges from batch, which
//! defers execution to round boundaries.
//!
//! Multi-round continuation is an explicit phase machine driven by
//! `futures::stream::unfold`, carrying `(messages, usage, step)` in the
//! unfold state — round *n+1* cannot start before round *n*'s tool
//! results exist, and stack depth stays flat no matter how many rounds
//! run. Dropping the returned stream drops the in-flight delta stream
//! and all per-call scratch state, so cancellation leaves no orphaned
//! work behind.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use futures::StreamExt;
use serde_json::{Value, json};

use super::ToolRegistry;
use super::config::{FINAL_ANSWER_NOTICE, LoopConfig};
use super::execution::execute_one;
use crate::chat::{ChatMessage, ChatRole, ContentBlock, ToolCall, ToolResult};
use crate::recovery;
use crate::stream::{Delta, DeltaStream, EventStream, StreamEvent};
use crate::transport::{ChatRequest, DynTransport, JsonSchema, ToolChoice};
use crate::usage::Usage;

/// Streaming variant of [`run_loop`](super::run_loop).
///
/// Per round the consumer sees `Chunk*` (or `Object*` in structured
/// mode), `(ToolCall, ToolResult)*`, then one `Metadata` carrying the
/// accumulated usage — followed by the next round's events, or by the
/// terminal `End`. When the step limit is reached with tool calls still
/// pending, one tools-disabled final round runs before `End`, exactly
/// as in batch mode.
///
/// Transport failures are yielded as `Err` and terminate the stream;
/// tool failures appear as error-flagged `ToolResult` events and never
/// stop it.
///
/// Takes `Arc`s because the state must outlive the returned stream.
pub fn stream_loop<Ctx: Send + Sync + 'static>(
    transport: Arc<dyn DynTransport>,
    registry: Arc<ToolRegistry<Ctx>>,
    request: ChatRequest,
    config: LoopConfig,
    ctx: Arc<Ctx>,
) -> EventStream {
    let state = StreamLoopState::new(transport, registry, request, config, ctx);
    let stream = futures::stream::unfold(state, |mut state| async move {
        loop {
            if let Some(event) = state.queued.pop_front() {
                return Some((Ok(event), state));
            }
            match std::mem::replace(&mut state.phase, Phase::Done) {
                Phase::Done => return None,
                Phase::StartRound => match state.transport.stream_boxed(&state.request).await {
                    Ok(deltas) => state.phase = Phase::Streaming(deltas),
                    // Transport failure: fatal, phase stays Done.
                    Err(e) => return Some((Err(e), state)),
                },
                Phase::Streaming(mut deltas) => match deltas.next().await {
                    Some(Ok(delta)) => {
                        let round_over = state.handle_delta(delta).await;
                        if round_over {
                            state.finish_round().await;
                        } else {
                            state.phase = Phase::Streaming(deltas);
                        }
                    }
                    Some(Err(e)) => return Some((Err(e), state)),
                    // Stream exhausted without a RoundEnd delta — close
                    // the round with whatever accumulated.
                    None => state.finish_round().await,
                },
            }
        }
    });
    Box::pin(stream)
}

enum Phase {
    StartRound,
    Streaming(DeltaStream),
    Done,
}

/// Per-call state for the whole streaming loop.
struct StreamLoopState<Ctx: Send + Sync + 'static> {
    transport: Arc<dyn DynTransport>,
    registry: Arc<ToolRegistry<Ctx>>,
    request: ChatRequest,
    config: LoopConfig,
    ctx: Arc<Ctx>,
    step: u32,
    total_usage: Usage,
    /// Events reassembled but not yet yielded; drained one per poll.
    queued: VecDeque<StreamEvent>,
    round: RoundState,
    /// Target schema when the request asked for structured output.
    structured_schema: Option<JsonSchema>,
    /// Structured-mode accumulation buffer, reset per round.
    json_buffer: String,
    /// Set once the tools-disabled final round is in flight.
    forced_final: bool,
    phase: Phase,
}

/// Per-round reassembly scratch space.
///
/// Tool-call fragments always carry a positional index but may omit the
/// id; `index_to_id` routes id-less fragments once the id is known, and
/// `orphaned_args` holds argument text that arrived even earlier.
#[derive(Default)]
struct RoundState {
    text: String,
    index_to_id: HashMap<u32, String>,
    orphaned_args: HashMap<u32, String>,
    args_by_id: HashMap<String, String>,
    names_by_id: HashMap<String, String>,
    /// Ids in announcement order, for the end-of-round flush.
    order: Vec<String>,
    emitted: HashSet<String>,
    /// Calls executed this round, in emission order.
    executed: Vec<(ToolCall, ToolResult)>,
}

impl<Ctx: Send + Sync + 'static> StreamLoopState<Ctx> {
    fn new(
        transport: Arc<dyn DynTransport>,
        registry: Arc<ToolRegistry<Ctx>>,
        request: ChatRequest,
        config: LoopConfig,
        ctx: Arc<Ctx>,
    ) -> Self {
        let structured_schema = request.structured_output.clone();
        Self {
            transport,
            registry,
            request,
            config,
            ctx,
            step: 0,
            total_usage: Usage::default(),
            queued: VecDeque::new(),
            round: RoundState::default(),
            structured_schema,
            json_buffer: String::new(),
            forced_final: false,
            phase: Phase::StartRound,
        }
    }

    /// Processes one raw delta. Returns true when the round is over.
    async fn handle_delta(&mut self, delta: Delta) -> bool {
        match delta {
            Delta::Content(text) => {
                self.round.text.push_str(&text);
                if self.structured_schema.is_some() {
                    self.json_buffer.push_str(&text);
                    if let Some(value) =
                        recovery::extract_object(&mut self.json_buffer, self.structured_schema.as_ref())
                    {
                        self.queued.push_back(StreamEvent::Object(value));
                    }
                } else {
                    self.queued.push_back(StreamEvent::Chunk(text));
                }
                false
            }
            Delta::ToolCallFragment {
                index,
                id,
                name,
                arguments,
            } => {
                self.record_fragment(index, id, name, &arguments);
                self.try_execute_ready(index).await;
                false
            }
            Delta::RoundEnd { usage } => {
                self.total_usage += &usage;
                true
            }
        }
    }

    /// Folds one tool-call fragment into the round's scratch state.
    fn record_fragment(
        &mut self,
        index: u32,
        id: Option<String>,
        name: Option<String>,
        arguments: &str,
    ) {
        if let Some(id) = id {
            if !self.round.args_by_id.contains_key(&id) {
                // Adopt any argument text that arrived before the id.
                let initial = self.round.orphaned_args.remove(&index).unwrap_or_default();
                self.round.args_by_id.insert(id.clone(), initial);
                self.round.order.push(id.clone());
            }
            self.round.index_to_id.entry(index).or_insert_with(|| id.clone());
            if let Some(name) = name {
                self.round.names_by_id.entry(id).or_insert(name);
            }
        } else if let Some(name) = name {
            if let Some(id) = self.round.index_to_id.get(&index) {
                self.round.names_by_id.entry(id.clone()).or_insert(name);
            }
        }

        if arguments.is_empty() {
            return;
        }
        match self.round.index_to_id.get(&index) {
            Some(id) => {
                if let Some(buffer) = self.round.args_by_id.get_mut(id) {
                    buffer.push_str(arguments);
                }
            }
            None => {
                self.round
                    .orphaned_args
                    .entry(index)
                    .or_default()
                    .push_str(arguments);
            }
        }
    }

    /// Executes the call at `index` if it is complete (id and name
    /// known), unemitted, and its argument buffer parses as JSON.
    async fn try_execute_ready(&mut self, index: u32) {
        let Some(id) = self.round.index_to_id.get(&index).cloned() else {
            return;
        };
        if self.round.emitted.contains(&id) {
            return;
        }
        let Some(name) = self.round.names_by_id.get(&id).cloned() else {
            return;
        };
        let Some(buffer) = self.round.args_by_id.get(&id) else {
            return;
        };
        if buffer.is_empty() {
            return;
        }
        let Ok(arguments) = serde_json::from_str::<Value>(buffer) else {
            return;
        };
        self.execute_and_emit(ToolCall {
            id,
            name,
            arguments,
        })
        .await;
    }

    /// Emits `ToolCall`, executes inline, emits the paired `ToolResult`.
    async fn execute_and_emit(&mut self, call: ToolCall) {
        self.round.emitted.insert(call.id.clone());
        self.queued.push_back(StreamEvent::ToolCall(call.clone()));
        let result = execute_one(&self.registry, &call, self.config.hooks.as_ref(), &self.ctx).await;
        self.queued.push_back(StreamEvent::ToolResult(result.clone()));
        self.round.executed.push((call, result));
    }

    /// Closes the round: flush stragglers, repair structured leftovers,
    /// emit `Metadata`, then continue, force a final round, or end.
    async fn finish_round(&mut self) {
        // Calls whose id and name arrived but whose argument buffer
        // never parsed mid-round: execute them now. An empty buffer
        // means a no-argument tool; a malformed one gets the trivial
        // repair before falling back to empty arguments.
        let pending: Vec<String> = self
            .round
            .order
            .iter()
            .filter(|id| !self.round.emitted.contains(*id))
            .cloned()
            .collect();
        for id in pending {
            let Some(name) = self.round.names_by_id.get(&id).cloned() else {
                continue;
            };
            let buffer = self.round.args_by_id.get(&id).cloned().unwrap_or_default();
            let arguments = if buffer.trim().is_empty() {
                json!({})
            } else {
                serde_json::from_str(&buffer)
                    .ok()
                    .or_else(|| recovery::repair_object(&buffer, None))
                    .unwrap_or_else(|| json!({}))
            };
            self.execute_and_emit(ToolCall {
                id,
                name,
                arguments,
            })
            .await;
        }

        if self.structured_schema.is_some() && !self.json_buffer.trim().is_empty() {
            if let Some(value) =
                recovery::repair_object(&self.json_buffer, self.structured_schema.as_ref())
            {
                self.queued.push_back(StreamEvent::Object(value));
            }
        }
        self.json_buffer.clear();

        self.step += 1;
        self.queued.push_back(StreamEvent::Metadata(self.total_usage.clone()));

        if self.round.executed.is_empty() || self.forced_final {
            self.queued.push_back(StreamEvent::End);
            self.phase = Phase::Done;
            return;
        }

        self.push_round_messages();

        if self.step >= self.config.max_steps {
            self.request.messages.push(ChatMessage::system(FINAL_ANSWER_NOTICE));
            self.request.tools = None;
            self.request.tool_choice = Some(ToolChoice::None);
            self.forced_final = true;
        }

        self.round = RoundState::default();
        self.phase = Phase::StartRound;
    }

    /// Appends this round's assistant message and tool results to the
    /// conversation, in emission order.
    fn push_round_messages(&mut self) {
        let mut assistant_content: Vec<ContentBlock> = Vec::new();
        if !self.round.text.is_empty() {
            assistant_content.push(ContentBlock::Text(std::mem::take(&mut self.round.text)));
        }
        assistant_content.extend(
            self.round
                .executed
                .iter()
                .map(|(call, _)| ContentBlock::ToolCall(call.clone())),
        );
        self.request.messages.push(ChatMessage {
            role: ChatRole::Assistant,
            content: assistant_content,
            timestamp: None,
        });
        for (_, result) in &self.round.executed {
            self.request
                .messages
                .push(ChatMessage::tool_result_full(result.clone()));
        }
    }
}
