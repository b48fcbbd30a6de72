//! Precedence-ordered history compaction.
//!
//! Conversations outgrow context windows; this module shrinks them
//! between rounds. Three stages apply in fixed precedence, each a no-op
//! when its parameter is absent, and each operating on the **previous
//! stage's output** — never the original history:
//!
//! 1. [`CompressionStrategy`] — delegates span summarization to an
//!    injected [`Summarizer`] (an external LLM call, not part of this
//!    crate), always preserving system messages.
//! 2. `max_tokens` — a coarse character-count budget.
//! 3. `max_history` — keep all system messages plus the last N others.
//!
//! Compression failures are fatal to the requesting call
//! ([`CompressionError`]): silently proceeding with an over-budget
//! history would defeat the caller's intent.

use std::future::Future;
use std::pin::Pin;
use std::time::SystemTime;

use tracing::debug;

use crate::chat::ChatMessage;
use crate::error::{CompressionError, FlowError};

/// How the strategy stage selects spans to summarize.
///
/// Stateless; selected per request.
#[derive(Debug, Clone, PartialEq)]
#[non_exhaustive]
pub enum CompressionStrategy {
    /// Summarize the whole history into one TL;DR, preserving system
    /// messages and the first user message.
    WholeHistory,
    /// Summarize only the last `n` non-system messages into a TL;DR,
    /// dropping everything older.
    LastNMessages(usize),
    /// Summarize consecutive chunks of `chunk_size` non-system messages
    /// into one TL;DR each.
    Chunked(usize),
    /// Summarize messages older than the given instant, keeping newer
    /// ones verbatim. Messages without a timestamp count as old.
    FromTimestamp(SystemTime),
    /// Like [`WholeHistory`](Self::WholeHistory), but preserves
    /// per-system-message segment boundaries: each span between system
    /// messages is summarized separately, in place.
    WholeHistoryMultipleSystemMessages,
}

/// The injected summarization step.
///
/// Implementations typically make their own LLM call. Object-safe via
/// boxed futures; for tests and simple cases wrap a closure with
/// [`FnSummarizer`].
pub trait Summarizer: Send + Sync {
    /// Produces a short summary of the given message span.
    fn summarize<'a>(
        &'a self,
        messages: &'a [ChatMessage],
    ) -> Pin<Box<dyn Future<Output = Result<String, FlowError>> + Send + 'a>>;
}

/// A [`Summarizer`] backed by an async closure.
pub struct FnSummarizer<F>(
    /// The wrapped closure.
    pub F,
);

impl<F, Fut> Summarizer for FnSummarizer<F>
where
    F: for<'c> Fn(&'c [ChatMessage]) -> Fut + Send + Sync,
    Fut: Future<Output = Result<String, FlowError>> + Send + 'static,
{
    fn summarize<'a>(
        &'a self,
        messages: &'a [ChatMessage],
    ) -> Pin<Box<dyn Future<Output = Result<String, FlowError>> + Send + 'a>> {
        Box::pin((self.0)(messages))
    }
}

/// Knobs for [`compress_history`], in precedence order.
#[derive(Debug, Clone, Default)]
pub struct CompressionOptions {
    /// Stage 1: span summarization strategy.
    pub strategy: Option<CompressionStrategy>,
    /// Stage 2: coarse token budget (estimated at four characters per
    /// token).
    pub max_tokens: Option<u32>,
    /// Stage 3: cap on non-system messages.
    pub max_history: Option<usize>,
}

/// Applies the configured stages to `messages`, strictly in order.
///
/// # Errors
///
/// - [`CompressionError::InvalidTokenLimit`] for a zero token budget.
/// - [`CompressionError::InsufficientHistory`] when the strategy has
///   nothing to operate on (zero-sized chunk/window, or no non-system
///   messages at all).
/// - [`CompressionError::CompressionFailed`] when the summarizer fails
///   or was not provided while a strategy is set.
pub async fn compress_history(
    messages: Vec<ChatMessage>,
    options: &CompressionOptions,
    summarizer: Option<&dyn Summarizer>,
) -> Result<Vec<ChatMessage>, FlowError> {
    let mut messages = messages;

    if let Some(strategy) = &options.strategy {
        let summarizer = summarizer.ok_or_else(|| {
            CompressionError::CompressionFailed(
                "a compression strategy requires a summarizer".into(),
            )
        })?;
        messages = apply_strategy(messages, strategy, summarizer).await?;
    }

    if let Some(max_tokens) = options.max_tokens {
        messages = apply_token_budget(messages, max_tokens)?;
    }

    if let Some(max_history) = options.max_history {
        messages = apply_history_cap(messages, max_history);
    }

    Ok(messages)
}

/// Estimates the token count of a message: content bytes over four.
pub fn estimate_tokens(message: &ChatMessage) -> u32 {
    u32::try_from(message.content_len() / 4).unwrap_or(u32::MAX)
}

// ── Stage 1: strategy ───────────────────────────────────────────────

async fn apply_strategy(
    messages: Vec<ChatMessage>,
    strategy: &CompressionStrategy,
    summarizer: &dyn Summarizer,
) -> Result<Vec<ChatMessage>, FlowError> {
    let non_system = messages.iter().filter(|m| !m.is_system()).count();

    match strategy {
        CompressionStrategy::WholeHistory => {
            if non_system == 0 {
                return Err(insufficient("no non-system messages to summarize"));
            }
            let first_user = messages
                .iter()
                .position(|m| m.role == crate::chat::ChatRole::User);
            let span: Vec<ChatMessage> = messages
                .iter()
                .enumerate()
                .filter(|(i, m)| !m.is_system() && Some(*i) != first_user)
                .map(|(_, m)| m.clone())
                .collect();

            let mut kept: Vec<ChatMessage> = messages
                .iter()
                .enumerate()
                .filter(|(i, m)| m.is_system() || Some(*i) == first_user)
                .map(|(_, m)| m.clone())
                .collect();
            if !span.is_empty() {
                kept.push(tldr(summarizer, &span).await?);
            }
            Ok(kept)
        }

        CompressionStrategy::LastNMessages(n) => {
            if *n == 0 {
                return Err(insufficient("LastNMessages window is zero"));
            }
            if non_system == 0 {
                return Err(insufficient("no non-system messages to summarize"));
            }
            let skip = non_system.saturating_sub(*n);
            let span: Vec<ChatMessage> = messages
                .iter()
                .filter(|m| !m.is_system())
                .skip(skip)
                .cloned()
                .collect();

            let mut kept: Vec<ChatMessage> =
                messages.iter().filter(|m| m.is_system()).cloned().collect();
            kept.push(tldr(summarizer, &span).await?);
            Ok(kept)
        }

        CompressionStrategy::Chunked(chunk_size) => {
            if *chunk_size == 0 {
                return Err(insufficient("chunk size is zero"));
            }
            if non_system == 0 {
                return Err(insufficient("no non-system messages to summarize"));
            }
            let spans: Vec<ChatMessage> =
                messages.iter().filter(|m| !m.is_system()).cloned().collect();

            let mut kept: Vec<ChatMessage> =
                messages.iter().filter(|m| m.is_system()).cloned().collect();
            for chunk in spans.chunks(*chunk_size) {
                kept.push(tldr(summarizer, chunk).await?);
            }
            Ok(kept)
        }

        CompressionStrategy::FromTimestamp(cutoff) => {
            let is_old = |m: &ChatMessage| {
                !m.is_system() && m.timestamp.is_none_or(|at| at < *cutoff)
            };
            let span: Vec<ChatMessage> = messages.iter().filter(|m| is_old(m)).cloned().collect();
            if span.is_empty() {
                // Nothing predates the cutoff; the stage is a no-op.
                return Ok(messages);
            }
            let summary = tldr(summarizer, &span).await?;

            let mut kept = Vec::with_capacity(messages.len() - span.len() + 1);
            let mut summary = Some(summary);
            for message in messages {
                if is_old(&message) {
                    // The TL;DR takes the position of the first old message.
                    if let Some(s) = summary.take() {
                        kept.push(s);
                    }
                } else {
                    kept.push(message);
                }
            }
            Ok(kept)
        }

        CompressionStrategy::WholeHistoryMultipleSystemMessages => {
            if non_system == 0 {
                return Err(insufficient("no non-system messages to summarize"));
            }
            // Summarize each span between system messages separately,
            // keeping the system messages in place as boundaries.
            let mut kept = Vec::new();
            let mut segment: Vec<ChatMessage> = Vec::new();
            for message in messages {
                if message.is_system() {
                    if !segment.is_empty() {
                        kept.push(tldr(summarizer, &segment).await?);
                        segment.clear();
                    }
                    kept.push(message);
                } else {
                    segment.push(message);
                }
            }
            if !segment.is_empty() {
                kept.push(tldr(summarizer, &segment).await?);
            }
            Ok(kept)
        }
    }
}

async fn tldr(summarizer: &dyn Summarizer, span: &[ChatMessage]) -> Result<ChatMessage, FlowError> {
    let summary = summarizer
        .summarize(span)
        .await
        .map_err(|e| CompressionError::CompressionFailed(e.to_string()))?;
    debug!(span_len = span.len(), "compressed span into summary");
    Ok(ChatMessage::assistant(format!("TL;DR: {summary}")))
}

fn insufficient(reason: &str) -> FlowError {
    CompressionError::InsufficientHistory(reason.into()).into()
}

// ── Stage 2: token budget ───────────────────────────────────────────

fn apply_token_budget(
    messages: Vec<ChatMessage>,
    max_tokens: u32,
) -> Result<Vec<ChatMessage>, FlowError> {
    if max_tokens == 0 {
        return Err(CompressionError::InvalidTokenLimit.into());
    }

    let estimate: u64 = messages.iter().map(|m| u64::from(estimate_tokens(m))).sum();
    if estimate <= u64::from(max_tokens) {
        return Ok(messages);
    }

    // Over budget: keep all system messages plus the most recent
    // non-system messages. The message count is the deliberate coarse
    // heuristic of one message per hundred tokens of budget.
    let keep = ((max_tokens / 100) as usize).max(1);
    debug!(estimate, max_tokens, keep, "history over token budget, trimming");
    Ok(keep_system_plus_recent(messages, keep))
}

// ── Stage 3: history cap ────────────────────────────────────────────

fn apply_history_cap(messages: Vec<ChatMessage>, max_history: usize) -> Vec<ChatMessage> {
    keep_system_plus_recent(messages, max_history)
}

/// Keeps every system message plus the last `keep` non-system messages,
/// preserving original order.
fn keep_system_plus_recent(messages: Vec<ChatMessage>, keep: usize) -> Vec<ChatMessage> {
    let non_system = messages.iter().filter(|m| !m.is_system()).count();
    let skip = non_system.saturating_sub(keep);

    let mut seen = 0usize;
    messages
        .into_iter()
        .filter(|m| {
            if m.is_system() {
                true
            } else {
                seen += 1;
                seen > skip
            }
        })
        .collect()
}
