//! Conversation types: messages, roles, content blocks, tool calls.
//!
//! A conversation is an ordered `Vec<ChatMessage>`. During a round the
//! orchestrator only appends to it; between rounds the history
//! compressor ([`crate::compress`]) may replace it wholesale.

use std::time::SystemTime;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::usage::Usage;

/// Who authored a message.
///
/// `Custom` covers provider-specific roles that don't map onto the
/// standard four (e.g. `"developer"`); the orchestrator treats custom
/// roles like user messages for compaction purposes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChatRole {
    /// The end user.
    User,
    /// The model.
    Assistant,
    /// System instructions.
    System,
    /// A tool-result message answering an assistant tool call.
    Tool,
    /// A provider-specific role, identified by name.
    Custom(String),
}

/// One message in a conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Who authored this message.
    pub role: ChatRole,
    /// The message body as an ordered list of content blocks.
    pub content: Vec<ContentBlock>,
    /// When the message was created. Only consulted by the
    /// `FromTimestamp` compression strategy; `None` everywhere else.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<SystemTime>,
}

/// One piece of message content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[non_exhaustive]
pub enum ContentBlock {
    /// Plain text.
    Text(String),
    /// A tool invocation requested by the model.
    ToolCall(ToolCall),
    /// The outcome of a tool invocation.
    ToolResult(ToolResult),
}

/// A tool invocation produced by the model.
///
/// `arguments` holds the parsed JSON value. While a call is still being
/// reassembled from stream deltas its argument *text* lives in the
/// per-stream scratch buffers, not here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Provider-assigned identifier linking the call to its result.
    pub id: String,
    /// Name of the tool to invoke.
    pub name: String,
    /// Parsed JSON arguments.
    pub arguments: Value,
}

/// The outcome of executing one tool call.
///
/// Exactly one result exists per emitted call. Failures are data, not
/// errors: a failed execution sets `is_error` and carries a diagnostic
/// in `content`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    /// The [`ToolCall::id`] this result answers.
    pub tool_call_id: String,
    /// Text content fed back to the model.
    pub content: String,
    /// Whether execution failed.
    pub is_error: bool,
}

/// Why the model stopped generating.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[non_exhaustive]
pub enum StopReason {
    /// Natural end of turn.
    EndTurn,
    /// The model wants tool results before continuing.
    ToolUse,
    /// The output token limit was hit.
    MaxTokens,
}

/// A complete model response for one round.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatResponse {
    /// Response content: text and/or tool-call blocks.
    pub content: Vec<ContentBlock>,
    /// Token usage for this round.
    pub usage: Usage,
    /// Why generation stopped.
    pub stop_reason: StopReason,
    /// The model that produced the response.
    pub model: String,
}

impl ChatMessage {
    /// Creates a user message with a single text block.
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: vec![ContentBlock::Text(text.into())],
            timestamp: None,
        }
    }

    /// Creates an assistant message with a single text block.
    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Assistant,
            content: vec![ContentBlock::Text(text.into())],
            timestamp: None,
        }
    }

    /// Creates a system message with a single text block.
    pub fn system(text: impl Into<String>) -> Self {
        Self {
            role: ChatRole::System,
            content: vec![ContentBlock::Text(text.into())],
            timestamp: None,
        }
    }

    /// Creates a message with a custom role.
    pub fn custom(role: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Custom(role.into()),
            content: vec![ContentBlock::Text(text.into())],
            timestamp: None,
        }
    }

    /// Creates a tool-result message from id and content.
    pub fn tool_result(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self::tool_result_full(ToolResult {
            tool_call_id: tool_call_id.into(),
            content: content.into(),
            is_error: false,
        })
    }

    /// Creates a tool-result message from a [`ToolResult`].
    pub fn tool_result_full(result: ToolResult) -> Self {
        Self {
            role: ChatRole::Tool,
            content: vec![ContentBlock::ToolResult(result)],
            timestamp: None,
        }
    }

    /// Returns the same message stamped with a creation time.
    #[must_use]
    pub fn with_timestamp(mut self, at: SystemTime) -> Self {
        self.timestamp = Some(at);
        self
    }

    /// Returns the first text block, if any.
    pub fn text(&self) -> Option<&str> {
        self.content.iter().find_map(|block| match block {
            ContentBlock::Text(t) => Some(t.as_str()),
            _ => None,
        })
    }

    /// Returns true for system-role messages.
    pub fn is_system(&self) -> bool {
        self.role == ChatRole::System
    }

    /// Concatenated length in bytes of all text-bearing content.
    ///
    /// Used by the compressor's token estimate.
    pub fn content_len(&self) -> usize {
        self.content
            .iter()
            .map(|block| match block {
                ContentBlock::Text(t) => t.len(),
                ContentBlock::ToolCall(c) => c.name.len() + c.arguments.to_string().len(),
                ContentBlock::ToolResult(r) => r.content.len(),
            })
            .sum()
    }
}

impl ChatResponse {
    /// A response with no content, zero usage, and `EndTurn`.
    pub fn empty() -> Self {
        Self {
            content: Vec::new(),
            usage: Usage::default(),
            stop_reason: StopReason::EndTurn,
            model: String::new(),
        }
    }

    /// Returns the first text block, if any.
    pub fn text(&self) -> Option<&str> {
        self.content.iter().find_map(|block| match block {
            ContentBlock::Text(t) => Some(t.as_str()),
            _ => None,
        })
    }

    /// Returns references to all tool-call blocks.
    pub fn tool_calls(&self) -> Vec<&ToolCall> {
        self.content
            .iter()
            .filter_map(|block| match block {
                ContentBlock::ToolCall(c) => Some(c),
                _ => None,
            })
            .collect()
    }

    /// Splits content into owned tool calls and the remaining blocks.
    pub fn partition_content(&self) -> (Vec<ToolCall>, Vec<ContentBlock>) {
        let mut calls = Vec::new();
        let mut rest = Vec::new();
        for block in &self.content {
            match block {
                ContentBlock::ToolCall(c) => calls.push(c.clone()),
                other => rest.push(other.clone()),
            }
        }
        (calls, rest)
    }
}
