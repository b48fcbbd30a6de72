//! The transport seam and request parameters.
//!
//! The orchestrator never talks to the network itself. Callers inject a
//! [`Transport`] with two operations: `send` for a full round-trip and
//! `stream` for incremental deltas. Wall-clock timeouts, retry on 429s,
//! authentication — all of that lives behind this seam; failures cross
//! it unchanged as [`FlowError::Transport`].
//!
//! # Object safety
//!
//! `Transport` uses native async-fn-in-traits and is therefore **not**
//! object-safe. For dynamic dispatch use [`DynTransport`] — every
//! `Transport` implements it via a blanket impl.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::chat::{ChatMessage, ChatResponse};
use crate::error::FlowError;
use crate::stream::DeltaStream;

/// The injected completion-endpoint abstraction.
pub trait Transport: Send + Sync {
    /// Sends a request and returns the complete response.
    fn send(
        &self,
        request: &ChatRequest,
    ) -> impl Future<Output = Result<ChatResponse, FlowError>> + Send;

    /// Sends a request and returns a stream of raw deltas.
    fn stream(
        &self,
        request: &ChatRequest,
    ) -> impl Future<Output = Result<DeltaStream, FlowError>> + Send;
}

/// Object-safe counterpart of [`Transport`] for dynamic dispatch.
///
/// You rarely implement this directly — the blanket
/// `impl<T: Transport> DynTransport for T` does it for you.
pub trait DynTransport: Send + Sync {
    /// Boxed-future version of [`Transport::send`].
    fn send_boxed<'a>(
        &'a self,
        request: &'a ChatRequest,
    ) -> Pin<Box<dyn Future<Output = Result<ChatResponse, FlowError>> + Send + 'a>>;

    /// Boxed-future version of [`Transport::stream`].
    fn stream_boxed<'a>(
        &'a self,
        request: &'a ChatRequest,
    ) -> Pin<Box<dyn Future<Output = Result<DeltaStream, FlowError>> + Send + 'a>>;
}

impl<T: Transport> DynTransport for T {
    fn send_boxed<'a>(
        &'a self,
        request: &'a ChatRequest,
    ) -> Pin<Box<dyn Future<Output = Result<ChatResponse, FlowError>> + Send + 'a>> {
        Box::pin(self.send(request))
    }

    fn stream_boxed<'a>(
        &'a self,
        request: &'a ChatRequest,
    ) -> Pin<Box<dyn Future<Output = Result<DeltaStream, FlowError>> + Send + 'a>> {
        Box::pin(self.stream(request))
    }
}

/// Parameters for one completion request.
///
/// Only [`messages`](Self::messages) is required; use struct-update
/// syntax for the rest:
///
/// ```rust
/// use toolflow::{ChatMessage, ChatRequest};
///
/// let request = ChatRequest {
///     messages: vec![ChatMessage::user("Hello")],
///     max_tokens: Some(256),
///     ..Default::default()
/// };
/// ```
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ChatRequest {
    /// The conversation history.
    pub messages: Vec<ChatMessage>,
    /// Tool definitions the model may invoke.
    pub tools: Option<Vec<ToolDefinition>>,
    /// Controls whether and how the model uses tools.
    pub tool_choice: Option<ToolChoice>,
    /// System prompt, for transports that accept it separately from
    /// the message list.
    pub system: Option<String>,
    /// Sampling temperature.
    pub temperature: Option<f32>,
    /// Upper bound on generated tokens.
    pub max_tokens: Option<u32>,
    /// JSON Schema the model's output must conform to.
    pub structured_output: Option<JsonSchema>,
    /// Arbitrary key-value pairs forwarded to the transport.
    pub metadata: HashMap<String, Value>,
}

/// Controls whether the model should use tools and, if so, which ones.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[non_exhaustive]
pub enum ToolChoice {
    /// The model decides whether to call a tool.
    Auto,
    /// The model must not call any tools.
    None,
    /// The model must call at least one tool.
    Required,
    /// The model must call this specific tool.
    Specific(String),
}

/// A tool the model can invoke during generation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    /// The tool's name, matched against [`ToolCall::name`](crate::ToolCall::name).
    pub name: String,
    /// Description shown to the model so it knows when to use the tool.
    pub description: String,
    /// JSON Schema describing the tool's expected input.
    pub parameters: JsonSchema,
    /// Optional automatic-retry configuration for failed executions.
    #[serde(skip)]
    pub retry: Option<ToolRetryConfig>,
}

/// Predicate deciding whether a tool error message is worth retrying.
pub type RetryPredicate = std::sync::Arc<dyn Fn(&str) -> bool + Send + Sync>;

/// Automatic retry with exponential backoff for failed tool executions.
///
/// Applied inside the registry, *before* the failure is folded into a
/// tool-result message — so from the loop's perspective a retried-then-
/// failed tool still looks like a single failed result.
#[derive(Clone)]
pub struct ToolRetryConfig {
    /// Maximum retry attempts (not counting the initial try). Default: 3.
    pub max_retries: u32,
    /// Backoff before the first retry. Default: 100ms.
    pub initial_backoff: Duration,
    /// Backoff cap. Default: 5s.
    pub max_backoff: Duration,
    /// Exponential growth factor. Default: 2.0.
    pub backoff_multiplier: f64,
    /// Jitter factor in `[0.0, 1.0]`. Default: 0.5.
    pub jitter: f64,
    /// Optional retryability predicate; `None` retries every error.
    pub retry_if: Option<RetryPredicate>,
}

impl Default for ToolRetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(5),
            backoff_multiplier: 2.0,
            jitter: 0.5,
            retry_if: None,
        }
    }
}

impl std::fmt::Debug for ToolRetryConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolRetryConfig")
            .field("max_retries", &self.max_retries)
            .field("initial_backoff", &self.initial_backoff)
            .field("max_backoff", &self.max_backoff)
            .field("backoff_multiplier", &self.backoff_multiplier)
            .field("jitter", &self.jitter)
            .field("has_retry_if", &self.retry_if.is_some())
            .finish()
    }
}

impl PartialEq for ToolRetryConfig {
    fn eq(&self, other: &Self) -> bool {
        self.max_retries == other.max_retries
            && self.initial_backoff == other.initial_backoff
            && self.max_backoff == other.max_backoff
            && self.backoff_multiplier == other.backoff_multiplier
            && self.jitter == other.jitter
            && self.retry_if.is_some() == other.retry_if.is_some()
    }
}

/// A JSON Schema document used for tool parameters or structured output.
///
/// Wraps a [`serde_json::Value`]; validation goes through the
/// [`jsonschema`] crate when the `schema` feature is enabled.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonSchema(Value);

impl JsonSchema {
    /// Creates a schema from a raw JSON value.
    pub fn new(schema: Value) -> Self {
        Self(schema)
    }

    /// Returns a reference to the underlying JSON value.
    pub fn as_value(&self) -> &Value {
        &self.0
    }

    /// Derives a schema from a Rust type implementing
    /// [`schemars::JsonSchema`].
    #[cfg(feature = "schema")]
    pub fn from_type<T: schemars::JsonSchema>() -> Result<Self, serde_json::Error> {
        let schema = schemars::schema_for!(T);
        let value = serde_json::to_value(schema)?;
        Ok(Self(value))
    }

    /// Validates `value` against this schema.
    ///
    /// Returns [`FlowError::SchemaValidation`] on failure, or
    /// [`FlowError::InvalidRequest`] if the schema itself is malformed.
    #[cfg(feature = "schema")]
    pub fn validate(&self, value: &Value) -> Result<(), FlowError> {
        let validator = jsonschema::validator_for(&self.0)
            .map_err(|e| FlowError::InvalidRequest(format!("invalid JSON schema: {e}")))?;
        let errors: Vec<String> = validator.iter_errors(value).map(|e| e.to_string()).collect();
        if errors.is_empty() {
            Ok(())
        } else {
            Err(FlowError::SchemaValidation {
                message: errors.join("; "),
                schema: self.0.clone(),
                actual: value.clone(),
            })
        }
    }
}
