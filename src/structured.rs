//! Structured output — typed responses with schema validation and
//! bounded retry.
//!
//! Wraps either orchestration loop: the schema derived from `T` is set
//! on the request, the full loop runs (tools included), and the final
//! assistant content is parsed, validated, and deserialized. When the
//! model's output fails validation, the failed output and a corrective
//! user message are appended to the history and the whole round re-runs
//! — up to [`StructuredConfig::max_retries`] times, carrying all
//! previously accumulated usage forward. Exhausting the retry budget is
//! terminal: the caller gets [`FlowError::StructuredOutput`] with the
//! last raw content, and cannot recover without changing the request.
//!
//! # Example
//!
//! ```rust,no_run
//! use toolflow::structured::{StructuredConfig, generate_structured};
//! use toolflow::tool::ToolRegistry;
//! use toolflow::{ChatMessage, ChatRequest};
//! use serde::Deserialize;
//!
//! #[derive(Deserialize, schemars::JsonSchema)]
//! struct Person {
//!     name: String,
//!     age: u32,
//! }
//!
//! # async fn example(transport: &dyn toolflow::DynTransport) -> Result<(), toolflow::FlowError> {
//! let registry: ToolRegistry<()> = ToolRegistry::new();
//! let request = ChatRequest {
//!     messages: vec![ChatMessage::user("Generate a person named Alice aged 30")],
//!     ..Default::default()
//! };
//! let result = generate_structured::<Person, ()>(
//!     transport,
//!     &registry,
//!     request,
//!     StructuredConfig::default(),
//!     &(),
//! )
//! .await?;
//! assert_eq!(result.value.name, "Alice");
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use futures::StreamExt;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::chat::ChatMessage;
use crate::error::FlowError;
use crate::stream::StreamEvent;
use crate::tool::{LoopConfig, ToolRegistry, run_loop, stream_loop};
use crate::transport::{ChatRequest, DynTransport, JsonSchema};
use crate::usage::Usage;

/// Configuration for [`generate_structured`] and [`stream_structured`].
#[derive(Debug, Clone)]
pub struct StructuredConfig {
    /// Maximum corrective retries after the initial attempt. Default: 3.
    pub max_retries: u32,
    /// Loop configuration for each attempt.
    pub loop_config: LoopConfig,
}

impl Default for StructuredConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            loop_config: LoopConfig::default(),
        }
    }
}

/// The outcome of a successful structured request.
#[derive(Debug)]
pub struct StructuredResult<T> {
    /// The deserialized, validated value.
    pub value: T,
    /// The raw JSON the model produced on the successful attempt.
    pub raw_json: String,
    /// Usage accumulated across the successful attempt and all retries.
    pub usage: Usage,
    /// How many retries were performed (0 = first attempt succeeded).
    pub retries: u32,
}

/// Generates a typed value via the batch loop.
///
/// # Errors
///
/// - [`FlowError::StructuredOutput`] once `max_retries` corrective
///   attempts have failed.
/// - Transport failures propagate immediately, without retry.
pub async fn generate_structured<T, Ctx>(
    transport: &dyn DynTransport,
    registry: &ToolRegistry<Ctx>,
    mut request: ChatRequest,
    config: StructuredConfig,
    ctx: &Ctx,
) -> Result<StructuredResult<T>, FlowError>
where
    T: DeserializeOwned + schemars::JsonSchema,
    Ctx: Send + Sync + 'static,
{
    let schema = JsonSchema::from_type::<T>()
        .map_err(|e| FlowError::InvalidRequest(format!("failed to derive JSON schema: {e}")))?;
    request.structured_output = Some(schema.clone());

    let mut total_usage = Usage::default();
    let mut retries = 0u32;

    loop {
        let outcome = run_loop(
            transport,
            registry,
            request.clone(),
            config.loop_config.clone(),
            ctx,
        )
        .await?;
        total_usage += &outcome.total_usage;

        let raw = outcome.response.text().unwrap_or_default().to_string();
        match parse_and_validate::<T>(&raw, &schema) {
            Ok(value) => {
                return Ok(StructuredResult {
                    value,
                    raw_json: raw,
                    usage: total_usage,
                    retries,
                });
            }
            Err(e) => {
                if retries >= config.max_retries {
                    return Err(FlowError::StructuredOutput {
                        retries,
                        raw,
                        message: e.to_string(),
                    });
                }
                append_retry_feedback(&mut request, &raw, &e);
                retries += 1;
            }
        }
    }
}

/// Generates a typed value via the streaming loop.
///
/// Drives [`stream_loop`] to completion, takes the last recovered
/// [`StreamEvent::Object`], and applies the same validate-and-retry
/// policy as [`generate_structured`].
pub async fn stream_structured<T, Ctx>(
    transport: Arc<dyn DynTransport>,
    registry: Arc<ToolRegistry<Ctx>>,
    mut request: ChatRequest,
    config: StructuredConfig,
    ctx: Arc<Ctx>,
) -> Result<StructuredResult<T>, FlowError>
where
    T: DeserializeOwned + schemars::JsonSchema,
    Ctx: Send + Sync + 'static,
{
    let schema = JsonSchema::from_type::<T>()
        .map_err(|e| FlowError::InvalidRequest(format!("failed to derive JSON schema: {e}")))?;
    request.structured_output = Some(schema.clone());

    let mut total_usage = Usage::default();
    let mut retries = 0u32;

    loop {
        let mut stream = stream_loop(
            Arc::clone(&transport),
            Arc::clone(&registry),
            request.clone(),
            config.loop_config.clone(),
            Arc::clone(&ctx),
        );

        let mut last_object: Option<Value> = None;
        let mut last_metadata = Usage::default();
        while let Some(event) = stream.next().await {
            match event? {
                StreamEvent::Object(value) => last_object = Some(value),
                StreamEvent::Metadata(usage) => last_metadata = usage,
                _ => {}
            }
        }
        total_usage += &last_metadata;

        let raw = last_object
            .as_ref()
            .map(Value::to_string)
            .unwrap_or_default();
        let parsed = match last_object {
            Some(value) => validate_value::<T>(value, &schema),
            None => Err(FlowError::ResponseFormat {
                message: "no JSON object recovered from structured stream".into(),
                raw: String::new(),
            }),
        };

        match parsed {
            Ok(value) => {
                return Ok(StructuredResult {
                    value,
                    raw_json: raw,
                    usage: total_usage,
                    retries,
                });
            }
            Err(e) => {
                if retries >= config.max_retries {
                    return Err(FlowError::StructuredOutput {
                        retries,
                        raw,
                        message: e.to_string(),
                    });
                }
                append_retry_feedback(&mut request, &raw, &e);
                retries += 1;
            }
        }
    }
}

/// Parses `raw` as JSON, validates it, and deserializes to `T`.
fn parse_and_validate<T: DeserializeOwned>(
    raw: &str,
    schema: &JsonSchema,
) -> Result<T, FlowError> {
    if raw.is_empty() {
        return Err(FlowError::ResponseFormat {
            message: "model returned no text content for structured output".into(),
            raw: String::new(),
        });
    }
    let value: Value = serde_json::from_str(raw).map_err(|e| FlowError::ResponseFormat {
        message: format!("invalid JSON in structured output: {e}"),
        raw: raw.to_string(),
    })?;
    validate_value(value, schema)
}

/// Validates an already-parsed value and deserializes to `T`.
fn validate_value<T: DeserializeOwned>(value: Value, schema: &JsonSchema) -> Result<T, FlowError> {
    schema.validate(&value)?;
    serde_json::from_value(value.clone()).map_err(|e| FlowError::ResponseFormat {
        message: format!("failed to deserialize structured output: {e}"),
        raw: value.to_string(),
    })
}

/// Appends the failed output and a corrective user message so the model
/// can self-correct on the next attempt.
fn append_retry_feedback(request: &mut ChatRequest, raw: &str, error: &FlowError) {
    request.messages.push(ChatMessage::assistant(raw));
    request.messages.push(ChatMessage::user(format!(
        "Your response did not pass validation: {error}\n\
         Respond again with valid JSON that conforms to the schema."
    )));
}
