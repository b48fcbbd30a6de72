//! Unified error type for all orchestration operations.
//!
//! The orchestrator distinguishes sharply between two failure classes:
//!
//! - **Transport failures** are fatal and propagate unchanged — the
//!   crate performs no domain-level retry on them.
//! - **Tool failures** never surface as errors at all; they are folded
//!   into error-flagged tool-result messages so the round continues.
//!
//! Everything else (malformed responses, schema violations, exhausted
//! structured-output retries, compression problems) maps onto a
//! [`FlowError`] variant.

use serde_json::Value;

/// The unified error type returned by orchestration operations.
///
/// Variants are `#[non_exhaustive]` — always include a wildcard arm
/// when matching.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum FlowError {
    /// The injected transport failed (network, endpoint, protocol).
    ///
    /// `status` is `None` when no response was received at all.
    #[error("transport error (status={status:?}): {message}")]
    Transport {
        /// HTTP status code, if one was received.
        status: Option<http::StatusCode>,
        /// Human-readable description of the failure.
        message: String,
        /// Whether the *transport layer* may retry; this crate never does.
        retryable: bool,
    },

    /// The request was malformed (missing fields, invalid parameters).
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// The response body could not be parsed.
    #[error("response format error: {message}")]
    ResponseFormat {
        /// What went wrong during parsing.
        message: String,
        /// The raw content, for diagnostics.
        raw: String,
    },

    /// A value failed JSON Schema validation.
    #[error("schema validation error: {message}")]
    SchemaValidation {
        /// Concatenated validation error messages.
        message: String,
        /// The schema the value was validated against.
        schema: Value,
        /// The value that failed validation.
        actual: Value,
    },

    /// A structured-output request still failed validation after every
    /// permitted retry. Not recoverable without changing the request.
    #[error("structured output failed after {retries} retries: {message}")]
    StructuredOutput {
        /// How many retries were performed before giving up.
        retries: u32,
        /// The last raw content the model produced.
        raw: String,
        /// The final parse/validation error.
        message: String,
    },

    /// A history-compression stage could not proceed.
    #[error(transparent)]
    Compression(#[from] CompressionError),
}

/// Why a history-compression stage failed.
///
/// Compression failures are fatal to the call that requested them —
/// silently continuing with an uncompressed (possibly over-budget)
/// history would defeat the caller's intent.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum CompressionError {
    /// A token budget of zero was requested.
    #[error("token limit must be greater than zero")]
    InvalidTokenLimit,

    /// The summarization step failed or was not provided.
    #[error("compression failed: {0}")]
    CompressionFailed(String),

    /// The selected strategy has nothing it can operate on.
    #[error("insufficient history: {0}")]
    InsufficientHistory(String),
}

impl From<serde_json::Error> for FlowError {
    fn from(err: serde_json::Error) -> Self {
        Self::ResponseFormat {
            message: err.to_string(),
            raw: String::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_transport() {
        let err = FlowError::Transport {
            status: Some(http::StatusCode::TOO_MANY_REQUESTS),
            message: "rate limited".into(),
            retryable: true,
        };
        let display = format!("{err}");
        assert!(display.contains("429"));
        assert!(display.contains("rate limited"));
    }

    #[test]
    fn test_display_structured_output() {
        let err = FlowError::StructuredOutput {
            retries: 3,
            raw: "{\"oops\"".into(),
            message: "unexpected end of input".into(),
        };
        let display = format!("{err}");
        assert!(display.contains('3'));
        assert!(display.contains("unexpected end of input"));
    }

    #[test]
    fn test_display_compression_variants() {
        assert!(
            format!("{}", CompressionError::InvalidTokenLimit).contains("greater than zero")
        );
        assert!(
            format!("{}", CompressionError::CompressionFailed("llm down".into()))
                .contains("llm down")
        );
        assert!(
            format!("{}", CompressionError::InsufficientHistory("empty".into()))
                .contains("empty")
        );
    }

    #[test]
    fn test_compression_error_converts() {
        let err: FlowError = CompressionError::InvalidTokenLimit.into();
        assert!(matches!(
            err,
            FlowError::Compression(CompressionError::InvalidTokenLimit)
        ));
    }

    #[test]
    fn test_from_serde_json_error() {
        let json_err = serde_json::from_str::<Value>("not json").unwrap_err();
        let err: FlowError = json_err.into();
        assert!(matches!(err, FlowError::ResponseFormat { .. }));
    }

    #[test]
    fn test_error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<FlowError>();
    }
}
