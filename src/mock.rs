//! Mock transport for testing.
//!
//! [`MockTransport`] is a queue-based fake that lets tests control
//! exactly what a transport returns — full responses for the batch path
//! and delta sequences for the streaming path — without any network.
//! Every call records its [`ChatRequest`] for later assertion.
//!
//! Clones share the same queues, so a test can keep a handle for
//! assertions after moving the transport into an `Arc<dyn DynTransport>`.
//!
//! # Why `MockFailure` instead of `FlowError`?
//!
//! [`FlowError`] is not `Clone` (some variants carry non-cloneable
//! payloads), so it can't sit in a queue. `MockFailure` mirrors the
//! variants tests need in cloneable form and converts at dequeue time.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use crate::chat::ChatResponse;
use crate::error::FlowError;
use crate::stream::{Delta, DeltaStream};
use crate::transport::{ChatRequest, Transport};

/// A queue-based mock transport for unit and integration tests.
///
/// # Panics
///
/// `send` panics when the response queue is empty; `stream` panics when
/// the stream queue is empty. An exhausted queue in a test is a test
/// bug, not a condition to handle.
#[derive(Clone)]
pub struct MockTransport {
    inner: Arc<Inner>,
}

struct Inner {
    responses: Mutex<VecDeque<Result<ChatResponse, MockFailure>>>,
    streams: Mutex<VecDeque<Result<Vec<Delta>, MockFailure>>>,
    requests: Mutex<Vec<ChatRequest>>,
}

/// Cloneable failure subset for mock queuing.
#[derive(Debug, Clone)]
pub enum MockFailure {
    /// Maps to [`FlowError::Transport`].
    Transport {
        /// HTTP status code, if any.
        status: Option<http::StatusCode>,
        /// Error message.
        message: String,
        /// Whether the transport layer would consider this retryable.
        retryable: bool,
    },
    /// Maps to [`FlowError::InvalidRequest`].
    InvalidRequest(String),
    /// Maps to [`FlowError::ResponseFormat`].
    ResponseFormat {
        /// What went wrong during parsing.
        message: String,
        /// The raw body.
        raw: String,
    },
}

impl MockFailure {
    fn into_flow_error(self) -> FlowError {
        match self {
            Self::Transport {
                status,
                message,
                retryable,
            } => FlowError::Transport {
                status,
                message,
                retryable,
            },
            Self::InvalidRequest(msg) => FlowError::InvalidRequest(msg),
            Self::ResponseFormat { message, raw } => FlowError::ResponseFormat { message, raw },
        }
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for MockTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockTransport")
            .field("queued_responses", &self.inner.responses.lock().unwrap().len())
            .field("queued_streams", &self.inner.streams.lock().unwrap().len())
            .field("recorded_requests", &self.inner.requests.lock().unwrap().len())
            .finish()
    }
}

impl MockTransport {
    /// Creates a mock with empty queues.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                responses: Mutex::new(VecDeque::new()),
                streams: Mutex::new(VecDeque::new()),
                requests: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Enqueues a successful response for the next `send` call.
    pub fn queue_response(&self, response: ChatResponse) -> &Self {
        self.inner.responses.lock().unwrap().push_back(Ok(response));
        self
    }

    /// Enqueues a failure for the next `send` call.
    pub fn queue_failure(&self, failure: MockFailure) -> &Self {
        self.inner.responses.lock().unwrap().push_back(Err(failure));
        self
    }

    /// Enqueues a delta sequence for the next `stream` call.
    pub fn queue_deltas(&self, deltas: Vec<Delta>) -> &Self {
        self.inner.streams.lock().unwrap().push_back(Ok(deltas));
        self
    }

    /// Enqueues a failure for the next `stream` call, returned before
    /// any delta is yielded (e.g. connection refused).
    pub fn queue_stream_failure(&self, failure: MockFailure) -> &Self {
        self.inner.streams.lock().unwrap().push_back(Err(failure));
        self
    }

    /// Returns every [`ChatRequest`] passed to `send` or `stream`, in
    /// call order.
    pub fn recorded_requests(&self) -> Vec<ChatRequest> {
        self.inner.requests.lock().unwrap().clone()
    }

    fn record(&self, request: &ChatRequest) {
        self.inner.requests.lock().unwrap().push(request.clone());
    }
}

impl Transport for MockTransport {
    async fn send(&self, request: &ChatRequest) -> Result<ChatResponse, FlowError> {
        self.record(request);
        let result = self
            .inner
            .responses
            .lock()
            .unwrap()
            .pop_front()
            .expect("MockTransport: no queued responses remaining");
        result.map_err(MockFailure::into_flow_error)
    }

    async fn stream(&self, request: &ChatRequest) -> Result<DeltaStream, FlowError> {
        self.record(request);
        let result = self
            .inner
            .streams
            .lock()
            .unwrap()
            .pop_front()
            .expect("MockTransport: no queued streams remaining");
        let deltas = result.map_err(MockFailure::into_flow_error)?;
        Ok(Box::pin(futures::stream::iter(deltas.into_iter().map(Ok))))
    }
}
