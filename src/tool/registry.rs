//! Name-indexed tool registry with validation, retry, and dispatch.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;

use super::handler::ToolHandler;
use crate::chat::{ToolCall, ToolResult};
use crate::transport::{ToolDefinition, ToolRetryConfig};

/// A registry of tool handlers, indexed by name.
///
/// Generic over a context type `Ctx` passed to every handler on
/// execution (default `()`). Execution **always** produces a
/// [`ToolResult`] — unknown tools, schema violations, and handler
/// errors are folded into error-flagged results so the calling round
/// can continue.
pub struct ToolRegistry<Ctx = ()>
where
    Ctx: Send + Sync + 'static,
{
    handlers: HashMap<String, Arc<dyn ToolHandler<Ctx>>>,
}

impl<Ctx> Default for ToolRegistry<Ctx>
where
    Ctx: Send + Sync + 'static,
{
    fn default() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }
}

impl<Ctx> Clone for ToolRegistry<Ctx>
where
    Ctx: Send + Sync + 'static,
{
    /// Cheap clone — `Arc` pointers, not the handlers themselves.
    fn clone(&self) -> Self {
        Self {
            handlers: self.handlers.clone(),
        }
    }
}

impl<Ctx> std::fmt::Debug for ToolRegistry<Ctx>
where
    Ctx: Send + Sync + 'static,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolRegistry")
            .field("tools", &self.handlers.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl<Ctx: Send + Sync + 'static> ToolRegistry<Ctx> {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a handler, replacing any existing one with the same name.
    pub fn register(&mut self, handler: impl ToolHandler<Ctx> + 'static) -> &mut Self {
        let name = handler.definition().name.clone();
        self.handlers.insert(name, Arc::new(handler));
        self
    }

    /// Registers a shared handler.
    pub fn register_shared(&mut self, handler: Arc<dyn ToolHandler<Ctx>>) -> &mut Self {
        let name = handler.definition().name.clone();
        self.handlers.insert(name, handler);
        self
    }

    /// Returns the handler for the given tool name.
    pub fn get(&self, name: &str) -> Option<&Arc<dyn ToolHandler<Ctx>>> {
        self.handlers.get(name)
    }

    /// Returns whether a tool with the given name is registered.
    pub fn contains(&self, name: &str) -> bool {
        self.handlers.contains_key(name)
    }

    /// Returns the definitions of all registered tools.
    ///
    /// Pass this to [`ChatRequest::tools`](crate::ChatRequest::tools)
    /// so the model knows what it can call.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.handlers.values().map(|h| h.definition()).collect()
    }

    /// Returns the number of registered tools.
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    /// Returns true if no tools are registered.
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Executes a single tool call.
    ///
    /// 1. Looks up the handler by [`ToolCall::name`]
    /// 2. Validates arguments against the tool's parameter schema
    /// 3. Invokes the handler (with retry if the tool configures it)
    /// 4. Folds any failure into an error-flagged [`ToolResult`]
    pub async fn execute(&self, call: &ToolCall, ctx: &Ctx) -> ToolResult {
        let Some(handler) = self.handlers.get(&call.name) else {
            return ToolResult {
                tool_call_id: call.id.clone(),
                content: format!("Error: unknown tool '{}'", call.name),
                is_error: true,
            };
        };

        #[cfg(feature = "schema")]
        {
            let definition = handler.definition();
            if let Err(e) = definition.parameters.validate(&call.arguments) {
                return ToolResult {
                    tool_call_id: call.id.clone(),
                    content: format!("Error: invalid arguments for tool '{}': {e}", call.name),
                    is_error: true,
                };
            }
        }

        let retry = handler.definition().retry;
        let outcome = match retry {
            Some(config) => execute_with_retry(handler, call, ctx, &config).await,
            None => handler.execute(call.arguments.clone(), ctx).await,
        };

        match outcome {
            Ok(output) => ToolResult {
                tool_call_id: call.id.clone(),
                content: output.content,
                is_error: false,
            },
            Err(e) => ToolResult {
                tool_call_id: call.id.clone(),
                content: format!("Error: {}", e.message),
                is_error: true,
            },
        }
    }
}

/// Executes a handler with exponential-backoff retry.
async fn execute_with_retry<Ctx: Send + Sync + 'static>(
    handler: &Arc<dyn ToolHandler<Ctx>>,
    call: &ToolCall,
    ctx: &Ctx,
    config: &ToolRetryConfig,
) -> Result<super::handler::ToolOutput, super::handler::ToolError> {
    let mut attempt = 0u32;
    loop {
        match handler.execute(call.arguments.clone(), ctx).await {
            Ok(output) => return Ok(output),
            Err(e) => {
                let should_retry = config
                    .retry_if
                    .as_ref()
                    .is_none_or(|predicate| predicate(&e.message));
                if !should_retry || attempt >= config.max_retries {
                    return Err(e);
                }
                tokio::time::sleep(compute_backoff(config, attempt)).await;
                attempt += 1;
            }
        }
    }
}

/// Backoff with exponential growth and jitter:
/// `min(initial * multiplier^attempt, max) * random(1 - jitter, 1)`.
fn compute_backoff(config: &ToolRetryConfig, attempt: u32) -> Duration {
    // attempt is bounded by max_retries, far below i32::MAX
    #[allow(clippy::cast_possible_wrap)]
    let base =
        config.initial_backoff.as_secs_f64() * config.backoff_multiplier.powi(attempt as i32);
    let capped = base.min(config.max_backoff.as_secs_f64());

    let jitter_factor = if config.jitter > 0.0 {
        let min_factor = 1.0 - config.jitter;
        let mut rng = rand::rng();
        rng.random_range(min_factor..=1.0)
    } else {
        1.0
    };

    Duration::from_secs_f64(capped * jitter_factor)
}
