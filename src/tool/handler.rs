//! Tool handler trait, outputs, errors, and closure adapters.

use std::future::Future;
use std::marker::PhantomData;
use std::pin::Pin;

use serde_json::Value;

use crate::transport::ToolDefinition;

/// A single tool the model can invoke.
///
/// Implement this trait directly for tools that need state or custom
/// lifetimes; for simple cases wrap a closure with [`tool_fn`] or
/// [`tool_fn_with_ctx`]. The trait is object-safe (boxed futures) so
/// handlers can be stored as `Arc<dyn ToolHandler<Ctx>>`.
///
/// `Ctx` is an application-supplied context passed by reference to
/// every execution (database handles, user identity, …). The default
/// is `()`.
pub trait ToolHandler<Ctx = ()>: Send + Sync {
    /// Returns the tool's definition (name, description, schema).
    fn definition(&self) -> ToolDefinition;

    /// Executes the tool with the given JSON arguments and context.
    ///
    /// Return text content for the model; callers with structured data
    /// should `serde_json::to_string()` it first.
    fn execute<'a>(
        &'a self,
        input: Value,
        ctx: &'a Ctx,
    ) -> Pin<Box<dyn Future<Output = Result<ToolOutput, ToolError>> + Send + 'a>>;
}

/// Output returned by a successful tool execution.
#[derive(Debug, Clone, Default)]
pub struct ToolOutput {
    /// The content to feed back to the model.
    pub content: String,
}

impl ToolOutput {
    /// Creates an output with the given content.
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
        }
    }
}

impl From<String> for ToolOutput {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

impl From<&str> for ToolOutput {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// Error returned by a tool execution.
///
/// Tool errors never escape the orchestrator — the registry folds them
/// into error-flagged tool results.
#[derive(Debug, thiserror::Error)]
#[error("{message}")]
pub struct ToolError {
    /// Human-readable error description.
    pub message: String,
}

impl ToolError {
    /// Creates a tool error with the given message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Wraps a context-free async closure as a [`ToolHandler`].
///
/// ```rust
/// use toolflow::tool::tool_fn;
/// use toolflow::{JsonSchema, ToolDefinition};
/// use serde_json::{Value, json};
///
/// let handler = tool_fn(
///     ToolDefinition {
///         name: "echo".into(),
///         description: "Echo the input".into(),
///         parameters: JsonSchema::new(json!({"type": "object"})),
///         retry: None,
///     },
///     |input: Value| async move { Ok(input.to_string()) },
/// );
/// ```
pub fn tool_fn<F, Fut, O>(definition: ToolDefinition, handler: F) -> NoCtxToolHandler<F>
where
    F: Fn(Value) -> Fut + Send + Sync,
    Fut: Future<Output = Result<O, ToolError>> + Send + 'static,
    O: Into<ToolOutput> + Send + 'static,
{
    NoCtxToolHandler {
        definition,
        handler,
    }
}

/// Wraps a context-taking async closure as a [`ToolHandler<Ctx>`].
///
/// The closure uses higher-ranked bounds (`for<'c> Fn(Value, &'c Ctx)`),
/// so the returned future must be `'static`: clone whatever you need
/// from the context before entering the async block.
pub fn tool_fn_with_ctx<Ctx, F, Fut, O>(
    definition: ToolDefinition,
    handler: F,
) -> FnToolHandler<Ctx, F>
where
    Ctx: Send + Sync + 'static,
    F: for<'c> Fn(Value, &'c Ctx) -> Fut + Send + Sync,
    Fut: Future<Output = Result<O, ToolError>> + Send + 'static,
    O: Into<ToolOutput> + Send + 'static,
{
    FnToolHandler {
        definition,
        handler,
        _ctx: PhantomData,
    }
}

/// A tool handler backed by a context-taking async closure.
pub struct FnToolHandler<Ctx, F> {
    definition: ToolDefinition,
    handler: F,
    _ctx: PhantomData<fn(&Ctx)>,
}

impl<Ctx, F> std::fmt::Debug for FnToolHandler<Ctx, F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnToolHandler")
            .field("name", &self.definition.name)
            .finish_non_exhaustive()
    }
}

impl<Ctx, F, Fut, O> ToolHandler<Ctx> for FnToolHandler<Ctx, F>
where
    Ctx: Send + Sync + 'static,
    F: for<'c> Fn(Value, &'c Ctx) -> Fut + Send + Sync,
    Fut: Future<Output = Result<O, ToolError>> + Send + 'static,
    O: Into<ToolOutput> + Send + 'static,
{
    fn definition(&self) -> ToolDefinition {
        self.definition.clone()
    }

    fn execute<'a>(
        &'a self,
        input: Value,
        ctx: &'a Ctx,
    ) -> Pin<Box<dyn Future<Output = Result<ToolOutput, ToolError>> + Send + 'a>> {
        let fut = (self.handler)(input, ctx);
        Box::pin(async move { fut.await.map(Into::into) })
    }
}

/// A tool handler backed by a context-free async closure.
pub struct NoCtxToolHandler<F> {
    definition: ToolDefinition,
    handler: F,
}

impl<F> std::fmt::Debug for NoCtxToolHandler<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NoCtxToolHandler")
            .field("name", &self.definition.name)
            .finish_non_exhaustive()
    }
}

impl<F, Fut, O> ToolHandler<()> for NoCtxToolHandler<F>
where
    F: Fn(Value) -> Fut + Send + Sync,
    Fut: Future<Output = Result<O, ToolError>> + Send + 'static,
    O: Into<ToolOutput> + Send + 'static,
{
    fn definition(&self) -> ToolDefinition {
        self.definition.clone()
    }

    fn execute<'a>(
        &'a self,
        input: Value,
        _ctx: &'a (),
    ) -> Pin<Box<dyn Future<Output = Result<ToolOutput, ToolError>> + Send + 'a>> {
        let fut = (self.handler)(input);
        Box::pin(async move { fut.await.map(Into::into) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::JsonSchema;
    use serde_json::json;

    fn echo_definition() -> ToolDefinition {
        ToolDefinition {
            name: "echo".into(),
            description: "Echo the input".into(),
            parameters: JsonSchema::new(json!({"type": "object"})),
            retry: None,
        }
    }

    #[tokio::test]
    async fn test_tool_fn_executes_closure() {
        let handler = tool_fn(echo_definition(), |input: Value| async move {
            Ok(input["msg"].as_str().unwrap_or("").to_string())
        });
        let out = handler
            .execute(json!({"msg": "hi"}), &())
            .await
            .unwrap();
        assert_eq!(out.content, "hi");
    }

    #[tokio::test]
    async fn test_tool_fn_with_ctx_reads_context() {
        struct Ctx {
            prefix: String,
        }
        let handler = tool_fn_with_ctx(echo_definition(), |input: Value, ctx: &Ctx| {
            let prefix = ctx.prefix.clone();
            async move { Ok(format!("{prefix}{}", input["msg"].as_str().unwrap_or(""))) }
        });
        let ctx = Ctx {
            prefix: ">> ".into(),
        };
        let out = handler.execute(json!({"msg": "hi"}), &ctx).await.unwrap();
        assert_eq!(out.content, ">> hi");
    }

    #[tokio::test]
    async fn test_tool_error_propagates_message() {
        let handler = tool_fn(echo_definition(), |_input: Value| async move {
            Err::<String, _>(ToolError::new("boom"))
        });
        let err = handler.execute(json!({}), &()).await.unwrap_err();
        assert_eq!(err.message, "boom");
    }

    #[test]
    fn test_handler_definition_clones() {
        let handler = tool_fn(echo_definition(), |_: Value| async move {
            Ok(String::new())
        });
        assert_eq!(handler.definition().name, "echo");
    }

    #[test]
    fn test_tool_output_from_impls() {
        let a: ToolOutput = "x".into();
        let b: ToolOutput = String::from("x").into();
        assert_eq!(a.content, b.content);
    }
}
