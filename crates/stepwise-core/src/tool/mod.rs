//! Tool registry port.
//!
//! Concrete tools (mail, image generation, social media, ...) live outside
//! this crate. The engine reaches them only through `ToolRegistry`.

use serde_json::{Map, Value};
use stepwise_types::tool::{ToolContext, ToolResponse};
use thiserror::Error;

/// Errors raised by a registry before or while reaching a tool.
#[derive(Debug, Error)]
pub enum ToolError {
    #[error("no tool provides capability '{0}'")]
    NotFound(String),

    #[error("transport error: {0}")]
    Transport(String),
}

/// Dispatches capability invocations to concrete tools.
///
/// Uses RPITIT (native async fn in traits, Rust 2024 edition).
pub trait ToolRegistry: Send + Sync {
    /// Invoke `capability` with a resolved input map.
    ///
    /// A reachable tool that rejects the request reports it through
    /// `ToolResponse::success == false`, not through `Err`.
    fn execute(
        &self,
        capability: &str,
        input: Map<String, Value>,
        context: ToolContext,
    ) -> impl std::future::Future<Output = Result<ToolResponse, ToolError>> + Send;

    /// Declared input schema of a capability, if known.
    fn input_schema(
        &self,
        capability: &str,
    ) -> impl std::future::Future<Output = Option<Value>> + Send;
}

/// Registry that answers every capability by echoing its input back.
///
/// Used for dry-run previews: a run against it shows how each step's input
/// binds without touching real tools.
#[derive(Debug, Default, Clone)]
pub struct EchoToolRegistry;

impl ToolRegistry for EchoToolRegistry {
    async fn execute(
        &self,
        capability: &str,
        input: Map<String, Value>,
        context: ToolContext,
    ) -> Result<ToolResponse, ToolError> {
        tracing::debug!(
            capability,
            correlation_id = %context.correlation_id,
            "echo tool invoked"
        );
        Ok(ToolResponse::ok(Value::Object(input)))
    }

    async fn input_schema(&self, _capability: &str) -> Option<Value> {
        None
    }
}
