//! Tool invocation contract
//!
//! The engine only talks to tools through [`ToolExecutor`]. [`ToolRegistry`]
//! is a ready-made implementation that dispatches by name to registered
//! [`Tool`]s.

pub mod registry;
pub mod result;

use async_trait::async_trait;
use serde_json::{Map, Value};
use std::sync::Arc;

pub use registry::{FnTool, Tool, ToolRegistry};
pub use result::{ToolError, ToolErrorInfo, ToolMetrics, ToolResult};

/// Trait for tool execution - allows for different implementations
#[async_trait]
pub trait ToolExecutor: Send + Sync {
    /// Invoke the named tool with resolved parameters
    async fn execute(&self, name: &str, params: &Map<String, Value>) -> Result<ToolResult, ToolError>;
}

#[async_trait]
impl<T: ToolExecutor + ?Sized> ToolExecutor for Arc<T> {
    async fn execute(&self, name: &str, params: &Map<String, Value>) -> Result<ToolResult, ToolError> {
        (**self).execute(name, params).await
    }
}
