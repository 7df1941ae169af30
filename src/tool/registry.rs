//! Name-keyed tool registry

use crate::tool::{ToolError, ToolExecutor, ToolMetrics, ToolResult};
use async_trait::async_trait;
use chrono::Utc;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// A single named unit of work
#[async_trait]
pub trait Tool: Send + Sync {
    /// Get the tool name
    fn name(&self) -> &str;

    /// Get a short description of what the tool does
    fn description(&self) -> &str {
        ""
    }

    /// Run the tool and return its output data
    async fn call(&self, params: &Map<String, Value>) -> Result<Value, ToolError>;
}

type ToolFn = dyn Fn(&Map<String, Value>) -> Result<Value, ToolError> + Send + Sync;

/// Adapts a synchronous closure into a [`Tool`]
pub struct FnTool {
    name: String,
    func: Box<ToolFn>,
}

impl FnTool {
    pub fn new<F>(name: impl Into<String>, func: F) -> Self
    where
        F: Fn(&Map<String, Value>) -> Result<Value, ToolError> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            func: Box::new(func),
        }
    }
}

#[async_trait]
impl Tool for FnTool {
    fn name(&self) -> &str {
        &self.name
    }

    async fn call(&self, params: &Map<String, Value>) -> Result<Value, ToolError> {
        (self.func)(params)
    }
}

/// Dispatches tool calls by name
#[derive(Clone, Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool under its own name, replacing any previous one
    pub fn register<T: Tool + 'static>(&mut self, tool: T) -> &mut Self {
        self.tools.insert(tool.name().to_string(), Arc::new(tool));
        self
    }

    /// Register a closure as a tool
    pub fn register_fn<F>(&mut self, name: impl Into<String>, func: F) -> &mut Self
    where
        F: Fn(&Map<String, Value>) -> Result<Value, ToolError> + Send + Sync + 'static,
    {
        self.register(FnTool::new(name, func))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// Registered tool names, sorted
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.keys().cloned().collect();
        names.sort();
        names
    }
}

impl fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ToolRegistry")
            .field("tools", &self.names())
            .finish()
    }
}

#[async_trait]
impl ToolExecutor for ToolRegistry {
    async fn execute(&self, name: &str, params: &Map<String, Value>) -> Result<ToolResult, ToolError> {
        let tool = self
            .tools
            .get(name)
            .ok_or_else(|| ToolError::NotFound(name.to_string()))?;

        let started = Utc::now();
        let outcome = tool.call(params).await;
        let metrics = ToolMetrics::since(started);
        debug!("Tool {} finished in {}ms", name, metrics.latency_ms);

        Ok(match outcome {
            Ok(Value::Null) => ToolResult::success(None, metrics),
            Ok(data) => ToolResult::success(Some(data), metrics),
            Err(e) => ToolResult::from_error(&e, metrics),
        })
    }
}
