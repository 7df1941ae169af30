//! Test utility functions for tool-pipeline scenarios

use async_trait::async_trait;
use serde_json::{Map, Value};
use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, Once};
use std::time::Duration;
use tool_pipeline::core::{ExecutionState, ExecutionStatus};
use tool_pipeline::tool::{ToolError, ToolExecutor, ToolMetrics, ToolResult};

static TRACING: Once = Once::new();

/// Install a test-writer subscriber once; honours `RUST_LOG`
pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

/// One scripted tool reply
#[derive(Debug, Clone)]
pub enum Reply {
    /// Successful result carrying this data
    Ok(Value),
    /// Failed result with code and message
    Fail(&'static str, &'static str),
    /// The tool service itself errors
    Raise(ToolError),
}

/// A recorded tool call
#[derive(Debug, Clone)]
pub struct Call {
    pub tool: String,
    pub params: Map<String, Value>,
}

/// Mock tool service returning scripted replies per tool name
///
/// Scripted replies are consumed in order; once a tool's script runs out its
/// fallback reply (if any) is used. Calls to tools with neither raise
/// `ToolError::NotFound`.
#[derive(Default)]
pub struct MockTools {
    scripts: Mutex<HashMap<String, VecDeque<Reply>>>,
    fallbacks: HashMap<String, Reply>,
    calls: Mutex<Vec<Call>>,
    delay: Option<Duration>,
}

impl MockTools {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reply with `reply` whenever the script for `tool` is empty
    pub fn always(mut self, tool: &str, reply: Reply) -> Self {
        self.fallbacks.insert(tool.to_string(), reply);
        self
    }

    /// Queue replies for `tool`, used before its fallback
    pub fn script(self, tool: &str, replies: Vec<Reply>) -> Self {
        self.scripts
            .lock()
            .unwrap()
            .entry(tool.to_string())
            .or_default()
            .extend(replies);
        self
    }

    /// Add artificial delay to every call
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_to(&self, tool: &str) -> usize {
        self.calls().iter().filter(|c| c.tool == tool).count()
    }

    /// Parameters of every call to `tool`, in call order
    pub fn params_for(&self, tool: &str) -> Vec<Map<String, Value>> {
        self.calls()
            .into_iter()
            .filter(|c| c.tool == tool)
            .map(|c| c.params)
            .collect()
    }

    pub fn call_order(&self) -> Vec<String> {
        self.calls().into_iter().map(|c| c.tool).collect()
    }
}

#[async_trait]
impl ToolExecutor for MockTools {
    async fn execute(&self, name: &str, params: &Map<String, Value>) -> Result<ToolResult, ToolError> {
        self.calls.lock().unwrap().push(Call {
            tool: name.to_string(),
            params: params.clone(),
        });

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let scripted = self
            .scripts
            .lock()
            .unwrap()
            .get_mut(name)
            .and_then(|queue| queue.pop_front());
        let reply = scripted
            .or_else(|| self.fallbacks.get(name).cloned())
            .ok_or_else(|| ToolError::NotFound(name.to_string()))?;

        match reply {
            Reply::Ok(data) => Ok(ToolResult::success(Some(data), ToolMetrics::instant())),
            Reply::Fail(code, message) => Ok(ToolResult::failure(code, message, ToolMetrics::instant())),
            Reply::Raise(error) => Err(error),
        }
    }
}

pub fn assert_completed(state: &ExecutionState) {
    assert_eq!(
        state.status,
        ExecutionStatus::Completed,
        "expected completed, got {:?} (error: {:?})",
        state.status,
        state.error
    );
    assert!(state.error.is_none());
}

/// Assert the execution failed with the given error code
pub fn assert_failed_with(state: &ExecutionState, code: &str) {
    assert_eq!(state.status, ExecutionStatus::Failed, "expected failed, got {:?}", state.status);
    let error = state.error.as_ref().expect("failed execution carries an error");
    assert_eq!(error.code, code, "unexpected error: {:?}", error);
}

pub fn assert_path(state: &ExecutionState, expected: &[&str]) {
    let actual: Vec<&str> = state.execution_path.iter().map(String::as_str).collect();
    assert_eq!(actual, expected, "unexpected execution path");
}
