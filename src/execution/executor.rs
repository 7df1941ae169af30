//! Step executor - resolves parameters and invokes tools with retries

use crate::{
    core::{
        config::EngineConfig,
        context::resolve_path,
        state::ExecutionState,
        step::{ParameterBinding, Step},
    },
    tool::{ToolError, ToolExecutor, ToolMetrics, ToolResult},
};
use chrono::Utc;
use serde_json::{Map, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::time::{sleep, timeout, Duration};
use tracing::{debug, error, info, warn};

/// Outcome of invoking a step's tool, after retries
#[derive(Debug, Clone)]
pub struct Invocation {
    /// The last attempt's result
    pub result: ToolResult,

    /// Attempts actually made
    pub attempts: u32,

    /// Set when cancellation stopped further attempts
    pub cancelled: bool,
}

/// Called before each retry with the upcoming attempt number and the
/// result that triggered it
pub type RetryCallback<'a> = &'a (dyn Fn(u32, &ToolResult) + Send + Sync);

/// Executes the tool bound to a single step
pub struct StepExecutor<T> {
    tools: T,
    config: EngineConfig,
}

impl<T: ToolExecutor> StepExecutor<T> {
    pub fn new(tools: T, config: EngineConfig) -> Self {
        Self { tools, config }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Build the parameter set for a step
    ///
    /// Dynamic bindings whose source step has no result, no data, or no value
    /// at the path are left out. `globalState` is always added.
    pub fn resolve_parameters(step: &Step, state: &ExecutionState) -> Map<String, Value> {
        let mut params = Map::new();

        for (name, binding) in &step.parameters {
            match binding {
                ParameterBinding::Static { value } => {
                    params.insert(name.clone(), value.clone());
                }
                ParameterBinding::Dynamic {
                    source_step_id,
                    output_path,
                } => {
                    let resolved = state
                        .results
                        .get(source_step_id)
                        .and_then(|r| r.data.as_ref())
                        .and_then(|data| resolve_path(data, output_path));

                    match resolved {
                        Some(value) => {
                            params.insert(name.clone(), value.clone());
                        }
                        None => debug!(
                            "Parameter {} of step {} unresolved ({}.{})",
                            name, step.id, source_step_id, output_path
                        ),
                    }
                }
            }
        }

        params.insert(
            "globalState".to_string(),
            Value::Object(state.global_state.clone()),
        );
        params
    }

    /// Invoke the step's tool, retrying up to `maxRetries + 1` attempts and
    /// stopping on the first success or when `cancelled` is raised
    pub async fn execute(
        &self,
        step: &Step,
        params: &Map<String, Value>,
        cancelled: &AtomicBool,
        on_retry: Option<RetryCallback<'_>>,
    ) -> Invocation {
        let max_attempts = step
            .max_retries
            .unwrap_or(self.config.default_max_retries)
            .saturating_add(1);
        let timeout_secs = step.timeout_secs.unwrap_or(self.config.default_timeout_secs);

        info!("Executing step: {} (tool {})", step.id, step.tool_name);

        let mut attempt = 1;
        loop {
            let result = self.call_tool(&step.tool_name, params, timeout_secs).await;

            if result.success {
                debug!("Step {} succeeded on attempt {}", step.id, attempt);
                return Invocation {
                    result,
                    attempts: attempt,
                    cancelled: false,
                };
            }

            let message = result
                .error
                .as_ref()
                .map(|e| e.message.clone())
                .unwrap_or_default();

            if attempt >= max_attempts {
                error!(
                    "Step {} failed after {} attempt(s): {}",
                    step.id, attempt, message
                );
                return Invocation {
                    result,
                    attempts: attempt,
                    cancelled: false,
                };
            }

            if cancelled.load(Ordering::SeqCst) {
                info!("Step {} cancelled before retry", step.id);
                return Invocation {
                    result,
                    attempts: attempt,
                    cancelled: true,
                };
            }

            warn!(
                "Step {} attempt {}/{} failed: {}",
                step.id, attempt, max_attempts, message
            );
            attempt += 1;
            if let Some(callback) = on_retry {
                callback(attempt, &result);
            }

            if self.config.retry_delay_ms > 0 {
                sleep(Duration::from_millis(self.config.retry_delay_ms)).await;
            }
        }
    }

    /// One bounded call to the tool service; every error becomes a failed result
    pub async fn call_tool(
        &self,
        tool_name: &str,
        params: &Map<String, Value>,
        timeout_secs: u64,
    ) -> ToolResult {
        let start = Utc::now();
        match timeout(
            Duration::from_secs(timeout_secs),
            self.tools.execute(tool_name, params),
        )
        .await
        {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => {
                debug!("Tool {} raised: {}", tool_name, e);
                ToolResult::from_error(&e, ToolMetrics::since(start))
            }
            Err(_) => {
                warn!("Tool {} timed out after {}s", tool_name, timeout_secs);
                ToolResult::from_error(&ToolError::Timeout(timeout_secs), ToolMetrics::since(start))
            }
        }
    }
}
