//! Execution state models

use crate::core::error::{ExecutionError, PipelineError};
use crate::core::pipeline::Pipeline;
use crate::tool::ToolResult;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use uuid::Uuid;

/// Overall execution status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    /// Steps are being advanced
    Running,
    /// Suspended at a human-gated step
    WaitingForHuman,
    /// Reached the end of the graph
    Completed,
    /// Stopped on an error or a rejection
    Failed,
}

impl ExecutionStatus {
    /// Completed and failed executions never change again
    pub fn is_terminal(&self) -> bool {
        matches!(self, ExecutionStatus::Completed | ExecutionStatus::Failed)
    }
}

/// Runtime record for one run of a pipeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionState {
    pub pipeline_id: String,

    /// Unique execution ID
    pub execution_id: Uuid,

    pub current_step_id: String,

    pub status: ExecutionStatus,

    /// Step id -> last tool result
    pub results: HashMap<String, ToolResult>,

    /// Mutable copy of the pipeline's global state
    pub global_state: Map<String, Value>,

    /// Step id -> current `for` counter
    pub loop_counters: HashMap<String, i64>,

    /// Step id -> iterations run so far, for every loop kind
    #[serde(default)]
    pub loop_iterations: HashMap<String, u32>,

    /// Visited step ids, in order
    pub execution_path: Vec<String>,

    pub start_time: DateTime<Utc>,

    pub last_update_time: DateTime<Utc>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ExecutionError>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub human_input: Option<Value>,
}

impl ExecutionState {
    /// Create the state for a fresh run, seeding global state from the
    /// pipeline and overlaying `initial_state`
    pub fn new(pipeline: &Pipeline, initial_state: Option<Map<String, Value>>) -> Self {
        let now = Utc::now();
        let mut global_state = pipeline.global_state.clone();
        if let Some(initial) = initial_state {
            global_state.extend(initial);
        }

        Self {
            pipeline_id: pipeline.id.clone(),
            execution_id: Uuid::new_v4(),
            current_step_id: pipeline.start_step_id.clone(),
            status: ExecutionStatus::Running,
            results: HashMap::new(),
            global_state,
            loop_counters: HashMap::new(),
            loop_iterations: HashMap::new(),
            execution_path: vec![pipeline.start_step_id.clone()],
            start_time: now,
            last_update_time: now,
            error: None,
            human_input: None,
        }
    }

    pub fn touch(&mut self) {
        self.last_update_time = Utc::now();
    }

    pub fn is_running(&self) -> bool {
        self.status == ExecutionStatus::Running
    }

    /// Move to a different step, recording it in the path
    pub fn move_to(&mut self, step_id: &str) {
        self.execution_path.push(step_id.to_string());
        self.current_step_id = step_id.to_string();
    }

    pub fn complete(&mut self) {
        self.status = ExecutionStatus::Completed;
        self.touch();
    }

    pub fn wait_for_human(&mut self) {
        self.status = ExecutionStatus::WaitingForHuman;
        self.touch();
    }

    /// Mark the execution failed, capturing the error against the current step
    pub fn fail(&mut self, error: &PipelineError) {
        let step_id = self.current_step_id.clone();
        self.status = ExecutionStatus::Failed;
        self.error = Some(ExecutionError::from_pipeline_error(error, Some(&step_id)));
        self.touch();
    }

    /// Shallow-merge keys into the global state
    pub fn merge_global_state(&mut self, modifications: Map<String, Value>) {
        self.global_state.extend(modifications);
    }

    /// Record a tool result, mirroring successful data into `globalState.lastResult`
    pub fn record_result(&mut self, step_id: &str, result: ToolResult) {
        if result.success {
            if let Some(data) = &result.data {
                self.global_state.insert("lastResult".to_string(), data.clone());
            }
        }
        self.results.insert(step_id.to_string(), result);
    }

    /// Drop loop bookkeeping for a step whose loop has exited
    pub fn reset_loop(&mut self, step_id: &str) {
        self.loop_counters.remove(step_id);
        self.loop_iterations.remove(step_id);
    }

    /// Results as a JSON object, for expression contexts
    pub fn results_value(&self) -> Value {
        serde_json::to_value(&self.results).unwrap_or(Value::Null)
    }
}
