//! Error types for building and running pipelines

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::condition::ExpressionError;

/// Errors raised while validating or running a pipeline
#[derive(Debug, Clone, Error, PartialEq)]
pub enum PipelineError {
    /// The pipeline graph is malformed
    #[error("Validation error: {0}")]
    Validation(String),

    /// A step id was referenced at run time but is not declared
    #[error("Step not found: {0}")]
    StepNotFound(String),

    /// A tool call failed after every allowed attempt
    #[error("Tool '{tool}' failed in step '{step_id}': [{code}] {message}")]
    ToolExecution {
        step_id: String,
        tool: String,
        code: String,
        message: String,
    },

    /// A human reviewer disapproved a gated step
    #[error("Step '{step_id}' was rejected by human reviewer{}", notes.as_deref().map(|n| format!(": {}", n)).unwrap_or_default())]
    HumanRejection {
        step_id: String,
        notes: Option<String>,
    },

    /// A condition or loop predicate could not be parsed or evaluated
    #[error("Expression error: {0}")]
    Expression(#[from] ExpressionError),

    /// The execution was cancelled by its owner
    #[error("Execution cancelled")]
    Cancelled,
}

impl PipelineError {
    /// Stable machine-readable code for this error kind
    pub fn code(&self) -> &'static str {
        match self {
            PipelineError::Validation(_) => "VALIDATION_ERROR",
            PipelineError::StepNotFound(_) => "STEP_NOT_FOUND",
            PipelineError::ToolExecution { .. } => "TOOL_EXECUTION_ERROR",
            PipelineError::HumanRejection { .. } => "HUMAN_REJECTION",
            PipelineError::Expression(_) => "EXPRESSION_ERROR",
            PipelineError::Cancelled => "CANCELLED",
        }
    }

    pub(crate) fn validation(message: impl Into<String>) -> Self {
        PipelineError::Validation(message.into())
    }
}

/// Error captured into an execution record when a run fails
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionError {
    pub code: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step_id: Option<String>,
}

impl ExecutionError {
    pub fn from_pipeline_error(error: &PipelineError, step_id: Option<&str>) -> Self {
        Self {
            code: error.code().to_string(),
            message: error.to_string(),
            step_id: step_id.map(str::to_string),
        }
    }
}
