//! Tool result and error types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Error types for tool operations
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ToolError {
    #[error("Tool not found: {0}")]
    NotFound(String),

    #[error("Invalid parameters: {0}")]
    InvalidParameters(String),

    #[error("[{code}] {message}")]
    Failed { code: String, message: String },

    #[error("Timeout after {0} seconds")]
    Timeout(u64),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ToolError {
    /// Create a failure with a custom code
    pub fn failed(code: impl Into<String>, message: impl Into<String>) -> Self {
        ToolError::Failed {
            code: code.into(),
            message: message.into(),
        }
    }

    pub fn code(&self) -> &str {
        match self {
            ToolError::NotFound(_) => "TOOL_NOT_FOUND",
            ToolError::InvalidParameters(_) => "INVALID_PARAMETERS",
            ToolError::Failed { code, .. } => code,
            ToolError::Timeout(_) => "TIMEOUT",
            ToolError::Internal(_) => "TOOL_EXECUTION_ERROR",
        }
    }

    /// Message without the code prefix
    pub fn message(&self) -> String {
        match self {
            ToolError::Failed { message, .. } => message.clone(),
            other => other.to_string(),
        }
    }
}

/// Error detail attached to a failed tool result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolErrorInfo {
    pub code: String,
    pub message: String,
}

/// Timing information for one tool call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolMetrics {
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub latency_ms: u64,
}

impl ToolMetrics {
    /// Metrics for a call that started at `start_time` and ends now
    pub fn since(start_time: DateTime<Utc>) -> Self {
        let end_time = Utc::now();
        let latency_ms = (end_time - start_time).num_milliseconds().max(0) as u64;
        Self {
            start_time,
            end_time,
            latency_ms,
        }
    }

    /// Zero-length metrics, used for results that involved no call
    pub fn instant() -> Self {
        let now = Utc::now();
        Self {
            start_time: now,
            end_time: now,
            latency_ms: 0,
        }
    }
}

/// Outcome of a tool invocation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    pub success: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ToolErrorInfo>,

    pub metrics: ToolMetrics,
}

impl ToolResult {
    pub fn success(data: Option<Value>, metrics: ToolMetrics) -> Self {
        Self {
            success: true,
            data,
            error: None,
            metrics,
        }
    }

    pub fn failure(code: impl Into<String>, message: impl Into<String>, metrics: ToolMetrics) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(ToolErrorInfo {
                code: code.into(),
                message: message.into(),
            }),
            metrics,
        }
    }

    /// Normalize a tool error into a failed result
    pub fn from_error(error: &ToolError, metrics: ToolMetrics) -> Self {
        Self::failure(error.code(), error.message(), metrics)
    }
}
