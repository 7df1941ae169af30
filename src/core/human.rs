//! Human-in-the-loop request/response contract

use crate::core::state::ExecutionState;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// Emitted when an execution suspends at a human-gated step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HumanInteractionRequest {
    pub execution_id: Uuid,
    pub step_id: String,
    pub prompt: String,
    /// Snapshot of the execution at the moment it suspended
    pub state: ExecutionState,
}

/// A reviewer's decision on a suspended execution
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HumanInteractionResponse {
    pub approved: bool,

    /// Arbitrary payload made visible to later steps
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input: Option<Value>,

    /// Keys merged into the execution's global state
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modifications: Option<Map<String, Value>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

impl HumanInteractionResponse {
    pub fn approve() -> Self {
        Self {
            approved: true,
            ..Self::default()
        }
    }

    pub fn reject(notes: impl Into<String>) -> Self {
        Self {
            approved: false,
            notes: Some(notes.into()),
            ..Self::default()
        }
    }

    pub fn with_input(mut self, input: Value) -> Self {
        self.input = Some(input);
        self
    }

    pub fn with_modification(mut self, key: impl Into<String>, value: Value) -> Self {
        self.modifications
            .get_or_insert_with(Map::new)
            .insert(key.into(), value);
        self
    }
}
