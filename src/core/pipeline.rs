//! Pipeline domain model

use crate::core::step::Step;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// A stored pipeline definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Pipeline {
    /// Unique pipeline identifier
    pub id: String,

    pub name: String,

    #[serde(default)]
    pub description: String,

    /// Entry point of the graph
    pub start_step_id: String,

    /// Step id -> step
    pub steps: BTreeMap<String, Step>,

    /// Shared key/value state visible to every step
    #[serde(default)]
    pub global_state: Map<String, Value>,

    /// Tool invoked once when an execution completes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on_complete: Option<String>,

    /// Tool invoked once when an execution fails
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on_error: Option<String>,

    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub metadata: Map<String, Value>,
}

/// A pipeline without an id: the JSON/YAML interchange shape
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineDefinition {
    pub name: String,

    #[serde(default)]
    pub description: String,

    pub start_step_id: String,

    pub steps: BTreeMap<String, Step>,

    #[serde(default)]
    pub global_state: Map<String, Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on_complete: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on_error: Option<String>,

    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub metadata: Map<String, Value>,
}

impl Pipeline {
    /// Attach an id to a definition
    pub fn from_definition(id: impl Into<String>, definition: PipelineDefinition) -> Self {
        let mut definition = definition;
        definition.fill_step_ids();
        Self {
            id: id.into(),
            name: definition.name,
            description: definition.description,
            start_step_id: definition.start_step_id,
            steps: definition.steps,
            global_state: definition.global_state,
            on_complete: definition.on_complete,
            on_error: definition.on_error,
            metadata: definition.metadata,
        }
    }

    /// Drop the id, keeping everything else
    pub fn into_definition(self) -> PipelineDefinition {
        PipelineDefinition {
            name: self.name,
            description: self.description,
            start_step_id: self.start_step_id,
            steps: self.steps,
            global_state: self.global_state,
            on_complete: self.on_complete,
            on_error: self.on_error,
            metadata: self.metadata,
        }
    }

    pub fn to_definition(&self) -> PipelineDefinition {
        self.clone().into_definition()
    }

    /// Get a step by ID
    pub fn step(&self, id: &str) -> Option<&Step> {
        self.steps.get(id)
    }

    /// Get a mutable step by ID
    pub fn step_mut(&mut self, id: &str) -> Option<&mut Step> {
        self.steps.get_mut(id)
    }
}

impl PipelineDefinition {
    /// Steps declared without an id take the id of their map key
    pub fn fill_step_ids(&mut self) {
        for (key, step) in self.steps.iter_mut() {
            if step.id.is_empty() {
                step.id = key.clone();
            }
        }
    }
}
