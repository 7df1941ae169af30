//! Pipeline store - CRUD, search, and JSON import/export over a backend

use crate::core::{Pipeline, PipelineDefinition, Step};
use crate::persistence::{InMemoryPersistence, PersistenceBackend};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Partial update for a stored pipeline; absent fields are left unchanged
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelinePatch {
    /// Accepted for payload compatibility; a stored pipeline keeps its id
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_step_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub steps: Option<BTreeMap<String, Step>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub global_state: Option<Map<String, Value>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on_complete: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on_error: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Map<String, Value>>,
}

impl PipelinePatch {
    /// Overwrite the fields present in the patch
    pub fn apply(self, pipeline: &mut Pipeline) {
        if let Some(name) = self.name {
            pipeline.name = name;
        }
        if let Some(description) = self.description {
            pipeline.description = description;
        }
        if let Some(start_step_id) = self.start_step_id {
            pipeline.start_step_id = start_step_id;
        }
        if let Some(mut steps) = self.steps {
            // Steps are looked up by key, so the key wins over any stated id
            for (key, step) in steps.iter_mut() {
                if step.id != *key {
                    if !step.id.is_empty() {
                        warn!("Step '{}' patched with id '{}'; keeping its key", key, step.id);
                    }
                    step.id = key.clone();
                }
            }
            pipeline.steps = steps;
        }
        if let Some(global_state) = self.global_state {
            pipeline.global_state = global_state;
        }
        if let Some(on_complete) = self.on_complete {
            pipeline.on_complete = Some(on_complete);
        }
        if let Some(on_error) = self.on_error {
            pipeline.on_error = Some(on_error);
        }
        if let Some(metadata) = self.metadata {
            pipeline.metadata = metadata;
        }
    }
}

/// Persists pipeline definitions, independent of any execution
pub struct PipelineStore<B> {
    backend: B,
}

impl PipelineStore<InMemoryPersistence> {
    pub fn in_memory() -> Self {
        Self::new(InMemoryPersistence::new())
    }
}

impl<B: PersistenceBackend> PipelineStore<B> {
    pub fn new(backend: B) -> Self {
        Self { backend }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Store a definition under a freshly generated id
    pub async fn create(&self, definition: PipelineDefinition) -> Result<Pipeline> {
        let pipeline = Pipeline::from_definition(Uuid::new_v4().to_string(), definition);
        self.backend
            .save_pipeline(&pipeline)
            .await
            .with_context(|| format!("Failed to create pipeline '{}'", pipeline.name))?;

        info!("Created pipeline {} ({})", pipeline.name, pipeline.id);
        Ok(pipeline)
    }

    pub async fn get(&self, id: &str) -> Result<Option<Pipeline>> {
        self.backend.load_pipeline(id).await
    }

    /// Apply a patch to a stored pipeline; `None` if the id is unknown
    pub async fn update(&self, id: &str, patch: PipelinePatch) -> Result<Option<Pipeline>> {
        let Some(mut pipeline) = self.backend.load_pipeline(id).await? else {
            return Ok(None);
        };

        if let Some(requested) = patch.id.as_deref() {
            if requested != id {
                debug!("Ignoring id '{}' in update of pipeline {}", requested, id);
            }
        }
        patch.apply(&mut pipeline);

        self.backend
            .save_pipeline(&pipeline)
            .await
            .with_context(|| format!("Failed to update pipeline {}", id))?;
        Ok(Some(pipeline))
    }

    /// Remove a pipeline; true iff it existed
    pub async fn delete(&self, id: &str) -> Result<bool> {
        self.backend.delete_pipeline(id).await
    }

    /// All pipelines, in insertion order
    pub async fn list(&self) -> Result<Vec<Pipeline>> {
        self.backend.list_pipelines().await
    }

    /// Case-insensitive substring search over name and description; an
    /// empty query returns everything
    pub async fn find(&self, query: &str) -> Result<Vec<Pipeline>> {
        let pipelines = self.backend.list_pipelines().await?;
        if query.is_empty() {
            return Ok(pipelines);
        }

        let needle = query.to_lowercase();
        Ok(pipelines
            .into_iter()
            .filter(|p| {
                p.name.to_lowercase().contains(&needle)
                    || p.description.to_lowercase().contains(&needle)
            })
            .collect())
    }

    /// Store a raw JSON definition under a new id
    ///
    /// Input missing `name`, `description`, `startStepId`, or a non-empty
    /// `steps` object, or that otherwise fails to decode, yields `None`. Any
    /// `id` in the input is ignored.
    pub async fn import_from_definition(&self, raw: &Value) -> Result<Option<Pipeline>> {
        if let Err(reason) = check_definition_shape(raw) {
            warn!("Rejected pipeline import: {}", reason);
            return Ok(None);
        }

        let definition: PipelineDefinition = match serde_json::from_value(raw.clone()) {
            Ok(definition) => definition,
            Err(e) => {
                warn!("Rejected pipeline import: {}", e);
                return Ok(None);
            }
        };

        self.create(definition).await.map(Some)
    }

    /// A detached JSON copy of a stored pipeline, id included
    pub async fn export_to_definition(&self, id: &str) -> Result<Option<Value>> {
        let Some(pipeline) = self.backend.load_pipeline(id).await? else {
            return Ok(None);
        };
        let value = serde_json::to_value(&pipeline)
            .with_context(|| format!("Failed to export pipeline {}", id))?;
        Ok(Some(value))
    }
}

fn check_definition_shape(raw: &Value) -> std::result::Result<(), &'static str> {
    let object = raw.as_object().ok_or("definition is not an object")?;

    for field in ["name", "description", "startStepId"] {
        if !object.get(field).is_some_and(Value::is_string) {
            return Err("missing name, description or startStepId");
        }
    }

    let steps = match object.get("steps").and_then(Value::as_object) {
        Some(steps) if !steps.is_empty() => steps,
        _ => return Err("steps must be a non-empty object"),
    };

    let mismatched = steps.iter().any(|(key, step)| {
        step.get("id")
            .and_then(Value::as_str)
            .is_some_and(|id| !id.is_empty() && id != key)
    });
    if mismatched {
        return Err("step id does not match its key");
    }
    Ok(())
}
