//! Fluent construction and structural validation of pipelines

use crate::core::{
    condition::Expression,
    error::PipelineError,
    pipeline::{Pipeline, PipelineDefinition},
    step::{ConditionalBranch, LoopControl, ParameterBinding, Step, END_STEP},
};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use tracing::warn;
use uuid::Uuid;

/// Builds a [`Pipeline`], rejecting malformed graphs
#[derive(Debug, Clone, Default)]
pub struct PipelineBuilder {
    id: Option<String>,
    name: String,
    description: String,
    start_step_id: Option<String>,
    steps: BTreeMap<String, Step>,
    duplicate_ids: Vec<String>,
    global_state: Map<String, Value>,
    on_complete: Option<String>,
    on_error: Option<String>,
    metadata: Map<String, Value>,
}

impl PipelineBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Use a fixed id instead of a generated one
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Add a step; declaring the same id twice fails at build time
    pub fn with_step(mut self, step: Step) -> Self {
        if self.steps.contains_key(&step.id) {
            self.duplicate_ids.push(step.id.clone());
        }
        self.steps.insert(step.id.clone(), step);
        self
    }

    pub fn with_start_step(mut self, id: impl Into<String>) -> Self {
        self.start_step_id = Some(id.into());
        self
    }

    pub fn with_global_state(mut self, key: impl Into<String>, value: Value) -> Self {
        self.global_state.insert(key.into(), value);
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// Tool invoked when an execution completes
    pub fn on_complete(mut self, tool_name: impl Into<String>) -> Self {
        self.on_complete = Some(tool_name.into());
        self
    }

    /// Tool invoked when an execution fails
    pub fn on_error(mut self, tool_name: impl Into<String>) -> Self {
        self.on_error = Some(tool_name.into());
        self
    }

    /// Validate and produce the pipeline
    pub fn build(self) -> Result<Pipeline, PipelineError> {
        if let Some(duplicate) = self.duplicate_ids.first() {
            return Err(PipelineError::validation(format!("Duplicate step ID: {}", duplicate)));
        }

        let start_step_id = self
            .start_step_id
            .ok_or_else(|| PipelineError::validation("No start step defined"))?;

        let definition = PipelineDefinition {
            name: self.name,
            description: self.description,
            start_step_id,
            steps: self.steps,
            global_state: self.global_state,
            on_complete: self.on_complete,
            on_error: self.on_error,
            metadata: self.metadata,
        };
        validate_definition(&definition)?;

        let id = self.id.unwrap_or_else(|| Uuid::new_v4().to_string());
        Ok(Pipeline::from_definition(id, definition))
    }
}

/// Check that a definition forms a well-formed graph
pub fn validate_definition(definition: &PipelineDefinition) -> Result<(), PipelineError> {
    if definition.start_step_id.trim().is_empty() {
        return Err(PipelineError::validation("No start step defined"));
    }

    if definition.steps.is_empty() {
        return Err(PipelineError::validation("Pipeline has no steps"));
    }

    if !definition.steps.contains_key(&definition.start_step_id) {
        return Err(PipelineError::validation(format!(
            "Start step '{}' is not a declared step",
            definition.start_step_id
        )));
    }

    for (key, step) in &definition.steps {
        if !step.id.is_empty() && step.id != *key {
            return Err(PipelineError::validation(format!(
                "Step declared under '{}' has mismatched id '{}'",
                key, step.id
            )));
        }

        if step.tool_name.trim().is_empty() && !step.wait_for_human {
            return Err(PipelineError::validation(format!("Step '{}' has no tool name", key)));
        }

        for (field, target) in step.referenced_steps() {
            if target != END_STEP && !definition.steps.contains_key(target) {
                return Err(PipelineError::validation(format!(
                    "Step '{}' {} references non-existent step '{}'",
                    key, field, target
                )));
            }
        }

        if step.loop_control.is_some() && step.next.default.as_deref() == Some(key.as_str()) {
            return Err(PipelineError::validation(format!(
                "Looping step '{}' cannot exit to itself",
                key
            )));
        }

        // An unknown source only ever resolves to an absent value
        for (name, binding) in &step.parameters {
            if let ParameterBinding::Dynamic { source_step_id, .. } = binding {
                if !definition.steps.contains_key(source_step_id) {
                    warn!(
                        "Step '{}' parameter '{}' reads from undeclared step '{}'",
                        key, name, source_step_id
                    );
                }
            }
        }

        for source in step.expressions() {
            Expression::parse(source).map_err(|e| {
                PipelineError::validation(format!(
                    "Step '{}' has invalid expression '{}': {}",
                    key, source, e
                ))
            })?;
        }
    }

    Ok(())
}

/// Builds a single [`Step`]
#[derive(Debug, Clone)]
pub struct StepBuilder {
    step: Step,
}

impl StepBuilder {
    pub fn new(id: impl Into<String>, tool_name: impl Into<String>) -> Self {
        Self {
            step: Step::new(id, tool_name),
        }
    }

    /// Attach a literal parameter
    pub fn static_param(mut self, name: impl Into<String>, value: Value) -> Self {
        self.step
            .parameters
            .insert(name.into(), ParameterBinding::Static { value });
        self
    }

    /// Attach a parameter read from a previous step's result data
    pub fn dynamic_param(
        mut self,
        name: impl Into<String>,
        source_step_id: impl Into<String>,
        output_path: impl Into<String>,
    ) -> Self {
        self.step.parameters.insert(
            name.into(),
            ParameterBinding::Dynamic {
                source_step_id: source_step_id.into(),
                output_path: output_path.into(),
            },
        );
        self
    }

    /// Default successor
    pub fn next(mut self, step_id: impl Into<String>) -> Self {
        self.step.next.default = Some(step_id.into());
        self
    }

    /// Named conditional branch; branches are tried in the order added
    pub fn when(
        mut self,
        name: impl Into<String>,
        condition: impl Into<String>,
        target: impl Into<String>,
    ) -> Self {
        self.step.next.conditions.push(ConditionalBranch {
            name: Some(name.into()),
            condition: condition.into(),
            target: target.into(),
        });
        self
    }

    /// Suspend for a human decision at this step
    pub fn wait_for_human(mut self, prompt: impl Into<String>) -> Self {
        self.step.wait_for_human = true;
        self.step.human_prompt = Some(prompt.into());
        self
    }

    pub fn max_retries(mut self, retries: u32) -> Self {
        self.step.max_retries = Some(retries);
        self
    }

    pub fn timeout_secs(mut self, secs: u64) -> Self {
        self.step.timeout_secs = Some(secs);
        self
    }

    pub fn for_loop(mut self, initial_value: i64, increment: i64, max_iterations: u32) -> Self {
        self.step.loop_control = Some(LoopControl::For {
            initial_value,
            increment,
            max_iterations,
        });
        self
    }

    pub fn while_loop(mut self, condition: impl Into<String>, max_iterations: u32) -> Self {
        self.step.loop_control = Some(LoopControl::While {
            condition: condition.into(),
            max_iterations,
        });
        self
    }

    pub fn until_loop(mut self, condition: impl Into<String>, max_iterations: u32) -> Self {
        self.step.loop_control = Some(LoopControl::Until {
            condition: condition.into(),
            max_iterations,
        });
        self
    }

    pub fn on_success(mut self, step_id: impl Into<String>) -> Self {
        self.step.on_success = Some(step_id.into());
        self
    }

    pub fn on_failure(mut self, step_id: impl Into<String>) -> Self {
        self.step.on_failure = Some(step_id.into());
        self
    }

    pub fn build(self) -> Step {
        self.step
    }
}

impl From<StepBuilder> for Step {
    fn from(builder: StepBuilder) -> Self {
        builder.build()
    }
}
