//! Step domain model

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Sentinel next-step id that terminates the pipeline
pub const END_STEP: &str = "end";

/// A single step in a pipeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Step {
    /// Unique step identifier
    #[serde(default)]
    pub id: String,

    /// Name of the tool this step invokes
    #[serde(default)]
    pub tool_name: String,

    /// Parameter name -> where its value comes from
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub parameters: BTreeMap<String, ParameterBinding>,

    /// Default and conditional successors
    #[serde(default)]
    pub next: NextSpec,

    /// Suspend for a human decision instead of invoking the tool
    #[serde(default, skip_serializing_if = "is_false")]
    pub wait_for_human: bool,

    /// Prompt shown to the human reviewer
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub human_prompt: Option<String>,

    /// Retries after the first attempt (total attempts = max_retries + 1)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_retries: Option<u32>,

    /// Per-attempt timeout in seconds (overrides the engine default)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub loop_control: Option<LoopControl>,

    /// Successor when the tool succeeds, ahead of any condition
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on_success: Option<String>,

    /// Successor when the tool fails, ahead of any condition
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on_failure: Option<String>,
}

fn is_false(b: &bool) -> bool {
    !*b
}

/// Where a parameter value comes from
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ParameterBinding {
    /// A literal value
    Static { value: Value },

    /// A value read from a previous step's result data
    #[serde(rename_all = "camelCase")]
    Dynamic {
        source_step_id: String,
        /// Dot-separated path into the source result's data; empty means the whole data
        #[serde(default)]
        output_path: String,
    },
}

/// Successor rules for a step
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NextSpec {
    /// Successor when no branch matches
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<String>,

    /// Branches evaluated in declaration order; the first match wins
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<ConditionalBranch>,
}

/// A named, guarded successor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConditionalBranch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub condition: String,
    pub target: String,
}

/// Bounded re-execution of a step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum LoopControl {
    /// Counter loop: continue while counter < max_iterations
    #[serde(rename_all = "camelCase")]
    For {
        #[serde(default)]
        initial_value: i64,
        #[serde(default = "default_increment")]
        increment: i64,
        max_iterations: u32,
    },

    /// Continue while the condition is true
    #[serde(rename_all = "camelCase")]
    While { condition: String, max_iterations: u32 },

    /// Continue while the condition is false
    #[serde(rename_all = "camelCase")]
    Until { condition: String, max_iterations: u32 },
}

fn default_increment() -> i64 {
    1
}

impl LoopControl {
    /// Hard ceiling on iterations, whatever the predicate says
    pub fn max_iterations(&self) -> u32 {
        match self {
            LoopControl::For { max_iterations, .. }
            | LoopControl::While { max_iterations, .. }
            | LoopControl::Until { max_iterations, .. } => *max_iterations,
        }
    }

    /// The predicate source for while/until loops
    pub fn condition(&self) -> Option<&str> {
        match self {
            LoopControl::For { .. } => None,
            LoopControl::While { condition, .. } | LoopControl::Until { condition, .. } => Some(condition),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            LoopControl::For { .. } => "for",
            LoopControl::While { .. } => "while",
            LoopControl::Until { .. } => "until",
        }
    }
}

impl Step {
    /// Create a step invoking `tool_name` with no parameters or successors
    pub fn new(id: impl Into<String>, tool_name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            tool_name: tool_name.into(),
            parameters: BTreeMap::new(),
            next: NextSpec::default(),
            wait_for_human: false,
            human_prompt: None,
            max_retries: None,
            timeout_secs: None,
            loop_control: None,
            on_success: None,
            on_failure: None,
        }
    }

    /// Every step id this step can route to, including the end sentinel
    pub fn referenced_steps(&self) -> Vec<(&'static str, &str)> {
        let mut refs = Vec::new();
        if let Some(default) = &self.next.default {
            refs.push(("next", default.as_str()));
        }
        for branch in &self.next.conditions {
            refs.push(("condition target", branch.target.as_str()));
        }
        if let Some(on_success) = &self.on_success {
            refs.push(("onSuccess", on_success.as_str()));
        }
        if let Some(on_failure) = &self.on_failure {
            refs.push(("onFailure", on_failure.as_str()));
        }
        refs
    }

    /// Every expression the step will evaluate at run time
    pub fn expressions(&self) -> Vec<&str> {
        let mut exprs: Vec<&str> = self.next.conditions.iter().map(|b| b.condition.as_str()).collect();
        if let Some(condition) = self.loop_control.as_ref().and_then(LoopControl::condition) {
            exprs.push(condition);
        }
        exprs
    }
}
