//! Pipeline definitions from YAML/JSON and engine configuration

use crate::core::{builder::validate_definition, pipeline::PipelineDefinition};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

impl PipelineDefinition {
    /// Load a definition from a `.yaml`/`.yml` or `.json` file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read pipeline file {}", path.display()))?;

        match path.extension().and_then(|e| e.to_str()) {
            Some("json") => Self::from_json(&content),
            _ => Self::from_yaml(&content),
        }
        .with_context(|| format!("Invalid pipeline file {}", path.display()))
    }

    /// Parse and validate a YAML definition
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let mut definition: PipelineDefinition = serde_yaml::from_str(yaml)?;
        definition.fill_step_ids();
        validate_definition(&definition)?;
        Ok(definition)
    }

    /// Parse and validate a JSON definition
    pub fn from_json(json: &str) -> Result<Self> {
        let mut definition: PipelineDefinition = serde_json::from_str(json)?;
        definition.fill_step_ids();
        validate_definition(&definition)?;
        Ok(definition)
    }
}

/// Engine-wide defaults
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Retries for steps that do not set `maxRetries`
    pub default_max_retries: u32,

    /// Per-attempt tool timeout for steps that do not set `timeoutSecs`
    pub default_timeout_secs: u64,

    /// Fixed pause between retry attempts
    pub retry_delay_ms: u64,

    /// Fail the execution when a failed tool result is not routed by
    /// `onFailure` or a condition, instead of following the default next step
    pub fail_on_unrouted_error: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            default_max_retries: 0,
            default_timeout_secs: 300, // 5 minutes
            retry_delay_ms: 0,
            fail_on_unrouted_error: false,
        }
    }
}

impl EngineConfig {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read engine config {}", path.as_ref().display()))?;
        Self::from_yaml(&content)
    }

    pub fn from_yaml(yaml: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    pub fn with_default_max_retries(mut self, retries: u32) -> Self {
        self.default_max_retries = retries;
        self
    }

    pub fn with_default_timeout(mut self, timeout_secs: u64) -> Self {
        self.default_timeout_secs = timeout_secs;
        self
    }

    pub fn with_retry_delay(mut self, delay_ms: u64) -> Self {
        self.retry_delay_ms = delay_ms;
        self
    }

    pub fn with_fail_on_unrouted_error(mut self, enabled: bool) -> Self {
        self.fail_on_unrouted_error = enabled;
        self
    }
}
