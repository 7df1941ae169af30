//! Core domain models for tool pipelines
//!
//! This module defines the pipeline graph, its steps, the per-run execution
//! state, and the expression language used by branches and loops.

pub mod builder;
pub mod condition;
pub mod config;
pub mod context;
pub mod error;
pub mod human;
pub mod pipeline;
pub mod state;
pub mod step;

pub use builder::{validate_definition, PipelineBuilder, StepBuilder};
pub use condition::{evaluate_condition, Expression, ExpressionError};
pub use config::EngineConfig;
pub use error::{ExecutionError, PipelineError};
pub use human::{HumanInteractionRequest, HumanInteractionResponse};
pub use pipeline::*;
pub use state::*;
pub use step::*;
