//! tool-pipeline - a step-graph interpreter for tool pipelines
//!
//! Pipelines are graphs of steps, each bound to a named tool. The
//! [`PipelineExecutor`] walks the graph one step at a time, wiring results
//! into later parameters, following conditional branches, running bounded
//! loops, retrying failed tools, and suspending at human approval gates.

pub mod core;
pub mod execution;
pub mod persistence;
pub mod tool;

// Re-export commonly used types
pub use core::{
    EngineConfig, ExecutionState, ExecutionStatus, HumanInteractionRequest,
    HumanInteractionResponse, Pipeline, PipelineBuilder, PipelineDefinition, PipelineError,
    Step, StepBuilder, END_STEP,
};
pub use execution::{ChannelHumanHandler, ExecutionEvent, HumanInteractionHandler, PipelineExecutor};
pub use persistence::{InMemoryPersistence, PersistenceBackend, PipelinePatch, PipelineStore};
pub use tool::{Tool, ToolError, ToolExecutor, ToolRegistry, ToolResult};
