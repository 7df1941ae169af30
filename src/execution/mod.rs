//! Pipeline execution engine

pub mod engine;
pub mod executor;
pub mod human;
pub mod scheduler;

pub use engine::{EventHandler, ExecutionEvent, PipelineExecutor};
pub use executor::{Invocation, StepExecutor};
pub use human::{ChannelHumanHandler, HumanInteractionHandler, LoggingHumanHandler};
pub use scheduler::Route;
