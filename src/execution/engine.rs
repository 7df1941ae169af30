//! Main execution engine - drives pipeline executions and tracks them by id

use crate::{
    core::{
        config::EngineConfig,
        error::PipelineError,
        human::{HumanInteractionRequest, HumanInteractionResponse},
        pipeline::Pipeline,
        state::{ExecutionState, ExecutionStatus},
        step::{Step, END_STEP},
    },
    execution::{
        executor::{Invocation, StepExecutor},
        human::{HumanInteractionHandler, LoggingHumanHandler},
        scheduler::{self, Route},
    },
    tool::{ToolExecutor, ToolMetrics, ToolResult},
};
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Events that can occur during pipeline execution
#[derive(Debug, Clone)]
pub enum ExecutionEvent {
    ExecutionStarted {
        execution_id: Uuid,
        pipeline_id: String,
        pipeline_name: String,
    },
    StepStarted {
        execution_id: Uuid,
        step_id: String,
    },
    StepRetrying {
        execution_id: Uuid,
        step_id: String,
        attempt: u32,
    },
    StepCompleted {
        execution_id: Uuid,
        step_id: String,
        attempts: u32,
        next_step: Option<String>,
    },
    StepFailed {
        execution_id: Uuid,
        step_id: String,
        attempts: u32,
        error: String,
    },
    LoopIteration {
        execution_id: Uuid,
        step_id: String,
        iteration: u32,
    },
    LoopExited {
        execution_id: Uuid,
        step_id: String,
        iterations: u32,
    },
    HumanInputRequested {
        execution_id: Uuid,
        step_id: String,
    },
    HumanInputReceived {
        execution_id: Uuid,
        step_id: String,
        approved: bool,
    },
    ExecutionFinished {
        execution_id: Uuid,
        status: ExecutionStatus,
    },
}

/// Type for event handlers
pub type EventHandler = Arc<dyn Fn(ExecutionEvent) + Send + Sync>;

/// Registry entry for one execution
struct ExecutionRecord {
    pipeline: Arc<Pipeline>,
    /// Latest published snapshot
    state: ExecutionState,
    cancelled: Arc<AtomicBool>,
}

/// Interprets pipelines and keeps every execution it started until the
/// caller removes it
pub struct PipelineExecutor<T> {
    executor: Arc<StepExecutor<T>>,
    executions: Arc<RwLock<HashMap<Uuid, ExecutionRecord>>>,
    human_handler: Arc<dyn HumanInteractionHandler>,
    event_handlers: Arc<std::sync::RwLock<Vec<EventHandler>>>,
}

impl<T> Clone for PipelineExecutor<T> {
    fn clone(&self) -> Self {
        Self {
            executor: self.executor.clone(),
            executions: self.executions.clone(),
            human_handler: self.human_handler.clone(),
            event_handlers: self.event_handlers.clone(),
        }
    }
}

impl<T: ToolExecutor + 'static> PipelineExecutor<T> {
    pub fn new(tools: T) -> Self {
        Self::with_config(tools, EngineConfig::default())
    }

    pub fn with_config(tools: T, config: EngineConfig) -> Self {
        Self {
            executor: Arc::new(StepExecutor::new(tools, config)),
            executions: Arc::new(RwLock::new(HashMap::new())),
            human_handler: Arc::new(LoggingHumanHandler),
            event_handlers: Arc::new(std::sync::RwLock::new(Vec::new())),
        }
    }

    /// Route human interaction requests to `handler`
    pub fn with_human_handler<H: HumanInteractionHandler + 'static>(mut self, handler: H) -> Self {
        self.human_handler = Arc::new(handler);
        self
    }

    pub fn config(&self) -> &EngineConfig {
        self.executor.config()
    }

    /// Add an event handler
    pub fn add_event_handler<F>(&self, handler: F)
    where
        F: Fn(ExecutionEvent) + Send + Sync + 'static,
    {
        let mut handlers = match self.event_handlers.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        handlers.push(Arc::new(handler));
    }

    /// Emit an event to all handlers
    fn emit_event(&self, event: ExecutionEvent) {
        let handlers = match self.event_handlers.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        };
        for handler in handlers.iter() {
            handler(event.clone());
        }
    }

    /// Start a new execution and drive it until it completes, fails, or
    /// suspends for human input
    ///
    /// Run-time errors never escape; they are recorded on the returned state.
    pub async fn execute_pipeline(
        &self,
        pipeline: &Pipeline,
        initial_state: Option<Map<String, Value>>,
    ) -> ExecutionState {
        let pipeline = Arc::new(pipeline.clone());
        let state = ExecutionState::new(&pipeline, initial_state);
        let execution_id = state.execution_id;
        let cancelled = Arc::new(AtomicBool::new(false));

        {
            let mut executions = self.executions.write().await;
            executions.insert(
                execution_id,
                ExecutionRecord {
                    pipeline: pipeline.clone(),
                    state: state.clone(),
                    cancelled: cancelled.clone(),
                },
            );
        }

        info!(
            "Starting pipeline execution: {} ({})",
            pipeline.name, execution_id
        );
        self.emit_event(ExecutionEvent::ExecutionStarted {
            execution_id,
            pipeline_id: pipeline.id.clone(),
            pipeline_name: pipeline.name.clone(),
        });

        self.run(&pipeline, state, &cancelled).await
    }

    /// Resume or reject an execution suspended at a human-gated step
    ///
    /// Returns `None` unless the execution exists and is waiting for human
    /// input.
    pub async fn process_human_response(
        &self,
        execution_id: Uuid,
        response: HumanInteractionResponse,
    ) -> Option<ExecutionState> {
        // Claim the execution so a concurrent response cannot resume it twice
        let (pipeline, mut state, cancelled) = {
            let mut executions = self.executions.write().await;
            let record = executions.get_mut(&execution_id)?;
            if record.state.status != ExecutionStatus::WaitingForHuman {
                debug!(
                    "Ignoring human response for execution {} in status {:?}",
                    execution_id, record.state.status
                );
                return None;
            }
            record.state.status = ExecutionStatus::Running;
            (
                record.pipeline.clone(),
                record.state.clone(),
                record.cancelled.clone(),
            )
        };

        let step_id = state.current_step_id.clone();
        info!(
            "Human {} step {} of execution {}",
            if response.approved { "approved" } else { "rejected" },
            step_id,
            execution_id
        );
        self.emit_event(ExecutionEvent::HumanInputReceived {
            execution_id,
            step_id: step_id.clone(),
            approved: response.approved,
        });

        state.status = ExecutionStatus::Running;
        state.human_input = response.input.clone();
        if let Some(modifications) = response.modifications {
            state.merge_global_state(modifications);
        }

        if response.approved {
            if let Err(e) = self.pass_human_gate(&pipeline, &mut state, response.input) {
                error!("Execution {} failed resuming step {}: {}", execution_id, step_id, e);
                state.fail(&e);
            }
            state.touch();
        } else {
            state.fail(&PipelineError::HumanRejection {
                step_id,
                notes: response.notes,
            });
        }

        Some(self.run(&pipeline, state, &cancelled).await)
    }

    /// Latest snapshot of an execution
    pub async fn get_execution_state(&self, execution_id: Uuid) -> Option<ExecutionState> {
        let executions = self.executions.read().await;
        executions.get(&execution_id).map(|r| r.state.clone())
    }

    /// Every execution still held in the registry, oldest first
    ///
    /// Completed and failed executions are included until they are evicted
    /// with [`remove_execution`](Self::remove_execution) or
    /// [`cleanup_finished`](Self::cleanup_finished).
    pub async fn list_active_executions(&self) -> Vec<ExecutionState> {
        let executions = self.executions.read().await;
        let mut states: Vec<ExecutionState> =
            executions.values().map(|r| r.state.clone()).collect();
        states.sort_by_key(|s| s.start_time);
        states
    }

    /// Evict an execution, returning its last snapshot
    ///
    /// A run still in progress keeps going but is no longer tracked.
    pub async fn remove_execution(&self, execution_id: Uuid) -> Option<ExecutionState> {
        let mut executions = self.executions.write().await;
        executions.remove(&execution_id).map(|r| r.state)
    }

    /// Evict every completed or failed execution; returns how many were removed
    pub async fn cleanup_finished(&self) -> usize {
        let mut executions = self.executions.write().await;
        let before = executions.len();
        executions.retain(|_, r| !r.state.status.is_terminal());
        let removed = before - executions.len();
        if removed > 0 {
            debug!("Evicted {} finished execution(s)", removed);
        }
        removed
    }

    /// Request cancellation of an execution
    ///
    /// Running executions stop before their next step or retry attempt. A
    /// waiting execution fails immediately. Returns false for unknown or
    /// already finished executions.
    pub async fn cancel_execution(&self, execution_id: Uuid) -> bool {
        let cancelled_while_waiting = {
            let mut executions = self.executions.write().await;
            let Some(record) = executions.get_mut(&execution_id) else {
                return false;
            };
            if record.state.status.is_terminal() {
                return false;
            }

            record.cancelled.store(true, Ordering::SeqCst);
            if record.state.status == ExecutionStatus::WaitingForHuman {
                record.state.fail(&PipelineError::Cancelled);
                Some((record.pipeline.clone(), record.state.clone()))
            } else {
                None
            }
        };

        info!("Cancellation requested for execution {}", execution_id);
        if let Some((pipeline, state)) = cancelled_while_waiting {
            self.run_hook(&pipeline, &state).await;
            self.emit_event(ExecutionEvent::ExecutionFinished {
                execution_id,
                status: state.status,
            });
        }
        true
    }

    /// Advance steps while the execution is running, then settle it
    async fn run(
        &self,
        pipeline: &Pipeline,
        mut state: ExecutionState,
        cancelled: &AtomicBool,
    ) -> ExecutionState {
        while state.is_running() {
            if cancelled.load(Ordering::SeqCst) {
                warn!("Execution {} cancelled", state.execution_id);
                state.fail(&PipelineError::Cancelled);
                break;
            }

            if let Err(e) = self.advance(pipeline, &mut state, cancelled).await {
                error!(
                    "Execution {} failed at step {}: {}",
                    state.execution_id, state.current_step_id, e
                );
                state.fail(&e);
            }

            state.touch();
            if state.is_running() {
                self.publish(&state).await;
            }
        }

        self.settle(pipeline, state).await
    }

    /// Run one step of the advancement algorithm
    async fn advance(
        &self,
        pipeline: &Pipeline,
        state: &mut ExecutionState,
        cancelled: &AtomicBool,
    ) -> Result<(), PipelineError> {
        let step = pipeline
            .step(&state.current_step_id)
            .ok_or_else(|| PipelineError::StepNotFound(state.current_step_id.clone()))?;
        let execution_id = state.execution_id;

        if let Some(control) = &step.loop_control {
            if scheduler::should_continue_loop(&step.id, control, state)? {
                let iteration = state.loop_iterations.get(&step.id).copied().unwrap_or(0);
                debug!("Step {} loop iteration {}", step.id, iteration);
                self.emit_event(ExecutionEvent::LoopIteration {
                    execution_id,
                    step_id: step.id.clone(),
                    iteration,
                });
            } else {
                let iterations = state.loop_iterations.get(&step.id).copied().unwrap_or(0);
                info!(
                    "Loop at step {} finished after {} iteration(s)",
                    step.id, iterations
                );
                self.emit_event(ExecutionEvent::LoopExited {
                    execution_id,
                    step_id: step.id.clone(),
                    iterations,
                });
                state.reset_loop(&step.id);
                self.transition(step, state, step.next.default.as_deref());
                return Ok(());
            }
        }

        if step.wait_for_human {
            info!("Step {} waiting for human input", step.id);
            state.wait_for_human();
            return Ok(());
        }

        let params = StepExecutor::<T>::resolve_parameters(step, state);
        self.emit_event(ExecutionEvent::StepStarted {
            execution_id,
            step_id: step.id.clone(),
        });

        let on_retry = |attempt: u32, _: &ToolResult| {
            self.emit_event(ExecutionEvent::StepRetrying {
                execution_id,
                step_id: step.id.clone(),
                attempt,
            })
        };
        let Invocation {
            result,
            attempts,
            cancelled: was_cancelled,
        } = self
            .executor
            .execute(step, &params, cancelled, Some(&on_retry))
            .await;

        state.record_result(&step.id, result.clone());
        if was_cancelled {
            return Err(PipelineError::Cancelled);
        }

        let route = scheduler::resolve_next(step, state, &result)?;
        if result.success {
            self.emit_event(ExecutionEvent::StepCompleted {
                execution_id,
                step_id: step.id.clone(),
                attempts,
                next_step: route.target().map(String::from),
            });
        } else {
            self.emit_event(ExecutionEvent::StepFailed {
                execution_id,
                step_id: step.id.clone(),
                attempts,
                error: result
                    .error
                    .as_ref()
                    .map(|e| e.message.clone())
                    .unwrap_or_default(),
            });
        }

        self.follow_route(step, state, &route, &result)
    }

    /// Treat the gated step as passed with a synthetic successful result
    /// carrying the reviewer's input, then pick its successor
    fn pass_human_gate(
        &self,
        pipeline: &Pipeline,
        state: &mut ExecutionState,
        input: Option<Value>,
    ) -> Result<(), PipelineError> {
        let step = pipeline
            .step(&state.current_step_id)
            .ok_or_else(|| PipelineError::StepNotFound(state.current_step_id.clone()))?;

        let result = ToolResult::success(input, ToolMetrics::instant());
        state.record_result(&step.id, result.clone());

        let route = scheduler::resolve_next(step, state, &result)?;
        self.follow_route(step, state, &route, &result)
    }

    fn follow_route(
        &self,
        step: &Step,
        state: &mut ExecutionState,
        route: &Route,
        result: &ToolResult,
    ) -> Result<(), PipelineError> {
        if !result.success && !route.is_explicit() && self.config().fail_on_unrouted_error {
            let (code, message) = result
                .error
                .as_ref()
                .map(|e| (e.code.clone(), e.message.clone()))
                .unwrap_or_else(|| ("TOOL_EXECUTION_ERROR".to_string(), String::new()));
            return Err(PipelineError::ToolExecution {
                step_id: step.id.clone(),
                tool: step.tool_name.clone(),
                code,
                message,
            });
        }

        // A looping step repeats until its loop decision says otherwise
        let next = if step.loop_control.is_some() && !route.is_explicit() {
            Some(step.id.as_str())
        } else {
            route.target()
        };

        self.transition(step, state, next);
        Ok(())
    }

    fn transition(&self, step: &Step, state: &mut ExecutionState, next: Option<&str>) {
        match next {
            None | Some(END_STEP) => {
                state.reset_loop(&step.id);
                state.complete();
                info!(
                    "Execution {} completed at step {}",
                    state.execution_id, step.id
                );
            }
            Some(next_id) if next_id == step.id => {
                debug!("Step {} continues", step.id);
            }
            Some(next_id) => {
                state.reset_loop(&step.id);
                debug!("Step {} -> {}", step.id, next_id);
                state.move_to(next_id);
            }
        }
    }

    /// Publish the final snapshot and notify whoever needs to know
    async fn settle(&self, pipeline: &Pipeline, state: ExecutionState) -> ExecutionState {
        self.publish(&state).await;

        match state.status {
            ExecutionStatus::WaitingForHuman => {
                let step_id = state.current_step_id.clone();
                let prompt = pipeline
                    .step(&step_id)
                    .and_then(|s| s.human_prompt.clone())
                    .unwrap_or_else(|| format!("Approve step '{}'?", step_id));

                self.emit_event(ExecutionEvent::HumanInputRequested {
                    execution_id: state.execution_id,
                    step_id: step_id.clone(),
                });
                self.human_handler
                    .request_input(HumanInteractionRequest {
                        execution_id: state.execution_id,
                        step_id,
                        prompt,
                        state: state.clone(),
                    })
                    .await;
            }
            ExecutionStatus::Completed | ExecutionStatus::Failed => {
                self.run_hook(pipeline, &state).await;
                info!(
                    "Pipeline execution finished: {} - {:?}",
                    pipeline.name, state.status
                );
                self.emit_event(ExecutionEvent::ExecutionFinished {
                    execution_id: state.execution_id,
                    status: state.status,
                });
            }
            ExecutionStatus::Running => {}
        }

        state
    }

    /// Invoke the pipeline's onComplete/onError tool; failures are only logged
    async fn run_hook(&self, pipeline: &Pipeline, state: &ExecutionState) {
        let hook = match state.status {
            ExecutionStatus::Completed => pipeline.on_complete.as_deref(),
            ExecutionStatus::Failed => pipeline.on_error.as_deref(),
            _ => None,
        };
        let Some(tool_name) = hook else {
            return;
        };

        let mut params = Map::new();
        params.insert("executionId".to_string(), json!(state.execution_id));
        params.insert("pipelineId".to_string(), json!(state.pipeline_id));
        params.insert(
            "globalState".to_string(),
            Value::Object(state.global_state.clone()),
        );
        params.insert(
            "error".to_string(),
            serde_json::to_value(&state.error).unwrap_or(Value::Null),
        );

        let result = self
            .executor
            .call_tool(tool_name, &params, self.config().default_timeout_secs)
            .await;
        if result.success {
            debug!("Hook {} ran for execution {}", tool_name, state.execution_id);
        } else {
            warn!(
                "Hook {} failed for execution {}: {:?}",
                tool_name, state.execution_id, result.error
            );
        }
    }

    /// Store a snapshot if the execution is still tracked
    async fn publish(&self, state: &ExecutionState) {
        let mut executions = self.executions.write().await;
        if let Some(record) = executions.get_mut(&state.execution_id) {
            record.state = state.clone();
        }
    }
}
