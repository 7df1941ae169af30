//! Execution scheduler - decides loop continuation and the next step to run

use crate::core::{
    condition::{evaluate_condition, ExpressionError},
    context::{branch_context, loop_context},
    state::ExecutionState,
    step::{LoopControl, Step},
};
use crate::tool::ToolResult;
use tracing::debug;

/// How the next step was chosen after a tool call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    /// `onSuccess` or `onFailure`
    Shortcut(String),

    /// The first conditional branch whose expression held
    Branch { name: Option<String>, target: String },

    /// Nothing matched; fall back to the default next step, if any
    Default(Option<String>),
}

impl Route {
    pub fn target(&self) -> Option<&str> {
        match self {
            Route::Shortcut(target) | Route::Branch { target, .. } => Some(target),
            Route::Default(target) => target.as_deref(),
        }
    }

    /// Whether the step itself picked the target rather than falling through
    pub fn is_explicit(&self) -> bool {
        !matches!(self, Route::Default(_))
    }
}

/// Decide whether a looping step runs another iteration
///
/// Updates the step's loop bookkeeping in `state`: the `for` counter is
/// seeded from `initialValue` on first visit and advanced by `increment`
/// after a positive decision, and every loop kind counts its iterations
/// against `maxIterations`.
pub fn should_continue_loop(
    step_id: &str,
    control: &LoopControl,
    state: &mut ExecutionState,
) -> Result<bool, ExpressionError> {
    let iterations = state.loop_iterations.get(step_id).copied().unwrap_or(0);
    if iterations >= control.max_iterations() {
        debug!("Loop at step {} reached its ceiling of {}", step_id, control.max_iterations());
        return Ok(false);
    }

    let proceed = match control {
        LoopControl::For {
            initial_value,
            increment,
            max_iterations,
        } => {
            let counter = *state
                .loop_counters
                .entry(step_id.to_string())
                .or_insert(*initial_value);
            let proceed = counter < i64::from(*max_iterations);
            if proceed {
                state
                    .loop_counters
                    .insert(step_id.to_string(), counter.saturating_add(*increment));
            }
            proceed
        }
        LoopControl::While { condition, .. } => {
            evaluate_condition(condition, &loop_context(state, step_id))?
        }
        LoopControl::Until { condition, .. } => {
            !evaluate_condition(condition, &loop_context(state, step_id))?
        }
    };

    if proceed {
        *state.loop_iterations.entry(step_id.to_string()).or_insert(0) += 1;
    }

    Ok(proceed)
}

/// Pick the next step after `result`, in priority order: `onSuccess`,
/// `onFailure`, the first true conditional branch, then the default next
pub fn resolve_next(
    step: &Step,
    state: &ExecutionState,
    result: &ToolResult,
) -> Result<Route, ExpressionError> {
    let shortcut = if result.success {
        step.on_success.as_ref()
    } else {
        step.on_failure.as_ref()
    };
    if let Some(target) = shortcut {
        return Ok(Route::Shortcut(target.clone()));
    }

    if !step.next.conditions.is_empty() {
        let context = branch_context(state, result);
        for branch in &step.next.conditions {
            if evaluate_condition(&branch.condition, &context)? {
                debug!(
                    "Step {} matched branch {} -> {}",
                    step.id,
                    branch.name.as_deref().unwrap_or(&branch.condition),
                    branch.target
                );
                return Ok(Route::Branch {
                    name: branch.name.clone(),
                    target: branch.target.clone(),
                });
            }
        }
    }

    Ok(Route::Default(step.next.default.clone()))
}
