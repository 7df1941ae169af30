//! Read-only contexts handed to expressions and parameter lookups
//!
//! Loop predicates see `globalState` (also as `state`), `results`, the loop
//! `counter` and the number of iterations already run. Branch conditions see
//! the step's `result` data, `state`, `success`, `error` and `results`.

use crate::core::state::ExecutionState;
use crate::tool::ToolResult;
use serde_json::{json, Value};

/// Context for `while`/`until` predicates
pub fn loop_context(state: &ExecutionState, step_id: &str) -> Value {
    let global_state = Value::Object(state.global_state.clone());
    json!({
        "globalState": global_state,
        "state": global_state,
        "results": state.results_value(),
        "counter": state.loop_counters.get(step_id).copied(),
        "iteration": state.loop_iterations.get(step_id).copied().unwrap_or(0),
    })
}

/// Context for conditional branches after a tool call
pub fn branch_context(state: &ExecutionState, result: &ToolResult) -> Value {
    json!({
        "result": result.data.clone().unwrap_or(Value::Null),
        "state": Value::Object(state.global_state.clone()),
        "success": result.success,
        "error": result.error,
        "results": state.results_value(),
    })
}

/// Follow a dot-separated path into a value
///
/// Missing intermediate fields, indexing into scalars, and out-of-range array
/// indices all yield `None`; they are never errors. An empty path returns the
/// value itself.
pub fn resolve_path<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    let path = path.trim();
    if path.is_empty() {
        return Some(value);
    }

    path.split('.').try_fold(value, |current, segment| match current {
        Value::Object(map) => map.get(segment),
        Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    })
}
