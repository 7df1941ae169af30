//! Test: Concurrency - shared executor, racing responses and cancellation

use crate::helpers::*;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tool_pipeline::core::{Pipeline, PipelineBuilder, StepBuilder};
use tool_pipeline::{ExecutionStatus, HumanInteractionResponse, PipelineExecutor};

fn two_step_pipeline() -> Pipeline {
    PipelineBuilder::new("Test: Parallel")
        .with_step(StepBuilder::new("fetch", "fetch").next("store").build())
        .with_step(StepBuilder::new("store", "store").build())
        .with_start_step("fetch")
        .build()
        .unwrap()
}

/// Executions started from clones of one executor share its registry
#[tokio::test]
async fn test_parallel_executions_share_registry() {
    init_tracing();

    let tools = Arc::new(
        MockTools::new()
            .always("fetch", Reply::Ok(json!({"rows": 1})))
            .always("store", Reply::Ok(json!({})))
            .with_delay(Duration::from_millis(5)),
    );
    let engine = PipelineExecutor::new(tools.clone());
    let pipeline = Arc::new(two_step_pipeline());

    let mut handles = Vec::new();
    for _ in 0..8 {
        let engine = engine.clone();
        let pipeline = pipeline.clone();
        handles.push(tokio::spawn(async move {
            engine.execute_pipeline(&pipeline, None).await
        }));
    }

    let mut ids = Vec::new();
    for handle in handles {
        let state = handle.await.unwrap();
        assert_completed(&state);
        ids.push(state.execution_id);
    }
    ids.sort();
    ids.dedup();
    assert_eq!(ids.len(), 8);
    assert_eq!(tools.calls_to("fetch"), 8);

    let active = engine.list_active_executions().await;
    assert_eq!(active.len(), 8);
    assert!(active
        .windows(2)
        .all(|pair| pair[0].start_time <= pair[1].start_time));

    assert_eq!(engine.cleanup_finished().await, 8);
    assert!(engine.list_active_executions().await.is_empty());
}

/// Only one of several racing responses resumes the execution
#[tokio::test]
async fn test_racing_responses_resume_once() {
    let pipeline = PipelineBuilder::new("Test: Race")
        .with_step(StepBuilder::new("gate", "").wait_for_human("Proceed?").next("act").build())
        .with_step(StepBuilder::new("act", "act").build())
        .with_start_step("gate")
        .build()
        .unwrap();

    let tools = Arc::new(MockTools::new().always("act", Reply::Ok(json!({}))));
    let engine = PipelineExecutor::new(tools.clone());
    let waiting = engine.execute_pipeline(&pipeline, None).await;
    assert_eq!(waiting.status, ExecutionStatus::WaitingForHuman);

    let mut handles = Vec::new();
    for _ in 0..5 {
        let engine = engine.clone();
        let execution_id = waiting.execution_id;
        handles.push(tokio::spawn(async move {
            engine
                .process_human_response(execution_id, HumanInteractionResponse::approve())
                .await
        }));
    }

    let mut resumed = 0;
    for handle in handles {
        if let Some(state) = handle.await.unwrap() {
            assert_completed(&state);
            resumed += 1;
        }
    }
    assert_eq!(resumed, 1);
    assert_eq!(tools.calls_to("act"), 1);
}

/// A running execution stops between iterations once cancelled
#[tokio::test]
async fn test_cancel_running_execution() {
    let pipeline = PipelineBuilder::new("Test: Cancel")
        .with_step(
            StepBuilder::new("spin", "poll")
                .until_loop("state.stop == true", 1000)
                .build(),
        )
        .with_start_step("spin")
        .build()
        .unwrap();

    let tools = Arc::new(
        MockTools::new()
            .always("poll", Reply::Ok(json!({"ready": false})))
            .with_delay(Duration::from_millis(10)),
    );
    let engine = PipelineExecutor::new(tools.clone());

    let runner = engine.clone();
    let handle = tokio::spawn(async move { runner.execute_pipeline(&pipeline, None).await });

    tokio::time::sleep(Duration::from_millis(50)).await;
    let active = engine.list_active_executions().await;
    assert_eq!(active.len(), 1);
    let execution_id = active[0].execution_id;

    assert!(engine.cancel_execution(execution_id).await);

    let state = handle.await.unwrap();
    assert_failed_with(&state, "CANCELLED");
    assert!(tools.calls_to("poll") < 1000);

    let stored = engine.get_execution_state(execution_id).await.unwrap();
    assert_eq!(stored.status, ExecutionStatus::Failed);
    assert!(!engine.cancel_execution(execution_id).await);
}

/// Removing an execution forgets it without touching the others
#[tokio::test]
async fn test_remove_execution() {
    let tools = Arc::new(
        MockTools::new()
            .always("fetch", Reply::Ok(json!({})))
            .always("store", Reply::Ok(json!({}))),
    );
    let engine = PipelineExecutor::new(tools);
    let pipeline = two_step_pipeline();

    let first = engine.execute_pipeline(&pipeline, None).await;
    let second = engine.execute_pipeline(&pipeline, None).await;

    let removed = engine.remove_execution(first.execution_id).await.unwrap();
    assert_eq!(removed.execution_id, first.execution_id);
    assert!(engine.get_execution_state(first.execution_id).await.is_none());
    assert!(engine.remove_execution(first.execution_id).await.is_none());
    assert!(engine.get_execution_state(second.execution_id).await.is_some());
}
