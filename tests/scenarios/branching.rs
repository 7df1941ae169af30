//! Test: Branching - conditional routing and next-step priority

use crate::helpers::*;
use serde_json::json;
use std::sync::Arc;
use tool_pipeline::core::{ConditionalBranch, PipelineBuilder, StepBuilder};
use tool_pipeline::PipelineExecutor;

fn endpoints(tools: MockTools) -> MockTools {
    tools
        .always("left", Reply::Ok(json!({"side": "left"})))
        .always("right", Reply::Ok(json!({"side": "right"})))
}

/// A true condition overrides the default next step
#[tokio::test]
async fn test_condition_overrides_default() {
    init_tracing();

    let pipeline = PipelineBuilder::new("Test: Condition")
        .with_step(
            StepBuilder::new("step1", "check")
                .when("matched", "result.result === \"success\"", "step2")
                .next("step3")
                .build(),
        )
        .with_step(StepBuilder::new("step2", "left").build())
        .with_step(StepBuilder::new("step3", "right").build())
        .with_start_step("step1")
        .build()
        .unwrap();

    let tools = Arc::new(endpoints(
        MockTools::new().always("check", Reply::Ok(json!({"result": "success"}))),
    ));
    let state = PipelineExecutor::new(tools.clone())
        .execute_pipeline(&pipeline, None)
        .await;

    assert_completed(&state);
    assert_path(&state, &["step1", "step2"]);
    assert!(state.results.contains_key("step2"));
    assert!(!state.results.contains_key("step3"));
    assert_eq!(tools.calls_to("right"), 0);
}

/// Without a matching condition the default next is taken
#[tokio::test]
async fn test_no_match_takes_default() {
    let pipeline = PipelineBuilder::new("Test: Default")
        .with_step(
            StepBuilder::new("step1", "check")
                .when("matched", "result.result === \"success\"", "step2")
                .next("step3")
                .build(),
        )
        .with_step(StepBuilder::new("step2", "left").build())
        .with_step(StepBuilder::new("step3", "right").build())
        .with_start_step("step1")
        .build()
        .unwrap();

    let tools = Arc::new(endpoints(
        MockTools::new().always("check", Reply::Ok(json!({"result": "partial"}))),
    ));
    let state = PipelineExecutor::new(tools)
        .execute_pipeline(&pipeline, None)
        .await;

    assert_completed(&state);
    assert_path(&state, &["step1", "step3"]);
}

/// Branches are tried in declaration order and can read shared state
#[tokio::test]
async fn test_first_true_branch_wins() {
    let pipeline = PipelineBuilder::new("Test: Ordered Branches")
        .with_step(
            StepBuilder::new("score", "score")
                .when("high", "result.value >= state.threshold", "high")
                .when("any", "success", "low")
                .build(),
        )
        .with_step(StepBuilder::new("high", "left").build())
        .with_step(StepBuilder::new("low", "right").build())
        .with_start_step("score")
        .with_global_state("threshold", json!(80))
        .build()
        .unwrap();

    let tools = Arc::new(endpoints(
        MockTools::new().script(
            "score",
            vec![Reply::Ok(json!({"value": 91})), Reply::Ok(json!({"value": 12}))],
        ),
    ));
    let engine = PipelineExecutor::new(tools);

    let first = engine.execute_pipeline(&pipeline, None).await;
    assert_path(&first, &["score", "high"]);

    let second = engine.execute_pipeline(&pipeline, None).await;
    assert_path(&second, &["score", "low"]);
}

/// onSuccess wins over a matching condition
#[tokio::test]
async fn test_on_success_takes_priority() {
    let pipeline = PipelineBuilder::new("Test: Shortcut Priority")
        .with_step(
            StepBuilder::new("start", "check")
                .on_success("left")
                .when("also", "true", "right")
                .build(),
        )
        .with_step(StepBuilder::new("left", "left").build())
        .with_step(StepBuilder::new("right", "right").build())
        .with_start_step("start")
        .build()
        .unwrap();

    let tools = Arc::new(endpoints(MockTools::new().always("check", Reply::Ok(json!({})))));
    let state = PipelineExecutor::new(tools)
        .execute_pipeline(&pipeline, None)
        .await;

    assert_path(&state, &["start", "left"]);
}

/// Conditions can branch on the error of a failed tool
#[tokio::test]
async fn test_branch_on_error_code() {
    let pipeline = PipelineBuilder::new("Test: Error Branch")
        .with_step(
            StepBuilder::new("call", "call")
                .when("throttled", "!success && error.code == \"RATE_LIMITED\"", "backoff")
                .when("named", "error.message =~ \"^upstream\"", "alert")
                .build(),
        )
        .with_step(StepBuilder::new("backoff", "left").build())
        .with_step(StepBuilder::new("alert", "right").build())
        .with_start_step("call")
        .build()
        .unwrap();

    let tools = Arc::new(endpoints(MockTools::new().script(
        "call",
        vec![
            Reply::Fail("RATE_LIMITED", "slow down"),
            Reply::Fail("BAD_GATEWAY", "upstream unavailable"),
        ],
    )));
    let engine = PipelineExecutor::new(tools);

    let throttled = engine.execute_pipeline(&pipeline, None).await;
    assert_path(&throttled, &["call", "backoff"]);

    let upstream = engine.execute_pipeline(&pipeline, None).await;
    assert_path(&upstream, &["call", "alert"]);
}

/// An expression that errors at run time fails the execution but keeps
/// what already ran
#[tokio::test]
async fn test_expression_error_fails_execution() {
    let pipeline = PipelineBuilder::new("Test: Bad Arithmetic")
        .with_step(
            StepBuilder::new("ratio", "measure")
                .when("high", "result.total / state.divisor > 1", "left")
                .build(),
        )
        .with_step(StepBuilder::new("left", "left").build())
        .with_start_step("ratio")
        .with_global_state("divisor", json!(0))
        .build()
        .unwrap();

    let tools = Arc::new(endpoints(
        MockTools::new().always("measure", Reply::Ok(json!({"total": 10}))),
    ));
    let state = PipelineExecutor::new(tools)
        .execute_pipeline(&pipeline, None)
        .await;

    assert_failed_with(&state, "EXPRESSION_ERROR");
    assert!(state.results["ratio"].success);
    assert_path(&state, &["ratio"]);
}

/// An oversized condition in a stored definition fails only its own run
#[tokio::test]
async fn test_oversized_condition_fails_execution() {
    let mut pipeline = PipelineBuilder::new("Test: Oversized Condition")
        .with_step(StepBuilder::new("check", "check").next("right").build())
        .with_step(StepBuilder::new("right", "right").build())
        .with_start_step("check")
        .build()
        .unwrap();
    // Definitions imported from storage skip builder validation
    pipeline
        .step_mut("check")
        .unwrap()
        .next
        .conditions
        .push(ConditionalBranch {
            name: None,
            condition: vec!["success"; 100_000].join(" && "),
            target: "left".to_string(),
        });

    let tools = Arc::new(endpoints(MockTools::new().always("check", Reply::Ok(json!({})))));
    let engine = PipelineExecutor::new(tools.clone());
    let state = engine.execute_pipeline(&pipeline, None).await;

    assert_failed_with(&state, "EXPRESSION_ERROR");
    assert!(state.error.as_ref().unwrap().message.contains("too complex"));
    assert_eq!(tools.calls_to("left"), 0);
}
